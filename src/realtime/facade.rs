//! Application-facing owner of the realtime audio pipeline.

use super::handler::RealtimeCaptureHandler;
use super::sender::{AudioSendPipeline, SendQueueSettings};
use super::session::{PlaybackControl, RealtimeSession};
use super::state::{ConversationSettings, ConversationState, ConversationStateMachine};
use crate::audio::{warm_up_input_device, AudioCapture, CaptureEventHandler, CaptureSettings};
use crate::keyword::KeywordModelLoader;
use crate::offload::WorkerPool;
use anyhow::{bail, Result};
use std::sync::Arc;
use std::time::Duration;

const WARM_UP_RATES: [u32; 3] = [24_000, 48_000, 44_100];
const WARM_UP_DURATION: Duration = Duration::from_millis(150);

#[derive(Debug, Clone, Default)]
pub struct RealtimeAudioConfig {
    /// `None` runs playback and the send path without a microphone.
    pub capture: Option<CaptureSettings>,
    pub send_queue: SendQueueSettings,
    pub conversation: ConversationSettings,
}

pub struct RealtimeAudio {
    session: Arc<dyn RealtimeSession>,
    player: Arc<dyn PlaybackControl>,
    machine: Arc<ConversationStateMachine>,
    sender: Arc<AudioSendPipeline>,
    handler: Arc<RealtimeCaptureHandler>,
    capture: Option<AudioCapture>,
    keyword_loader: Option<Arc<dyn KeywordModelLoader>>,
    offload: WorkerPool,
    config: RealtimeAudioConfig,
    warmed_up: bool,
    closed: bool,
}

impl RealtimeAudio {
    pub fn new(
        session: Arc<dyn RealtimeSession>,
        player: Arc<dyn PlaybackControl>,
        config: RealtimeAudioConfig,
        keyword_loader: Option<Arc<dyn KeywordModelLoader>>,
    ) -> Result<Self> {
        let offload = WorkerPool::with_defaults("rt-offload")?;
        let machine = ConversationStateMachine::new(
            Arc::clone(&session),
            Arc::clone(&player),
            offload.clone(),
            config.conversation,
        )?;
        let sender = Arc::new(AudioSendPipeline::new(config.send_queue, Arc::clone(&session)));
        let handler = Arc::new(RealtimeCaptureHandler::new(
            Arc::clone(&machine),
            Arc::clone(&sender),
        ));
        let mut audio = Self {
            session,
            player,
            machine,
            sender,
            handler,
            capture: None,
            keyword_loader,
            offload,
            config,
            warmed_up: false,
            closed: false,
        };
        audio.rebuild_capture()?;
        Ok(audio)
    }

    pub fn start(&mut self) -> Result<()> {
        if self.closed {
            bail!("realtime audio has been closed");
        }
        self.player.start()?;
        if !self.warmed_up && self.capture.is_some() {
            warm_up_input_device(&WARM_UP_RATES, WARM_UP_DURATION);
            self.warmed_up = true;
        }
        self.sender.start()?;
        if let Some(capture) = self.capture.as_mut() {
            if let Err(err) = capture.start() {
                self.sender.stop();
                self.player.stop();
                return Err(err);
            }
        }
        tracing::info!(
            capture = self.capture.is_some(),
            vad = self.handler.vad_gating(),
            keyword = self.machine.has_keyword(),
            "realtime audio started"
        );
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(capture) = self.capture.as_mut() {
            if capture.is_running() {
                capture.stop(false);
            }
        }
        self.machine.force_idle();
        self.player.stop();
        self.sender.stop();
        tracing::info!("realtime audio stopped");
    }

    /// Replace the capture configuration. The old capture is closed and a new
    /// one built; a running pipeline restarts capture with the new settings.
    pub fn update(&mut self, capture: Option<CaptureSettings>) -> Result<()> {
        let was_running = self.capture.as_ref().is_some_and(AudioCapture::is_running);
        if let Some(mut old) = self.capture.take() {
            if old.is_running() {
                old.close();
            }
        }
        self.machine.force_idle();
        self.config.capture = capture;
        self.rebuild_capture()?;
        if was_running {
            if let Some(capture) = self.capture.as_mut() {
                capture.start()?;
            }
        }
        tracing::info!(was_running, "realtime audio capture reconfigured");
        Ok(())
    }

    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.stop();
        self.capture = None;
        self.machine.set_keyword_switch(None);
    }

    pub fn state(&self) -> ConversationState {
        self.machine.state()
    }

    pub fn machine(&self) -> &Arc<ConversationStateMachine> {
        &self.machine
    }

    pub fn sender(&self) -> &Arc<AudioSendPipeline> {
        &self.sender
    }

    pub fn capture_handler(&self) -> &Arc<RealtimeCaptureHandler> {
        &self.handler
    }

    pub fn capture(&self) -> Option<&AudioCapture> {
        self.capture.as_ref()
    }

    pub fn session(&self) -> &Arc<dyn RealtimeSession> {
        &self.session
    }

    pub fn config(&self) -> &RealtimeAudioConfig {
        &self.config
    }

    fn rebuild_capture(&mut self) -> Result<()> {
        let Some(settings) = self.config.capture.clone() else {
            self.handler.set_vad_gating(false);
            self.machine.set_keyword_switch(None);
            return Ok(());
        };
        let handler: Arc<dyn CaptureEventHandler> = self.handler.clone();
        let capture = AudioCapture::new(
            settings,
            handler,
            self.keyword_loader.as_deref(),
            self.offload.clone(),
        )?;
        self.handler.set_vad_gating(capture.has_vad());
        self.machine.set_keyword_switch(capture.keyword_switch());
        self.capture = Some(capture);
        Ok(())
    }
}

impl Drop for RealtimeAudio {
    fn drop(&mut self) {
        self.close();
    }
}
