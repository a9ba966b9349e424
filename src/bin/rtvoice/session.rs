//! Stand-in collaborators for running the pipeline without a remote service.

use anyhow::Result;
use rtvoice::audio::AudioPlayer;
use rtvoice::realtime::{PlaybackControl, RealtimeSession};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Session that accepts audio and logs every control request. With an echo
/// player, sent audio is queued for local playback in place of a reply.
pub(crate) struct LoggingSession {
    server_turns: bool,
    echo: Option<Arc<AudioPlayer>>,
    chunks: AtomicU64,
    bytes: AtomicU64,
    responses: AtomicU64,
    interrupts: AtomicU64,
}

#[derive(Debug, Serialize)]
pub(crate) struct SessionCounters {
    pub sent_chunks: u64,
    pub sent_bytes: u64,
    pub responses_requested: u64,
    pub responses_cancelled: u64,
}

impl LoggingSession {
    pub(crate) fn new(server_turns: bool, echo: Option<Arc<AudioPlayer>>) -> Self {
        Self {
            server_turns,
            echo,
            chunks: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            responses: AtomicU64::new(0),
            interrupts: AtomicU64::new(0),
        }
    }

    pub(crate) fn counters(&self) -> SessionCounters {
        SessionCounters {
            sent_chunks: self.chunks.load(Ordering::Relaxed),
            sent_bytes: self.bytes.load(Ordering::Relaxed),
            responses_requested: self.responses.load(Ordering::Relaxed),
            responses_cancelled: self.interrupts.load(Ordering::Relaxed),
        }
    }
}

impl RealtimeSession for LoggingSession {
    fn send_audio(&self, audio: &[u8]) -> Result<()> {
        self.chunks.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(audio.len() as u64, Ordering::Relaxed);
        tracing::trace!(bytes = audio.len(), "session: audio chunk");
        if let Some(player) = self.echo.as_ref() {
            player.enqueue_audio(audio)?;
        }
        Ok(())
    }

    fn clear_input_audio_buffer(&self) -> Result<()> {
        tracing::info!("session: clear input audio buffer");
        Ok(())
    }

    fn cancel_response(&self) -> Result<()> {
        self.interrupts.fetch_add(1, Ordering::Relaxed);
        tracing::info!("session: cancel response");
        Ok(())
    }

    fn generate_response(&self) -> Result<()> {
        self.responses.fetch_add(1, Ordering::Relaxed);
        tracing::info!("session: generate response");
        Ok(())
    }

    fn server_turn_detection(&self) -> bool {
        self.server_turns
    }

    fn on_keyword_armed(&self, armed: bool) {
        tracing::info!(armed, "session: keyword detection toggled");
    }
}

/// Playback that never has anything queued.
pub(crate) struct NullPlayback;

impl PlaybackControl for NullPlayback {
    fn is_audio_playing(&self) -> bool {
        false
    }

    fn drain_and_restart(&self) {}
}
