use super::sender::AudioSendPipeline;
use super::state::{ConversationState, ConversationStateMachine};
use crate::audio::CaptureEventHandler;
use crate::keyword::KeywordMatch;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Bridges capture events to the state machine and the send queue.
pub struct RealtimeCaptureHandler {
    machine: Arc<ConversationStateMachine>,
    sender: Arc<AudioSendPipeline>,
    // With a local detector, audio only leaves while a conversation is open.
    vad_gating: AtomicBool,
}

impl RealtimeCaptureHandler {
    pub fn new(machine: Arc<ConversationStateMachine>, sender: Arc<AudioSendPipeline>) -> Self {
        Self {
            machine,
            sender,
            vad_gating: AtomicBool::new(true),
        }
    }

    pub fn set_vad_gating(&self, enabled: bool) {
        self.vad_gating.store(enabled, Ordering::Release);
    }

    pub fn vad_gating(&self) -> bool {
        self.vad_gating.load(Ordering::Acquire)
    }
}

impl CaptureEventHandler for RealtimeCaptureHandler {
    fn send_audio_data(&self, audio: Vec<u8>) {
        if self.vad_gating() && self.machine.state() != ConversationState::ConversationActive {
            return;
        }
        self.sender.enqueue(audio);
    }

    fn on_speech_start(&self) {
        self.machine.on_speech_start();
    }

    fn on_speech_end(&self) {
        self.machine.on_speech_end();
    }

    fn on_keyword_detected(&self, result: KeywordMatch) {
        self.machine.on_keyword_detected(&result);
    }
}
