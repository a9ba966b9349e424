//! Collaborators the realtime pipeline drives but does not own.

use anyhow::Result;

/// Streaming voice session on the remote side.
///
/// Calls are made from offload workers and the sender thread, never from the
/// audio callback.
pub trait RealtimeSession: Send + Sync {
    fn send_audio(&self, audio: &[u8]) -> Result<()>;
    fn clear_input_audio_buffer(&self) -> Result<()>;
    fn cancel_response(&self) -> Result<()>;
    fn generate_response(&self) -> Result<()>;
    /// True when the remote end runs its own turn detection.
    fn server_turn_detection(&self) -> bool;
    fn is_function_processing(&self) -> bool {
        false
    }
    /// Observer hook fired whenever keyword detection is armed or disarmed.
    fn on_keyword_armed(&self, _armed: bool) {}
}

/// Local playback as seen by the conversation state machine.
pub trait PlaybackControl: Send + Sync {
    /// Must be cheap; it is polled from the audio callback.
    fn is_audio_playing(&self) -> bool;
    /// Drop queued audio so a barge-in silences the assistant immediately.
    fn drain_and_restart(&self);
    fn start(&self) -> Result<()> {
        Ok(())
    }
    fn stop(&self) {}
}
