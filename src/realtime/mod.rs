//! Conversation layer between the capture engine and a remote voice session.
//!
//! Capture events flow through [`RealtimeCaptureHandler`] into the
//! [`ConversationStateMachine`], and speech audio into the
//! [`AudioSendPipeline`]. [`RealtimeAudio`] wires the pieces together and
//! owns their lifecycle.

mod facade;
mod handler;
mod sender;
mod session;
mod state;

pub use facade::{RealtimeAudio, RealtimeAudioConfig};
pub use handler::RealtimeCaptureHandler;
pub use sender::{
    AudioSendPipeline, SendQueueSettings, DEFAULT_OVERFLOW_LOG_INTERVAL, DEFAULT_SEND_QUEUE_MAX,
};
pub use session::{PlaybackControl, RealtimeSession};
pub use state::{
    ConversationSettings, ConversationState, ConversationStateMachine,
    DEFAULT_KEYWORD_REARM_TIMEOUT,
};
