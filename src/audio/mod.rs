//! Real-time audio capture, voice activity detection and playback.
//!
//! Microphone audio arrives through cpal, is normalized to mono 16-bit PCM at
//! the capture rate, and is driven chunk by chunk through the
//! [`CaptureEngine`], which gates it on speech and forwards it to a
//! [`CaptureEventHandler`].

/// Capture and playback rate of the realtime session.
pub const DEFAULT_SAMPLE_RATE: u32 = 24_000;

/// Samples per capture chunk.
pub const DEFAULT_FRAMES_PER_BUFFER: usize = 1024;

mod capture;
mod crossfade;
mod device;
pub mod pcm;
mod player;
mod preroll;
mod resample;
pub mod vad;
mod wave;

pub use capture::{
    build_vad, CaptureEngine, CaptureEventHandler, CaptureSettings, CaptureStats, ChunkOutcome,
    DropReason, StreamStatus,
};
pub use device::{list_input_devices, warm_up_input_device, AudioCapture};
pub use player::AudioPlayer;
pub use preroll::PreRollBuffer;
pub use vad::{build_detector, VadError, VadParams, VadVerdict, VoiceActivityDetector};
pub use wave::{WaveSidecar, DEFAULT_WAVE_CAPTURE_FILE};
