use super::VadEngineKind;
use std::env;
use std::path::PathBuf;

pub const DEFAULT_SEND_QUEUE_MAX: usize = crate::realtime::DEFAULT_SEND_QUEUE_MAX;
pub const DEFAULT_SEND_OVERFLOW_LOG_SEC: f32 = 5.0;
pub const DEFAULT_SAMPLE_RATE: u32 = crate::audio::DEFAULT_SAMPLE_RATE;
pub const DEFAULT_FRAMES_PER_BUFFER: usize = crate::audio::DEFAULT_FRAMES_PER_BUFFER;
pub const DEFAULT_BUFFER_DURATION_SEC: f32 = 1.0;
pub const DEFAULT_CROSS_FADE_MS: u32 = 20;
pub const DEFAULT_VAD_WINDOW_SEC: f32 = 1.5;
pub const DEFAULT_VAD_SILENCE_RATIO: f32 = 1.5;
pub const DEFAULT_VAD_MIN_ENERGY: f32 = 150.0;
pub const DEFAULT_VAD_MIN_SPEECH_SEC: f32 = 0.3;
pub const DEFAULT_VAD_MIN_SILENCE_SEC: f32 = 1.0;
pub const DEFAULT_VAD_THRESHOLD: f32 = 0.5;
pub const DEFAULT_VAD_WINDOW_SAMPLES: usize = 512;
pub const DEFAULT_KEYWORD_REARM_SEC: f32 = 10.0;
pub const DEFAULT_RUN_SECONDS: u64 = 10;

pub(super) const MAX_SEND_QUEUE: usize = 4096;
pub(super) const MAX_RUN_SECONDS: u64 = 3600;
pub(super) const MAX_DEVICE_NAME_LEN: usize = 256;
pub(super) const TRACE_LOG_FILE: &str = "rtvoice_trace.jsonl";

pub const fn default_vad_engine() -> VadEngineKind {
    VadEngineKind::Energy
}

pub(super) fn default_trace_log() -> PathBuf {
    env::temp_dir().join(TRACE_LOG_FILE)
}
