//! Command-line parsing and validation helpers.

mod defaults;
#[cfg(test)]
mod tests;
mod validation;

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::audio::{CaptureSettings, VadParams};
use crate::realtime::{
    ConversationSettings, RealtimeAudioConfig, SendQueueSettings, DEFAULT_KEYWORD_REARM_TIMEOUT,
    DEFAULT_OVERFLOW_LOG_INTERVAL,
};
pub use defaults::{
    default_vad_engine, DEFAULT_BUFFER_DURATION_SEC, DEFAULT_CROSS_FADE_MS,
    DEFAULT_FRAMES_PER_BUFFER, DEFAULT_KEYWORD_REARM_SEC, DEFAULT_RUN_SECONDS,
    DEFAULT_SAMPLE_RATE, DEFAULT_SEND_OVERFLOW_LOG_SEC, DEFAULT_SEND_QUEUE_MAX,
    DEFAULT_VAD_MIN_ENERGY, DEFAULT_VAD_MIN_SILENCE_SEC, DEFAULT_VAD_MIN_SPEECH_SEC,
    DEFAULT_VAD_SILENCE_RATIO, DEFAULT_VAD_THRESHOLD, DEFAULT_VAD_WINDOW_SAMPLES,
    DEFAULT_VAD_WINDOW_SEC,
};
use std::time::Duration;

/// CLI options for the realtime voice pipeline.
#[derive(Debug, Parser, Clone)]
#[command(name = "rtvoice", about = "Realtime voice capture pipeline", author, version)]
pub struct AppConfig {
    /// Preferred audio input device name
    #[arg(long)]
    pub input_device: Option<String>,

    /// Print detected audio input devices and exit
    #[arg(long = "list-input-devices", default_value_t = false)]
    pub list_input_devices: bool,

    /// How long to run the capture session (seconds)
    #[arg(long, default_value_t = DEFAULT_RUN_SECONDS)]
    pub seconds: u64,

    /// Capture sample rate (Hz); capture is always mono 16-bit
    #[arg(long = "sample-rate", default_value_t = DEFAULT_SAMPLE_RATE)]
    pub sample_rate: u32,

    /// Samples per capture chunk
    #[arg(long = "frames-per-buffer", default_value_t = DEFAULT_FRAMES_PER_BUFFER)]
    pub frames_per_buffer: usize,

    /// Pre-roll kept ahead of speech onset (seconds)
    #[arg(long = "buffer-duration-sec", default_value_t = DEFAULT_BUFFER_DURATION_SEC)]
    pub buffer_duration_sec: f32,

    /// Cross-fade applied where pre-roll meets the onset chunk (milliseconds)
    #[arg(long = "cross-fade-ms", default_value_t = DEFAULT_CROSS_FADE_MS)]
    pub cross_fade_ms: u32,

    /// Local voice activity detector (off forwards every chunk)
    #[arg(
        long = "vad-engine",
        value_enum,
        default_value_t = default_vad_engine()
    )]
    pub vad_engine: VadEngineKind,

    /// Noise-floor history for the energy detector (seconds)
    #[arg(long = "vad-window-sec", default_value_t = DEFAULT_VAD_WINDOW_SEC)]
    pub vad_window_sec: f32,

    /// Energy above noise floor that counts as speech
    #[arg(long = "vad-silence-ratio", default_value_t = DEFAULT_VAD_SILENCE_RATIO)]
    pub vad_silence_ratio: f32,

    /// Lower bound for the energy detector's noise floor (16-bit RMS)
    #[arg(long = "vad-min-energy", default_value_t = DEFAULT_VAD_MIN_ENERGY)]
    pub vad_min_energy: f32,

    /// Speech needed before a speech start is reported (seconds)
    #[arg(long = "vad-min-speech-sec", default_value_t = DEFAULT_VAD_MIN_SPEECH_SEC)]
    pub vad_min_speech_sec: f32,

    /// Silence needed before a speech end is reported (seconds)
    #[arg(long = "vad-min-silence-sec", default_value_t = DEFAULT_VAD_MIN_SILENCE_SEC)]
    pub vad_min_silence_sec: f32,

    /// Speech probability threshold for the neural detector
    #[arg(long = "vad-threshold", default_value_t = DEFAULT_VAD_THRESHOLD)]
    pub vad_threshold: f32,

    /// Neural detector inference window (samples at 16 kHz)
    #[arg(long = "vad-window-samples", default_value_t = DEFAULT_VAD_WINDOW_SAMPLES)]
    pub vad_window_samples: usize,

    /// ONNX model for the neural detector
    #[arg(long = "vad-model")]
    pub vad_model: Option<PathBuf>,

    /// Silence after which keyword detection is re-armed (seconds)
    #[arg(long = "keyword-rearm-sec", default_value_t = DEFAULT_KEYWORD_REARM_SEC)]
    pub keyword_rearm_sec: f32,

    /// Remote end runs its own turn detection
    #[arg(long = "server-turn-detection", default_value_t = false)]
    pub server_turn_detection: bool,

    /// Mirror captured audio into a 16-bit PCM WAV file
    #[arg(long = "wave-capture")]
    pub wave_capture: Option<PathBuf>,

    /// Feed a raw 16-bit little-endian mono PCM file (at --sample-rate)
    /// through the pipeline instead of the microphone
    #[arg(long = "replay-pcm")]
    pub replay_pcm: Option<PathBuf>,

    /// Play audio sent to the session back through the default output device
    #[arg(long = "echo-playback", default_value_t = false)]
    pub echo_playback: bool,

    /// Chunks buffered between capture and the network sender
    #[arg(
        long = "send-queue-max",
        env = "AZAI_AUDIO_SEND_QUEUE_MAX",
        default_value_t = DEFAULT_SEND_QUEUE_MAX
    )]
    pub send_queue_max: usize,

    /// Minimum spacing between send-queue overflow warnings (seconds)
    #[arg(
        long = "send-overflow-log-sec",
        env = "AZAI_AUDIO_SEND_OVERFLOW_LOG_SEC",
        default_value_t = DEFAULT_SEND_OVERFLOW_LOG_SEC
    )]
    pub send_overflow_log_sec: f32,

    /// Trace log destination (JSON lines)
    #[arg(long = "log-file", env = "RTVOICE_TRACE_LOG")]
    pub log_file: Option<PathBuf>,

    /// Write human-readable logs to stderr instead of the trace file
    #[arg(long = "log-stderr", default_value_t = false)]
    pub log_stderr: bool,

    /// Log filter directive (e.g. "info", "rtvoice=debug")
    #[arg(long = "log-level", env = "RTVOICE_LOG", default_value = "info")]
    pub log_level: String,

    /// Disable all logging
    #[arg(long = "no-logs", env = "RTVOICE_NO_LOGS", default_value_t = false)]
    pub no_logs: bool,
}

/// Available runtime-selectable VAD implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum VadEngineKind {
    Energy,
    Neural,
    Off,
}

impl VadEngineKind {
    pub fn label(self) -> &'static str {
        match self {
            VadEngineKind::Energy => "energy",
            VadEngineKind::Neural => "neural",
            VadEngineKind::Off => "off",
        }
    }
}

impl AppConfig {
    /// Detector parameters, or `None` when local VAD is off.
    pub fn vad_params(&self) -> Option<VadParams> {
        let model_path = match self.vad_engine {
            VadEngineKind::Off => return None,
            VadEngineKind::Energy => None,
            VadEngineKind::Neural => self.vad_model.clone(),
        };
        Some(VadParams {
            sample_rate: self.sample_rate,
            chunk_size: self.frames_per_buffer,
            window_duration: self.vad_window_sec,
            silence_ratio: self.vad_silence_ratio,
            min_energy: self.vad_min_energy,
            threshold: self.vad_threshold,
            window_size_samples: self.vad_window_samples,
            min_speech_duration: self.vad_min_speech_sec,
            min_silence_duration: self.vad_min_silence_sec,
            model_path,
        })
    }

    pub fn capture_settings(&self) -> CaptureSettings {
        CaptureSettings {
            sample_rate: self.sample_rate,
            frames_per_buffer: self.frames_per_buffer,
            buffer_duration_sec: self.buffer_duration_sec,
            cross_fade_ms: self.cross_fade_ms,
            vad: self.vad_params(),
            keyword_model: None,
            wave_capture: self.wave_capture.clone(),
            input_device: self.input_device.clone(),
        }
    }

    pub fn send_queue_settings(&self) -> SendQueueSettings {
        SendQueueSettings {
            max_chunks: self.send_queue_max,
            overflow_log_interval: Duration::try_from_secs_f32(self.send_overflow_log_sec)
                .unwrap_or(DEFAULT_OVERFLOW_LOG_INTERVAL),
        }
    }

    pub fn conversation_settings(&self) -> ConversationSettings {
        ConversationSettings {
            rearm_timeout: Duration::try_from_secs_f32(self.keyword_rearm_sec)
                .unwrap_or(DEFAULT_KEYWORD_REARM_TIMEOUT),
        }
    }

    pub fn realtime_config(&self) -> RealtimeAudioConfig {
        RealtimeAudioConfig {
            capture: Some(self.capture_settings()),
            send_queue: self.send_queue_settings(),
            conversation: self.conversation_settings(),
        }
    }

    /// Where the JSON trace log goes when stderr logging is not selected.
    pub fn trace_log_path(&self) -> PathBuf {
        self.log_file
            .clone()
            .unwrap_or_else(defaults::default_trace_log)
    }
}
