use super::defaults::{MAX_DEVICE_NAME_LEN, MAX_RUN_SECONDS, MAX_SEND_QUEUE};
use super::{AppConfig, VadEngineKind};
use anyhow::{bail, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

const MIN_SAMPLE_RATE: u32 = 8_000;
const MAX_SAMPLE_RATE: u32 = 96_000;
const MAX_FRAMES_PER_BUFFER: usize = 16_384;
const MAX_BUFFER_DURATION_SEC: f32 = 30.0;
const MAX_CROSS_FADE_MS: u32 = 500;
const MAX_OVERFLOW_LOG_SEC: f32 = 3600.0;
const MAX_REARM_SEC: f32 = 3600.0;

impl AppConfig {
    /// Parse CLI arguments and validate them right away.
    pub fn parse_args() -> Result<Self> {
        let mut config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    /// Check CLI values and normalize optional paths.
    pub fn validate(&mut self) -> Result<()> {
        if !(1..=MAX_RUN_SECONDS).contains(&self.seconds) {
            bail!(
                "--seconds must be between 1 and {MAX_RUN_SECONDS}, got {}",
                self.seconds
            );
        }
        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&self.sample_rate) {
            bail!(
                "--sample-rate must be between {MIN_SAMPLE_RATE} and {MAX_SAMPLE_RATE} Hz, got {}",
                self.sample_rate
            );
        }
        if !(1..=MAX_FRAMES_PER_BUFFER).contains(&self.frames_per_buffer) {
            bail!(
                "--frames-per-buffer must be between 1 and {MAX_FRAMES_PER_BUFFER}, got {}",
                self.frames_per_buffer
            );
        }
        if !(self.buffer_duration_sec.is_finite()
            && (0.0..=MAX_BUFFER_DURATION_SEC).contains(&self.buffer_duration_sec))
        {
            bail!(
                "--buffer-duration-sec must be between 0 and {MAX_BUFFER_DURATION_SEC}, got {}",
                self.buffer_duration_sec
            );
        }
        if self.cross_fade_ms > MAX_CROSS_FADE_MS {
            bail!(
                "--cross-fade-ms must be <= {MAX_CROSS_FADE_MS}, got {}",
                self.cross_fade_ms
            );
        }
        if !(1..=MAX_SEND_QUEUE).contains(&self.send_queue_max) {
            bail!(
                "--send-queue-max must be between 1 and {MAX_SEND_QUEUE}, got {}",
                self.send_queue_max
            );
        }
        if !(self.send_overflow_log_sec.is_finite()
            && self.send_overflow_log_sec > 0.0
            && self.send_overflow_log_sec <= MAX_OVERFLOW_LOG_SEC)
        {
            bail!(
                "--send-overflow-log-sec must be within (0, {MAX_OVERFLOW_LOG_SEC}], got {}",
                self.send_overflow_log_sec
            );
        }
        if !(self.keyword_rearm_sec.is_finite()
            && self.keyword_rearm_sec > 0.0
            && self.keyword_rearm_sec <= MAX_REARM_SEC)
        {
            bail!(
                "--keyword-rearm-sec must be within (0, {MAX_REARM_SEC}], got {}",
                self.keyword_rearm_sec
            );
        }

        self.validate_vad()?;

        if let Some(device) = &self.input_device {
            let trimmed = device.trim();
            if trimmed.is_empty()
                || trimmed.len() > MAX_DEVICE_NAME_LEN
                || trimmed.chars().any(char::is_control)
            {
                bail!("--input-device must be 1-{MAX_DEVICE_NAME_LEN} characters with no control characters");
            }
            self.input_device = Some(trimmed.to_string());
        }

        if let Some(path) = &self.wave_capture {
            if path.as_os_str().is_empty() {
                self.wave_capture = None;
            }
        }

        if let Some(path) = &self.replay_pcm {
            if !path.is_file() {
                bail!("--replay-pcm {} does not exist", path.display());
            }
        }

        if self.no_logs {
            self.log_stderr = false;
        } else if EnvFilter::try_new(&self.log_level).is_err() {
            bail!("--log-level is not a valid filter directive: {}", self.log_level);
        }

        Ok(())
    }

    fn validate_vad(&mut self) -> Result<()> {
        if self.vad_engine == VadEngineKind::Off {
            return Ok(());
        }
        if !(self.vad_window_sec.is_finite() && self.vad_window_sec > 0.0) {
            bail!("--vad-window-sec must be positive, got {}", self.vad_window_sec);
        }
        if !(self.vad_silence_ratio.is_finite() && self.vad_silence_ratio >= 1.0) {
            bail!("--vad-silence-ratio must be >= 1.0, got {}", self.vad_silence_ratio);
        }
        if !(self.vad_min_energy.is_finite() && self.vad_min_energy >= 0.0) {
            bail!("--vad-min-energy cannot be negative, got {}", self.vad_min_energy);
        }
        for (flag, value) in [
            ("--vad-min-speech-sec", self.vad_min_speech_sec),
            ("--vad-min-silence-sec", self.vad_min_silence_sec),
        ] {
            if !(value.is_finite() && (0.0..=10.0).contains(&value)) {
                bail!("{flag} must be between 0 and 10 seconds, got {value}");
            }
        }
        if !(0.0..=1.0).contains(&self.vad_threshold) {
            bail!("--vad-threshold must be between 0.0 and 1.0, got {}", self.vad_threshold);
        }
        if !(64..=4096).contains(&self.vad_window_samples) {
            bail!(
                "--vad-window-samples must be between 64 and 4096, got {}",
                self.vad_window_samples
            );
        }
        if self.vad_engine == VadEngineKind::Neural {
            match &self.vad_model {
                None => bail!("--vad-engine neural requires --vad-model"),
                Some(path) if !path.is_file() => {
                    bail!("--vad-model {} does not exist", path.display())
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}
