//! Voice Activity Detection (VAD) for speech/silence classification.
//!
//! Each detector classifies one capture chunk at a time and runs the result
//! through a [`SpeechGate`], which applies minimum speech/silence durations so
//! a single spurious chunk never toggles the speech state.

mod energy;
#[cfg(feature = "neural-vad")]
mod neural;
#[cfg(test)]
mod tests;
#[cfg_attr(not(feature = "neural-vad"), allow(dead_code))]
mod window;

use std::path::{Path, PathBuf};

pub use energy::EnergyRatioVad;
#[cfg(feature = "neural-vad")]
pub use neural::NeuralVad;

/// Errors raised while building or running a detector.
#[derive(Debug, thiserror::Error)]
pub enum VadError {
    #[error("invalid VAD parameters: {0}")]
    InvalidParameters(String),
    #[error("failed to load VAD model {path}: {reason}")]
    ModelLoad { path: PathBuf, reason: String },
    #[error("VAD inference failed: {0}")]
    Inference(String),
    #[error("neural VAD requested for {0} but this build lacks the 'neural-vad' feature")]
    NeuralUnavailable(PathBuf),
}

/// Immutable configuration bundle for a detector.
///
/// A non-empty `model_path` selects the neural detector; otherwise the energy
/// ratio detector is used. Reconfiguration builds a fresh detector.
#[derive(Debug, Clone, PartialEq)]
pub struct VadParams {
    pub sample_rate: u32,
    pub chunk_size: usize,
    /// Energy detector: seconds of non-speech history feeding the noise floor.
    pub window_duration: f32,
    /// Energy detector: a chunk is speech when its RMS exceeds floor * ratio.
    pub silence_ratio: f32,
    /// Energy detector: lower bound for the noise floor (16-bit RMS units).
    pub min_energy: f32,
    /// Neural detector: speech probability threshold.
    pub threshold: f32,
    /// Neural detector: inference window in samples at the model rate.
    pub window_size_samples: usize,
    pub min_speech_duration: f32,
    pub min_silence_duration: f32,
    pub model_path: Option<PathBuf>,
}

impl Default for VadParams {
    fn default() -> Self {
        Self {
            sample_rate: crate::audio::DEFAULT_SAMPLE_RATE,
            chunk_size: crate::audio::DEFAULT_FRAMES_PER_BUFFER,
            window_duration: 1.5,
            silence_ratio: 1.5,
            min_energy: 150.0,
            threshold: 0.5,
            window_size_samples: 512,
            min_speech_duration: 0.3,
            min_silence_duration: 1.0,
            model_path: None,
        }
    }
}

impl VadParams {
    /// Path of the neural model, if one is configured and non-blank.
    pub fn neural_model(&self) -> Option<&Path> {
        self.model_path
            .as_deref()
            .filter(|path| !path.as_os_str().to_string_lossy().trim().is_empty())
    }

    pub fn validate(&self) -> Result<(), VadError> {
        if self.sample_rate == 0 {
            return Err(VadError::InvalidParameters("sample_rate must be > 0".into()));
        }
        if self.chunk_size == 0 {
            return Err(VadError::InvalidParameters("chunk_size must be > 0".into()));
        }
        if !(self.silence_ratio.is_finite() && self.silence_ratio > 0.0) {
            return Err(VadError::InvalidParameters(format!(
                "silence_ratio must be positive, got {}",
                self.silence_ratio
            )));
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(VadError::InvalidParameters(format!(
                "threshold must be within 0.0..=1.0, got {}",
                self.threshold
            )));
        }
        if self.min_speech_duration < 0.0 || self.min_silence_duration < 0.0 {
            return Err(VadError::InvalidParameters(
                "minimum speech/silence durations cannot be negative".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn seconds_to_samples(&self, seconds: f32) -> usize {
        (f64::from(seconds.max(0.0)) * f64::from(self.sample_rate)).round() as usize
    }
}

/// Per-chunk detector output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VadVerdict {
    /// True exactly on the chunk where the gated speech state flips.
    pub boundary: bool,
    /// Instantaneous classification of this chunk.
    pub is_speech: bool,
    /// Gated speech state after this chunk.
    pub active: bool,
}

impl VadVerdict {
    pub fn speech_started(&self) -> bool {
        self.boundary && self.active
    }

    pub fn speech_ended(&self) -> bool {
        self.boundary && !self.active
    }
}

/// Hysteresis over raw per-chunk classifications.
///
/// Speech begins once consecutive speech reaches `min_speech` samples and ends
/// once consecutive non-speech reaches `min_silence` samples.
#[derive(Debug, Clone)]
pub struct SpeechGate {
    min_speech: usize,
    min_silence: usize,
    speech_run: usize,
    silence_run: usize,
    active: bool,
}

impl SpeechGate {
    pub fn new(min_speech_samples: usize, min_silence_samples: usize) -> Self {
        Self {
            min_speech: min_speech_samples,
            min_silence: min_silence_samples,
            speech_run: 0,
            silence_run: 0,
            active: false,
        }
    }

    pub fn from_params(params: &VadParams) -> Self {
        Self::new(
            params.seconds_to_samples(params.min_speech_duration),
            params.seconds_to_samples(params.min_silence_duration),
        )
    }

    pub fn update(&mut self, is_speech: bool, samples: usize) -> VadVerdict {
        let mut boundary = false;
        if is_speech {
            self.silence_run = 0;
            self.speech_run = self.speech_run.saturating_add(samples);
            if !self.active && self.speech_run >= self.min_speech {
                self.active = true;
                boundary = true;
            }
        } else {
            self.speech_run = 0;
            if self.active {
                self.silence_run = self.silence_run.saturating_add(samples);
                if self.silence_run >= self.min_silence {
                    self.active = false;
                    self.silence_run = 0;
                    boundary = true;
                }
            }
        }
        VadVerdict {
            boundary,
            is_speech,
            active: self.active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn reset(&mut self) {
        self.speech_run = 0;
        self.silence_run = 0;
        self.active = false;
    }
}

/// Chunk classifier callable from the audio callback.
///
/// Implementations should avoid per-call allocation on the steady-state path
/// and accept chunks of any length, accumulating internally when their model
/// needs a fixed window.
pub trait VoiceActivityDetector: Send {
    fn process_audio_chunk(&mut self, chunk: &[i16]) -> Result<VadVerdict, VadError>;
    fn reset(&mut self);
    fn name(&self) -> &'static str {
        "unknown_vad"
    }
}

/// Build the detector selected by `params`.
///
/// Model load failures surface as errors; callers fall back to running
/// without a detector.
pub fn build_detector(params: &VadParams) -> Result<Box<dyn VoiceActivityDetector>, VadError> {
    params.validate()?;
    match params.neural_model() {
        Some(path) => build_neural(params, path),
        None => Ok(Box::new(EnergyRatioVad::new(params))),
    }
}

#[cfg(feature = "neural-vad")]
fn build_neural(
    params: &VadParams,
    path: &Path,
) -> Result<Box<dyn VoiceActivityDetector>, VadError> {
    Ok(Box::new(NeuralVad::load(params, path)?))
}

#[cfg(not(feature = "neural-vad"))]
fn build_neural(
    _params: &VadParams,
    path: &Path,
) -> Result<Box<dyn VoiceActivityDetector>, VadError> {
    Err(VadError::NeuralUnavailable(path.to_path_buf()))
}
