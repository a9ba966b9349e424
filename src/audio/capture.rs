//! Per-callback capture engine.
//!
//! [`CaptureEngine`] is driven once per device callback with a chunk of mono
//! 16-bit samples. It runs the detector, keeps the pre-roll ring current,
//! splices the pre-roll into the first chunk of a speech run and forwards audio
//! and speech events to a [`CaptureEventHandler`]. Everything here runs on the
//! audio thread: no blocking, no error escapes.

use super::crossfade::splice_preroll;
use super::pcm::{append_bytes_as_samples, samples_to_bytes};
use super::preroll::PreRollBuffer;
use super::vad::{build_detector, VadParams, VoiceActivityDetector};
use super::wave::WaveSidecar;
use super::{DEFAULT_FRAMES_PER_BUFFER, DEFAULT_SAMPLE_RATE};
use crate::keyword::{KeywordMatch, KeywordRecognizer};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Minimum spacing between driver overflow/underflow log lines.
const DRIVER_SIGNAL_LOG_INTERVAL: Duration = Duration::from_secs(2);

/// Receiver of captured audio and speech events.
///
/// Methods are called from the audio callback (and, for keyword matches, from
/// an offload worker). Implementations must return quickly.
pub trait CaptureEventHandler: Send + Sync {
    /// Little-endian 16-bit PCM ready for the session.
    fn send_audio_data(&self, audio: Vec<u8>);
    fn on_speech_start(&self);
    fn on_speech_end(&self);
    fn on_keyword_detected(&self, result: KeywordMatch);
}

/// Capture instance parameters. Reconfiguration builds a new capture.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSettings {
    pub sample_rate: u32,
    pub frames_per_buffer: usize,
    pub buffer_duration_sec: f32,
    pub cross_fade_ms: u32,
    /// `None` forwards every chunk without speech gating.
    pub vad: Option<VadParams>,
    pub keyword_model: Option<PathBuf>,
    pub wave_capture: Option<PathBuf>,
    pub input_device: Option<String>,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            frames_per_buffer: DEFAULT_FRAMES_PER_BUFFER,
            buffer_duration_sec: 1.0,
            cross_fade_ms: 20,
            vad: Some(VadParams::default()),
            keyword_model: None,
            wave_capture: None,
            input_device: None,
        }
    }
}

impl CaptureSettings {
    pub fn cross_fade_samples(&self) -> usize {
        (u64::from(self.cross_fade_ms) * u64::from(self.sample_rate) / 1000) as usize
    }
}

/// Driver status flags reported alongside a chunk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStatus {
    pub input_overflow: bool,
    pub input_underflow: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    InputOverflow,
    Conversion,
    Detector,
}

/// What the engine did with one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    Dropped(DropReason),
    /// Forwarded as-is (ungated, or continuation of a speech run).
    Forwarded,
    /// First chunk of a speech run; the payload carried the pre-roll.
    SpeechStarted { payload_samples: usize },
    SpeechEnded,
    /// Gated out: no speech run is active.
    Silent,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CaptureStats {
    pub chunks: u64,
    pub forwarded_chunks: u64,
    pub dropped_chunks: u64,
    pub speech_runs: u64,
    pub input_overflows: u64,
    pub input_underflows: u64,
}

/// Build the configured detector, or `None` when VAD is disabled or fails to
/// load. A failed detector degrades to ungated forwarding.
pub fn build_vad(settings: &CaptureSettings) -> Option<Box<dyn VoiceActivityDetector>> {
    let params = settings.vad.as_ref()?;
    match build_detector(params) {
        Ok(vad) => {
            tracing::info!(detector = vad.name(), ?params, "VAD module initialized");
            Some(vad)
        }
        Err(err) => {
            tracing::error!(error = %err, "failed to initialize VAD module; forwarding all audio");
            None
        }
    }
}

pub struct CaptureEngine {
    handler: Arc<dyn CaptureEventHandler>,
    vad: Option<Box<dyn VoiceActivityDetector>>,
    keyword: Option<Arc<dyn KeywordRecognizer>>,
    preroll: PreRollBuffer,
    cross_fade_samples: usize,
    speech_active: bool,
    wave: Option<WaveSidecar>,
    scratch: Vec<i16>,
    last_signal_log: Option<Instant>,
    stats: CaptureStats,
}

impl CaptureEngine {
    pub fn new(
        settings: &CaptureSettings,
        handler: Arc<dyn CaptureEventHandler>,
        vad: Option<Box<dyn VoiceActivityDetector>>,
        keyword: Option<Arc<dyn KeywordRecognizer>>,
    ) -> Self {
        // The ring is only read at speech onset, so it is unused without a detector.
        let preroll = if vad.is_some() {
            PreRollBuffer::for_duration(settings.buffer_duration_sec, settings.sample_rate)
        } else {
            PreRollBuffer::new(0)
        };
        Self {
            handler,
            vad,
            keyword,
            preroll,
            cross_fade_samples: settings.cross_fade_samples(),
            speech_active: false,
            wave: None,
            scratch: Vec::with_capacity(settings.frames_per_buffer),
            last_signal_log: None,
            stats: CaptureStats::default(),
        }
    }

    pub fn has_vad(&self) -> bool {
        self.vad.is_some()
    }

    pub fn is_speech_active(&self) -> bool {
        self.speech_active
    }

    pub fn stats(&self) -> CaptureStats {
        self.stats
    }

    pub fn preroll(&self) -> &PreRollBuffer {
        &self.preroll
    }

    pub fn attach_wave(&mut self, wave: WaveSidecar) {
        self.wave = Some(wave);
    }

    pub fn take_wave(&mut self) -> Option<WaveSidecar> {
        self.wave.take()
    }

    /// Forget stream-local state so a restarted stream begins in silence.
    pub fn reset_stream_state(&mut self) {
        self.speech_active = false;
        self.preroll.clear();
        if let Some(vad) = self.vad.as_mut() {
            vad.reset();
        }
    }

    /// Process a raw little-endian 16-bit buffer as delivered by the driver.
    pub fn process_bytes(&mut self, data: &[u8], status: StreamStatus) -> ChunkOutcome {
        if let Some(outcome) = self.note_status(status) {
            return outcome;
        }
        let mut samples = std::mem::take(&mut self.scratch);
        samples.clear();
        let outcome = match append_bytes_as_samples(&mut samples, data) {
            Ok(()) => self.process_chunk(&samples),
            Err(err) => {
                tracing::error!(error = %err, "error converting audio data");
                self.drop_chunk(DropReason::Conversion)
            }
        };
        self.scratch = samples;
        outcome
    }

    pub fn process_samples(&mut self, samples: &[i16], status: StreamStatus) -> ChunkOutcome {
        if let Some(outcome) = self.note_status(status) {
            return outcome;
        }
        self.process_chunk(samples)
    }

    fn process_chunk(&mut self, samples: &[i16]) -> ChunkOutcome {
        self.stats.chunks += 1;
        if samples.is_empty() {
            return ChunkOutcome::Silent;
        }

        if let Some(keyword) = self.keyword.as_ref() {
            if keyword.is_started() {
                keyword.push_audio(samples);
            }
        }

        let Some(vad) = self.vad.as_mut() else {
            self.forward(samples);
            return ChunkOutcome::Forwarded;
        };

        let verdict = match vad.process_audio_chunk(samples) {
            Ok(verdict) => verdict,
            Err(err) => {
                tracing::error!(error = %err, detector = vad.name(), "error processing VAD");
                self.preroll.push(samples);
                return self.drop_chunk(DropReason::Detector);
            }
        };

        let outcome = if verdict.speech_started() && !self.speech_active {
            let payload = splice_preroll(&self.preroll, samples, self.cross_fade_samples);
            self.speech_active = true;
            self.stats.speech_runs += 1;
            // Start event first so the handler can open its gate before the payload.
            self.handler.on_speech_start();
            self.forward(&payload);
            ChunkOutcome::SpeechStarted {
                payload_samples: payload.len(),
            }
        } else if self.speech_active && verdict.speech_ended() {
            self.speech_active = false;
            self.handler.on_speech_end();
            ChunkOutcome::SpeechEnded
        } else if self.speech_active {
            self.forward(samples);
            ChunkOutcome::Forwarded
        } else {
            ChunkOutcome::Silent
        };

        self.preroll.push(samples);
        outcome
    }

    fn forward(&mut self, samples: &[i16]) {
        if let Some(wave) = self.wave.as_mut() {
            wave.write_samples(samples);
        }
        self.stats.forwarded_chunks += 1;
        self.handler.send_audio_data(samples_to_bytes(samples));
    }

    fn drop_chunk(&mut self, reason: DropReason) -> ChunkOutcome {
        self.stats.dropped_chunks += 1;
        ChunkOutcome::Dropped(reason)
    }

    fn note_status(&mut self, status: StreamStatus) -> Option<ChunkOutcome> {
        if status.input_overflow {
            self.stats.input_overflows += 1;
            if self.signal_log_due() {
                tracing::warn!(
                    count = self.stats.input_overflows,
                    "input overflow; dropping chunk"
                );
            }
            self.stats.chunks += 1;
            return Some(self.drop_chunk(DropReason::InputOverflow));
        }
        if status.input_underflow {
            self.stats.input_underflows += 1;
            if self.signal_log_due() {
                tracing::debug!(count = self.stats.input_underflows, "input underflow detected");
            }
        }
        None
    }

    fn signal_log_due(&mut self) -> bool {
        let now = Instant::now();
        match self.last_signal_log {
            Some(last) if now.duration_since(last) < DRIVER_SIGNAL_LOG_INTERVAL => false,
            _ => {
                self.last_signal_log = Some(now);
                true
            }
        }
    }
}
