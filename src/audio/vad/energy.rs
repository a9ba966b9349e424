use super::{SpeechGate, VadError, VadParams, VadVerdict, VoiceActivityDetector};

/// RMS detector with an adaptive noise floor.
///
/// The floor drops immediately to any quieter chunk and rises toward louder
/// ones with a time constant of roughly `window_duration` (ten times slower
/// while the chunk is classified as speech). A chunk is speech when its RMS
/// exceeds `max(floor, min_energy) * silence_ratio`. The first chunk only
/// calibrates the floor.
#[derive(Debug, Clone)]
pub struct EnergyRatioVad {
    silence_ratio: f64,
    min_energy: f64,
    rise: f64,
    floor: Option<f64>,
    pub(crate) gate: SpeechGate,
}

impl EnergyRatioVad {
    pub fn new(params: &VadParams) -> Self {
        let window_samples = params.seconds_to_samples(params.window_duration).max(1);
        let rise = (params.chunk_size as f64 / window_samples as f64).clamp(0.0, 1.0);
        Self {
            silence_ratio: f64::from(params.silence_ratio),
            min_energy: f64::from(params.min_energy.max(0.0)),
            rise,
            floor: None,
            gate: SpeechGate::from_params(params),
        }
    }

    /// Effective noise floor in 16-bit RMS units.
    pub fn noise_floor(&self) -> f64 {
        self.floor.unwrap_or(0.0).max(self.min_energy)
    }

    fn track(&mut self, rms: f64, is_speech: bool) {
        let floor = self.floor.get_or_insert(rms);
        if rms < *floor {
            *floor = rms;
        } else if is_speech {
            *floor += (rms - *floor) * self.rise * 0.1;
        } else {
            *floor += (rms - *floor) * self.rise;
        }
    }
}

pub(crate) fn chunk_rms(chunk: &[i16]) -> f64 {
    if chunk.is_empty() {
        return 0.0;
    }
    let energy: f64 = chunk
        .iter()
        .map(|s| {
            let v = f64::from(*s);
            v * v
        })
        .sum();
    (energy / chunk.len() as f64).sqrt()
}

impl VoiceActivityDetector for EnergyRatioVad {
    fn process_audio_chunk(&mut self, chunk: &[i16]) -> Result<VadVerdict, VadError> {
        if chunk.is_empty() {
            return Ok(VadVerdict {
                active: self.gate.is_active(),
                ..VadVerdict::default()
            });
        }
        let rms = chunk_rms(chunk);
        let is_speech = match self.floor {
            None => false,
            Some(_) => rms > self.noise_floor() * self.silence_ratio,
        };
        self.track(rms, is_speech);
        Ok(self.gate.update(is_speech, chunk.len()))
    }

    fn reset(&mut self) {
        self.floor = None;
        self.gate.reset();
    }

    fn name(&self) -> &'static str {
        "energy_ratio_vad"
    }
}
