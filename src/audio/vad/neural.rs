//! Silero-style neural detector running an ONNX model through `ort`.
//!
//! The model consumes fixed windows of f32 samples at 16 kHz plus a short
//! context carried from the previous window, and returns a speech probability
//! along with its recurrent state.

use super::window::ModelWindows;
use super::{SpeechGate, VadError, VadParams, VadVerdict, VoiceActivityDetector};
use crate::audio::pcm::sample_to_f32;
use crate::audio::resample::StreamResampler;
use ndarray::{Array1, Array2, Array3, Ix3};
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;

const MODEL_SAMPLE_RATE: u32 = 16_000;
const CONTEXT_SAMPLES: usize = 64;
const STATE_SIZE: usize = 128;

pub struct NeuralVad {
    session: Session,
    state: Array3<f32>,
    windows: ModelWindows,
    threshold: f32,
    resampler: StreamResampler,
    scratch: Vec<f32>,
    last_probability: f32,
    gate: SpeechGate,
}

impl NeuralVad {
    /// Load the model at `path`. Fails loudly so the caller can fall back.
    pub fn load(params: &VadParams, path: &Path) -> Result<Self, VadError> {
        if !path.is_file() {
            return Err(VadError::ModelLoad {
                path: path.to_path_buf(),
                reason: "file not found".into(),
            });
        }
        let model_err = |err: ort::Error| VadError::ModelLoad {
            path: path.to_path_buf(),
            reason: err.to_string(),
        };
        let session = Session::builder()
            .map_err(model_err)?
            .with_intra_threads(1)
            .map_err(model_err)?
            .commit_from_file(path)
            .map_err(model_err)?;

        Ok(Self {
            session,
            state: Array3::<f32>::zeros((2, 1, STATE_SIZE)),
            windows: ModelWindows::new(params.window_size_samples, CONTEXT_SAMPLES),
            threshold: params.threshold,
            resampler: StreamResampler::new(params.sample_rate, MODEL_SAMPLE_RATE),
            scratch: Vec::with_capacity(params.chunk_size),
            last_probability: 0.0,
            gate: SpeechGate::from_params(params),
        })
    }
}

/// One model step over `window` (context prefix included), updating `state`.
fn infer(session: &mut Session, state: &mut Array3<f32>, window: &[f32]) -> Result<f32, VadError> {
    let inference = |err: ort::Error| VadError::Inference(err.to_string());
    let input = Array2::from_shape_vec((1, window.len()), window.to_vec())
        .map_err(|e| VadError::Inference(e.to_string()))?;
    let input = Tensor::from_array(input).map_err(inference)?;
    let state_in = Tensor::from_array(state.clone()).map_err(inference)?;
    let sr = Tensor::from_array(Array1::from_vec(vec![i64::from(MODEL_SAMPLE_RATE)]))
        .map_err(inference)?;

    let outputs = session
        .run(ort::inputs![
            "input" => input,
            "state" => state_in,
            "sr" => sr,
        ])
        .map_err(inference)?;

    let probability = outputs["output"]
        .try_extract_array::<f32>()
        .map_err(inference)?
        .iter()
        .next()
        .copied()
        .unwrap_or(0.0);
    *state = outputs["stateN"]
        .try_extract_array::<f32>()
        .map_err(inference)?
        .to_owned()
        .into_dimensionality::<Ix3>()
        .map_err(|e| VadError::Inference(format!("state shape: {e}")))?;
    Ok(probability)
}

impl VoiceActivityDetector for NeuralVad {
    fn process_audio_chunk(&mut self, chunk: &[i16]) -> Result<VadVerdict, VadError> {
        if chunk.is_empty() {
            return Ok(VadVerdict {
                active: self.gate.is_active(),
                ..VadVerdict::default()
            });
        }

        self.scratch.clear();
        self.scratch.extend(chunk.iter().copied().map(sample_to_f32));
        self.resampler
            .process_into(&self.scratch, self.windows.buffer_mut());

        // Score every complete window this chunk finished; the loudest wins.
        // Chunks that complete no window reuse the previous score.
        let session = &mut self.session;
        let state = &mut self.state;
        let best = match self
            .windows
            .score_complete(|window| infer(session, state, window))
        {
            Ok(best) => best,
            Err(err) => {
                self.state.fill(0.0);
                return Err(err);
            }
        };
        if let Some(probability) = best {
            self.last_probability = probability;
        }

        let is_speech = self.last_probability >= self.threshold;
        Ok(self.gate.update(is_speech, chunk.len()))
    }

    fn reset(&mut self) {
        self.state.fill(0.0);
        self.windows.reset();
        self.resampler.reset();
        self.last_probability = 0.0;
        self.gate.reset();
    }

    fn name(&self) -> &'static str {
        "neural_vad"
    }
}
