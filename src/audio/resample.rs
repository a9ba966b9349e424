use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

const MIN_STREAM_RATE: u32 = 4_000;
const MAX_STREAM_RATE: u32 = 384_000;
const SINC_LEN: usize = 128;
const SINC_CUTOFF: f32 = 0.90;

/// Streaming sample-rate converter used by capture, playback and the neural
/// detector.
///
/// Band-limited by default. Falls back to linear interpolation only when the
/// sinc resampler cannot be built or fails mid-stream.
pub(crate) struct StreamResampler {
    input_rate: u32,
    output_rate: u32,
    kind: Kind,
}

enum Kind {
    Passthrough,
    Sinc(SincStream),
    Linear(LinearResampler),
}

impl StreamResampler {
    pub(crate) fn new(input_rate: u32, output_rate: u32) -> Self {
        let input_rate = input_rate.clamp(MIN_STREAM_RATE, MAX_STREAM_RATE);
        let output_rate = output_rate.clamp(MIN_STREAM_RATE, MAX_STREAM_RATE);
        let kind = if input_rate == output_rate {
            Kind::Passthrough
        } else {
            match SincStream::new(input_rate, output_rate) {
                Ok(sinc) => Kind::Sinc(sinc),
                Err(err) => {
                    tracing::warn!(
                        input_rate,
                        output_rate,
                        "sinc resampler unavailable ({err}); using linear interpolation"
                    );
                    Kind::Linear(LinearResampler::new(input_rate, output_rate))
                }
            }
        };
        Self {
            input_rate,
            output_rate,
            kind,
        }
    }

    pub(crate) fn is_passthrough(&self) -> bool {
        matches!(self.kind, Kind::Passthrough)
    }

    /// Resample `input`, appending whatever output is ready to `out`.
    ///
    /// The sinc path holds back input until a full block is available, so
    /// output trails input by at most one block plus the filter delay.
    pub(crate) fn process_into(&mut self, input: &[f32], out: &mut Vec<f32>) {
        if input.is_empty() {
            return;
        }
        match &mut self.kind {
            Kind::Passthrough => out.extend_from_slice(input),
            Kind::Linear(linear) => linear.process_into(input, out),
            Kind::Sinc(sinc) => {
                if let Err(err) = sinc.process_into(input, out) {
                    tracing::warn!(
                        input_rate = self.input_rate,
                        output_rate = self.output_rate,
                        "sinc resampler failed ({err}); switching to linear interpolation"
                    );
                    let mut linear = LinearResampler::new(self.input_rate, self.output_rate);
                    linear.process_into(&sinc.pending, out);
                    self.kind = Kind::Linear(linear);
                }
            }
        }
    }

    pub(crate) fn reset(&mut self) {
        match &mut self.kind {
            Kind::Passthrough => {}
            Kind::Sinc(sinc) => sinc.reset(),
            Kind::Linear(linear) => linear.reset(),
        }
    }
}

/// rubato `SincFixedIn` plus the residual input that did not fill a block.
struct SincStream {
    inner: SincFixedIn<f32>,
    pending: Vec<f32>,
    block: Vec<Vec<f32>>,
}

impl SincStream {
    fn new(input_rate: u32, output_rate: u32) -> Result<Self, rubato::ResamplerConstructionError> {
        let params = SincInterpolationParameters {
            sinc_len: SINC_LEN,
            f_cutoff: SINC_CUTOFF,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };
        // ~10 ms blocks at the input rate
        let chunk = (input_rate as usize / 100).max(1);
        let ratio = f64::from(output_rate) / f64::from(input_rate);
        let inner = SincFixedIn::<f32>::new(ratio, 1.0, params, chunk, 1)?;
        let block = vec![vec![0.0; inner.output_frames_max()]];
        Ok(Self {
            pending: Vec::with_capacity(chunk * 2),
            inner,
            block,
        })
    }

    fn process_into(
        &mut self,
        input: &[f32],
        out: &mut Vec<f32>,
    ) -> Result<(), rubato::ResampleError> {
        self.pending.extend_from_slice(input);
        loop {
            let needed = self.inner.input_frames_next();
            if self.pending.len() < needed {
                return Ok(());
            }
            let (used, produced) = self.inner.process_into_buffer(
                &[&self.pending[..needed]],
                &mut self.block,
                None,
            )?;
            out.extend_from_slice(&self.block[0][..produced]);
            self.pending.drain(..used);
        }
    }

    fn reset(&mut self) {
        self.inner.reset();
        self.pending.clear();
    }
}

/// Streaming linear interpolator, kept as the fallback path.
///
/// Keeps the fractional read position and the previous input sample across
/// calls so consecutive driver buffers resample without seams.
#[derive(Debug, Clone)]
struct LinearResampler {
    step: f64,
    pos: f64,
    prev: f32,
}

impl LinearResampler {
    fn new(input_rate: u32, output_rate: u32) -> Self {
        Self {
            step: f64::from(input_rate) / f64::from(output_rate),
            pos: 0.0,
            prev: 0.0,
        }
    }

    fn process_into(&mut self, input: &[f32], out: &mut Vec<f32>) {
        if input.is_empty() {
            return;
        }
        // Positions in [-1, 0) interpolate between the previous call's last
        // sample and input[0].
        let last = (input.len() - 1) as f64;
        while self.pos < last {
            let (a, b, frac) = if self.pos < 0.0 {
                (self.prev, input[0], self.pos + 1.0)
            } else {
                let idx = self.pos.floor() as usize;
                (input[idx], input[idx + 1], self.pos - idx as f64)
            };
            out.push(a + (b - a) * frac as f32);
            self.pos += self.step;
        }
        self.pos -= input.len() as f64;
        self.prev = input[input.len() - 1];
    }

    fn reset(&mut self) {
        self.pos = 0.0;
        self.prev = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn tone(freq: f32, rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| 0.5 * (2.0 * PI * freq * i as f32 / rate as f32).sin())
            .collect()
    }

    fn rms(samples: &[f32]) -> f32 {
        let sum: f32 = samples.iter().map(|s| s * s).sum();
        (sum / samples.len().max(1) as f32).sqrt()
    }

    fn run(rs: &mut StreamResampler, input: &[f32], chunk: usize) -> Vec<f32> {
        let mut out = Vec::new();
        for piece in input.chunks(chunk) {
            rs.process_into(piece, &mut out);
        }
        out
    }

    #[test]
    fn passthrough_when_rates_match() {
        let mut rs = StreamResampler::new(24_000, 24_000);
        let mut out = Vec::new();
        rs.process_into(&[0.1, 0.2], &mut out);
        assert!(rs.is_passthrough());
        assert_eq!(out, vec![0.1, 0.2]);
    }

    #[test]
    fn uses_sinc_path_for_rate_changes() {
        let rs = StreamResampler::new(48_000, 24_000);
        assert!(!rs.is_passthrough());
        assert!(matches!(rs.kind, Kind::Sinc(_)));
    }

    #[test]
    fn halves_length_when_downsampling_by_two() {
        let mut rs = StreamResampler::new(48_000, 24_000);
        let input = tone(440.0, 48_000, 9_600);
        let out = run(&mut rs, &input, 137);
        let diff = (out.len() as isize - 4_800).abs();
        assert!(diff <= 2, "got {}", out.len());
    }

    #[test]
    fn suppresses_tones_above_output_nyquist() {
        // 15 kHz folds to 9 kHz at 24 kHz unless it is filtered first.
        let mut rs = StreamResampler::new(48_000, 24_000);
        let input = tone(15_000.0, 48_000, 48_000);
        let out = run(&mut rs, &input, 480);
        assert!(out.len() > 20_000);
        let settled = &out[1_000..];
        let ratio = rms(settled) / rms(&input);
        assert!(ratio < 0.05, "alias energy ratio {ratio}");
    }

    #[test]
    fn keeps_in_band_speech_tones() {
        let mut rs = StreamResampler::new(48_000, 16_000);
        let input = tone(1_000.0, 48_000, 48_000);
        let out = run(&mut rs, &input, 512);
        let settled = &out[1_000..];
        let ratio = rms(settled) / rms(&input);
        assert!((0.9..1.1).contains(&ratio), "passband ratio {ratio}");
    }

    #[test]
    fn streaming_matches_single_shot() {
        let input = tone(300.0, 44_100, 8_820);
        let whole = run(&mut StreamResampler::new(44_100, 24_000), &input, input.len());
        let pieces = run(&mut StreamResampler::new(44_100, 24_000), &input, 64);

        assert_eq!(whole.len(), pieces.len());
        assert!(whole.len() > 4_000);
        for (i, (a, b)) in whole.iter().zip(&pieces).enumerate() {
            assert!((a - b).abs() < 1e-5, "sample {i}");
        }
    }

    #[test]
    fn reset_drops_residual_input() {
        let mut rs = StreamResampler::new(48_000, 24_000);
        let mut out = Vec::new();
        rs.process_into(&[0.25; 300], &mut out);
        assert!(out.is_empty(), "partial block is held back");
        rs.reset();
        rs.process_into(&[0.25; 300], &mut out);
        assert!(out.is_empty(), "reset discarded the earlier partial block");
    }

    #[test]
    fn linear_fallback_interpolates_midpoints() {
        let mut rs = LinearResampler::new(12_000, 24_000);
        let mut out = Vec::new();
        rs.process_into(&[0.0, 1.0, 0.0], &mut out);
        assert_eq!(out, vec![0.0, 0.5, 1.0, 0.5]);
    }
}
