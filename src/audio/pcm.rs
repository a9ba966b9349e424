//! 16-bit PCM helpers shared by the capture and playback paths.

use anyhow::{bail, Result};

/// Serialize samples as little-endian 16-bit PCM, the layout the realtime
/// session expects on the wire.
pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

/// Reinterpret a little-endian byte buffer as 16-bit samples, appending to `out`.
///
/// Fails on a trailing half sample so the caller can drop the whole chunk
/// instead of forwarding misaligned audio.
pub fn append_bytes_as_samples(out: &mut Vec<i16>, data: &[u8]) -> Result<()> {
    if data.len() % 2 != 0 {
        bail!("pcm buffer has odd length {}", data.len());
    }
    out.extend(
        data.chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]])),
    );
    Ok(())
}

pub fn bytes_to_samples(data: &[u8]) -> Result<Vec<i16>> {
    let mut out = Vec::with_capacity(data.len() / 2);
    append_bytes_as_samples(&mut out, data)?;
    Ok(out)
}

pub(crate) fn sample_to_f32(sample: i16) -> f32 {
    f32::from(sample) / 32_768.0
}

pub(crate) fn f32_to_sample(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32_767.0).round() as i16
}

/// Downmix multi-channel input to mono while applying the provided converter so
/// the engine sees a single channel regardless of the microphone layout.
pub(crate) fn append_downmixed_samples<T, F>(
    buf: &mut Vec<f32>,
    data: &[T],
    channels: usize,
    mut convert: F,
) where
    T: Copy,
    F: FnMut(T) -> f32,
{
    if channels <= 1 {
        buf.extend(data.iter().copied().map(&mut convert));
        return;
    }

    // Average each interleaved frame to produce a mono representation.
    let mut acc = 0.0f32;
    let mut count = 0usize;
    for sample in data.iter().copied() {
        acc += convert(sample);
        count += 1;
        if count == channels {
            buf.push(acc / channels as f32);
            acc = 0.0;
            count = 0;
        }
    }
    if count > 0 {
        buf.push(acc / count as f32);
    }
}

/// Re-slices an arbitrary stream of samples into fixed-size chunks.
///
/// Drivers rarely honour the requested buffer size exactly; the engine and the
/// detectors are tuned for `frames_per_buffer`, so every delivery is re-cut here.
pub(crate) struct FrameChunker {
    frame_samples: usize,
    pending: Vec<i16>,
}

impl FrameChunker {
    pub(crate) fn new(frame_samples: usize) -> Self {
        let frame_samples = frame_samples.max(1);
        Self {
            frame_samples,
            pending: Vec::with_capacity(frame_samples * 2),
        }
    }

    pub(crate) fn push<F>(&mut self, data: &[i16], mut emit: F)
    where
        F: FnMut(&[i16]),
    {
        // Fast path: nothing buffered and the driver delivered whole frames.
        if self.pending.is_empty() {
            let whole = data.len() - data.len() % self.frame_samples;
            for frame in data[..whole].chunks_exact(self.frame_samples) {
                emit(frame);
            }
            self.pending.extend_from_slice(&data[whole..]);
            return;
        }

        self.pending.extend_from_slice(data);
        let mut start = 0usize;
        while self.pending.len() - start >= self.frame_samples {
            emit(&self.pending[start..start + self.frame_samples]);
            start += self.frame_samples;
        }
        self.pending.drain(..start);
    }

    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_round_trip_little_endian() {
        let bytes = samples_to_bytes(&[1, -2, i16::MAX]);
        assert_eq!(bytes, vec![1, 0, 0xFE, 0xFF, 0xFF, 0x7F]);
        assert_eq!(bytes_to_samples(&bytes).unwrap(), vec![1, -2, i16::MAX]);
    }

    #[test]
    fn odd_length_buffer_is_rejected() {
        let err = bytes_to_samples(&[0, 1, 2]).unwrap_err();
        assert!(err.to_string().contains("odd length"));
    }

    #[test]
    fn downmixes_multi_channel_audio() {
        let mut buf = Vec::new();
        let samples = [1.0f32, -1.0, 0.5, 0.5];
        append_downmixed_samples(&mut buf, &samples, 2, |sample| sample);
        assert_eq!(buf, vec![0.0, 0.5]);
    }

    #[test]
    fn chunker_emits_fixed_frames_across_pushes() {
        let mut chunker = FrameChunker::new(4);
        let mut frames: Vec<Vec<i16>> = Vec::new();
        chunker.push(&[1, 2, 3], |f| frames.push(f.to_vec()));
        assert!(frames.is_empty());
        chunker.push(&[4, 5, 6, 7, 8, 9], |f| frames.push(f.to_vec()));
        assert_eq!(frames, vec![vec![1, 2, 3, 4], vec![5, 6, 7, 8]]);
        assert_eq!(chunker.pending_len(), 1);
    }

    #[test]
    fn chunker_fast_path_keeps_remainder() {
        let mut chunker = FrameChunker::new(2);
        let mut frames = 0usize;
        chunker.push(&[1, 2, 3, 4, 5], |_| frames += 1);
        assert_eq!(frames, 2);
        assert_eq!(chunker.pending_len(), 1);
    }

    #[test]
    fn float_conversion_clamps() {
        assert_eq!(f32_to_sample(2.0), 32_767);
        assert_eq!(f32_to_sample(-2.0), -32_767);
        assert!((sample_to_f32(16_384) - 0.5).abs() < 1e-6);
    }
}
