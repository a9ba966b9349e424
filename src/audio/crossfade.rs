//! Boundary splice applied when a speech run begins.

use super::preroll::PreRollBuffer;

/// Build the speech-onset payload: the pre-roll content in chronological order
/// followed by `chunk`, with a linear fade-out on the pre-roll tail and a
/// linear fade-in on the chunk head.
///
/// The whole pre-roll is part of the payload, so it is copied once into the
/// output buffer and the fade is applied in place.
pub(crate) fn splice_preroll(
    preroll: &PreRollBuffer,
    chunk: &[i16],
    cross_fade_samples: usize,
) -> Vec<i16> {
    let mut out = Vec::with_capacity(preroll.len() + chunk.len());
    preroll.copy_content_into(&mut out);
    let split = out.len();
    out.extend_from_slice(chunk);
    apply_crossfade(&mut out, split, cross_fade_samples);
    out
}

/// Fade `buf[..split]` out and `buf[split..]` in around the split point.
///
/// The fade length is bounded by both sides; zero means plain concatenation.
pub(crate) fn apply_crossfade(buf: &mut [i16], split: usize, cross_fade_samples: usize) {
    let split = split.min(buf.len());
    let fade_len = cross_fade_samples.min(split).min(buf.len() - split);
    if fade_len == 0 {
        return;
    }

    let tail_start = split - fade_len;
    for i in 0..fade_len {
        let (fade_out, fade_in) = ramp_weights(i, fade_len);
        buf[tail_start + i] = scale(buf[tail_start + i], fade_out);
        buf[split + i] = scale(buf[split + i], fade_in);
    }
}

/// Endpoint-inclusive ramps: 1.0 -> 0.0 out, 0.0 -> 1.0 in.
fn ramp_weights(index: usize, len: usize) -> (f32, f32) {
    if len <= 1 {
        return (1.0, 0.0);
    }
    let t = index as f32 / (len - 1) as f32;
    (1.0 - t, t)
}

fn scale(sample: i16, weight: f32) -> i16 {
    let scaled = (f32::from(sample) * weight).round_ties_even();
    scaled.clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_fade_concatenates() {
        let mut ring = PreRollBuffer::new(4);
        ring.push(&[1, 2, 3, 4]);
        let out = splice_preroll(&ring, &[5, 6], 0);
        assert_eq!(out, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn empty_preroll_passes_chunk_through() {
        let ring = PreRollBuffer::new(4);
        let out = splice_preroll(&ring, &[5, 6, 7], 8);
        assert_eq!(out, vec![5, 6, 7]);
    }

    #[test]
    fn fade_touches_only_the_window() {
        let pre: Vec<i16> = vec![1000; 10];
        let chunk: Vec<i16> = vec![-2000; 10];
        let mut ring = PreRollBuffer::new(10);
        ring.push(&pre);
        let out = splice_preroll(&ring, &chunk, 5);

        assert_eq!(out.len(), 20);
        assert_eq!(&out[..5], &pre[..5]);
        assert_eq!(&out[15..], &chunk[5..]);
        // Ramp endpoints.
        assert_eq!(out[5], 1000);
        assert_eq!(out[9], 0);
        assert_eq!(out[10], 0);
        assert_eq!(out[14], -2000);
    }

    #[test]
    fn splice_never_exceeds_input_amplitude() {
        let pre: Vec<i16> = (0..64).map(|i| ((i * 517) % 30_000) as i16 - 15_000).collect();
        let chunk: Vec<i16> = (0..64).map(|i| ((i * 911) % 32_000) as i16 - 16_000).collect();
        let mut ring = PreRollBuffer::new(64);
        ring.push(&pre);
        let out = splice_preroll(&ring, &chunk, 20);

        let peak = pre
            .iter()
            .chain(chunk.iter())
            .map(|s| i32::from(*s).abs())
            .max()
            .unwrap_or(0);
        assert!(out.iter().all(|s| i32::from(*s).abs() <= peak));
        assert_eq!(&out[..44], &pre[..44]);
        assert_eq!(&out[84..], &chunk[20..]);
    }

    #[test]
    fn fade_length_bounded_by_short_side() {
        let mut buf = vec![100i16, 100, 100, 50];
        apply_crossfade(&mut buf, 3, 10);
        // Only one sample on the right, so a single-sample fade.
        assert_eq!(buf, vec![100, 100, 100, 0]);
    }

    #[test]
    fn rounds_half_to_even() {
        assert_eq!(scale(3, 0.5), 2);
        assert_eq!(scale(5, 0.5), 2);
        assert_eq!(scale(-3, 0.5), -2);
    }
}
