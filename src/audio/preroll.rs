/// Fixed-capacity ring holding the most recent capture samples.
///
/// Only the capture callback writes to it, and only the same callback reads it
/// back at speech onset, so it carries no synchronisation of its own.
#[derive(Debug, Clone)]
pub struct PreRollBuffer {
    samples: Vec<i16>,
    pointer: usize,
    filled: usize,
}

impl PreRollBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: vec![0; capacity],
            pointer: 0,
            filled: 0,
        }
    }

    /// Capacity for `duration_sec` of audio at `sample_rate`.
    pub fn for_duration(duration_sec: f32, sample_rate: u32) -> Self {
        let capacity = (f64::from(duration_sec.max(0.0)) * f64::from(sample_rate)) as usize;
        Self::new(capacity)
    }

    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    /// Number of valid samples, saturating at capacity once the ring has wrapped.
    pub fn len(&self) -> usize {
        self.filled
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    /// Append `new_audio`, overwriting the oldest samples once full.
    pub fn push(&mut self, new_audio: &[i16]) {
        let capacity = self.samples.len();
        if capacity == 0 || new_audio.is_empty() {
            return;
        }

        let new_len = new_audio.len();
        if new_len >= capacity {
            self.samples
                .copy_from_slice(&new_audio[new_len - capacity..]);
            self.pointer = 0;
            self.filled = capacity;
            return;
        }

        let end_space = capacity - self.pointer;
        if new_len <= end_space {
            self.samples[self.pointer..self.pointer + new_len].copy_from_slice(new_audio);
        } else {
            let (head, tail) = new_audio.split_at(end_space);
            self.samples[self.pointer..].copy_from_slice(head);
            self.samples[..tail.len()].copy_from_slice(tail);
        }
        self.pointer = (self.pointer + new_len) % capacity;
        self.filled = (self.filled + new_len).min(capacity);
    }

    /// Append the buffered samples to `out` in chronological order.
    pub fn copy_content_into(&self, out: &mut Vec<i16>) {
        if self.filled < self.samples.len() {
            // Not wrapped yet: valid data starts at index 0.
            out.extend_from_slice(&self.samples[..self.filled]);
            return;
        }
        out.extend_from_slice(&self.samples[self.pointer..]);
        out.extend_from_slice(&self.samples[..self.pointer]);
    }

    pub fn content(&self) -> Vec<i16> {
        let mut out = Vec::with_capacity(self.filled);
        self.copy_content_into(&mut out);
        out
    }

    pub fn clear(&mut self) {
        self.pointer = 0;
        self.filled = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(start: i16, len: usize) -> Vec<i16> {
        (0..len).map(|i| start.wrapping_add(i as i16)).collect()
    }

    #[test]
    fn partial_fill_returns_only_written_samples() {
        let mut ring = PreRollBuffer::new(8);
        ring.push(&[1, 2, 3]);
        assert_eq!(ring.content(), vec![1, 2, 3]);
        assert_eq!(ring.len(), 3);
    }

    #[test]
    fn keeps_most_recent_samples_for_any_chunking() {
        let capacity = 50;
        let chunk_patterns: [&[usize]; 4] = [&[7], &[13, 1, 50, 3], &[49, 2], &[64, 5, 11]];
        for pattern in chunk_patterns {
            let mut ring = PreRollBuffer::new(capacity);
            let mut history: Vec<i16> = Vec::new();
            let mut next = 0i16;
            while history.len() <= capacity * 3 {
                for &size in pattern {
                    let chunk = ramp(next, size);
                    next = next.wrapping_add(size as i16);
                    ring.push(&chunk);
                    history.extend_from_slice(&chunk);
                }
            }
            let expected = &history[history.len() - capacity..];
            assert_eq!(ring.content(), expected, "pattern {pattern:?}");
        }
    }

    #[test]
    fn exact_fill_wraps_pointer() {
        let mut ring = PreRollBuffer::new(4);
        ring.push(&[1, 2, 3, 4]);
        ring.push(&[5]);
        assert_eq!(ring.content(), vec![2, 3, 4, 5]);
    }

    #[test]
    fn oversized_chunk_keeps_tail() {
        let mut ring = PreRollBuffer::new(3);
        ring.push(&[1]);
        ring.push(&[2, 3, 4, 5, 6]);
        assert_eq!(ring.content(), vec![4, 5, 6]);
    }

    #[test]
    fn zero_capacity_is_inert() {
        let mut ring = PreRollBuffer::new(0);
        ring.push(&[1, 2]);
        assert!(ring.is_empty());
        assert!(ring.content().is_empty());
    }

    #[test]
    fn sized_from_duration() {
        let ring = PreRollBuffer::for_duration(1.0, 24_000);
        assert_eq!(ring.capacity(), 24_000);
    }
}
