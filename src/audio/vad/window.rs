//! Fixed-window framing for model-based detectors.

use super::VadError;

/// Accumulates model-rate samples and hands out complete windows, each
/// prefixed with the tail of the window before it.
pub(crate) struct ModelWindows {
    window: usize,
    context: Vec<f32>,
    pending: Vec<f32>,
    input: Vec<f32>,
}

impl ModelWindows {
    pub(crate) fn new(window: usize, context: usize) -> Self {
        let window = window.max(context).max(1);
        Self {
            window,
            context: vec![0.0; context],
            pending: Vec::with_capacity(window * 2),
            input: Vec::with_capacity(window + context),
        }
    }

    /// Buffer new samples are appended to.
    pub(crate) fn buffer_mut(&mut self) -> &mut Vec<f32> {
        &mut self.pending
    }

    pub(crate) fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Score every complete window and return the highest score, or `None`
    /// when no window is complete yet.
    ///
    /// A scoring error discards everything buffered along with the carried
    /// context, so a detector whose model keeps failing never accumulates
    /// audio.
    pub(crate) fn score_complete<F>(&mut self, mut score: F) -> Result<Option<f32>, VadError>
    where
        F: FnMut(&[f32]) -> Result<f32, VadError>,
    {
        let ctx = self.context.len();
        let mut start = 0usize;
        let mut best: Option<f32> = None;
        while self.pending.len() - start >= self.window {
            let end = start + self.window;
            self.input.clear();
            self.input.extend_from_slice(&self.context);
            self.input.extend_from_slice(&self.pending[start..end]);
            self.context.copy_from_slice(&self.pending[end - ctx..end]);
            start = end;
            match score(&self.input) {
                Ok(value) => best = Some(best.map_or(value, |b| b.max(value))),
                Err(err) => {
                    self.reset();
                    return Err(err);
                }
            }
        }
        self.pending.drain(..start);
        Ok(best)
    }

    pub(crate) fn reset(&mut self) {
        self.pending.clear();
        self.context.fill(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holds_partial_window_until_complete() {
        let mut windows = ModelWindows::new(8, 2);
        windows.buffer_mut().extend_from_slice(&[0.1; 5]);
        let mut calls = 0;
        let score = windows
            .score_complete(|_| {
                calls += 1;
                Ok(1.0)
            })
            .unwrap();
        assert_eq!(score, None);
        assert_eq!(calls, 0);
        assert_eq!(windows.buffered(), 5);
    }

    #[test]
    fn prefixes_each_window_with_previous_tail() {
        let mut windows = ModelWindows::new(4, 2);
        windows
            .buffer_mut()
            .extend_from_slice(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
        let mut seen = Vec::new();
        let best = windows
            .score_complete(|input| {
                seen.push(input.to_vec());
                Ok(input[input.len() - 1])
            })
            .unwrap();
        assert_eq!(
            seen,
            vec![
                vec![0.0, 0.0, 1.0, 2.0, 3.0, 4.0],
                vec![3.0, 4.0, 5.0, 6.0, 7.0, 8.0],
            ]
        );
        assert_eq!(best, Some(8.0));
        assert_eq!(windows.buffered(), 1);
    }

    #[test]
    fn failing_model_does_not_accumulate_audio() {
        let mut windows = ModelWindows::new(512, 64);
        for _ in 0..200 {
            windows.buffer_mut().extend_from_slice(&[0.2; 683]);
            let result = windows.score_complete(|_| Err(VadError::Inference("boom".into())));
            assert!(result.is_err());
            assert!(
                windows.buffered() < 512,
                "buffer grew to {}",
                windows.buffered()
            );
        }
    }

    #[test]
    fn recovers_after_failure_with_fresh_context() {
        let mut windows = ModelWindows::new(4, 2);
        windows.buffer_mut().extend_from_slice(&[5.0; 4]);
        assert!(windows
            .score_complete(|_| Err(VadError::Inference("boom".into())))
            .is_err());

        windows.buffer_mut().extend_from_slice(&[1.0; 4]);
        let mut first = Vec::new();
        windows
            .score_complete(|input| {
                first = input.to_vec();
                Ok(0.0)
            })
            .unwrap();
        assert_eq!(first, vec![0.0, 0.0, 1.0, 1.0, 1.0, 1.0]);
    }
}
