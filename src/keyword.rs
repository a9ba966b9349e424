//! Keyword spotting adapter.
//!
//! The matcher itself is an injected [`KeywordModel`]. This module owns the
//! threading around it: audio pushed from the capture callback lands on a
//! bounded channel, a dedicated worker feeds the model, and matches are handed
//! to a callback that must return quickly.

use crate::lock_or_recover;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

/// Chunks buffered between the capture callback and the keyword worker.
pub const KEYWORD_QUEUE_CHUNKS: usize = 32;

/// A keyword spotting result.
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordMatch {
    pub keyword: String,
    /// Position of the match in samples since recognition started.
    pub offset_samples: u64,
    pub confidence: Option<f32>,
}

#[derive(Debug, thiserror::Error)]
pub enum KeywordError {
    #[error("failed to load keyword model {path}: {reason}")]
    ModelLoad { path: PathBuf, reason: String },
    #[error("keyword model path is configured but no keyword model loader is available")]
    NoLoader,
    #[error("failed to spawn keyword worker: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Streaming keyword matcher.
pub trait KeywordModel: Send {
    fn keyword(&self) -> &str;
    /// Consume the next block of samples, reporting a match if one completed.
    fn process(&mut self, samples: &[i16]) -> Option<KeywordMatch>;
    fn reset(&mut self);
}

/// Builds a [`KeywordModel`] from a model file.
pub trait KeywordModelLoader: Send + Sync {
    fn load(&self, path: &Path, sample_rate: u32) -> Result<Box<dyn KeywordModel>, KeywordError>;
}

/// Recognizer lifecycle as seen by the capture engine.
pub trait KeywordRecognizer: Send + Sync {
    fn start_recognition(&self) -> Result<(), KeywordError>;
    fn stop_recognition(&self) -> Result<(), KeywordError>;
    fn is_started(&self) -> bool;
    /// Called from the audio callback; must not block.
    fn push_audio(&self, samples: &[i16]);
}

pub type KeywordCallback = Arc<dyn Fn(KeywordMatch) + Send + Sync>;

struct Worker {
    tx: Sender<Vec<i16>>,
    /// Buffers the worker hands back once the model has consumed them.
    recycled: Receiver<Vec<i16>>,
    handle: JoinHandle<()>,
}

/// [`KeywordRecognizer`] that runs a [`KeywordModel`] on its own thread.
pub struct StreamingKeywordRecognizer {
    keyword: String,
    model: Arc<Mutex<Box<dyn KeywordModel>>>,
    callback: KeywordCallback,
    started: Arc<AtomicBool>,
    worker: Mutex<Option<Worker>>,
    dropped_chunks: AtomicU64,
    allocated_buffers: AtomicU64,
}

impl StreamingKeywordRecognizer {
    pub fn new(model: Box<dyn KeywordModel>, callback: KeywordCallback) -> Self {
        Self {
            keyword: model.keyword().to_string(),
            model: Arc::new(Mutex::new(model)),
            callback,
            started: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
            dropped_chunks: AtomicU64::new(0),
            allocated_buffers: AtomicU64::new(0),
        }
    }

    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    /// Chunks discarded because the worker fell behind or was busy restarting.
    pub fn dropped_chunks(&self) -> u64 {
        self.dropped_chunks.load(Ordering::Relaxed)
    }

    /// Chunk buffers allocated by the capture side. Stays flat once the
    /// worker is recycling buffers back.
    pub fn allocated_buffers(&self) -> u64 {
        self.allocated_buffers.load(Ordering::Relaxed)
    }

    /// Buffers waiting to be reused by the next push.
    pub fn pooled_buffers(&self) -> usize {
        lock_or_recover(&self.worker, "keyword_worker")
            .as_ref()
            .map_or(0, |worker| worker.recycled.len())
    }
}

impl KeywordRecognizer for StreamingKeywordRecognizer {
    fn start_recognition(&self) -> Result<(), KeywordError> {
        let mut worker = lock_or_recover(&self.worker, "keyword_worker");
        if worker.is_some() {
            return Ok(());
        }
        lock_or_recover(&self.model, "keyword_model").reset();

        let (tx, rx) = bounded::<Vec<i16>>(KEYWORD_QUEUE_CHUNKS);
        let (recycle_tx, recycled) = bounded::<Vec<i16>>(KEYWORD_QUEUE_CHUNKS);
        let model = Arc::clone(&self.model);
        let callback = Arc::clone(&self.callback);
        let keyword = self.keyword.clone();
        let handle = thread::Builder::new()
            .name("keyword-recognizer".into())
            .spawn(move || {
                for chunk in rx.iter() {
                    let found = lock_or_recover(&model, "keyword_model").process(&chunk);
                    if let Some(found) = found {
                        tracing::info!(keyword = %keyword, offset = found.offset_samples, "keyword detected");
                        lock_or_recover(&model, "keyword_model").reset();
                        callback(found);
                    }
                    let _ = recycle_tx.try_send(chunk);
                }
            })?;
        *worker = Some(Worker {
            tx,
            recycled,
            handle,
        });
        self.started.store(true, Ordering::Release);
        Ok(())
    }

    fn stop_recognition(&self) -> Result<(), KeywordError> {
        self.started.store(false, Ordering::Release);
        let worker = lock_or_recover(&self.worker, "keyword_worker").take();
        let Some(Worker { tx, handle, .. }) = worker else {
            return Ok(());
        };
        drop(tx);
        if handle.thread().id() == thread::current().id() {
            return Ok(());
        }
        if handle.join().is_err() {
            tracing::error!(keyword = %self.keyword, "keyword worker panicked");
        }
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    fn push_audio(&self, samples: &[i16]) {
        if samples.is_empty() || !self.is_started() {
            return;
        }
        // try_lock: start/stop may hold the slot briefly and the callback must not wait.
        let Ok(worker) = self.worker.try_lock() else {
            self.dropped_chunks.fetch_add(1, Ordering::Relaxed);
            return;
        };
        let Some(worker) = worker.as_ref() else {
            return;
        };
        let mut buffer = match worker.recycled.try_recv() {
            Ok(buffer) => buffer,
            Err(_) => {
                self.allocated_buffers.fetch_add(1, Ordering::Relaxed);
                Vec::with_capacity(samples.len())
            }
        };
        buffer.clear();
        buffer.extend_from_slice(samples);
        match worker.tx.try_send(buffer) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped_chunks.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

impl Drop for StreamingKeywordRecognizer {
    fn drop(&mut self) {
        let _ = self.stop_recognition();
    }
}

/// Cloneable arm/disarm handle shared by the capture and the state machine.
///
/// Both operations are idempotent and log failures instead of returning them.
#[derive(Clone)]
pub struct KeywordSwitch {
    recognizer: Arc<dyn KeywordRecognizer>,
}

impl KeywordSwitch {
    pub fn new(recognizer: Arc<dyn KeywordRecognizer>) -> Self {
        Self { recognizer }
    }

    pub fn arm(&self) {
        if self.recognizer.is_started() {
            return;
        }
        match self.recognizer.start_recognition() {
            Ok(()) => tracing::info!("keyword recognizer started"),
            Err(err) => tracing::error!(error = %err, "failed to start keyword recognizer"),
        }
    }

    pub fn disarm(&self) {
        if !self.recognizer.is_started() {
            return;
        }
        match self.recognizer.stop_recognition() {
            Ok(()) => tracing::info!("keyword recognizer stopped"),
            Err(err) => tracing::error!(error = %err, "failed to stop keyword recognizer"),
        }
    }

    pub fn is_armed(&self) -> bool {
        self.recognizer.is_started()
    }

    pub fn recognizer(&self) -> &Arc<dyn KeywordRecognizer> {
        &self.recognizer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::time::Duration;

    /// Matches whenever a chunk contains `i16::MAX`.
    struct PeakModel {
        seen: u64,
    }

    impl KeywordModel for PeakModel {
        fn keyword(&self) -> &str {
            "peak"
        }

        fn process(&mut self, samples: &[i16]) -> Option<KeywordMatch> {
            let hit = samples.iter().position(|s| *s == i16::MAX);
            let offset = self.seen;
            self.seen += samples.len() as u64;
            hit.map(|idx| KeywordMatch {
                keyword: "peak".into(),
                offset_samples: offset + idx as u64,
                confidence: Some(1.0),
            })
        }

        fn reset(&mut self) {
            self.seen = 0;
        }
    }

    fn recognizer() -> (StreamingKeywordRecognizer, crossbeam_channel::Receiver<KeywordMatch>) {
        let (tx, rx) = unbounded();
        let callback: KeywordCallback = Arc::new(move |found| {
            let _ = tx.send(found);
        });
        (
            StreamingKeywordRecognizer::new(Box::new(PeakModel { seen: 0 }), callback),
            rx,
        )
    }

    #[test]
    fn reports_matches_from_worker_thread() {
        let (rec, rx) = recognizer();
        rec.start_recognition().unwrap();
        rec.push_audio(&[0; 10]);
        let mut chunk = vec![0i16; 10];
        chunk[3] = i16::MAX;
        rec.push_audio(&chunk);

        let found = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(found.keyword, "peak");
        assert_eq!(found.offset_samples, 13);
        rec.stop_recognition().unwrap();
    }

    #[test]
    fn reuses_chunk_buffers_once_worker_returns_them() {
        let (rec, rx) = recognizer();
        rec.start_recognition().unwrap();
        let mut chunk = vec![0i16; 480];
        chunk[100] = i16::MAX;
        for _ in 0..50 {
            rec.push_audio(&chunk);
            rx.recv_timeout(Duration::from_secs(2)).unwrap();
            let deadline = std::time::Instant::now() + Duration::from_secs(2);
            while rec.pooled_buffers() == 0 {
                assert!(std::time::Instant::now() < deadline, "buffer never returned");
                thread::sleep(Duration::from_millis(1));
            }
        }
        assert_eq!(rec.allocated_buffers(), 1);
        assert_eq!(rec.dropped_chunks(), 0);
        rec.stop_recognition().unwrap();
    }

    #[test]
    fn ignores_audio_while_stopped() {
        let (rec, rx) = recognizer();
        rec.push_audio(&[i16::MAX; 4]);
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert!(!rec.is_started());
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let (rec, _rx) = recognizer();
        rec.start_recognition().unwrap();
        rec.start_recognition().unwrap();
        assert!(rec.is_started());
        rec.stop_recognition().unwrap();
        rec.stop_recognition().unwrap();
        assert!(!rec.is_started());
    }

    #[test]
    fn switch_toggles_recognizer() {
        let (rec, _rx) = recognizer();
        let switch = KeywordSwitch::new(Arc::new(rec));
        assert!(!switch.is_armed());
        switch.arm();
        assert!(switch.is_armed());
        switch.disarm();
        assert!(!switch.is_armed());
        switch.disarm();
    }
}
