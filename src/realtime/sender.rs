//! Non-blocking send path between the capture callback and the session.
//!
//! The producer side never waits: a full queue evicts its oldest chunk. A
//! single sender thread drains the queue and calls the session.

use super::session::RealtimeSession;
use crate::lock_or_recover;
use anyhow::{Context, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const DEFAULT_SEND_QUEUE_MAX: usize = 64;
pub const DEFAULT_OVERFLOW_LOG_INTERVAL: Duration = Duration::from_secs(5);
const SENDER_POLL_INTERVAL: Duration = Duration::from_millis(250);
const SENDER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SendQueueSettings {
    pub max_chunks: usize,
    pub overflow_log_interval: Duration,
}

impl Default for SendQueueSettings {
    fn default() -> Self {
        Self {
            max_chunks: DEFAULT_SEND_QUEUE_MAX,
            overflow_log_interval: DEFAULT_OVERFLOW_LOG_INTERVAL,
        }
    }
}

/// Drop counters for diagnostics. Lock-free so the producer never contends
/// with the sender thread.
struct OverflowCounters {
    total: AtomicU64,
    window: AtomicU64,
    last_log_ms: AtomicU64,
    epoch: Instant,
    interval: Duration,
}

impl OverflowCounters {
    fn new(interval: Duration) -> Self {
        Self {
            total: AtomicU64::new(0),
            window: AtomicU64::new(0),
            last_log_ms: AtomicU64::new(0),
            epoch: Instant::now(),
            interval,
        }
    }

    fn note(&self, queue_len: usize, capacity: usize) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.window.fetch_add(1, Ordering::Relaxed);
        let now = self.epoch.elapsed().as_millis() as u64;
        let last = self.last_log_ms.load(Ordering::Relaxed);
        if now.saturating_sub(last) < self.interval.as_millis() as u64 {
            return;
        }
        // Only the producer that wins the swap logs this window.
        if self
            .last_log_ms
            .compare_exchange(last, now, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            let dropped = self.window.swap(0, Ordering::AcqRel);
            tracing::warn!(
                dropped,
                interval_sec = self.interval.as_secs_f32(),
                queue_len,
                capacity,
                "audio send queue overflow; dropping oldest chunks to keep latency bounded"
            );
        }
    }

    fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

struct SenderWorker {
    stop: Arc<AtomicBool>,
    done_rx: Receiver<()>,
    handle: JoinHandle<()>,
}

pub struct AudioSendPipeline {
    settings: SendQueueSettings,
    session: Arc<dyn RealtimeSession>,
    tx: Sender<Vec<u8>>,
    // Held by the producer as well so it can evict the oldest entry.
    rx: Receiver<Vec<u8>>,
    counters: OverflowCounters,
    worker: Mutex<Option<SenderWorker>>,
}

impl AudioSendPipeline {
    pub fn new(settings: SendQueueSettings, session: Arc<dyn RealtimeSession>) -> Self {
        let capacity = settings.max_chunks.max(1);
        let (tx, rx) = bounded(capacity);
        Self {
            settings: SendQueueSettings {
                max_chunks: capacity,
                ..settings
            },
            session,
            tx,
            rx,
            counters: OverflowCounters::new(settings.overflow_log_interval),
            worker: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> SendQueueSettings {
        self.settings
    }

    /// Queue a chunk for the sender thread. Never blocks.
    pub fn enqueue(&self, chunk: Vec<u8>) {
        if chunk.is_empty() {
            return;
        }
        let chunk = match self.tx.try_send(chunk) {
            Ok(()) => return,
            Err(TrySendError::Full(chunk)) => chunk,
            Err(TrySendError::Disconnected(_)) => return,
        };
        self.counters.note(self.rx.len(), self.settings.max_chunks);
        let _ = self.rx.try_recv();
        if let Err(TrySendError::Full(_)) = self.tx.try_send(chunk) {
            // Another producer refilled the slot first.
            self.counters.note(self.rx.len(), self.settings.max_chunks);
        }
    }

    pub fn queued(&self) -> usize {
        self.rx.len()
    }

    pub fn overflow_total(&self) -> u64 {
        self.counters.total()
    }

    pub fn is_running(&self) -> bool {
        lock_or_recover(&self.worker, "send_pipeline_worker").is_some()
    }

    pub fn start(&self) -> Result<()> {
        let mut worker = lock_or_recover(&self.worker, "send_pipeline_worker");
        if worker.is_some() {
            return Ok(());
        }
        let stop = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = bounded::<()>(1);
        let rx = self.rx.clone();
        let session = Arc::clone(&self.session);
        let thread_stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("rt-audio-sender".into())
            .spawn(move || {
                sender_loop(&rx, session.as_ref(), &thread_stop);
                let _ = done_tx.send(());
            })
            .context("failed to spawn audio sender thread")?;
        *worker = Some(SenderWorker {
            stop,
            done_rx,
            handle,
        });
        tracing::debug!(
            max_chunks = self.settings.max_chunks,
            overflow_log_sec = self.settings.overflow_log_interval.as_secs_f32(),
            "realtime audio sender started"
        );
        Ok(())
    }

    /// Stop the sender thread, waiting a bounded time for it to exit.
    pub fn stop(&self) {
        let Some(worker) = lock_or_recover(&self.worker, "send_pipeline_worker").take() else {
            return;
        };
        worker.stop.store(true, Ordering::Release);
        // Poison pill wakes a sender blocked on an empty queue.
        if let Err(TrySendError::Full(pill)) = self.tx.try_send(Vec::new()) {
            let _ = self.rx.try_recv();
            let _ = self.tx.try_send(pill);
        }
        match worker.done_rx.recv_timeout(SENDER_JOIN_TIMEOUT) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if worker.handle.join().is_err() {
                    tracing::error!("audio sender thread panicked");
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!("audio sender did not stop within {SENDER_JOIN_TIMEOUT:?}; detaching");
            }
        }

        let stale = self.rx.try_iter().filter(|c| !c.is_empty()).count();
        if stale > 0 {
            tracing::debug!(stale, "discarded unsent audio chunks");
        }
        let total = self.counters.total();
        if total > 0 {
            tracing::warn!(
                total,
                max_chunks = self.settings.max_chunks,
                "audio send queue overflowed this session; consider a larger send queue, \
                 fewer frames per buffer, or better network throughput"
            );
        }
    }

    #[cfg(test)]
    pub(crate) fn drain_pending(&self) -> Vec<Vec<u8>> {
        self.rx.try_iter().collect()
    }
}

impl Drop for AudioSendPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn sender_loop(rx: &Receiver<Vec<u8>>, session: &dyn RealtimeSession, stop: &AtomicBool) {
    while !stop.load(Ordering::Acquire) {
        let chunk = match rx.recv_timeout(SENDER_POLL_INTERVAL) {
            Ok(chunk) => chunk,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        if chunk.is_empty() || stop.load(Ordering::Acquire) {
            continue;
        }
        if let Err(err) = session.send_audio(&chunk) {
            tracing::debug!(error = %err, "send_audio failed (dropped)");
        }
    }
}
