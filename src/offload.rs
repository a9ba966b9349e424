//! Small fixed worker pool for side effects that must leave the calling thread.
//!
//! The audio callback, the keyword worker and the silence timer all hand work
//! off here instead of spawning a thread per event. Submission never blocks: a
//! full queue drops the job with a warning.

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread;

pub const DEFAULT_OFFLOAD_WORKERS: usize = 2;
pub const DEFAULT_OFFLOAD_QUEUE: usize = 64;

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Task {
    label: &'static str,
    job: Job,
}

/// Cloneable handle to a set of detached worker threads.
///
/// Workers exit once every handle has been dropped and the queue is drained.
#[derive(Clone)]
pub struct WorkerPool {
    name: &'static str,
    tx: Sender<Task>,
}

impl WorkerPool {
    pub fn new(name: &'static str, workers: usize, queue: usize) -> Result<Self> {
        let (tx, rx) = bounded::<Task>(queue.max(1));
        for idx in 0..workers.max(1) {
            let rx = rx.clone();
            thread::Builder::new()
                .name(format!("{name}-{idx}"))
                .spawn(move || worker_loop(name, rx))
                .with_context(|| format!("failed to spawn {name} worker {idx}"))?;
        }
        Ok(Self { name, tx })
    }

    pub fn with_defaults(name: &'static str) -> Result<Self> {
        Self::new(name, DEFAULT_OFFLOAD_WORKERS, DEFAULT_OFFLOAD_QUEUE)
    }

    /// Queue `job` without blocking. Returns false when it was dropped.
    pub fn submit<F>(&self, label: &'static str, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let task = Task {
            label,
            job: Box::new(job),
        };
        match self.tx.try_send(task) {
            Ok(()) => true,
            Err(TrySendError::Full(task)) => {
                tracing::warn!(pool = self.name, job = task.label, "offload queue full; dropping job");
                false
            }
            Err(TrySendError::Disconnected(task)) => {
                tracing::warn!(pool = self.name, job = task.label, "offload workers gone; dropping job");
                false
            }
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

fn worker_loop(name: &'static str, rx: Receiver<Task>) {
    for task in rx.iter() {
        if catch_unwind(AssertUnwindSafe(task.job)).is_err() {
            tracing::error!(pool = name, job = task.label, "offloaded job panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn runs_submitted_jobs() {
        let pool = WorkerPool::new("test-offload", 2, 8).unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        for i in 0..5 {
            let tx = tx.clone();
            assert!(pool.submit("send", move || tx.send(i).unwrap()));
        }
        let mut seen: Vec<i32> = (0..5)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn full_queue_drops_without_blocking() {
        let pool = WorkerPool::new("test-offload-full", 1, 1).unwrap();
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(0);
        let (started_tx, started_rx) = crossbeam_channel::bounded::<()>(1);
        assert!(pool.submit("block", move || {
            started_tx.send(()).unwrap();
            let _ = release_rx.recv_timeout(Duration::from_secs(5));
        }));
        started_rx.recv_timeout(Duration::from_secs(2)).unwrap();

        assert!(pool.submit("queued", || {}));
        assert!(!pool.submit("overflow", || {}));
        release_tx.send(()).unwrap();
    }

    #[test]
    fn panicking_job_does_not_kill_worker() {
        let pool = WorkerPool::new("test-offload-panic", 1, 4).unwrap();
        let ran = Arc::new(AtomicUsize::new(0));
        assert!(pool.submit("boom", || panic!("boom")));
        let (tx, rx) = crossbeam_channel::bounded(1);
        let ran_clone = Arc::clone(&ran);
        assert!(pool.submit("after", move || {
            ran_clone.fetch_add(1, Ordering::SeqCst);
            tx.send(()).unwrap();
        }));
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
