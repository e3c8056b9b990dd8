//! Bounded request queue providing backpressure for expensive scrapes
//!
//! Admission is decided synchronously in [`RequestQueue::enqueue`]: once
//! `max_queue_size` tasks are waiting or running, new work is rejected with
//! `QueueFull` and never started. Admitted tasks wait on a fair semaphore, so
//! they start in FIFO order and at most `max_concurrent` run at once.

use crate::error::ScrapeError;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub waiting: usize,
    pub running: usize,
    pub max_concurrent: usize,
    pub max_queue_size: usize,
}

#[derive(Default)]
struct Counters {
    pending: AtomicUsize,
    running: AtomicUsize,
}

/// Releases the admission slot when the task settles or is dropped unpolled
struct SlotGuard {
    counters: Arc<Counters>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.counters.pending.fetch_sub(1, Ordering::SeqCst);
    }
}

struct RunningGuard {
    counters: Arc<Counters>,
}

impl RunningGuard {
    fn new(counters: Arc<Counters>) -> Self {
        counters.running.fetch_add(1, Ordering::SeqCst);
        Self { counters }
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.counters.running.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct RequestQueue {
    max_concurrent: usize,
    max_queue_size: usize,
    permits: Arc<Semaphore>,
    counters: Arc<Counters>,
}

impl RequestQueue {
    pub fn new(max_concurrent: usize, max_queue_size: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            max_concurrent,
            max_queue_size: max_queue_size.max(1),
            permits: Arc::new(Semaphore::new(max_concurrent)),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Admit `task` or reject it immediately.
    ///
    /// On success the returned future waits for a free worker slot, runs the
    /// task and yields its output. The task body is never polled when admission
    /// fails.
    pub fn enqueue<F, T>(&self, task: F) -> Result<impl Future<Output = T> + Send, ScrapeError>
    where
        F: Future<Output = T> + Send,
        T: Send,
    {
        let admitted = self
            .counters
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |pending| {
                (pending < self.max_queue_size).then_some(pending + 1)
            });

        if let Err(pending) = admitted {
            log::warn!(
                "Request queue full ({}/{} pending), rejecting task",
                pending,
                self.max_queue_size
            );
            return Err(ScrapeError::QueueFull(pending));
        }

        let slot = SlotGuard {
            counters: self.counters.clone(),
        };
        let permits = self.permits.clone();
        let counters = self.counters.clone();

        Ok(async move {
            let _slot = slot;
            // The semaphore is owned by the queue and never closed
            let _permit = permits.acquire_owned().await.ok();
            let _running = RunningGuard::new(counters);
            task.await
        })
    }

    /// Admit and await `task` in one step, flattening its result
    pub async fn run<F, T>(&self, task: F) -> Result<T, ScrapeError>
    where
        F: Future<Output = Result<T, ScrapeError>> + Send,
        T: Send,
    {
        self.enqueue(task)?.await
    }

    pub fn stats(&self) -> QueueStats {
        let pending = self.counters.pending.load(Ordering::SeqCst);
        let running = self.counters.running.load(Ordering::SeqCst);
        QueueStats {
            waiting: pending.saturating_sub(running),
            running,
            max_concurrent: self.max_concurrent,
            max_queue_size: self.max_queue_size,
        }
    }
}
