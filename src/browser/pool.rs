//! Lazily-created pool holding at most one rendering worker
//!
//! The worker is created on first demand and shared by every caller until
//! [`BrowserPool::stop`]. Concurrent first callers wait on the same launch
//! instead of starting a second process. Per-request state lives on the pages
//! a lease opens, never on the worker.
//!
//! A worker whose connection is gone (its pages can no longer be opened) is
//! evicted from the slot, so the next caller launches a replacement.

use super::manager::BrowserError;
use super::page::Page;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// A rendering-capable process that can open fresh pages
#[async_trait]
pub trait Worker: Send + Sync {
    async fn open_page(&self) -> Result<Box<dyn Page>, BrowserError>;
}

/// Creates workers for a pool
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn launch(&self) -> Result<Arc<dyn Worker>, BrowserError>;
}

pub struct BrowserPool {
    launcher: Arc<dyn WorkerLauncher>,
    slot: Arc<Mutex<Option<Arc<dyn Worker>>>>,
    in_use: Arc<AtomicUsize>,
}

impl BrowserPool {
    pub fn new(launcher: Arc<dyn WorkerLauncher>) -> Self {
        Self {
            launcher,
            slot: Arc::new(Mutex::new(None)),
            in_use: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Warm the pool up front instead of on the first scrape
    pub async fn start(&self) -> Result<(), BrowserError> {
        self.get_worker().await.map(|_| ())
    }

    /// Drop the pool's reference to the worker. Outstanding leases keep it
    /// alive until they are released; the process exits with the last one.
    /// A later `get_worker` launches a new worker.
    pub async fn stop(&self) {
        let worker = self.slot.lock().await.take();
        if worker.is_some() {
            log::info!(
                "Browser pool stopped ({} lease(s) still outstanding)",
                self.in_use()
            );
        }
    }

    /// Return the shared worker, launching it if needed.
    ///
    /// The slot lock is held across the launch, so callers arriving while a
    /// launch is in flight receive that same worker once it is ready. A
    /// failed launch leaves the slot empty for the next caller to retry.
    pub async fn get_worker(&self) -> Result<Arc<dyn Worker>, BrowserError> {
        let mut slot = self.slot.lock().await;
        if let Some(worker) = slot.as_ref() {
            return Ok(worker.clone());
        }

        log::info!("Launching browser worker");
        let worker = self.launcher.launch().await.map_err(|e| {
            log::error!("Failed to launch browser worker: {}", e);
            e
        })?;
        *slot = Some(worker.clone());
        Ok(worker)
    }

    /// Check the worker out for one task
    pub async fn acquire(&self) -> Result<WorkerLease, BrowserError> {
        let worker = self.get_worker().await?;
        self.in_use.fetch_add(1, Ordering::SeqCst);
        Ok(WorkerLease {
            worker,
            slot: self.slot.clone(),
            in_use: self.in_use.clone(),
        })
    }

    /// Return a lease to the pool. Dropping the lease has the same effect.
    pub fn release(&self, lease: WorkerLease) {
        drop(lease);
    }

    /// Number of leases currently checked out
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::SeqCst)
    }

    pub async fn is_running(&self) -> bool {
        self.slot.lock().await.is_some()
    }
}

/// Scoped checkout of the pool's worker, released on drop on every exit path
pub struct WorkerLease {
    worker: Arc<dyn Worker>,
    slot: Arc<Mutex<Option<Arc<dyn Worker>>>>,
    in_use: Arc<AtomicUsize>,
}

impl WorkerLease {
    /// Open a fresh page. If the worker turns out to be dead it is evicted
    /// from the pool before the error is returned.
    pub async fn open_page(&self) -> Result<Box<dyn Page>, BrowserError> {
        match self.worker.open_page().await {
            Ok(page) => Ok(page),
            Err(e) if e.is_worker_lost() => {
                self.evict().await;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Clear the pool slot if it still holds this lease's worker. A newer
    /// worker launched by another caller is left alone.
    async fn evict(&self) {
        let mut slot = self.slot.lock().await;
        let same = slot.as_ref().is_some_and(|current| {
            std::ptr::addr_eq(Arc::as_ptr(current), Arc::as_ptr(&self.worker))
        });
        if same {
            slot.take();
            log::warn!("Browser worker lost its connection; next request relaunches it");
        }
    }

    pub fn worker(&self) -> &Arc<dyn Worker> {
        &self.worker
    }
}

impl Drop for WorkerLease {
    fn drop(&mut self) {
        self.in_use.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    struct NullWorker;

    #[async_trait]
    impl Worker for NullWorker {
        async fn open_page(&self) -> Result<Box<dyn Page>, BrowserError> {
            Err(BrowserError::TabCreationError("no pages in tests".into()))
        }
    }

    #[derive(Default)]
    struct CountingLauncher {
        launches: AtomicUsize,
        fail_next: AtomicBool,
    }

    #[async_trait]
    impl WorkerLauncher for CountingLauncher {
        async fn launch(&self) -> Result<Arc<dyn Worker>, BrowserError> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.launches.fetch_add(1, Ordering::SeqCst);
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(BrowserError::InitializationError("chrome missing".into()));
            }
            Ok(Arc::new(NullWorker))
        }
    }

    #[tokio::test]
    async fn test_concurrent_get_worker_launches_once() {
        let launcher = Arc::new(CountingLauncher::default());
        let pool = BrowserPool::new(launcher.clone());

        let (a, b) = tokio::join!(pool.get_worker(), pool.get_worker());
        let (a, b) = (a.unwrap(), b.unwrap());

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_lease_released_on_drop_and_error_paths() {
        let pool = BrowserPool::new(Arc::new(CountingLauncher::default()));

        let lease = pool.acquire().await.unwrap();
        assert_eq!(pool.in_use(), 1);
        assert!(lease.open_page().await.is_err());
        pool.release(lease);
        assert_eq!(pool.in_use(), 0);

        let failing = async {
            let _lease = pool.acquire().await?;
            Err::<(), BrowserError>(BrowserError::Timeout("selector".into()))
        };
        assert!(failing.await.is_err());
        assert_eq!(pool.in_use(), 0);
    }

    #[tokio::test]
    async fn test_failed_launch_is_retried() {
        let launcher = Arc::new(CountingLauncher::default());
        launcher.fail_next.store(true, Ordering::SeqCst);
        let pool = BrowserPool::new(launcher.clone());

        assert!(pool.start().await.is_err());
        assert!(!pool.is_running().await);
        assert!(pool.get_worker().await.is_ok());
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dead_worker_is_replaced() {
        let launcher = Arc::new(CountingLauncher::default());
        let pool = BrowserPool::new(launcher.clone());

        for _ in 0..3 {
            let lease = pool.acquire().await.unwrap();
            assert!(matches!(
                lease.open_page().await,
                Err(BrowserError::TabCreationError(_))
            ));
            assert!(!pool.is_running().await);
        }
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 3);
        assert_eq!(pool.in_use(), 0);
    }

    #[tokio::test]
    async fn test_stale_lease_does_not_evict_replacement() {
        let launcher = Arc::new(CountingLauncher::default());
        let pool = BrowserPool::new(launcher.clone());

        let stale = pool.acquire().await.unwrap();
        pool.stop().await;
        let fresh = pool.get_worker().await.unwrap();

        assert!(stale.open_page().await.is_err());
        let current = pool.get_worker().await.unwrap();
        assert!(Arc::ptr_eq(&fresh, &current));
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stop_then_relaunch() {
        let launcher = Arc::new(CountingLauncher::default());
        let pool = BrowserPool::new(launcher.clone());

        let first = pool.get_worker().await.unwrap();
        pool.stop().await;
        assert!(!pool.is_running().await);

        let second = pool.get_worker().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 2);
    }
}
