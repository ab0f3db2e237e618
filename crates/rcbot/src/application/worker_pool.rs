//! Bounded pool of tasks that process inbound frames off the IO task.
//!
//! Each connection epoch gets a fresh pool.  Jobs are spawned into a
//! [`JoinSet`] and gated by a [`Semaphore`] so at most `size` of them run at
//! once; the rest wait for a permit.  [`WorkerPool::shutdown_now`] closes the
//! semaphore and aborts every task, which abandons queued jobs and cancels
//! running ones at their next await point.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

/// Worker count used when none is configured.
pub const DEFAULT_WORKER_THREADS: usize = 4;

#[derive(Debug)]
pub struct WorkerPool {
    tasks: Mutex<JoinSet<()>>,
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    /// Creates a pool that runs at most `size` jobs concurrently.
    ///
    /// A `size` of zero is treated as one.
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            tasks: Mutex::new(JoinSet::new()),
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Queues `job` on the pool.
    ///
    /// Returns `false` without running the job if the pool has been shut down.
    /// Must be called from within a Tokio runtime.
    pub fn submit<F>(&self, job: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.permits.is_closed() {
            return false;
        }
        let permits = Arc::clone(&self.permits);
        let mut tasks = self.tasks.lock();
        // Reap finished jobs so the set does not grow with the frame count.
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            job.await;
        });
        true
    }

    /// Stops accepting jobs and aborts every queued or running one.
    ///
    /// Returns how many tasks were still tracked when the pool stopped.
    pub fn shutdown_now(&self) -> usize {
        self.permits.close();
        let mut tasks = self.tasks.lock();
        let outstanding = tasks.len();
        tasks.abort_all();
        debug!(outstanding, "worker pool shut down");
        outstanding
    }

    pub fn is_shutdown(&self) -> bool {
        self.permits.is_closed()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
