//! Bounded pool for event-handling tasks.

use crate::error::PoolError;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Runs at most `size` submitted tasks at a time.
///
/// Constructed once at startup and handed to the trigger service, so
/// shutdown can wait for in-flight work.
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    tasks: Mutex<JoinSet<()>>,
    closed: AtomicBool,
}

impl WorkerPool {
    /// Creates a pool running up to `size` tasks concurrently.
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(size.max(1))),
            tasks: Mutex::new(JoinSet::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Queues `task`. Returns immediately; the task waits for a free slot.
    ///
    /// # Errors
    ///
    /// Returns `PoolClosed` after `shutdown`.
    pub fn submit<F>(&self, task: F) -> Result<(), PoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(PoolError::PoolClosed);
        }
        let permits = self.permits.clone();
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        while let Some(finished) = tasks.try_join_next() {
            if let Err(e) = finished {
                warn!(error = %e, "pool task panicked");
            }
        }
        tasks.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            task.await;
        });
        Ok(())
    }

    /// Number of queued or running tasks.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Stops accepting work and waits for queued tasks to finish.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        let mut tasks =
            std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        debug!(in_flight = tasks.len(), "draining worker pool");
        while let Some(finished) = tasks.join_next().await {
            if let Err(e) = finished {
                warn!(error = %e, "pool task panicked");
            }
        }
    }
}
