//! Bounded worker pool for RUNTIME and VERIFY work
//!
//! A task waits for a permit inside its own spawned future, so time spent
//! queued for a worker counts against the caller's deadline.

use crate::error::{OperationError, OperationResult};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Fixed number of concurrent workers
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    /// Create pool with `size` workers
    #[must_use]
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Number of workers
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Idle workers
    #[inline]
    #[must_use]
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `task` on a worker
    ///
    /// The handle resolves to `WorkerUnavailable` if the pool was closed.
    pub fn spawn<F, T>(&self, task: F) -> JoinHandle<OperationResult<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        tokio::spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|_| OperationError::WorkerUnavailable)?;
            Ok(task.await)
        })
    }

    /// Refuse further work; running tasks finish
    pub fn close(&self) {
        self.permits.close();
    }

    /// Check if the pool was closed
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }
}
