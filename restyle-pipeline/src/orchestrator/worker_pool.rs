//! Bounded worker pool for the heavy stages
//!
//! A single system-wide semaphore gates `separate` and `style-transfer`
//! invocations. Tokio's semaphore is fair, so waiters are served FIFO.

use crate::models::PipelineError;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Wait for a permit, giving up as soon as the job is cancelled
    ///
    /// The permit is released when dropped.
    pub async fn acquire(
        &self,
        cancel: &CancellationToken,
    ) -> Result<OwnedSemaphorePermit, PipelineError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PipelineError::Cancelled),
            permit = self.semaphore.clone().acquire_owned() => {
                permit.map_err(|_| PipelineError::storage("worker pool closed"))
            }
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Number of permits currently held
    pub fn in_use(&self) -> usize {
        self.size.saturating_sub(self.available())
    }
}
