//! In-memory job read model
//!
//! Holds the latest snapshot of every job together with its cancellation
//! token. The orchestrator task owning a job is its only writer. Finished
//! jobs are evicted oldest first once more than the retention limit exist.

use crate::models::TransformationJob;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

struct JobEntry {
    job: TransformationJob,
    cancel: CancellationToken,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CancelError {
    #[error("Job not found: {0}")]
    NotFound(Uuid),
    #[error("Job {0} already finished")]
    AlreadyTerminal(Uuid),
}

/// Finished jobs kept by [`JobRegistry::new`]
pub const DEFAULT_RETAINED_JOBS: usize = 1000;

#[derive(Default)]
struct Jobs {
    entries: HashMap<Uuid, JobEntry>,
    /// Terminal job ids in completion order
    finished: VecDeque<Uuid>,
}

#[derive(Clone)]
pub struct JobRegistry {
    jobs: Arc<RwLock<Jobs>>,
    retained: usize,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETAINED_JOBS)
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry keeping at most `retained` finished jobs
    pub fn with_retention(retained: usize) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(Jobs::default())),
            retained,
        }
    }

    /// Register a new job and return its cancellation token
    pub async fn insert(&self, job: TransformationJob) -> CancellationToken {
        let cancel = CancellationToken::new();
        let mut jobs = self.jobs.write().await;
        jobs.entries.insert(
            job.id,
            JobEntry {
                job,
                cancel: cancel.clone(),
            },
        );
        cancel
    }

    pub async fn get(&self, job_id: Uuid) -> Option<TransformationJob> {
        let jobs = self.jobs.read().await;
        jobs.entries.get(&job_id).map(|entry| entry.job.clone())
    }

    /// Replace the stored snapshot
    pub async fn update(&self, job: &TransformationJob) {
        let mut jobs = self.jobs.write().await;
        let Some(entry) = jobs.entries.get_mut(&job.id) else {
            return;
        };
        let newly_finished = !entry.job.is_terminal() && job.is_terminal();
        entry.job = job.clone();

        if newly_finished {
            jobs.finished.push_back(job.id);
            while jobs.finished.len() > self.retained {
                if let Some(evicted) = jobs.finished.pop_front() {
                    jobs.entries.remove(&evicted);
                    debug!(job_id = %evicted, "Evicted finished job");
                }
            }
        }
    }

    /// Signal cancellation to a running job
    ///
    /// The job task observes the token and performs the transition itself.
    pub async fn cancel(&self, job_id: Uuid) -> Result<(), CancelError> {
        let jobs = self.jobs.read().await;
        let entry = jobs.entries.get(&job_id).ok_or(CancelError::NotFound(job_id))?;
        if entry.job.is_terminal() {
            return Err(CancelError::AlreadyTerminal(job_id));
        }
        entry.cancel.cancel();
        Ok(())
    }

    /// Cancel every non-terminal job, returning how many were signalled
    pub async fn cancel_all(&self) -> usize {
        let jobs = self.jobs.read().await;
        let mut count = 0;
        for entry in jobs.entries.values().filter(|e| !e.job.is_terminal()) {
            entry.cancel.cancel();
            count += 1;
        }
        count
    }

    /// Jobs not yet in a terminal state
    pub async fn active_count(&self) -> usize {
        let jobs = self.jobs.read().await;
        jobs.entries.values().filter(|e| !e.job.is_terminal()).count()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TransformationRequest;
    use crate::orchestrator::state_machine::PipelineState;

    fn job() -> TransformationJob {
        TransformationJob::new(TransformationRequest {
            source_reference: "ref-A".to_string(),
            target_style: "jazz".to_string(),
        })
    }

    #[tokio::test]
    async fn test_insert_get_update() {
        let registry = JobRegistry::new();
        let mut job = job();
        registry.insert(job.clone()).await;

        job.set_state(PipelineState::Fetching);
        registry.update(&job).await;

        let stored = registry.get(job.id).await.unwrap();
        assert_eq!(stored.state, PipelineState::Fetching);
        assert_eq!(registry.active_count().await, 1);
    }

    #[tokio::test]
    async fn test_cancel_signals_token() {
        let registry = JobRegistry::new();
        let job = job();
        let token = registry.insert(job.clone()).await;

        registry.cancel(job.id).await.unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_unknown_and_terminal() {
        let registry = JobRegistry::new();
        let unknown = Uuid::new_v4();
        assert_eq!(
            registry.cancel(unknown).await,
            Err(CancelError::NotFound(unknown))
        );

        let mut job = job();
        registry.insert(job.clone()).await;
        job.set_state(PipelineState::Failed);
        registry.update(&job).await;
        assert_eq!(
            registry.cancel(job.id).await,
            Err(CancelError::AlreadyTerminal(job.id))
        );
        assert_eq!(registry.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_cancel_all_skips_terminal() {
        let registry = JobRegistry::new();
        let running = job();
        let running_token = registry.insert(running.clone()).await;

        let mut done = job();
        let done_token = registry.insert(done.clone()).await;
        done.set_state(PipelineState::Succeeded);
        registry.update(&done).await;

        assert_eq!(registry.cancel_all().await, 1);
        assert!(running_token.is_cancelled());
        assert!(!done_token.is_cancelled());
    }

    #[tokio::test]
    async fn test_finished_jobs_are_evicted_oldest_first() {
        let registry = JobRegistry::with_retention(2);
        let mut finished = Vec::new();
        for _ in 0..3 {
            let mut job = job();
            registry.insert(job.clone()).await;
            job.set_state(PipelineState::Succeeded);
            registry.update(&job).await;
            finished.push(job);
        }
        let running = job();
        registry.insert(running.clone()).await;

        assert!(registry.get(finished[0].id).await.is_none());
        assert!(registry.get(finished[1].id).await.is_some());
        assert!(registry.get(finished[2].id).await.is_some());
        assert!(registry.get(running.id).await.is_some());
        assert_eq!(registry.len().await, 3);

        // Repeated terminal updates do not count twice
        registry.update(&finished[2]).await;
        assert!(registry.get(finished[1].id).await.is_some());
    }
}
