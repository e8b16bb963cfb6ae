//! Pipeline orchestrator
//!
//! Drives one job through `fetch → separate → style-transfer → transcribe →
//! caption`, enforcing the required/best-effort policy through the pure
//! [`state_machine::Machine`].
//!
//! # Job lifecycle
//! 1. `submit` registers the job and spawns its task
//! 2. The task allocates a working directory and runs the stages in order;
//!    `separate` and `style-transfer` first wait for a worker-pool permit
//! 3. On success the styled output (and caption) are published
//! 4. The working directory is removed on every exit path
//! 5. A terminal event is broadcast and the final snapshot is stored
//!
//! Each job runs sequentially inside its own task; jobs run concurrently
//! with each other.

pub mod registry;
pub mod state_machine;
pub mod worker_pool;

pub use registry::{CancelError, JobRegistry};
pub use state_machine::{Machine, PipelineEvent, PipelineState};
pub use worker_pool::WorkerPool;

use crate::config::{FetchMode, PipelineSettings, StyleTransferInput};
use crate::models::{
    Artifact, PipelineError, StageErrorRecord, StageName, StageStatus, TransformationJob,
    TransformationRequest,
};
use crate::runner::StageRunner;
use crate::stages::{
    CaptionSynchronizer, CommandFetcher, GenreStyleTransferEngine, HttpFetcher, JobContext,
    SourceAudioFetcher, SourceFetcher, SpeechTranscriber, VocalStemSeparator,
};
use crate::storage::{published_name, ArtifactStore};
use crate::utils::{style_slug, RetryPolicy};
use chrono::Utc;
use restyle_common::events::{EventBus, RestyleEvent};
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// The five stage implementations plus stage-wiring options
pub struct PipelineStages {
    pub fetcher: SourceAudioFetcher,
    pub separator: VocalStemSeparator,
    pub style_transfer: GenreStyleTransferEngine,
    pub transcriber: SpeechTranscriber,
    pub captioner: CaptionSynchronizer,
    pub style_transfer_input: StyleTransferInput,
}

impl PipelineStages {
    /// Wire every stage from settings, choosing the fetcher by `fetch.mode`
    pub fn from_settings(settings: &PipelineSettings, runner: Arc<dyn StageRunner>) -> Self {
        let fetcher: Arc<dyn SourceFetcher> = match settings.fetch.mode {
            FetchMode::Command => Arc::new(CommandFetcher::new(
                runner.clone(),
                settings.fetch.tool(),
            )),
            FetchMode::Http => Arc::new(HttpFetcher::new(settings.fetch.tool().timeout())),
        };
        Self::with_fetcher(settings, runner, fetcher)
    }

    /// Wire every stage with an explicit fetcher
    pub fn with_fetcher(
        settings: &PipelineSettings,
        runner: Arc<dyn StageRunner>,
        fetcher: Arc<dyn SourceFetcher>,
    ) -> Self {
        let policy = RetryPolicy::new(
            settings.fetch_max_attempts,
            settings.fetch_backoff(),
            settings.fetch_max_backoff(),
        );
        Self {
            fetcher: SourceAudioFetcher::new(fetcher, policy),
            separator: VocalStemSeparator::new(
                runner.clone(),
                settings.separate.clone(),
                &settings.audio_extension,
            ),
            style_transfer: GenreStyleTransferEngine::new(
                runner.clone(),
                settings.style_transfer.clone(),
                &settings.audio_extension,
            ),
            transcriber: SpeechTranscriber::new(runner, settings.transcribe.clone()),
            captioner: CaptionSynchronizer::new(settings.caption_format),
            style_transfer_input: settings.style_transfer_input,
        }
    }
}

/// Handle to a submitted job
pub struct JobHandle {
    pub job_id: Uuid,
    task: JoinHandle<TransformationJob>,
}

impl JobHandle {
    /// Wait for the job to reach a terminal state
    ///
    /// Dropping the handle instead leaves the job running.
    pub async fn wait(self) -> Option<TransformationJob> {
        self.task.await.ok()
    }
}

struct Inner {
    stages: PipelineStages,
    store: Arc<dyn ArtifactStore>,
    pool: WorkerPool,
    registry: JobRegistry,
    event_bus: EventBus,
    tracker: TaskTracker,
}

/// Pipeline orchestrator service
#[derive(Clone)]
pub struct PipelineOrchestrator {
    inner: Arc<Inner>,
}

impl PipelineOrchestrator {
    pub fn new(
        stages: PipelineStages,
        store: Arc<dyn ArtifactStore>,
        pool: WorkerPool,
        registry: JobRegistry,
        event_bus: EventBus,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                stages,
                store,
                pool,
                registry,
                event_bus,
                tracker: TaskTracker::new(),
            }),
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.inner.registry
    }

    pub fn worker_pool(&self) -> &WorkerPool {
        &self.inner.pool
    }

    /// Accept a request and start its job in the background
    ///
    /// Rejects blank references and styles; the style is otherwise free-form.
    pub async fn submit(
        &self,
        request: TransformationRequest,
    ) -> restyle_common::Result<JobHandle> {
        if request.source_reference.trim().is_empty() {
            return Err(restyle_common::Error::InvalidInput(
                "sourceReference must not be blank".to_string(),
            ));
        }
        if request.target_style.trim().is_empty() {
            return Err(restyle_common::Error::InvalidInput(
                "targetStyle must not be blank".to_string(),
            ));
        }

        let job = TransformationJob::new(request);
        let job_id = job.id;
        let cancel = self.inner.registry.insert(job.clone()).await;

        info!(
            job_id = %job_id,
            source_reference = %job.source_reference,
            target_style = %job.target_style,
            "Transformation job submitted"
        );
        self.inner.event_bus.emit_lossy(RestyleEvent::JobSubmitted {
            job_id,
            source_reference: job.source_reference.clone(),
            target_style: job.target_style.clone(),
            timestamp: Utc::now(),
        });

        let inner = self.inner.clone();
        let task = self
            .inner
            .tracker
            .spawn(async move { inner.run_job(job, cancel).await });

        Ok(JobHandle { job_id, task })
    }

    /// Request cancellation of a running job
    pub async fn cancel(&self, job_id: Uuid) -> Result<(), CancelError> {
        self.inner.registry.cancel(job_id).await?;
        info!(job_id = %job_id, "Cancellation requested");
        Ok(())
    }

    /// Cancel every running job and wait for their cleanup to finish
    pub async fn shutdown(&self) {
        let cancelled = self.inner.registry.cancel_all().await;
        info!(cancelled, "Shutting down pipeline, cancelling in-flight jobs");
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        info!("All pipeline jobs finished");
    }
}

/// Removes the working directory if the job task ends without cleanup
/// (panic or abort)
struct WorkDirGuard {
    path: Option<PathBuf>,
}

impl WorkDirGuard {
    fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    fn release(&mut self) {
        self.path = None;
    }
}

impl Drop for WorkDirGuard {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(e) = std::fs::remove_dir_all(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "Guard failed to remove working directory");
                }
            }
        }
    }
}

impl Inner {
    async fn run_job(&self, job: TransformationJob, cancel: CancellationToken) -> TransformationJob {
        let job_id = job.id;
        let ctx = JobContext {
            job_id,
            work_dir: self.store.work_dir_path(job_id),
            source_reference: job.source_reference.clone(),
            target_style: job.target_style.clone(),
            style_slug: style_slug(&job.target_style),
            cancel,
        };

        let mut run = JobRun {
            inner: self,
            job,
            machine: Machine::new(),
        };
        run.transition(PipelineEvent::Start).await;
        info!(job_id = %job_id, style_slug = %ctx.style_slug, "Job started");

        let mut guard = match self.store.allocate_work_dir(job_id).await {
            Ok(dir) => Some(WorkDirGuard::new(dir)),
            Err(e) => {
                // Nothing ran yet; attribute the failure to the first stage
                run.fail(StageName::Fetch, e).await;
                None
            }
        };

        if guard.is_some() {
            self.drive(&mut run, &ctx).await;
            run.publish_outputs(&ctx).await;
        }

        match self.store.cleanup(job_id).await {
            Ok(()) => {
                if let Some(guard) = guard.as_mut() {
                    guard.release();
                }
                debug!(job_id = %job_id, "Working directory cleaned up");
            }
            Err(e) => warn!(job_id = %job_id, error = %e, "Cleanup failed"),
        }
        drop(guard);

        run.finish().await
    }

    /// Run the stages in order, stopping at the first terminal state
    async fn drive(&self, run: &mut JobRun<'_>, ctx: &JobContext) {
        let stages = &self.stages;

        // fetch
        let attempts = AtomicU32::new(1);
        let event_bus = &self.event_bus;
        let fetch = stages.fetcher.run(ctx, |attempt| {
            attempts.store(attempt, Ordering::SeqCst);
            if attempt > 1 {
                event_bus.emit_lossy(RestyleEvent::StageStarted {
                    job_id: ctx.job_id,
                    stage: StageName::Fetch.to_string(),
                    attempt,
                    timestamp: Utc::now(),
                });
            }
        });
        let result = run.run_stage(StageName::Fetch, &ctx.cancel, fetch).await;
        run.job.stage_mut(StageName::Fetch).attempts = attempts.load(Ordering::SeqCst);
        let source = match result {
            Ok(artifact) => {
                run.succeed(StageName::Fetch, Some(artifact.clone())).await;
                artifact
            }
            Err(e) => return run.fail(StageName::Fetch, e).await,
        };

        // separate
        let separate = stages.separator.run(ctx, &source);
        let stems = match run.run_stage(StageName::Separate, &ctx.cancel, separate).await {
            Ok(stems) => {
                run.job.stage_mut(StageName::Separate).secondary_artifact =
                    stems.instrumental.clone();
                run.succeed(StageName::Separate, Some(stems.vocals.clone()))
                    .await;
                stems
            }
            Err(e) => return run.fail(StageName::Separate, e).await,
        };

        // style-transfer
        let input: &Artifact = match stages.style_transfer_input {
            StyleTransferInput::Vocals => &stems.vocals,
            StyleTransferInput::Source => &source,
        };
        let style = stages.style_transfer.run(ctx, input);
        let styled = match run.run_stage(StageName::StyleTransfer, &ctx.cancel, style).await {
            Ok(styled) => {
                run.succeed(StageName::StyleTransfer, Some(styled.clone()))
                    .await;
                styled
            }
            Err(e) => return run.fail(StageName::StyleTransfer, e).await,
        };

        // transcribe (best-effort)
        let transcribe = stages.transcriber.run(ctx, &styled);
        let transcript = match run
            .run_stage(StageName::Transcribe, &ctx.cancel, transcribe)
            .await
        {
            Ok(output) => {
                run.job.transcript = Some(output.transcript.clone());
                run.succeed(StageName::Transcribe, Some(output.artifact))
                    .await;
                Some(output.transcript)
            }
            Err(e) => {
                run.fail(StageName::Transcribe, e).await;
                None
            }
        };
        if run.machine.state().is_terminal() {
            return;
        }

        // caption (best-effort, only with a transcript)
        let Some(transcript) = transcript else {
            return run
                .skip(StageName::Caption, "transcription did not succeed")
                .await;
        };
        let caption = stages.captioner.run(ctx, &transcript);
        match run.run_stage(StageName::Caption, &ctx.cancel, caption).await {
            Ok(artifact) => run.succeed(StageName::Caption, Some(artifact)).await,
            Err(e) => run.fail(StageName::Caption, e).await,
        }
    }
}

/// Mutable state of one job while its task runs
struct JobRun<'a> {
    inner: &'a Inner,
    job: TransformationJob,
    machine: Machine,
}

impl<'a> JobRun<'a> {
    fn job_id(&self) -> Uuid {
        self.job.id
    }

    /// Apply a state machine event to the job
    ///
    /// Terminal snapshots are stored only by `finish`, after publication and
    /// cleanup, so readers never see a terminal job without its URLs.
    async fn transition(&mut self, event: PipelineEvent) {
        let transition = self.machine.apply(event);
        if transition.from != transition.to {
            debug!(
                job_id = %self.job_id(),
                from = ?transition.from,
                to = ?transition.to,
                "Job state transition"
            );
        }
        if !transition.to.is_terminal() {
            self.job.set_state(transition.to);
            self.sync().await;
        }
    }

    async fn sync(&self) {
        self.inner.registry.update(&self.job).await;
    }

    /// Wait for a pool permit when the stage is gated, then run `work`
    ///
    /// The permit is held until the stage's finish time is stamped so
    /// timestamps of gated stages never overlap beyond the pool size.
    async fn run_stage<T>(
        &mut self,
        stage: StageName,
        cancel: &CancellationToken,
        work: impl Future<Output = Result<T, PipelineError>>,
    ) -> Result<T, PipelineError> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let _permit = if stage.is_pool_gated() {
            self.job.mark_queued(stage);
            self.sync().await;
            debug!(
                job_id = %self.job_id(),
                stage = %stage,
                available = self.inner.pool.available(),
                "Waiting for worker pool permit"
            );
            Some(self.inner.pool.acquire(cancel).await?)
        } else {
            None
        };

        self.job.begin_stage(stage, 1);
        self.sync().await;
        info!(job_id = %self.job_id(), stage = %stage, "Stage started");
        self.inner.event_bus.emit_lossy(RestyleEvent::StageStarted {
            job_id: self.job_id(),
            stage: stage.to_string(),
            attempt: 1,
            timestamp: Utc::now(),
        });

        let result = work.await;
        self.job.mark_finished(stage);
        result
    }

    async fn succeed(&mut self, stage: StageName, artifact: Option<Artifact>) {
        self.job.complete_stage(stage, artifact);
        let duration_ms = self.job.stage(stage).duration_ms().unwrap_or_default();
        info!(job_id = %self.job_id(), stage = %stage, duration_ms, "Stage completed");
        self.inner.event_bus.emit_lossy(RestyleEvent::StageCompleted {
            job_id: self.job_id(),
            stage: stage.to_string(),
            duration_ms,
            timestamp: Utc::now(),
        });
        self.transition(PipelineEvent::StageSucceeded).await;
    }

    async fn fail(&mut self, stage: StageName, err: PipelineError) {
        if err.is_cancelled() {
            return self.cancelled(stage).await;
        }

        let record = StageErrorRecord::from(&err);
        if stage.is_required() {
            error!(job_id = %self.job_id(), stage = %stage, error = %err, "Required stage failed");
        } else {
            warn!(job_id = %self.job_id(), stage = %stage, error = %err, "Best-effort stage failed");
        }
        self.inner.event_bus.emit_lossy(RestyleEvent::StageFailed {
            job_id: self.job_id(),
            stage: stage.to_string(),
            required: stage.is_required(),
            error_code: record.kind.code().to_string(),
            error_message: record.message.clone(),
            timestamp: Utc::now(),
        });
        self.job.fail_stage(stage, record);
        self.transition(PipelineEvent::StageFailed).await;
    }

    async fn skip(&mut self, stage: StageName, reason: &str) {
        info!(job_id = %self.job_id(), stage = %stage, reason, "Stage skipped");
        self.job.skip_stage(stage, reason);
        self.inner.event_bus.emit_lossy(RestyleEvent::StageSkipped {
            job_id: self.job_id(),
            stage: stage.to_string(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
        self.transition(PipelineEvent::StageSkipped).await;
    }

    async fn cancelled(&mut self, stage: StageName) {
        info!(job_id = %self.job_id(), stage = %stage, "Job cancelled");
        if matches!(
            self.job.stage(stage).status,
            StageStatus::Queued | StageStatus::Running | StageStatus::Pending
        ) {
            self.job.cancel_stage(stage);
        }
        self.transition(PipelineEvent::Cancelled).await;
    }

    /// Promote response artifacts of a successful job
    ///
    /// Styled audio first: failing to publish it fails the job. A caption
    /// publication failure degrades the job to partial success.
    async fn publish_outputs(&mut self, ctx: &JobContext) {
        if !matches!(
            self.machine.state(),
            PipelineState::Succeeded | PipelineState::PartiallySucceeded
        ) {
            return;
        }

        for stage in [StageName::StyleTransfer, StageName::Caption] {
            let Some(artifact) = self.job.artifact(stage).cloned() else {
                continue;
            };
            let name = published_name(ctx.job_id, stage, &ctx.style_slug, artifact.extension());
            match self.inner.store.publish(artifact.path(), &name).await {
                Ok(url) => match stage {
                    StageName::Caption => self.job.caption_url = Some(url),
                    _ => self.job.styled_audio_url = Some(url),
                },
                Err(e) => {
                    let err = match stage {
                        StageName::Caption => {
                            PipelineError::caption(format!("publication failed: {}", e))
                        }
                        _ => e,
                    };
                    self.fail_publication(stage, err).await;
                    if stage.is_required() {
                        return;
                    }
                }
            }
        }
    }

    async fn fail_publication(&mut self, stage: StageName, err: PipelineError) {
        error!(job_id = %self.job_id(), stage = %stage, error = %err, "Artifact publication failed");
        let record = StageErrorRecord::from(&err);
        self.inner.event_bus.emit_lossy(RestyleEvent::StageFailed {
            job_id: self.job_id(),
            stage: stage.to_string(),
            required: stage.is_required(),
            error_code: record.kind.code().to_string(),
            error_message: record.message.clone(),
            timestamp: Utc::now(),
        });
        self.job.fail_stage(stage, record);
        if stage.is_required() {
            self.job.styled_audio_url = None;
            self.job.caption_url = None;
        }
        self.transition(PipelineEvent::PublicationFailed { stage }).await;
    }

    /// Store the terminal snapshot and broadcast the terminal event
    async fn finish(mut self) -> TransformationJob {
        let state = self.machine.state();
        self.job.set_state(state);
        self.sync().await;

        let job_id = self.job_id();
        let event = match state {
            PipelineState::Succeeded | PipelineState::PartiallySucceeded => {
                info!(job_id = %job_id, status = %self.job.status.as_str(), "Job completed");
                RestyleEvent::JobCompleted {
                    job_id,
                    status: self.job.status.as_str().to_string(),
                    styled_audio_url: self.job.styled_audio_url.clone().unwrap_or_default(),
                    timestamp: Utc::now(),
                }
            }
            PipelineState::Cancelled => RestyleEvent::JobCancelled {
                job_id,
                timestamp: Utc::now(),
            },
            _ => {
                let failed_stage = self.job.failed_stage.unwrap_or(StageName::Fetch);
                let error = self.job.stage(failed_stage).error.clone();
                error!(job_id = %job_id, failed_stage = %failed_stage, "Job failed");
                RestyleEvent::JobFailed {
                    job_id,
                    failed_stage: failed_stage.to_string(),
                    error_code: error
                        .as_ref()
                        .map(|e| e.kind.code().to_string())
                        .unwrap_or_default(),
                    error_message: error.map(|e| e.message).unwrap_or_default(),
                    timestamp: Utc::now(),
                }
            }
        };
        self.inner.event_bus.emit_lossy(event);
        self.job
    }
}
