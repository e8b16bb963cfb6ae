//! Transformation job model
//!
//! A job owns five ordered stage records. Only the orchestrator mutates a
//! job, and it does so from a single task, so no interior locking is needed
//! here; the registry publishes snapshots for readers.

use super::{Artifact, ErrorKind, StageErrorRecord, Transcript};
use crate::orchestrator::state_machine::PipelineState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Pipeline stage identifier, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageName {
    Fetch,
    Separate,
    StyleTransfer,
    Transcribe,
    Caption,
}

impl StageName {
    /// All stages in execution order
    pub const ALL: [StageName; 5] = [
        StageName::Fetch,
        StageName::Separate,
        StageName::StyleTransfer,
        StageName::Transcribe,
        StageName::Caption,
    ];

    /// Wire name (`fetch`, `style-transfer`, ...)
    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Fetch => "fetch",
            StageName::Separate => "separate",
            StageName::StyleTransfer => "style-transfer",
            StageName::Transcribe => "transcribe",
            StageName::Caption => "caption",
        }
    }

    pub fn requiredness(&self) -> Requiredness {
        match self {
            StageName::Fetch | StageName::Separate | StageName::StyleTransfer => {
                Requiredness::Required
            }
            StageName::Transcribe | StageName::Caption => Requiredness::BestEffort,
        }
    }

    pub fn is_required(&self) -> bool {
        self.requiredness() == Requiredness::Required
    }

    /// Stages that spawn GPU/CPU-heavy executables and share the worker pool
    pub fn is_pool_gated(&self) -> bool {
        matches!(self, StageName::Separate | StageName::StyleTransfer)
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Requiredness {
    /// Failure aborts the job
    Required,
    /// Failure is recorded, the job continues
    BestEffort,
}

/// Overall job status exposed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    PartiallySucceeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded
                | JobStatus::PartiallySucceeded
                | JobStatus::Failed
                | JobStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::PartiallySucceeded => "partially-succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl From<PipelineState> for JobStatus {
    fn from(state: PipelineState) -> Self {
        match state {
            PipelineState::Pending => JobStatus::Pending,
            PipelineState::Fetching
            | PipelineState::Separating
            | PipelineState::StyleTransferring
            | PipelineState::Transcribing
            | PipelineState::Captioning => JobStatus::Running,
            PipelineState::Succeeded => JobStatus::Succeeded,
            PipelineState::PartiallySucceeded => JobStatus::PartiallySucceeded,
            PipelineState::Failed => JobStatus::Failed,
            PipelineState::Cancelled => JobStatus::Cancelled,
        }
    }
}

/// Per-stage status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageStatus {
    /// Not reached yet
    Pending,
    /// Waiting for a worker-pool permit
    Queued,
    Running,
    Succeeded,
    Failed,
    /// Not attempted (e.g. caption without a transcript)
    Skipped,
    /// Interrupted by job cancellation
    Cancelled,
}

/// Execution record of one stage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageExecution {
    pub name: StageName,
    pub requiredness: Requiredness,
    pub status: StageStatus,
    /// Produced file, absent on failure
    pub output_artifact: Option<Artifact>,
    /// Secondary output (the instrumental stem of `separate`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary_artifact: Option<Artifact>,
    pub error: Option<StageErrorRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    pub attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl StageExecution {
    fn new(name: StageName) -> Self {
        Self {
            name,
            requiredness: name.requiredness(),
            status: StageStatus::Pending,
            output_artifact: None,
            secondary_artifact: None,
            error: None,
            skip_reason: None,
            attempts: 0,
            started_at: None,
            finished_at: None,
        }
    }

    /// Wall time spent running, if finished
    pub fn duration_ms(&self) -> Option<u64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds().max(0) as u64),
            _ => None,
        }
    }
}

/// Caller request: source + target style
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformationRequest {
    pub source_reference: String,
    pub target_style: String,
}

/// One submission of the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformationJob {
    pub id: Uuid,
    pub source_reference: String,
    pub target_style: String,
    pub status: JobStatus,
    /// Fine-grained state machine position
    pub state: PipelineState,
    pub stages: Vec<StageExecution>,
    /// Parsed transcript once `transcribe` succeeded
    pub transcript: Option<Transcript>,
    pub styled_audio_url: Option<String>,
    pub caption_url: Option<String>,
    /// Required stage that failed the job
    pub failed_stage: Option<StageName>,
    pub submitted_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl TransformationJob {
    pub fn new(request: TransformationRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_reference: request.source_reference,
            target_style: request.target_style,
            status: JobStatus::Pending,
            state: PipelineState::Pending,
            stages: StageName::ALL.iter().map(|s| StageExecution::new(*s)).collect(),
            transcript: None,
            styled_audio_url: None,
            caption_url: None,
            failed_stage: None,
            submitted_at: Utc::now(),
            ended_at: None,
        }
    }

    pub fn stage(&self, name: StageName) -> &StageExecution {
        // `stages` always holds one record per StageName, in ALL order
        &self.stages[Self::index_of(name)]
    }

    pub fn stage_mut(&mut self, name: StageName) -> &mut StageExecution {
        &mut self.stages[Self::index_of(name)]
    }

    fn index_of(name: StageName) -> usize {
        StageName::ALL
            .iter()
            .position(|s| *s == name)
            .unwrap_or_default()
    }

    /// Move the job to a new state machine position
    pub fn set_state(&mut self, state: PipelineState) {
        self.state = state;
        self.status = JobStatus::from(state);
        if self.status.is_terminal() && self.ended_at.is_none() {
            self.ended_at = Some(Utc::now());
        }
    }

    pub fn mark_queued(&mut self, name: StageName) {
        self.stage_mut(name).status = StageStatus::Queued;
    }

    pub fn begin_stage(&mut self, name: StageName, attempt: u32) {
        let stage = self.stage_mut(name);
        stage.status = StageStatus::Running;
        stage.attempts = attempt;
        if stage.started_at.is_none() {
            stage.started_at = Some(Utc::now());
        }
    }

    /// Stamp the finish time once; later calls keep the first stamp
    pub fn mark_finished(&mut self, name: StageName) {
        let stage = self.stage_mut(name);
        if stage.started_at.is_some() && stage.finished_at.is_none() {
            stage.finished_at = Some(Utc::now());
        }
    }

    pub fn complete_stage(&mut self, name: StageName, artifact: Option<Artifact>) {
        self.mark_finished(name);
        let stage = self.stage_mut(name);
        stage.status = StageStatus::Succeeded;
        stage.output_artifact = artifact;
        stage.error = None;
    }

    pub fn fail_stage(&mut self, name: StageName, error: StageErrorRecord) {
        self.mark_finished(name);
        let stage = self.stage_mut(name);
        stage.status = StageStatus::Failed;
        stage.output_artifact = None;
        stage.error = Some(error);
        if name.is_required() {
            self.failed_stage = Some(name);
        }
    }

    /// Record that cancellation interrupted a queued or running stage
    pub fn cancel_stage(&mut self, name: StageName) {
        self.mark_finished(name);
        let stage = self.stage_mut(name);
        stage.status = StageStatus::Cancelled;
        stage.error = Some(StageErrorRecord::new(ErrorKind::Cancelled, "Job cancelled"));
    }

    pub fn skip_stage(&mut self, name: StageName, reason: impl Into<String>) {
        let stage = self.stage_mut(name);
        stage.status = StageStatus::Skipped;
        stage.skip_reason = Some(reason.into());
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Artifact produced by a succeeded stage
    pub fn artifact(&self, name: StageName) -> Option<&Artifact> {
        let stage = self.stage(name);
        match stage.status {
            StageStatus::Succeeded => stage.output_artifact.as_ref(),
            _ => None,
        }
    }
}
