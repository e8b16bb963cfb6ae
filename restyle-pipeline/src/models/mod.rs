//! Data models for the media transformation pipeline
//!
//! - Job, stage and status types driven by the orchestrator
//! - Artifacts, transcripts and the caller-facing result shapes
//! - The pipeline error taxonomy

pub mod artifact;
pub mod error;
pub mod job;
pub mod response;
pub mod transcript;

pub use artifact::{Artifact, ArtifactKind};
pub use error::{ErrorKind, PipelineError, ProcessDiagnostics, StageErrorRecord};
pub use job::{
    JobStatus, Requiredness, StageExecution, StageName, StageStatus, TransformationJob,
    TransformationRequest,
};
pub use response::{JobResultResponse, TransformationResponse};
pub use transcript::{Transcript, TranscriptSegment};
