//! Pipeline stages
//!
//! Each stage consumes the previous stage's artifact and produces a verified
//! artifact in the job's working directory. External tools are invoked
//! through a [`StageRunner`] so tests can substitute fakes.

pub mod caption;
pub mod fetch;
pub mod separate;
pub mod style_transfer;
pub mod transcribe;

pub use caption::CaptionSynchronizer;
pub use fetch::{CommandFetcher, HttpFetcher, SourceAudioFetcher, SourceFetcher};
pub use separate::{SeparatedStems, VocalStemSeparator};
pub use style_transfer::GenreStyleTransferEngine;
pub use transcribe::{SpeechTranscriber, TranscriptionOutput};

use crate::config::ToolConfig;
use crate::models::{Artifact, ArtifactKind, PipelineError, ProcessDiagnostics, StageName};
use crate::runner::{Invocation, ProcessOutput, RunError, StageRunner};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Per-job inputs shared by every stage
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: Uuid,
    pub work_dir: PathBuf,
    pub source_reference: String,
    /// Raw style label, passed verbatim to the style-transfer tool
    pub target_style: String,
    /// File-name-safe form of `target_style`
    pub style_slug: String,
    pub cancel: CancellationToken,
}

/// Confirm a stage output exists and is non-empty before declaring success
///
/// A zero exit code alone is not proof of output; a zero-byte file counts as
/// missing.
pub async fn verify_artifact(
    job_id: Uuid,
    kind: ArtifactKind,
    path: &Path,
) -> Result<Artifact, String> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() && meta.len() > 0 => {
            Ok(Artifact::new(job_id, kind, path.to_path_buf(), meta.len()))
        }
        Ok(meta) if meta.is_file() => {
            Err(format!("expected output {} is empty", path.display()))
        }
        Ok(_) => Err(format!("expected output {} is not a file", path.display())),
        Err(_) => Err(format!("expected output {} was not produced", path.display())),
    }
}

/// Create a sub-directory of the working directory
pub(crate) async fn ensure_subdir(ctx: &JobContext, name: &str) -> Result<PathBuf, PipelineError> {
    let dir = ctx.work_dir.join(name);
    tokio::fs::create_dir_all(&dir).await.map_err(|e| {
        PipelineError::storage(format!("Cannot create {}: {}", dir.display(), e))
    })?;
    Ok(dir)
}

/// Run a stage's external tool and map the outcome onto the error taxonomy
///
/// Non-zero exit becomes the stage's own error kind with stdout/stderr
/// attached; a deadline overrun becomes `StageTimeout`.
pub(crate) async fn execute_tool(
    runner: &dyn StageRunner,
    stage: StageName,
    tool: &ToolConfig,
    args: Vec<OsString>,
    ctx: &JobContext,
) -> Result<ProcessOutput, PipelineError> {
    let invocation = Invocation::new(&tool.executable, &ctx.work_dir)
        .args(tool.extra_args.iter())
        .args(args)
        .timeout(tool.timeout());
    let program = invocation.program_name();

    match runner.run(invocation, &ctx.cancel).await {
        Ok(output) if output.success() => Ok(output),
        Ok(output) => {
            let status = match output.exit_code {
                Some(code) => format!("exited with code {}", code),
                None => "was terminated by a signal".to_string(),
            };
            Err(PipelineError::stage_failure(
                stage,
                format!("{} {}", program, status),
                Some(output.diagnostics()),
            ))
        }
        Err(RunError::TimedOut {
            timeout,
            stdout,
            stderr,
        }) => Err(PipelineError::StageTimeout {
            stage,
            timeout_secs: timeout.as_secs(),
            diagnostics: Some(ProcessDiagnostics {
                exit_code: None,
                stdout,
                stderr,
            }),
        }),
        Err(RunError::Cancelled) => Err(PipelineError::Cancelled),
        Err(e) => Err(PipelineError::stage_failure(stage, e.to_string(), None)),
    }
}
