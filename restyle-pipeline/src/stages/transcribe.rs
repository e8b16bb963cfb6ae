//! `transcribe` stage: best-effort transcript of the styled output
//!
//! Invocation: `<exe> [extra args] <styled file>`; the transcript is read
//! from stdout and also saved as `transcript.json` in the working directory.

use super::{execute_tool, JobContext};
use crate::config::ToolConfig;
use crate::models::{Artifact, ArtifactKind, PipelineError, StageName, Transcript};
use crate::runner::StageRunner;
use std::ffi::OsString;
use std::sync::Arc;
use tracing::info;

pub const TRANSCRIPT_FILE_NAME: &str = "transcript.json";

#[derive(Debug, Clone)]
pub struct TranscriptionOutput {
    pub transcript: Transcript,
    pub artifact: Artifact,
}

pub struct SpeechTranscriber {
    runner: Arc<dyn StageRunner>,
    tool: ToolConfig,
}

impl SpeechTranscriber {
    pub fn new(runner: Arc<dyn StageRunner>, tool: ToolConfig) -> Self {
        Self { runner, tool }
    }

    pub async fn run(
        &self,
        ctx: &JobContext,
        styled: &Artifact,
    ) -> Result<TranscriptionOutput, PipelineError> {
        let args: Vec<OsString> = vec![styled.path().into()];
        let output = execute_tool(
            self.runner.as_ref(),
            StageName::Transcribe,
            &self.tool,
            args,
            ctx,
        )
        .await?;

        let transcript = Transcript::parse_json(&output.stdout).map_err(|reason| {
            PipelineError::Transcription {
                message: reason,
                diagnostics: Some(output.diagnostics()),
            }
        })?;

        let json = serde_json::to_vec_pretty(&transcript).map_err(|e| {
            PipelineError::Transcription {
                message: format!("Cannot serialize transcript: {}", e),
                diagnostics: None,
            }
        })?;
        let path = ctx.work_dir.join(TRANSCRIPT_FILE_NAME);
        tokio::fs::write(&path, &json).await.map_err(|e| {
            PipelineError::Transcription {
                message: format!("Cannot write {}: {}", path.display(), e),
                diagnostics: None,
            }
        })?;

        info!(
            job_id = %ctx.job_id,
            segments = transcript.len(),
            "Transcription finished"
        );

        Ok(TranscriptionOutput {
            transcript,
            artifact: Artifact::new(ctx.job_id, ArtifactKind::Transcript, path, json.len() as u64),
        })
    }
}
