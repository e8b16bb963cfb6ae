//! `style-transfer` stage
//!
//! Invocation: `<exe> [extra args] <input> <output> <targetStyle>` where the
//! output is `styled/<jobId>_<styleSlug>.<ext>`, so repeated styles for the
//! same source never collide.

use super::{ensure_subdir, execute_tool, verify_artifact, JobContext};
use crate::config::ToolConfig;
use crate::models::{Artifact, ArtifactKind, PipelineError, StageName};
use crate::runner::StageRunner;
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

pub const STYLED_DIR_NAME: &str = "styled";

pub struct GenreStyleTransferEngine {
    runner: Arc<dyn StageRunner>,
    tool: ToolConfig,
    audio_extension: String,
}

impl GenreStyleTransferEngine {
    pub fn new(runner: Arc<dyn StageRunner>, tool: ToolConfig, audio_extension: &str) -> Self {
        Self {
            runner,
            tool,
            audio_extension: audio_extension.to_string(),
        }
    }

    /// Output path for the job's styled file
    pub fn output_path(&self, ctx: &JobContext) -> PathBuf {
        ctx.work_dir.join(STYLED_DIR_NAME).join(format!(
            "{}_{}.{}",
            ctx.job_id, ctx.style_slug, self.audio_extension
        ))
    }

    pub async fn run(&self, ctx: &JobContext, input: &Artifact) -> Result<Artifact, PipelineError> {
        ensure_subdir(ctx, STYLED_DIR_NAME).await?;
        let output_path = self.output_path(ctx);

        let args: Vec<OsString> = vec![
            input.path().into(),
            output_path.as_os_str().into(),
            ctx.target_style.as_str().into(),
        ];
        let output = execute_tool(
            self.runner.as_ref(),
            StageName::StyleTransfer,
            &self.tool,
            args,
            ctx,
        )
        .await?;

        let styled = verify_artifact(ctx.job_id, ArtifactKind::StyledVocal, &output_path)
            .await
            .map_err(|reason| {
                PipelineError::stage_failure(
                    StageName::StyleTransfer,
                    format!("style transfer exited 0 but {}", reason),
                    Some(output.diagnostics()),
                )
            })?;

        info!(
            job_id = %ctx.job_id,
            style = %ctx.target_style,
            bytes = styled.size_bytes,
            "Style transfer finished"
        );
        Ok(styled)
    }
}
