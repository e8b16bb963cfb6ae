//! `separate` stage: split the fetched mix into vocal and instrumental stems
//!
//! Invocation: `<exe> [extra args] <source> <workDir>/stems`. The tool must
//! write `stems/vocals.<ext>`; `stems/instrumental.<ext>` is optional.

use super::{ensure_subdir, execute_tool, verify_artifact, JobContext};
use crate::config::ToolConfig;
use crate::models::{Artifact, ArtifactKind, PipelineError, StageName};
use crate::runner::StageRunner;
use std::ffi::OsString;
use std::sync::Arc;
use tracing::{info, warn};

pub const STEMS_DIR_NAME: &str = "stems";

/// Stems produced by one separation
#[derive(Debug, Clone)]
pub struct SeparatedStems {
    pub vocals: Artifact,
    pub instrumental: Option<Artifact>,
}

pub struct VocalStemSeparator {
    runner: Arc<dyn StageRunner>,
    tool: ToolConfig,
    audio_extension: String,
}

impl VocalStemSeparator {
    pub fn new(runner: Arc<dyn StageRunner>, tool: ToolConfig, audio_extension: &str) -> Self {
        Self {
            runner,
            tool,
            audio_extension: audio_extension.to_string(),
        }
    }

    pub async fn run(
        &self,
        ctx: &JobContext,
        source: &Artifact,
    ) -> Result<SeparatedStems, PipelineError> {
        let stems_dir = ensure_subdir(ctx, STEMS_DIR_NAME).await?;

        let args: Vec<OsString> = vec![source.path().into(), stems_dir.as_os_str().into()];
        let output = execute_tool(
            self.runner.as_ref(),
            StageName::Separate,
            &self.tool,
            args,
            ctx,
        )
        .await?;

        let vocals_path = stems_dir.join(format!("vocals.{}", self.audio_extension));
        let vocals = verify_artifact(ctx.job_id, ArtifactKind::VocalStem, &vocals_path)
            .await
            .map_err(|reason| {
                PipelineError::stage_failure(
                    StageName::Separate,
                    format!("separator exited 0 but {}", reason),
                    Some(output.diagnostics()),
                )
            })?;

        let instrumental_path = stems_dir.join(format!("instrumental.{}", self.audio_extension));
        let instrumental =
            match verify_artifact(ctx.job_id, ArtifactKind::InstrumentalStem, &instrumental_path)
                .await
            {
                Ok(artifact) => Some(artifact),
                Err(reason) => {
                    warn!(job_id = %ctx.job_id, reason = %reason, "Instrumental stem unavailable");
                    None
                }
            };

        info!(
            job_id = %ctx.job_id,
            vocals_bytes = vocals.size_bytes,
            has_instrumental = instrumental.is_some(),
            "Stems separated"
        );

        Ok(SeparatedStems {
            vocals,
            instrumental,
        })
    }
}
