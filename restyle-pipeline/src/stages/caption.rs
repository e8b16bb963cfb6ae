//! `caption` stage: transcript → line-synchronized caption file
//!
//! Runs in-process. LRC is the default format; SRT is available for players
//! that need explicit end times.

use super::{ensure_subdir, JobContext};
use crate::config::CaptionFormat;
use crate::models::{Artifact, ArtifactKind, PipelineError, Transcript};
use std::fmt::Write as _;
use tracing::info;

pub const CAPTIONS_DIR_NAME: &str = "captions";

/// Display time of the final SRT cue when nothing else bounds it
const SRT_TRAILING_SECS: f64 = 4.0;

pub struct CaptionSynchronizer {
    format: CaptionFormat,
}

impl CaptionSynchronizer {
    pub fn new(format: CaptionFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> CaptionFormat {
        self.format
    }

    pub async fn run(
        &self,
        ctx: &JobContext,
        transcript: &Transcript,
    ) -> Result<Artifact, PipelineError> {
        let body = match self.format {
            CaptionFormat::Lrc => render_lrc(transcript, &ctx.source_reference, &ctx.target_style),
            CaptionFormat::Srt => render_srt(transcript),
        };

        let dir = ensure_subdir(ctx, CAPTIONS_DIR_NAME)
            .await
            .map_err(|e| PipelineError::caption(e.to_string()))?;
        let path = dir.join(format!(
            "{}_{}.{}",
            ctx.job_id,
            ctx.style_slug,
            self.format.extension()
        ));

        tokio::fs::write(&path, body.as_bytes())
            .await
            .map_err(|e| PipelineError::caption(format!("Cannot write {}: {}", path.display(), e)))?;

        // An empty SRT body is a valid caption for an empty transcript
        let artifact = Artifact::new(ctx.job_id, ArtifactKind::Caption, path, body.len() as u64);

        info!(
            job_id = %ctx.job_id,
            format = self.format.extension(),
            lines = transcript.len(),
            "Captions written"
        );
        Ok(artifact)
    }
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `[mm:ss.xx]`
fn lrc_timestamp(seconds: f64) -> String {
    let centis = (seconds.max(0.0) * 100.0).round() as u64;
    format!("[{:02}:{:02}.{:02}]", centis / 6000, (centis / 100) % 60, centis % 100)
}

/// `HH:MM:SS,mmm`
fn srt_timestamp(seconds: f64) -> String {
    let millis = (seconds.max(0.0) * 1000.0).round() as u64;
    format!(
        "{:02}:{:02}:{:02},{:03}",
        millis / 3_600_000,
        (millis / 60_000) % 60,
        (millis / 1000) % 60,
        millis % 1000
    )
}

/// Render LRC with `[ti:]`/`[by:]` header tags
///
/// An empty transcript yields the header only.
pub fn render_lrc(transcript: &Transcript, title: &str, style: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "[ti:{}]", single_line(title));
    let _ = writeln!(out, "[by:restyle ({})]", single_line(style));
    for segment in &transcript.segments {
        let _ = writeln!(
            out,
            "{}{}",
            lrc_timestamp(segment.start_time),
            single_line(&segment.text)
        );
    }
    out
}

/// Render SRT
///
/// A cue ends at the next cue's start, else its own end time, else
/// four seconds after it starts.
pub fn render_srt(transcript: &Transcript) -> String {
    let mut out = String::new();
    let segments = &transcript.segments;
    for (index, segment) in segments.iter().enumerate() {
        let start = segment.start_time;
        let end = segments
            .get(index + 1)
            .map(|next| next.start_time)
            .filter(|next| *next > start)
            .or(segment.end_time.filter(|end| *end > start))
            .unwrap_or(start + SRT_TRAILING_SECS);

        let _ = writeln!(out, "{}", index + 1);
        let _ = writeln!(out, "{} --> {}", srt_timestamp(start), srt_timestamp(end));
        let _ = writeln!(out, "{}", single_line(&segment.text));
        let _ = writeln!(out);
    }
    out
}
