//! `fetch` stage: resolve a source reference into `{workDir}/source.audio`
//!
//! Two fetchers are provided:
//! - [`CommandFetcher`] delegates to an external downloader executable
//!   (`exe <reference> <destination>`), treating the reference as opaque
//! - [`HttpFetcher`] streams an `http(s)` URL with reqwest
//!
//! [`SourceAudioFetcher`] wraps either one with bounded retries on
//! `Download` errors.

use super::{execute_tool, verify_artifact, JobContext};
use crate::config::ToolConfig;
use crate::models::{Artifact, ArtifactKind, PipelineError, StageName};
use crate::runner::StageRunner;
use crate::utils::{retry_with_backoff, RetryPolicy};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{StatusCode, Url};
use std::ffi::OsString;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// File name of the fetched audio inside the working directory
pub const SOURCE_FILE_NAME: &str = "source.audio";

/// Resolves one reference into a local file (single attempt)
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Write the audio stream behind `reference` to `destination`
    ///
    /// Errors must be `InvalidReference` for unresolvable references and
    /// `Download` for transport failures.
    async fn fetch(
        &self,
        reference: &str,
        destination: &Path,
        ctx: &JobContext,
    ) -> Result<(), PipelineError>;
}

/// Downloader executable
pub struct CommandFetcher {
    runner: Arc<dyn StageRunner>,
    tool: ToolConfig,
}

impl CommandFetcher {
    pub fn new(runner: Arc<dyn StageRunner>, tool: ToolConfig) -> Self {
        Self { runner, tool }
    }
}

#[async_trait]
impl SourceFetcher for CommandFetcher {
    async fn fetch(
        &self,
        reference: &str,
        destination: &Path,
        ctx: &JobContext,
    ) -> Result<(), PipelineError> {
        if reference.chars().any(char::is_control) {
            return Err(PipelineError::invalid_reference(
                "reference contains control characters",
            ));
        }
        let args: Vec<OsString> = vec![reference.into(), destination.into()];
        // Non-zero exit maps to Download (retryable)
        execute_tool(self.runner.as_ref(), StageName::Fetch, &self.tool, args, ctx).await?;
        Ok(())
    }
}

/// Direct HTTP(S) download
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }

    pub fn with_client(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    fn parse_reference(reference: &str) -> Result<Url, PipelineError> {
        let url = Url::parse(reference.trim()).map_err(|e| {
            PipelineError::invalid_reference(format!("{:?} is not a URL: {}", reference, e))
        })?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(PipelineError::invalid_reference(format!(
                "unsupported URL scheme {:?}",
                other
            ))),
        }
    }

    fn classify_status(status: StatusCode) -> Result<(), PipelineError> {
        if status.is_success() {
            return Ok(());
        }
        if status.is_server_error()
            || status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::REQUEST_TIMEOUT
        {
            return Err(PipelineError::download(format!("server responded {}", status)));
        }
        Err(PipelineError::invalid_reference(format!(
            "server responded {}",
            status
        )))
    }

    /// Accept audio/video payloads and unlabelled binary streams
    fn is_media_content_type(content_type: &str) -> bool {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        mime.starts_with("audio/")
            || mime.starts_with("video/")
            || mime == "application/octet-stream"
            || mime == "application/ogg"
    }

    async fn download(&self, url: Url, destination: &Path) -> Result<u64, PipelineError> {
        let response = self
            .client
            .get(url.clone())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| PipelineError::download(format!("GET {} failed: {}", url, e)))?;

        Self::classify_status(response.status())?;

        if let Some(content_type) = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        {
            if !Self::is_media_content_type(content_type) {
                return Err(PipelineError::invalid_reference(format!(
                    "{} is not an audio stream (content type {})",
                    url, content_type
                )));
            }
        }

        let mut file = tokio::fs::File::create(destination).await.map_err(|e| {
            PipelineError::storage(format!("Cannot create {}: {}", destination.display(), e))
        })?;

        let mut written: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .map_err(|e| PipelineError::download(format!("Reading {} failed: {}", url, e)))?;
            file.write_all(&chunk).await.map_err(|e| {
                PipelineError::storage(format!("Writing {} failed: {}", destination.display(), e))
            })?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| {
            PipelineError::storage(format!("Writing {} failed: {}", destination.display(), e))
        })?;

        Ok(written)
    }
}

#[async_trait]
impl SourceFetcher for HttpFetcher {
    async fn fetch(
        &self,
        reference: &str,
        destination: &Path,
        ctx: &JobContext,
    ) -> Result<(), PipelineError> {
        let url = Self::parse_reference(reference)?;
        tokio::select! {
            _ = ctx.cancel.cancelled() => Err(PipelineError::Cancelled),
            result = self.download(url, destination) => {
                let bytes = result?;
                debug!(job_id = %ctx.job_id, bytes, "HTTP download finished");
                Ok(())
            }
        }
    }
}

/// The `fetch` stage: one fetcher plus retry policy
pub struct SourceAudioFetcher {
    fetcher: Arc<dyn SourceFetcher>,
    policy: RetryPolicy,
}

impl SourceAudioFetcher {
    pub fn new(fetcher: Arc<dyn SourceFetcher>, policy: RetryPolicy) -> Self {
        Self { fetcher, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Fetch the job's source reference, retrying transport failures
    ///
    /// `on_attempt` is invoked with the 1-based attempt number before each
    /// attempt.
    pub async fn run(
        &self,
        ctx: &JobContext,
        mut on_attempt: impl FnMut(u32) + Send,
    ) -> Result<Artifact, PipelineError> {
        let reference = ctx.source_reference.trim();
        if reference.is_empty() {
            return Err(PipelineError::invalid_reference("source reference is blank"));
        }

        let destination = ctx.work_dir.join(SOURCE_FILE_NAME);
        let destination = destination.as_path();
        let fetcher = self.fetcher.as_ref();

        let artifact = retry_with_backoff("fetch", self.policy, &ctx.cancel, |attempt| {
            on_attempt(attempt);
            async move {
                // Leftovers of a failed attempt must not pass verification
                let _ = tokio::fs::remove_file(destination).await;
                fetcher.fetch(reference, destination, ctx).await?;
                verify_artifact(ctx.job_id, ArtifactKind::RawAudio, destination)
                    .await
                    .map_err(|reason| {
                        PipelineError::invalid_reference(format!(
                            "no audio stream could be resolved ({})",
                            reason
                        ))
                    })
            }
        })
        .await?;

        info!(
            job_id = %ctx.job_id,
            bytes = artifact.size_bytes,
            "Source audio fetched"
        );
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reference_requires_http() {
        assert!(HttpFetcher::parse_reference("https://example.com/a.mp3").is_ok());
        assert!(HttpFetcher::parse_reference("http://example.com/a.mp3").is_ok());
        assert!(matches!(
            HttpFetcher::parse_reference("ftp://example.com/a.mp3"),
            Err(PipelineError::InvalidReference { .. })
        ));
        assert!(matches!(
            HttpFetcher::parse_reference("ref-A"),
            Err(PipelineError::InvalidReference { .. })
        ));
    }

    #[test]
    fn test_status_classification() {
        assert!(HttpFetcher::classify_status(StatusCode::OK).is_ok());
        assert!(matches!(
            HttpFetcher::classify_status(StatusCode::NOT_FOUND),
            Err(PipelineError::InvalidReference { .. })
        ));
        assert!(matches!(
            HttpFetcher::classify_status(StatusCode::GONE),
            Err(PipelineError::InvalidReference { .. })
        ));
        assert!(matches!(
            HttpFetcher::classify_status(StatusCode::SERVICE_UNAVAILABLE),
            Err(PipelineError::Download { .. })
        ));
        assert!(matches!(
            HttpFetcher::classify_status(StatusCode::TOO_MANY_REQUESTS),
            Err(PipelineError::Download { .. })
        ));
    }

    #[test]
    fn test_content_type_filter() {
        assert!(HttpFetcher::is_media_content_type("audio/mpeg"));
        assert!(HttpFetcher::is_media_content_type("video/mp4; codecs=avc1"));
        assert!(HttpFetcher::is_media_content_type("application/octet-stream"));
        assert!(!HttpFetcher::is_media_content_type("text/html; charset=utf-8"));
        assert!(!HttpFetcher::is_media_content_type("application/json"));
    }
}
