//! Job working directories and artifact publication

use crate::models::{PipelineError, StageName};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Storage contract needed by the pipeline
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Create an isolated, empty working directory for the job
    async fn allocate_work_dir(&self, job_id: Uuid) -> Result<PathBuf, PipelineError>;

    /// Promote a file to the durable namespace and return its retrieval URL
    async fn publish(&self, path: &Path, name: &str) -> Result<String, PipelineError>;

    /// Delete the job's working directory and every unpublished intermediate
    async fn cleanup(&self, job_id: Uuid) -> Result<(), PipelineError>;

    /// Where the working directory of `job_id` lives (allocated or not)
    fn work_dir_path(&self, job_id: Uuid) -> PathBuf;
}

/// Published file name: `{jobId}_{stage}_{styleSlug}.{ext}`
pub fn published_name(job_id: Uuid, stage: StageName, style_slug: &str, extension: &str) -> String {
    format!("{}_{}_{}.{}", job_id, stage.as_str(), style_slug, extension)
}

/// Local filesystem store
///
/// Working directories live under `staging_root/<jobId>`; published files are
/// copied into `published_root` and served under `public_base_url`.
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    staging_root: PathBuf,
    published_root: PathBuf,
    public_base_url: String,
}

impl LocalArtifactStore {
    pub fn new(
        staging_root: impl Into<PathBuf>,
        published_root: impl Into<PathBuf>,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            staging_root: staging_root.into(),
            published_root: published_root.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn staging_root(&self) -> &Path {
        &self.staging_root
    }

    pub fn published_root(&self) -> &Path {
        &self.published_root
    }
}

/// Published names are generated internally; reject anything that could
/// escape the published root anyway.
fn validate_name(name: &str) -> Result<(), PipelineError> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\'])
        && !name.contains("..");
    if valid {
        Ok(())
    } else {
        Err(PipelineError::storage(format!(
            "Invalid published artifact name: {:?}",
            name
        )))
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn allocate_work_dir(&self, job_id: Uuid) -> Result<PathBuf, PipelineError> {
        tokio::fs::create_dir_all(&self.staging_root)
            .await
            .map_err(|e| {
                PipelineError::storage(format!(
                    "Cannot create staging root {}: {}",
                    self.staging_root.display(),
                    e
                ))
            })?;

        let dir = self.work_dir_path(job_id);
        // create_dir (not _all) so an existing directory is an error
        tokio::fs::create_dir(&dir).await.map_err(|e| {
            PipelineError::storage(format!(
                "Cannot create working directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        debug!(job_id = %job_id, work_dir = %dir.display(), "Allocated working directory");
        Ok(dir)
    }

    async fn publish(&self, path: &Path, name: &str) -> Result<String, PipelineError> {
        validate_name(name)?;

        tokio::fs::create_dir_all(&self.published_root)
            .await
            .map_err(|e| {
                PipelineError::storage(format!(
                    "Cannot create published root {}: {}",
                    self.published_root.display(),
                    e
                ))
            })?;

        let destination = self.published_root.join(name);
        let partial = self.published_root.join(format!(".{}.partial", name));

        // Copy then rename so readers never observe a half-written file
        tokio::fs::copy(path, &partial).await.map_err(|e| {
            PipelineError::storage(format!("Cannot publish {}: {}", path.display(), e))
        })?;
        if let Err(e) = tokio::fs::rename(&partial, &destination).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(PipelineError::storage(format!(
                "Cannot publish {}: {}",
                destination.display(),
                e
            )));
        }

        let url = format!("{}/{}", self.public_base_url, name);
        info!(artifact = %name, url = %url, "Published artifact");
        Ok(url)
    }

    async fn cleanup(&self, job_id: Uuid) -> Result<(), PipelineError> {
        let dir = self.work_dir_path(job_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                debug!(job_id = %job_id, "Removed working directory");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Failed to remove working directory");
                Err(PipelineError::storage(format!(
                    "Cannot remove {}: {}",
                    dir.display(),
                    e
                )))
            }
        }
    }

    fn work_dir_path(&self, job_id: Uuid) -> PathBuf {
        self.staging_root.join(job_id.to_string())
    }
}
