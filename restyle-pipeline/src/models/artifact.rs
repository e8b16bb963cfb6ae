//! Artifacts produced by pipeline stages

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    RawAudio,
    VocalStem,
    InstrumentalStem,
    StyledVocal,
    Transcript,
    Caption,
}

/// A file owned by a job's working directory until published
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub job_id: Uuid,
    pub kind: ArtifactKind,
    /// Filesystem path in the working directory
    pub location: PathBuf,
    pub size_bytes: u64,
}

impl Artifact {
    pub fn new(job_id: Uuid, kind: ArtifactKind, location: PathBuf, size_bytes: u64) -> Self {
        Self {
            job_id,
            kind,
            location,
            size_bytes,
        }
    }

    pub fn path(&self) -> &Path {
        &self.location
    }

    /// File extension, defaulting to "bin"
    pub fn extension(&self) -> &str {
        self.location
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin")
    }
}
