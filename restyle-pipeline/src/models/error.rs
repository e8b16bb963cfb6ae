//! Pipeline error taxonomy
//!
//! Required-stage errors fail the job and are surfaced verbatim (kind,
//! message, captured stderr). `Transcription` and `Caption` are recorded on
//! the job but never fail it. Only `Download` is retried.

use super::StageName;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Exit status and captured output of a failed subprocess
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessDiagnostics {
    /// None when the process was killed by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Stable error code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidReference,
    Download,
    StageTimeout,
    Separation,
    StyleTransfer,
    Transcription,
    Caption,
    Storage,
    Cancelled,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::InvalidReference => "INVALID_REFERENCE",
            ErrorKind::Download => "DOWNLOAD",
            ErrorKind::StageTimeout => "STAGE_TIMEOUT",
            ErrorKind::Separation => "SEPARATION",
            ErrorKind::StyleTransfer => "STYLE_TRANSFER",
            ErrorKind::Transcription => "TRANSCRIPTION",
            ErrorKind::Caption => "CAPTION",
            ErrorKind::Storage => "STORAGE",
            ErrorKind::Cancelled => "CANCELLED",
        }
    }
}

/// Pipeline error
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// Reference cannot be resolved to any audio stream (not retried)
    #[error("Invalid source reference: {message}")]
    InvalidReference { message: String },

    /// Transport failure while fetching (retried)
    #[error("Download failed: {message}")]
    Download {
        message: String,
        diagnostics: Option<ProcessDiagnostics>,
    },

    /// Subprocess exceeded its stage deadline and was killed
    #[error("Stage '{stage}' exceeded its {timeout_secs}s deadline")]
    StageTimeout {
        stage: StageName,
        timeout_secs: u64,
        diagnostics: Option<ProcessDiagnostics>,
    },

    #[error("Separation failed: {message}")]
    Separation {
        message: String,
        diagnostics: Option<ProcessDiagnostics>,
    },

    #[error("Style transfer failed: {message}")]
    StyleTransfer {
        message: String,
        diagnostics: Option<ProcessDiagnostics>,
    },

    #[error("Transcription failed: {message}")]
    Transcription {
        message: String,
        diagnostics: Option<ProcessDiagnostics>,
    },

    #[error("Caption generation failed: {message}")]
    Caption { message: String },

    /// Working directory or publication failure
    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Job cancelled")]
    Cancelled,
}

impl PipelineError {
    pub fn invalid_reference(message: impl Into<String>) -> Self {
        Self::InvalidReference {
            message: message.into(),
        }
    }

    pub fn download(message: impl Into<String>) -> Self {
        Self::Download {
            message: message.into(),
            diagnostics: None,
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn caption(message: impl Into<String>) -> Self {
        Self::Caption {
            message: message.into(),
        }
    }

    /// Stage-specific tool failure (the error a stage raises on non-zero
    /// exit or missing output)
    pub fn stage_failure(
        stage: StageName,
        message: impl Into<String>,
        diagnostics: Option<ProcessDiagnostics>,
    ) -> Self {
        let message = message.into();
        match stage {
            StageName::Fetch => Self::Download {
                message,
                diagnostics,
            },
            StageName::Separate => Self::Separation {
                message,
                diagnostics,
            },
            StageName::StyleTransfer => Self::StyleTransfer {
                message,
                diagnostics,
            },
            StageName::Transcribe => Self::Transcription {
                message,
                diagnostics,
            },
            StageName::Caption => Self::Caption { message },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::InvalidReference { .. } => ErrorKind::InvalidReference,
            PipelineError::Download { .. } => ErrorKind::Download,
            PipelineError::StageTimeout { .. } => ErrorKind::StageTimeout,
            PipelineError::Separation { .. } => ErrorKind::Separation,
            PipelineError::StyleTransfer { .. } => ErrorKind::StyleTransfer,
            PipelineError::Transcription { .. } => ErrorKind::Transcription,
            PipelineError::Caption { .. } => ErrorKind::Caption,
            PipelineError::Storage { .. } => ErrorKind::Storage,
            PipelineError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Only transport failures are assumed transient
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::Download { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }

    pub fn diagnostics(&self) -> Option<&ProcessDiagnostics> {
        match self {
            PipelineError::Download { diagnostics, .. }
            | PipelineError::StageTimeout { diagnostics, .. }
            | PipelineError::Separation { diagnostics, .. }
            | PipelineError::StyleTransfer { diagnostics, .. }
            | PipelineError::Transcription { diagnostics, .. } => diagnostics.as_ref(),
            _ => None,
        }
    }
}

/// Serializable error recorded on a stage and returned to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

impl StageErrorRecord {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            exit_code: None,
            stderr: None,
        }
    }
}

impl From<&PipelineError> for StageErrorRecord {
    fn from(error: &PipelineError) -> Self {
        let diagnostics = error.diagnostics();
        Self {
            kind: error.kind(),
            message: error.to_string(),
            exit_code: diagnostics.and_then(|d| d.exit_code),
            stderr: diagnostics
                .map(|d| d.stderr.clone())
                .filter(|s| !s.is_empty()),
        }
    }
}
