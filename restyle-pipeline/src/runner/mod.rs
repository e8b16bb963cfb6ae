//! External stage runner
//!
//! Stages never spawn processes directly; they build an [`Invocation`] and
//! hand it to a [`StageRunner`]. Only the exit code decides success.
//! stdout/stderr are captured for parsing and diagnostics.

pub mod process;

pub use process::ProcessRunner;

use crate::models::ProcessDiagnostics;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// One executable invocation
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    /// Working directory of the child process
    pub work_dir: PathBuf,
    /// Deadline after which the child is killed
    pub timeout: Duration,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            work_dir: work_dir.into(),
            timeout: Duration::from_secs(300),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// File name of the program, used for logging
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }

    /// Positional argument `index` as a path
    pub fn path_arg(&self, index: usize) -> Option<&Path> {
        self.args.get(index).map(Path::new)
    }
}

/// Completed process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// None when terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn diagnostics(&self) -> ProcessDiagnostics {
        ProcessDiagnostics {
            exit_code: self.exit_code,
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    /// Executable missing or not runnable
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Deadline exceeded; the child was killed
    #[error("Process exceeded {timeout:?}")]
    TimedOut {
        timeout: Duration,
        stdout: String,
        stderr: String,
    },

    /// Job cancelled; the child was killed
    #[error("Process cancelled")]
    Cancelled,

    #[error("IO error while waiting for process: {0}")]
    Io(#[from] std::io::Error),
}

/// Runs external executables on behalf of stages
#[async_trait]
pub trait StageRunner: Send + Sync {
    /// Run to completion, suspending the caller until the process exits
    ///
    /// Non-zero exit is NOT an error at this layer; the stage maps it.
    async fn run(
        &self,
        invocation: Invocation,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput, RunError>;
}
