//! Subprocess-backed stage runner

use super::{Invocation, ProcessOutput, RunError, StageRunner};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// stdout carries structured output (transcripts), so it gets a large cap
const STDOUT_LIMIT: usize = 8 * 1024 * 1024;
/// Only the tail of stderr is kept for diagnostics
const STDERR_LIMIT: usize = 16 * 1024;
/// How long to wait for pipe readers after killing the process group
const READER_GRACE: Duration = Duration::from_millis(500);

/// Spawns real processes with `tokio::process`
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

enum Outcome {
    Exited(std::process::ExitStatus),
    TimedOut,
    Cancelled,
}

#[async_trait]
impl StageRunner for ProcessRunner {
    async fn run(
        &self,
        invocation: Invocation,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput, RunError> {
        let program = invocation.program_name();
        debug!(
            program = %program,
            args = ?invocation.args,
            work_dir = %invocation.work_dir.display(),
            "Spawning stage process"
        );

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .current_dir(&invocation.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so helpers the tool forks die with it
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|source| RunError::Spawn {
            program: program.clone(),
            source,
        })?;
        let group = child.id();
        let deadline = Instant::now() + invocation.timeout;

        let mut stdout_reader = child
            .stdout
            .take()
            .map(|pipe| tokio::spawn(read_tail(pipe, STDOUT_LIMIT)));
        let mut stderr_reader = child
            .stderr
            .take()
            .map(|pipe| tokio::spawn(read_tail(pipe, STDERR_LIMIT)));

        let outcome = tokio::select! {
            status = child.wait() => Outcome::Exited(status?),
            _ = tokio::time::sleep_until(deadline) => Outcome::TimedOut,
            _ = cancel.cancelled() => Outcome::Cancelled,
        };

        // A background process may still hold the pipes after the tool exits
        let outcome = match outcome {
            Outcome::Exited(status) => tokio::select! {
                (stdout, stderr) = drain(stdout_reader.as_mut(), stderr_reader.as_mut()) => {
                    kill_process_group(group, &program);
                    debug!(program = %program, exit_code = ?status.code(), "Stage process exited");
                    return Ok(ProcessOutput {
                        exit_code: status.code(),
                        stdout,
                        stderr,
                    });
                }
                _ = tokio::time::sleep_until(deadline) => Outcome::TimedOut,
                _ = cancel.cancelled() => Outcome::Cancelled,
            },
            other => other,
        };

        kill_process_group(group, &program);
        if let Ok(None) = child.try_wait() {
            if let Err(e) = child.kill().await {
                warn!(program = %program, error = %e, "Failed to kill stage process");
            }
        }
        let stdout = collect(stdout_reader.as_mut(), Some(READER_GRACE)).await;
        let stderr = collect(stderr_reader.as_mut(), Some(READER_GRACE)).await;

        if matches!(outcome, Outcome::TimedOut) {
            warn!(
                program = %program,
                timeout_secs = invocation.timeout.as_secs(),
                "Stage process timed out and was killed"
            );
            Err(RunError::TimedOut {
                timeout: invocation.timeout,
                stdout,
                stderr,
            })
        } else {
            debug!(program = %program, "Stage process killed on cancellation");
            Err(RunError::Cancelled)
        }
    }
}

/// SIGKILL every process left in the tool's group
#[cfg(unix)]
fn kill_process_group(group: Option<u32>, program: &str) {
    let Some(pgid) = group.and_then(|id| libc::pid_t::try_from(id).ok()) else {
        return;
    };
    // SAFETY: killpg only sends a signal to the group created at spawn
    if unsafe { libc::killpg(pgid, libc::SIGKILL) } != 0 {
        let err = std::io::Error::last_os_error();
        // ESRCH: the whole group is already gone
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!(program = %program, error = %err, "Failed to kill stage process group");
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_group: Option<u32>, _program: &str) {}

/// Read both pipes to EOF
async fn drain(
    stdout: Option<&mut JoinHandle<String>>,
    stderr: Option<&mut JoinHandle<String>>,
) -> (String, String) {
    tokio::join!(collect(stdout, None), collect(stderr, None))
}

/// Await a pipe reader, aborting it if `grace` elapses first
///
/// Grandchildren may keep the pipe open after the direct child is killed.
async fn collect(reader: Option<&mut JoinHandle<String>>, grace: Option<Duration>) -> String {
    let Some(handle) = reader else {
        return String::new();
    };
    match grace {
        None => handle.await.unwrap_or_default(),
        Some(grace) => match tokio::time::timeout(grace, &mut *handle).await {
            Ok(result) => result.unwrap_or_default(),
            Err(_) => {
                handle.abort();
                String::new()
            }
        },
    }
}

/// Read a pipe to EOF keeping at most the last `limit` bytes
async fn read_tail<R: AsyncRead + Unpin>(mut pipe: R, limit: usize) -> String {
    let mut buffer: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        match pipe.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > limit {
                    let excess = buffer.len() - limit;
                    buffer.drain(..excess);
                }
            }
            Err(_) => break,
        }
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_tail_keeps_last_bytes() {
        let data: &[u8] = b"0123456789";
        let tail = read_tail(data, 4).await;
        assert_eq!(tail, "6789");
    }

    #[tokio::test]
    async fn test_missing_executable_is_spawn_error() {
        let dir = std::env::temp_dir();
        let invocation = Invocation::new("/nonexistent/restyle-tool-xyz", dir);
        let result = ProcessRunner::new()
            .run(invocation, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(RunError::Spawn { .. })));
    }
}
