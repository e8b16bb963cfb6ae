//! ProcessRunner tests with real `sh` subprocesses

#![cfg(unix)]

use restyle_pipeline::runner::{Invocation, ProcessRunner, RunError, StageRunner};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn shell(dir: &TempDir, script: &str) -> Invocation {
    Invocation::new("sh", dir.path())
        .arg("-c")
        .arg(script)
        .timeout(Duration::from_secs(10))
}

#[tokio::test]
async fn test_captures_exit_code_and_streams() {
    let dir = TempDir::new().unwrap();
    let output = ProcessRunner::new()
        .run(
            shell(&dir, "echo out; echo err >&2; exit 3"),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(output.exit_code, Some(3));
    assert!(!output.success());
    assert_eq!(output.stdout.trim(), "out");
    assert_eq!(output.stderr.trim(), "err");

    let diagnostics = output.diagnostics();
    assert_eq!(diagnostics.exit_code, Some(3));
}

#[tokio::test]
async fn test_runs_in_work_dir() {
    let dir = TempDir::new().unwrap();
    let output = ProcessRunner::new()
        .run(shell(&dir, "echo data > marker.txt"), &CancellationToken::new())
        .await
        .unwrap();

    assert!(output.success());
    assert!(dir.path().join("marker.txt").exists());
}

#[tokio::test]
async fn test_timeout_kills_process() {
    let dir = TempDir::new().unwrap();
    let invocation = shell(&dir, "echo started >&2; exec sleep 5").timeout(Duration::from_millis(300));

    let start = Instant::now();
    let result = ProcessRunner::new()
        .run(invocation, &CancellationToken::new())
        .await;

    match result {
        Err(RunError::TimedOut {
            timeout, stderr, ..
        }) => {
            assert_eq!(timeout, Duration::from_millis(300));
            assert_eq!(stderr.trim(), "started");
        }
        other => panic!("expected timeout, got {:?}", other),
    }
    assert!(start.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn test_cancel_kills_process() {
    let dir = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let start = Instant::now();
    let result = ProcessRunner::new()
        .run(shell(&dir, "exec sleep 5"), &cancel)
        .await;

    assert!(matches!(result, Err(RunError::Cancelled)));
    assert!(start.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn test_deadline_holds_while_background_process_keeps_pipes_open() {
    let dir = TempDir::new().unwrap();
    let invocation = shell(&dir, "sleep 6 & echo done").timeout(Duration::from_millis(500));

    let start = Instant::now();
    let result = tokio::time::timeout(
        Duration::from_secs(3),
        ProcessRunner::new().run(invocation, &CancellationToken::new()),
    )
    .await
    .expect("runner ignored its deadline");

    match result {
        Err(RunError::TimedOut { stdout, .. }) => assert_eq!(stdout.trim(), "done"),
        other => panic!("expected timeout, got {:?}", other),
    }
    assert!(start.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn test_cancel_while_background_process_keeps_pipes_open() {
    let dir = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let result = tokio::time::timeout(
        Duration::from_secs(3),
        ProcessRunner::new().run(shell(&dir, "sleep 6 & echo done"), &cancel),
    )
    .await
    .expect("runner ignored cancellation");

    assert!(matches!(result, Err(RunError::Cancelled)));
}

#[tokio::test]
async fn test_timeout_kills_grandchildren() {
    let dir = TempDir::new().unwrap();
    let invocation =
        shell(&dir, "(sleep 1; touch alive) & wait").timeout(Duration::from_millis(200));

    let result = ProcessRunner::new()
        .run(invocation, &CancellationToken::new())
        .await;
    assert!(matches!(result, Err(RunError::TimedOut { .. })));

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!dir.path().join("alive").exists());
}

#[tokio::test]
async fn test_detached_helpers_do_not_outlive_the_tool() {
    let dir = TempDir::new().unwrap();
    let invocation = shell(&dir, "(sleep 1; touch alive) > /dev/null 2>&1 & echo ok");

    let output = ProcessRunner::new()
        .run(invocation, &CancellationToken::new())
        .await
        .unwrap();
    assert!(output.success());
    assert_eq!(output.stdout.trim(), "ok");

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!dir.path().join("alive").exists());
}
