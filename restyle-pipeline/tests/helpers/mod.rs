//! Test harness for pipeline integration tests
//!
//! Fake stage runner and fetcher that never spawn processes, plus a builder
//! wiring an orchestrator onto a temporary root folder.

#![allow(dead_code)]

use async_trait::async_trait;
use restyle_common::events::EventBus;
use restyle_pipeline::config::PipelineSettings;
use restyle_pipeline::models::{PipelineError, TransformationJob, TransformationRequest};
use restyle_pipeline::orchestrator::{JobRegistry, PipelineOrchestrator, PipelineStages, WorkerPool};
use restyle_pipeline::runner::{Invocation, ProcessOutput, RunError, StageRunner};
use restyle_pipeline::stages::{JobContext, SourceFetcher};
use restyle_pipeline::storage::{ArtifactStore, LocalArtifactStore};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub const SEPARATE_TOOL: &str = "separate";
pub const STYLE_TOOL: &str = "style";
pub const TRANSCRIBE_TOOL: &str = "transcribe";

pub const DEFAULT_TRANSCRIPT: &str = r#"{"segments":[
    {"start": 0.0, "end": 2.5, "text": "hello there"},
    {"start": 2.5, "end": 5.0, "text": "general kenobi"}
]}"#;

/// How a fake executable behaves
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Exit 0 and write the outputs the stage expects
    Succeed,
    /// Exit 0 without writing anything
    SucceedWithoutOutput,
    /// Exit with the given code, printing to stderr
    ExitCode(i32),
    /// Exit 0 printing the given stdout
    Stdout(String),
    /// Block until cancelled or timed out
    Hang,
    /// Succeed, then leave a plain file with this name in the work dir
    SucceedLeavingFile(String),
}

/// One recorded invocation
#[derive(Debug, Clone)]
pub struct Call {
    pub program: String,
    pub args: Vec<PathBuf>,
    pub started: Instant,
    pub finished: Instant,
}

/// [`StageRunner`] that emulates the stage executables by program name
#[derive(Default)]
pub struct FakeRunner {
    behaviors: Mutex<HashMap<String, Behavior>>,
    delays: Mutex<HashMap<String, Duration>>,
    calls: Mutex<Vec<Call>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, program: &str, behavior: Behavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(program.to_string(), behavior);
    }

    pub fn delay(&self, program: &str, delay: Duration) {
        self.delays
            .lock()
            .unwrap()
            .insert(program.to_string(), delay);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, program: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.program == program)
            .collect()
    }

    fn behavior(&self, program: &str) -> Behavior {
        self.behaviors
            .lock()
            .unwrap()
            .get(program)
            .cloned()
            .unwrap_or(Behavior::Succeed)
    }

    fn write_outputs(program: &str, invocation: &Invocation) -> String {
        match program {
            SEPARATE_TOOL => {
                let stems = invocation.path_arg(1).unwrap();
                std::fs::write(stems.join("vocals.wav"), b"VOCALS").unwrap();
                std::fs::write(stems.join("instrumental.wav"), b"INSTRUMENTAL").unwrap();
                String::new()
            }
            STYLE_TOOL => {
                let input = std::fs::read(invocation.path_arg(0).unwrap()).unwrap();
                let style = invocation.args[2].to_string_lossy().into_owned();
                let mut styled = format!("STYLED[{}]:", style).into_bytes();
                styled.extend(input);
                std::fs::write(invocation.path_arg(1).unwrap(), styled).unwrap();
                String::new()
            }
            TRANSCRIBE_TOOL => DEFAULT_TRANSCRIPT.to_string(),
            _ => {
                // Command-mode downloader: <reference> <destination>
                if let Some(destination) = invocation.path_arg(1) {
                    std::fs::write(destination, b"RIFFfake").unwrap();
                }
                String::new()
            }
        }
    }
}

#[async_trait]
impl StageRunner for FakeRunner {
    async fn run(
        &self,
        invocation: Invocation,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput, RunError> {
        let program = invocation.program_name();
        let started = Instant::now();
        let delay = self.delays.lock().unwrap().get(&program).copied();
        let behavior = self.behavior(&program);

        let result = async {
            if let Some(delay) = delay {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(RunError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            match behavior {
                Behavior::Succeed => Ok(ProcessOutput {
                    exit_code: Some(0),
                    stdout: Self::write_outputs(&program, &invocation),
                    stderr: String::new(),
                }),
                Behavior::SucceedLeavingFile(name) => {
                    std::fs::write(invocation.work_dir.join(name), b"").unwrap();
                    Ok(ProcessOutput {
                        exit_code: Some(0),
                        stdout: Self::write_outputs(&program, &invocation),
                        stderr: String::new(),
                    })
                }
                Behavior::SucceedWithoutOutput => Ok(ProcessOutput {
                    exit_code: Some(0),
                    ..Default::default()
                }),
                Behavior::ExitCode(code) => Ok(ProcessOutput {
                    exit_code: Some(code),
                    stdout: String::new(),
                    stderr: format!("{} failed", program),
                }),
                Behavior::Stdout(stdout) => Ok(ProcessOutput {
                    exit_code: Some(0),
                    stdout,
                    stderr: String::new(),
                }),
                Behavior::Hang => {
                    tokio::select! {
                        _ = cancel.cancelled() => Err(RunError::Cancelled),
                        _ = tokio::time::sleep(invocation.timeout) => Err(RunError::TimedOut {
                            timeout: invocation.timeout,
                            stdout: String::new(),
                            stderr: "still working".to_string(),
                        }),
                    }
                }
            }
        }
        .await;

        self.calls.lock().unwrap().push(Call {
            program,
            args: invocation.args.iter().map(PathBuf::from).collect(),
            started,
            finished: Instant::now(),
        });
        result
    }
}

/// How the fake fetcher resolves references
#[derive(Debug, Clone, Copy)]
pub enum FetchBehavior {
    Ok,
    InvalidReference,
    /// Transport failure for the first `n` attempts, success afterwards
    FailTimes(u32),
}

/// [`SourceFetcher`] writing a small fake audio file
pub struct FakeFetcher {
    behavior: FetchBehavior,
    attempts: AtomicU32,
}

impl FakeFetcher {
    pub fn new(behavior: FetchBehavior) -> Self {
        Self {
            behavior,
            attempts: AtomicU32::new(0),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceFetcher for FakeFetcher {
    async fn fetch(
        &self,
        reference: &str,
        destination: &Path,
        _ctx: &JobContext,
    ) -> Result<(), PipelineError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        match self.behavior {
            FetchBehavior::InvalidReference => Err(PipelineError::invalid_reference(format!(
                "nothing found at {}",
                reference
            ))),
            FetchBehavior::FailTimes(n) if attempt <= n => {
                Err(PipelineError::download("connection reset by peer"))
            }
            _ => {
                let body = format!("AUDIO:{}", reference);
                tokio::fs::write(destination, body)
                    .await
                    .map_err(|e| PipelineError::download(e.to_string()))
            }
        }
    }
}

/// [`ArtifactStore`] whose publication fails for names containing `fragment`
pub struct FailingPublishStore {
    inner: LocalArtifactStore,
    fragment: String,
}

#[async_trait]
impl ArtifactStore for FailingPublishStore {
    async fn allocate_work_dir(&self, job_id: Uuid) -> Result<PathBuf, PipelineError> {
        self.inner.allocate_work_dir(job_id).await
    }

    async fn publish(&self, path: &Path, name: &str) -> Result<String, PipelineError> {
        if name.contains(&self.fragment) {
            return Err(PipelineError::storage(format!("disk full while publishing {}", name)));
        }
        self.inner.publish(path, name).await
    }

    async fn cleanup(&self, job_id: Uuid) -> Result<(), PipelineError> {
        self.inner.cleanup(job_id).await
    }

    fn work_dir_path(&self, job_id: Uuid) -> PathBuf {
        self.inner.work_dir_path(job_id)
    }
}

/// Settings pointing every stage at the fake executables
pub fn test_settings() -> PipelineSettings {
    let mut settings = PipelineSettings {
        worker_pool_size: 2,
        fetch_max_attempts: 3,
        fetch_backoff_ms: 10,
        fetch_max_backoff_ms: 50,
        ..Default::default()
    };
    settings.separate.executable = PathBuf::from(SEPARATE_TOOL);
    settings.separate.timeout_secs = 5;
    settings.style_transfer.executable = PathBuf::from(STYLE_TOOL);
    settings.style_transfer.timeout_secs = 5;
    settings.transcribe.executable = PathBuf::from(TRANSCRIBE_TOOL);
    settings.transcribe.timeout_secs = 5;
    settings
}

/// Orchestrator on a temporary root folder
pub struct TestPipeline {
    pub root: TempDir,
    pub orchestrator: PipelineOrchestrator,
    pub registry: JobRegistry,
    pub event_bus: EventBus,
    pub runner: Arc<FakeRunner>,
    pub fetcher: Arc<FakeFetcher>,
}

impl TestPipeline {
    pub fn new() -> Self {
        Self::with(test_settings(), FetchBehavior::Ok, FakeRunner::new())
    }

    pub fn with(settings: PipelineSettings, fetch: FetchBehavior, runner: FakeRunner) -> Self {
        Self::build(settings, fetch, runner, None)
    }

    /// Pipeline whose store refuses to publish names containing `fragment`
    pub fn failing_publish(fragment: &str) -> Self {
        Self::build(test_settings(), FetchBehavior::Ok, FakeRunner::new(), Some(fragment))
    }

    fn build(
        settings: PipelineSettings,
        fetch: FetchBehavior,
        runner: FakeRunner,
        failing_fragment: Option<&str>,
    ) -> Self {
        let root = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join("staging")).unwrap();
        std::fs::create_dir_all(root.path().join("published")).unwrap();

        let runner = Arc::new(runner);
        let fetcher = Arc::new(FakeFetcher::new(fetch));
        let local = LocalArtifactStore::new(
            root.path().join("staging"),
            root.path().join("published"),
            "http://localhost:5740/artifacts/",
        );
        let store: Arc<dyn ArtifactStore> = match failing_fragment {
            Some(fragment) => Arc::new(FailingPublishStore {
                inner: local,
                fragment: fragment.to_string(),
            }),
            None => Arc::new(local),
        };
        let stages = PipelineStages::with_fetcher(&settings, runner.clone(), fetcher.clone());
        let registry = JobRegistry::new();
        let event_bus = EventBus::new(256);
        let orchestrator = PipelineOrchestrator::new(
            stages,
            store,
            WorkerPool::new(settings.worker_pool_size),
            registry.clone(),
            event_bus.clone(),
        );

        Self {
            root,
            orchestrator,
            registry,
            event_bus,
            runner,
            fetcher,
        }
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.root.path().join("staging")
    }

    pub fn published_dir(&self) -> PathBuf {
        self.root.path().join("published")
    }

    /// Submit and wait for the terminal snapshot
    pub async fn run(&self, source: &str, style: &str) -> TransformationJob {
        let handle = self
            .orchestrator
            .submit(request(source, style))
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(10), handle.wait())
            .await
            .expect("job did not finish in time")
            .expect("job task panicked")
    }

    /// Poll the registry until `predicate` holds for the job
    pub async fn wait_for(
        &self,
        job_id: Uuid,
        predicate: impl Fn(&TransformationJob) -> bool,
    ) -> TransformationJob {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(job) = self.registry.get(job_id).await {
                if predicate(&job) {
                    return job;
                }
            }
            assert!(Instant::now() < deadline, "condition not reached in time");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Names of the files currently in the published folder
    pub fn published_files(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.published_dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    /// Entries left in the staging folder
    pub fn staging_entries(&self) -> usize {
        std::fs::read_dir(self.staging_dir()).unwrap().count()
    }
}

pub fn request(source: &str, style: &str) -> TransformationRequest {
    TransformationRequest {
        source_reference: source.to_string(),
        target_style: style.to_string(),
    }
}
