//! restyle-pipeline - Media transformation microservice
//!
//! Accepts `{sourceReference, targetStyle}` jobs over HTTP, runs them through
//! the stage pipeline and serves the published results.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use restyle_common::config::{
    default_config_path, load_toml_config, LoggingConfig, RootFolderInitializer,
    RootFolderResolver,
};
use restyle_common::events::EventBus;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use restyle_pipeline::config::PipelineSettings;
use restyle_pipeline::orchestrator::{JobRegistry, PipelineOrchestrator, PipelineStages, WorkerPool};
use restyle_pipeline::runner::ProcessRunner;
use restyle_pipeline::storage::LocalArtifactStore;
use restyle_pipeline::AppState;

/// Command-line arguments for restyle-pipeline
#[derive(Parser, Debug)]
#[command(name = "restyle-pipeline")]
#[command(about = "Media transformation pipeline microservice")]
#[command(version)]
struct Args {
    /// TOML config file
    #[arg(short, long, env = "RESTYLE_CONFIG")]
    config: Option<PathBuf>,

    /// Root folder holding staging/ and published/
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// HTTP bind address
    #[arg(short, long)]
    bind: Option<String>,

    /// Base URL under which published artifacts are served
    #[arg(long)]
    public_base_url: Option<String>,
}

/// Initialize tracing from `[logging]`, letting RUST_LOG override the level
fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);

    match &logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(Mutex::new(file)),
                )
                .try_init()?;
        }
        None => {
            registry.with(tracing_subscriber::fmt::layer()).try_init()?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Step 1: Load bootstrap config (CLI → ENV → TOML → default)
    let config_path = args.config.clone().or_else(default_config_path);
    let toml_config = load_toml_config(config_path.as_deref())
        .context("Failed to load configuration")?;
    init_tracing(&toml_config.logging)?;

    info!("Starting restyle-pipeline (media transformation) microservice");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let resolver = RootFolderResolver::new(&toml_config);
    let root_folder = resolver.resolve(args.root_folder);
    let bind_address = resolver.bind_address(args.bind);
    let public_base_url = resolver.public_base_url(args.public_base_url, &bind_address);

    // Step 2: Create staging/ and published/
    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directories_exist()
        .context("Failed to initialize root folder")?;
    info!("Root folder: {}", initializer.root_folder().display());

    // Step 3: Pipeline settings and components
    let settings = PipelineSettings::load(config_path.as_deref())
        .context("Invalid [pipeline] configuration")?;

    let event_bus = EventBus::new(256);
    let registry = JobRegistry::with_retention(settings.retained_jobs);
    let store = Arc::new(LocalArtifactStore::new(
        initializer.staging_dir(),
        initializer.published_dir(),
        public_base_url.clone(),
    ));
    let stages = PipelineStages::from_settings(&settings, Arc::new(ProcessRunner::new()));
    let orchestrator = PipelineOrchestrator::new(
        stages,
        store,
        WorkerPool::new(settings.worker_pool_size),
        registry,
        event_bus.clone(),
    );

    let state = AppState::new(orchestrator.clone(), event_bus, initializer.published_dir());
    let app = restyle_pipeline::build_router(state);

    // Step 4: Serve until Ctrl-C / SIGTERM
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_address))?;
    info!("Listening on http://{}", bind_address);
    info!("Published artifacts: {}", public_base_url);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    orchestrator.shutdown().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
