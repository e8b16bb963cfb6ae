//! restyle-pipeline library interface
//!
//! Media transformation pipeline: fetch a source track, separate stems,
//! re-render the vocals in a target style, transcribe and caption the result.
//! Exposes the pipeline components plus the HTTP/SSE surface.

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod runner;
pub mod stages;
pub mod storage;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use orchestrator::{JobRegistry, PipelineOrchestrator};
use restyle_common::events::EventBus;
use std::path::PathBuf;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: PipelineOrchestrator,
    /// Read model of all jobs
    pub registry: JobRegistry,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Directory served under `/artifacts`
    pub published_dir: PathBuf,
}

impl AppState {
    pub fn new(
        orchestrator: PipelineOrchestrator,
        event_bus: EventBus,
        published_dir: PathBuf,
    ) -> Self {
        Self {
            registry: orchestrator.registry().clone(),
            orchestrator,
            event_bus,
            startup_time: Utc::now(),
            published_dir,
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    let artifacts = ServeDir::new(&state.published_dir);

    Router::new()
        .merge(api::job_routes())
        .merge(api::health_routes())
        .route("/events", get(api::event_stream))
        .nest_service("/artifacts", artifacts)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
