//! Job API handlers
//!
//! POST /jobs, GET /jobs/{id}, GET /jobs/{id}/result, POST /jobs/{id}/cancel

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{ApiError, ApiResult},
    models::{JobResultResponse, JobStatus, TransformationJob, TransformationRequest},
    AppState,
};

/// POST /jobs request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobRequest {
    #[serde(default)]
    pub source_reference: String,
    #[serde(default)]
    pub target_style: String,
}

/// POST /jobs response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub submitted_at: chrono::DateTime<chrono::Utc>,
}

/// POST /jobs/{id}/cancel response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelJobResponse {
    pub job_id: Uuid,
    pub cancel_requested: bool,
}

/// POST /jobs
///
/// Accept a transformation request. Returns 202 Accepted with the job ID.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(request): Json<SubmitJobRequest>,
) -> ApiResult<(StatusCode, Json<SubmitJobResponse>)> {
    let handle = state
        .orchestrator
        .submit(TransformationRequest {
            source_reference: request.source_reference,
            target_style: request.target_style,
        })
        .await?;

    let job = state
        .registry
        .get(handle.job_id)
        .await
        .ok_or_else(|| ApiError::Internal(format!("Job {} vanished", handle.job_id)))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitJobResponse {
            job_id: job.id,
            status: job.status,
            submitted_at: job.submitted_at,
        }),
    ))
}

/// GET /jobs/{id}
///
/// Current snapshot including per-stage records.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<TransformationJob>> {
    let job = state
        .registry
        .get(job_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Job not found: {}", job_id)))?;

    tracing::debug!(job_id = %job_id, status = job.status.as_str(), "Status query");
    Ok(Json(job))
}

/// GET /jobs/{id}/result
///
/// Caller-facing result once terminal; 409 while the job is running.
pub async fn get_job_result(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<JobResultResponse>> {
    let job = state
        .registry
        .get(job_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Job not found: {}", job_id)))?;

    JobResultResponse::from_job(&job).map(Json).ok_or_else(|| {
        ApiError::Conflict(format!(
            "Job {} has not finished (status: {})",
            job_id,
            job.status.as_str()
        ))
    })
}

/// POST /jobs/{id}/cancel
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<CancelJobResponse>)> {
    state.orchestrator.cancel(job_id).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(CancelJobResponse {
            job_id,
            cancel_requested: true,
        }),
    ))
}

/// Build job routes
pub fn job_routes() -> Router<AppState> {
    Router::new()
        .route("/jobs", post(submit_job))
        .route("/jobs/:id", get(get_job))
        .route("/jobs/:id/result", get(get_job_result))
        .route("/jobs/:id/cancel", post(cancel_job))
}
