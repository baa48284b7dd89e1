//! API request handlers with proper error propagation.
//!
//! All fallible handlers return `Result<impl IntoResponse, BackofficeError>`
//! so that errors are converted to the matching HTTP status via the
//! `IntoResponse` implementation on `BackofficeError`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ApiResponse, AppState};
use crate::error::BackofficeError;
use crate::jobs::{AccountId, Job, JobId, JobRequest, JobStatus, PoolSnapshot};

// ═══════════════════════════════════════════════════════════════════════════════
// Health and Metrics
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
    pub workers: PoolSnapshot,
    pub queue_depth: usize,
    pub running_jobs: usize,
    pub pending_retries: usize,
}

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let manager = &state.manager;
    let accepting = manager.is_accepting();

    let body = HealthResponse {
        status: if accepting { "healthy" } else { "shutting_down" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        workers: manager.pool_stats(),
        queue_depth: manager.queue_depth(),
        running_jobs: manager.count_jobs(JobStatus::Running),
        pending_retries: manager.pending_retries(),
    };

    let status = if accepting {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = state
        .metrics
        .as_ref()
        .map(|handle| handle.render())
        .unwrap_or_default();

    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Handlers
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn create_job(
    State(state): State<AppState>,
    Json(req): Json<JobRequest>,
) -> Result<impl IntoResponse, BackofficeError> {
    if req.job_type.trim().is_empty() {
        return Err(BackofficeError::validation("job_type cannot be empty"));
    }

    let job_id = state.manager.create_job_with(req)?;
    let job = state
        .manager
        .get_job(&job_id)
        .ok_or_else(|| BackofficeError::job_not_found(job_id))?;

    Ok((StatusCode::ACCEPTED, Json(ApiResponse::success(job))))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, BackofficeError> {
    let job_id = JobId::from_uuid(id);
    let job = state
        .manager
        .get_job(&job_id)
        .ok_or_else(|| BackofficeError::job_not_found(job_id))?;

    Ok(Json(ApiResponse::success(job)))
}

pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, BackofficeError> {
    let job_id = JobId::from_uuid(id);

    if !state.manager.cancel_job(&job_id) {
        // Distinguish an unknown id from a job that is past the point of cancelling
        let job = state
            .manager
            .get_job(&job_id)
            .ok_or_else(|| BackofficeError::job_not_found(job_id))?;
        return Err(BackofficeError::invalid_state_transition(
            job_id,
            job.status,
            JobStatus::Cancelled,
        ));
    }

    let job: Option<Job> = state.manager.get_job(&job_id);
    Ok(Json(ApiResponse::success(job)))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListJobsQuery {
    pub status: Option<JobStatus>,
}

pub async fn list_account_jobs(
    State(state): State<AppState>,
    Path(account_id): Path<AccountId>,
    Query(query): Query<ListJobsQuery>,
) -> impl IntoResponse {
    let jobs = state.manager.get_jobs_by_account(account_id, query.status);
    Json(ApiResponse::success(jobs))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Stats
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.manager.get_job_stats()))
}
