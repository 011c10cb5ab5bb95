use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;

use crate::app_state::AppState;
use crate::models::api::{EnqueueRequest, JobResponse, ListJobsQuery};
use crate::models::job::{JobPage, QueueStats};
use crate::services::queue::QueueError;

fn status_for(e: &QueueError) -> StatusCode {
    if e.is_not_found() {
        StatusCode::NOT_FOUND
    } else if e.is_invalid_transition() {
        StatusCode::CONFLICT
    } else {
        tracing::error!(error = %e, "Queue operation failed");
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

/// POST /api/v1/jobs — Enqueue a job.
pub async fn enqueue_job(
    State(state): State<AppState>,
    Json(req): Json<EnqueueRequest>,
) -> Result<(StatusCode, Json<JobResponse>), StatusCode> {
    req.validate().map_err(|_| StatusCode::UNPROCESSABLE_ENTITY)?;

    let job = state
        .queue
        .enqueue(&req.job_type, &req.payload)
        .await
        .map_err(|e| status_for(&e))?;

    Ok((StatusCode::CREATED, Json(job.into())))
}

/// GET /api/v1/jobs — List jobs, optionally filtered by status.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<JobPage<JobResponse>>, StatusCode> {
    let page = query.page.unwrap_or(1);
    let limit = query.limit.unwrap_or(0);

    let result = match query.status {
        Some(status) => state.queue.get_by_status_paginated(status, page, limit).await,
        None => state.queue.get_all_paginated(page, limit).await,
    }
    .map_err(|e| status_for(&e))?;

    Ok(Json(result.map(JobResponse::from)))
}

/// GET /api/v1/jobs/{job_id} — Look up one job.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobResponse>, StatusCode> {
    let job = state
        .queue
        .get_by_id(&job_id)
        .await
        .map_err(|e| status_for(&e))?;

    Ok(Json(job.into()))
}

/// POST /api/v1/jobs/{job_id}/retry — Move a failed job back to pending.
pub async fn retry_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobResponse>, StatusCode> {
    state
        .queue
        .retry(&job_id)
        .await
        .map_err(|e| status_for(&e))?;

    let job = state
        .queue
        .get_by_id(&job_id)
        .await
        .map_err(|e| status_for(&e))?;

    Ok(Json(job.into()))
}

/// GET /api/v1/stats — Job counts per status.
pub async fn queue_stats(State(state): State<AppState>) -> Result<Json<QueueStats>, StatusCode> {
    let stats = state.queue.stats().await.map_err(|e| status_for(&e))?;
    Ok(Json(stats))
}
