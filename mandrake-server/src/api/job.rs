//! Job API Handlers
//!
//! HTTP endpoints for job lifecycle management.

use axum::{
    Json,
    extract::{Path, State},
};
use mandrake_core::domain::job::Job;
use mandrake_core::dto::job::{DeliverCommand, JobMap};
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::ApiResult;
use crate::service::job_service;

/// POST /jobs
/// Create a new job waiting for its context
pub async fn create_job(State(state): State<AppState>) -> Json<Job> {
    Json(job_service::create_job(&state.registry).await)
}

/// GET /jobs
/// List all jobs keyed by id
pub async fn list_jobs(State(state): State<AppState>) -> Json<JobMap> {
    tracing::debug!("Listing all jobs");

    Json(job_service::list_jobs(&state.registry))
}

/// GET /jobs/{id}
/// Get job details by ID
pub async fn get_job(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Job>> {
    tracing::debug!("Getting job: {}", id);

    let job = job_service::get_job(&state.registry, id)?;

    Ok(Json(job))
}

/// PATCH /jobs/{id}
/// Deliver a command; `CONTEXT_DELIVERED` schedules the build/run pipeline
pub async fn deliver_command(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<DeliverCommand>,
) -> ApiResult<Json<Job>> {
    tracing::info!("Delivering {} to job {}", req.state, id);

    let job = job_service::deliver_command(&state.registry, &state.executor, id, req)?;

    Ok(Json(job))
}
