//! Health Check API Handler
//!
//! Reports registry size and executor load for monitoring.

use axum::{Json, extract::State};
use mandrake_core::domain::job::JobState;
use mandrake_core::dto::job::HealthReport;

use crate::api::AppState;

/// GET /health
/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthReport> {
    Json(HealthReport {
        status: "OK".to_string(),
        jobs: state.registry.len(),
        active: state
            .registry
            .count_in(&[JobState::BuildingContainer, JobState::Running]),
        queued: state.executor.queued(),
        workers: state.executor.workers(),
    })
}
