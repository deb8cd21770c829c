//! API Module
//!
//! HTTP API layer for the server.
//! Each submodule handles endpoints for a specific domain.

pub mod error;
pub mod health;
pub mod job;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::executor::ExecutorHandle;
use crate::repository::JobRegistry;

/// Shared state handed to every handler
#[derive(Debug, Clone)]
pub struct AppState {
    pub registry: Arc<JobRegistry>,
    pub executor: ExecutorHandle,
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Job endpoints
        .route("/jobs", post(job::create_job).get(job::list_jobs))
        .route("/jobs/{id}", get(job::get_job).patch(job::deliver_command))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
