//! Job DTOs

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::job::{Job, JobState};

/// All jobs known to the server, keyed by id
pub type JobMap = HashMap<Uuid, Job>;

/// Body of `PATCH /jobs/{id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliverCommand {
    pub state: JobState,
    #[serde(default)]
    pub params: Option<Map<String, Value>>,
}

impl DeliverCommand {
    /// Delivery that schedules a pipeline running `argv`
    pub fn run(argv: &[String]) -> Self {
        Self {
            state: JobState::ContextDelivered,
            params: Some(crate::domain::run::RunOptions::command_params(argv)),
        }
    }
}

/// Body of `GET /health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub jobs: usize,
    pub active: usize,
    pub queued: usize,
    pub workers: usize,
}
