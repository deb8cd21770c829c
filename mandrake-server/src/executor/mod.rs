//! Build/run executor
//!
//! Advances delivered jobs to a terminal state. Work arrives as explicit
//! [`PipelineTask`] values on a bounded queue; a dispatcher hands each task to a
//! pipeline once one of the fixed number of worker slots is free, and the
//! pipeline holds that slot until the job is terminal.

pub mod pipeline;
pub mod pool;

use serde_json::{Map, Value};
use std::time::Duration;
use uuid::Uuid;

pub use pipeline::Pipeline;
pub use pool::{Executor, ExecutorHandle};

/// One unit of work: build and run a job with the delivered parameters
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineTask {
    pub job_id: Uuid,
    pub params: Option<Map<String, Value>>,
}

/// Executor tuning
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// Maximum number of pipelines running at once
    pub workers: usize,

    /// How often a running container's status is checked
    pub poll_interval: Duration,

    /// Upper bound on a container's lifetime, unbounded when `None`
    pub container_timeout: Option<Duration>,

    /// Tasks that may wait for a worker before submissions are refused
    pub queue_capacity: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("Executor is shut down")]
    Closed,
    #[error("Executor queue is full")]
    Full,
}

#[cfg(test)]
pub(crate) mod testing;
