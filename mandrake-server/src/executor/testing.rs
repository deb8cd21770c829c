//! Scripted container runtime for executor tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::ExecutorSettings;
use crate::runtime::{
    ContainerId, ContainerRuntime, ContainerStatus, ImageId, RunSpec, RuntimeError,
};

pub fn fast_settings(workers: usize) -> ExecutorSettings {
    ExecutorSettings {
        workers,
        poll_interval: Duration::from_millis(2),
        container_timeout: None,
        queue_capacity: 64,
    }
}

/// Fake runtime with configurable failures and bookkeeping of calls
#[derive(Default)]
pub struct FakeRuntime {
    build_error: Option<String>,
    run_error: Option<String>,
    output: String,
    /// Status polls answered with `running` before reporting `exited`
    active_polls: usize,
    build_delay: Duration,

    builds: Mutex<Vec<String>>,
    runs: Mutex<Vec<RunSpec>>,
    polls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_build(mut self, message: &str) -> Self {
        self.build_error = Some(message.to_string());
        self
    }

    pub fn failing_run(mut self, message: &str) -> Self {
        self.run_error = Some(message.to_string());
        self
    }

    pub fn with_output(mut self, output: &str) -> Self {
        self.output = output.to_string();
        self
    }

    pub fn with_active_polls(mut self, polls: usize) -> Self {
        self.active_polls = polls;
        self
    }

    pub fn with_build_delay(mut self, delay: Duration) -> Self {
        self.build_delay = delay;
        self
    }

    pub fn builds(&self) -> Vec<String> {
        self.builds.lock().clone()
    }

    pub fn runs(&self) -> Vec<RunSpec> {
        self.runs.lock().clone()
    }

    /// Highest number of pipelines seen between build start and logs
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn failed(action: &str, message: &str) -> RuntimeError {
        RuntimeError::CommandFailed {
            action: action.to_string(),
            exit_code: 1,
            stderr: message.to_string(),
        }
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn build(&self, _context: &Path, tag: &str) -> Result<ImageId, RuntimeError> {
        self.builds.lock().push(tag.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.build_delay).await;

        if let Some(message) = &self.build_error {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            return Err(Self::failed("image build", message));
        }

        Ok(ImageId(format!("image-{}", tag)))
    }

    async fn run(&self, spec: &RunSpec) -> Result<ContainerId, RuntimeError> {
        self.runs.lock().push(spec.clone());

        if let Some(message) = &self.run_error {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            return Err(Self::failed("container run", message));
        }

        Ok(ContainerId(format!("container-{}", spec.job_id)))
    }

    async fn status(&self, _container: &ContainerId) -> Result<ContainerStatus, RuntimeError> {
        let seen = self.polls.fetch_add(1, Ordering::SeqCst);
        if seen < self.active_polls {
            Ok(ContainerStatus::Running)
        } else {
            Ok(ContainerStatus::Exited)
        }
    }

    async fn logs(&self, _container: &ContainerId) -> Result<String, RuntimeError> {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(self.output.clone())
    }
}
