//! Job pipeline
//!
//! Build → run → await exit for a single job. Every stage transition is
//! written to the registry as it happens, and every failure is captured on
//! the job record rather than returned to a caller.

use mandrake_core::domain::job::{JobFailure, JobState};
use mandrake_core::domain::run::RunOptions;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{ExecutorSettings, PipelineTask};
use crate::repository::{JobRegistry, RegistryError};
use crate::runtime::{ContainerId, ContainerRuntime, RunSpec};

/// How a pipeline stopped before producing output
#[derive(Debug)]
enum Stop {
    Failed(JobState, JobFailure),
    Missing(RegistryError),
}

impl From<RegistryError> for Stop {
    fn from(err: RegistryError) -> Self {
        Stop::Missing(err)
    }
}

/// Executes pipelines against a container runtime
#[derive(Clone)]
pub struct Pipeline {
    registry: Arc<JobRegistry>,
    runtime: Arc<dyn ContainerRuntime>,
    settings: ExecutorSettings,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(
        registry: Arc<JobRegistry>,
        runtime: Arc<dyn ContainerRuntime>,
        settings: ExecutorSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            runtime,
            settings,
            cancel,
        }
    }

    /// Runs the task to a terminal state and records the outcome
    pub async fn run(&self, task: PipelineTask) {
        let job_id = task.job_id;
        info!("Starting pipeline for job {}", job_id);

        let outcome = match self.execute(&task).await {
            Ok(output) => self.registry.update(job_id, |job| job.finish(output)),
            Err(Stop::Failed(state, failure)) => {
                warn!("Job {} stopped in {}: {}", job_id, state, failure);
                self.registry.update(job_id, |job| job.fail(state, failure))
            }
            Err(Stop::Missing(err)) => Err(err),
        };

        match outcome {
            Ok(()) => {
                let state = self.registry.get(job_id).map(|job| job.state);
                info!("Pipeline for job {} completed: {:?}", job_id, state);
            }
            Err(e) => error!("Pipeline for job {} lost its record: {}", job_id, e),
        }
    }

    async fn execute(&self, task: &PipelineTask) -> Result<String, Stop> {
        let job_id = task.job_id;

        // Build
        let job = self.registry.update(job_id, |job| {
            job.state = JobState::BuildingContainer;
            job.started_at = Some(chrono::Utc::now());
            job.clone()
        })?;

        let image = self
            .runtime
            .build(&job.context_dir, &job.image_tag())
            .await
            .map_err(|e| Stop::Failed(JobState::BuildFailed, JobFailure::build(e.to_string())))?;

        // Run
        self.transition(job_id, JobState::Running)?;

        let options = RunOptions::from_params(task.params.as_ref())
            .map_err(|e| Stop::Failed(JobState::RunningFailed, JobFailure::run(e.to_string())))?;

        let spec = RunSpec::for_job(job_id, image, &job.context_dir, options);
        let container = self
            .runtime
            .run(&spec)
            .await
            .map_err(|e| Stop::Failed(JobState::RunningFailed, JobFailure::start(e.to_string())))?;

        // Await exit
        self.wait_for_exit(job_id, &container).await?;

        self.runtime
            .logs(&container)
            .await
            .map_err(|e| Stop::Failed(JobState::RunningFailed, JobFailure::run(e.to_string())))
    }

    fn transition(&self, job_id: Uuid, state: JobState) -> Result<(), RegistryError> {
        self.registry.update(job_id, |job| {
            if !job.state.can_transition_to(state) {
                warn!("Job {}: unexpected transition {} -> {}", job_id, job.state, state);
            }
            debug!("Job {}: {} -> {}", job_id, job.state, state);
            job.state = state;
        })
    }

    /// Polls the container until it leaves the created/running states
    async fn wait_for_exit(&self, job_id: Uuid, container: &ContainerId) -> Result<(), Stop> {
        let started = Instant::now();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(Stop::Failed(
                        JobState::RunningFailed,
                        JobFailure::run(format!(
                            "server shut down while container {} was running", container
                        )),
                    ));
                }
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }

            let status = self.runtime.status(container).await.map_err(|e| {
                Stop::Failed(JobState::RunningFailed, JobFailure::run(e.to_string()))
            })?;
            debug!("Job {} container {} status: {:?}", job_id, container, status);

            if !status.is_active() {
                return Ok(());
            }

            if let Some(timeout) = self.settings.container_timeout {
                if started.elapsed() >= timeout {
                    return Err(Stop::Failed(
                        JobState::RunningFailed,
                        JobFailure::run(format!(
                            "container {} still running after {:?}",
                            container, timeout
                        )),
                    ));
                }
            }
        }
    }
}
