//! Job Service
//!
//! Business logic for job creation, command delivery and queries.

use mandrake_core::domain::job::{Job, JobState};
use mandrake_core::dto::job::{DeliverCommand, JobMap};
use uuid::Uuid;

use crate::executor::{ExecutorHandle, PipelineTask};
use crate::repository::{JobRegistry, RegistryError};

/// Service error type
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job {0} not found")]
    NotFound(Uuid),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    InvalidState(String),
    #[error("Executor is not accepting work")]
    ExecutorUnavailable,
}

impl From<RegistryError> for JobError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(id) => JobError::NotFound(id),
        }
    }
}

/// Create a new job and its context directory
pub async fn create_job(registry: &JobRegistry) -> Job {
    let job = registry.create();

    // The context directory is also created by the first transfer, so a
    // failure here is not fatal
    if let Err(e) = tokio::fs::create_dir_all(&job.context_dir).await {
        tracing::warn!(
            "Could not create context directory {} for job {}: {}",
            job.context_dir.display(),
            job.id,
            e
        );
    }

    tracing::info!("Job created: {} ({})", job.id, job.context_dir.display());

    job
}

/// Get a job by ID
pub fn get_job(registry: &JobRegistry, id: Uuid) -> Result<Job, JobError> {
    Ok(registry.get(id)?)
}

/// List all jobs
pub fn list_jobs(registry: &JobRegistry) -> JobMap {
    registry.list()
}

/// Deliver a command to a job
///
/// Delivering `CONTEXT_DELIVERED` schedules a pipeline with the given
/// parameters. The restartable check, the queue submission, the move to
/// `SUBMITTED_TO_POOL` and the parameter update happen under one registry
/// update, so concurrent deliveries against the same job schedule at most
/// one pipeline and a refused submission leaves the record untouched.
pub fn deliver_command(
    registry: &JobRegistry,
    executor: &ExecutorHandle,
    id: Uuid,
    req: DeliverCommand,
) -> Result<Job, JobError> {
    validate_target_state(req.state)?;

    let job = registry.update(id, |job| {
        if !job.state.is_restartable() {
            return Err(JobError::Conflict(format!(
                "Job {} is busy (state {}); wait for it to finish before delivering a new command",
                id, job.state
            )));
        }

        if req.state == JobState::ContextDelivered {
            // Submission never blocks, so holding the record here is brief
            let task = PipelineTask {
                job_id: id,
                params: req.params.clone(),
            };
            if let Err(e) = executor.submit(task) {
                tracing::error!("Executor rejected job {} ({}); keeping it in {}", id, e, job.state);
                return Err(JobError::ExecutorUnavailable);
            }
        }

        job.rearm();
        job.params = req.params;
        job.state = req.state;

        if req.state == JobState::ContextDelivered {
            job.state = JobState::SubmittedToPool;
            job.attempts += 1;
        }

        Ok(job.clone())
    })??;

    if job.state == JobState::SubmittedToPool {
        tracing::info!(
            "Job {} submitted to pool (attempt {}, {} queued)",
            id,
            job.attempts,
            executor.queued()
        );
    } else {
        tracing::info!("Job {} set to {}", id, job.state);
    }

    Ok(job)
}

// =============================================================================
// Validation
// =============================================================================

fn validate_target_state(state: JobState) -> Result<(), JobError> {
    match state {
        JobState::Waiting | JobState::ContextDelivered => Ok(()),
        _ => Err(JobError::InvalidState(format!(
            "State {} is set by the executor and cannot be delivered",
            state
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Executor;
    use crate::executor::testing::{FakeRuntime, fast_settings};
    use mandrake_core::domain::job::FailureKind;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn deliver(argv: &[&str]) -> DeliverCommand {
        let argv: Vec<String> = argv.iter().map(|s| s.to_string()).collect();
        DeliverCommand::run(&argv)
    }

    fn start(runtime: FakeRuntime) -> (Arc<JobRegistry>, Arc<FakeRuntime>, ExecutorHandle) {
        let registry = Arc::new(JobRegistry::new("/srv/ctx"));
        let runtime = Arc::new(runtime);
        let (handle, _join) = Executor::start(
            Arc::clone(&registry),
            runtime.clone(),
            fast_settings(4),
            CancellationToken::new(),
        );
        (registry, runtime, handle)
    }

    async fn wait_terminal(registry: &JobRegistry, id: Uuid) -> Job {
        for _ in 0..500 {
            let job = registry.get(id).unwrap();
            if job.state.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {} never reached a terminal state", id);
    }

    #[test]
    fn test_validate_target_state() {
        assert!(validate_target_state(JobState::Waiting).is_ok());
        assert!(validate_target_state(JobState::ContextDelivered).is_ok());
        assert!(validate_target_state(JobState::Running).is_err());
        assert!(validate_target_state(JobState::Finished).is_err());
    }

    #[tokio::test]
    async fn test_create_job_makes_context_dir() {
        let dir = tempfile::tempdir().unwrap();
        let registry = JobRegistry::new(dir.path());

        let job = create_job(&registry).await;

        assert_eq!(job.state, JobState::Waiting);
        assert!(job.context_dir.is_dir());
        assert_eq!(get_job(&registry, job.id).unwrap().id, job.id);
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let (registry, _runtime, executor) = start(FakeRuntime::new());
        let id = Uuid::new_v4();

        assert!(matches!(get_job(&registry, id), Err(JobError::NotFound(x)) if x == id));
        assert!(matches!(
            deliver_command(&registry, &executor, id, deliver(&["true"])),
            Err(JobError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delivery_moves_job_to_pool_synchronously() {
        let (registry, _runtime, executor) =
            start(FakeRuntime::new().with_build_delay(Duration::from_millis(50)));
        let job = registry.create();

        let returned = deliver_command(&registry, &executor, job.id, deliver(&["ls"])).unwrap();

        assert_eq!(returned.state, JobState::SubmittedToPool);
        assert_eq!(returned.attempts, 1);
        assert!(returned.params.is_some());
    }

    #[tokio::test]
    async fn test_invalid_build_context_reaches_build_failed() {
        let (registry, _runtime, executor) =
            start(FakeRuntime::new().failing_build("cannot find Containerfile"));
        let job = registry.create();

        deliver_command(&registry, &executor, job.id, deliver(&["true"])).unwrap();

        let job = wait_terminal(&registry, job.id).await;
        assert_eq!(job.state, JobState::BuildFailed);
        let err = job.err.unwrap();
        assert_eq!(err.kind, FailureKind::BuildFailure);
        assert!(!err.message.is_empty());
    }

    #[tokio::test]
    async fn test_normal_exit_reaches_finished_with_output() {
        let (registry, _runtime, executor) =
            start(FakeRuntime::new().with_output("stdout line\nstderr line\n"));
        let job = registry.create();

        deliver_command(&registry, &executor, job.id, deliver(&["sh", "-c", "run"])).unwrap();

        let job = wait_terminal(&registry, job.id).await;
        assert_eq!(job.state, JobState::Finished);
        assert_eq!(job.output.as_deref(), Some("stdout line\nstderr line\n"));
        assert!(job.err.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_deliveries_schedule_one_pipeline() {
        let (registry, runtime, executor) =
            start(FakeRuntime::new().with_build_delay(Duration::from_millis(20)));
        let job = registry.create();

        let handles: Vec<_> = (0..2)
            .map(|i| {
                let registry = Arc::clone(&registry);
                let executor = executor.clone();
                let argv = format!("echo {}", i);
                tokio::spawn(async move {
                    deliver_command(&registry, &executor, job.id, deliver(&["sh", "-c", argv.as_str()]))
                })
            })
            .collect();

        let mut accepted = Vec::new();
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(job) => accepted.push(job),
                Err(JobError::Conflict(_)) => conflicts += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(accepted.len(), 1);
        assert_eq!(conflicts, 1);

        let job = wait_terminal(&registry, job.id).await;
        assert_eq!(job.state, JobState::Finished);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.params, accepted[0].params);
        assert_eq!(runtime.builds().len(), 1);
    }

    #[tokio::test]
    async fn test_terminal_job_can_be_rearmed() {
        let (registry, runtime, executor) = start(FakeRuntime::new().with_output("ok"));
        let job = registry.create();

        deliver_command(&registry, &executor, job.id, deliver(&["first"])).unwrap();
        wait_terminal(&registry, job.id).await;

        let rearmed = deliver_command(&registry, &executor, job.id, deliver(&["second"])).unwrap();
        assert_eq!(rearmed.state, JobState::SubmittedToPool);
        assert!(rearmed.output.is_none());
        assert!(rearmed.err.is_none());

        let job = wait_terminal(&registry, job.id).await;
        assert_eq!(job.attempts, 2);
        assert_eq!(runtime.builds().len(), 2);
    }

    #[tokio::test]
    async fn test_deliver_waiting_only_resets_state() {
        let (registry, runtime, executor) = start(FakeRuntime::new());
        let job = registry.create();

        let req = DeliverCommand {
            state: JobState::Waiting,
            params: None,
        };
        let job = deliver_command(&registry, &executor, job.id, req).unwrap();

        assert_eq!(job.state, JobState::Waiting);
        assert_eq!(job.attempts, 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(runtime.builds().is_empty());
    }

    #[tokio::test]
    async fn test_refused_delivery_keeps_previous_attempt() {
        let registry = Arc::new(JobRegistry::new("/srv/ctx"));
        let cancel = CancellationToken::new();
        let (executor, join) = Executor::start(
            Arc::clone(&registry),
            Arc::new(FakeRuntime::new()),
            fast_settings(1),
            cancel.clone(),
        );
        cancel.cancel();
        join.await.unwrap();

        let job = registry.create();
        registry
            .update(job.id, |job| {
                job.attempts = 1;
                job.finish("prev".to_string());
            })
            .unwrap();

        let result = deliver_command(&registry, &executor, job.id, deliver(&["again"]));
        assert!(matches!(result, Err(JobError::ExecutorUnavailable)));

        let job = registry.get(job.id).unwrap();
        assert_eq!(job.state, JobState::Finished);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.output.as_deref(), Some("prev"));
        assert!(job.params.is_none());
    }

    #[tokio::test]
    async fn test_executor_owned_state_is_rejected() {
        let (registry, _runtime, executor) = start(FakeRuntime::new());
        let job = registry.create();

        let req = DeliverCommand {
            state: JobState::Finished,
            params: None,
        };
        assert!(matches!(
            deliver_command(&registry, &executor, job.id, req),
            Err(JobError::InvalidState(_))
        ));
        assert_eq!(registry.get(job.id).unwrap().state, JobState::Waiting);
    }
}
