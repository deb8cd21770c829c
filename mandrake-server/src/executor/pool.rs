//! Worker pool
//!
//! Receives pipeline tasks and runs them with bounded parallelism.
//! A task waits in the queue until it can take one of the worker permits;
//! the permit is released when its pipeline reaches a terminal state.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ExecutorError, ExecutorSettings, Pipeline, PipelineTask};
use crate::repository::JobRegistry;
use crate::runtime::ContainerRuntime;

/// Submission side of the executor, cheap to clone into request handlers
#[derive(Debug, Clone)]
pub struct ExecutorHandle {
    sender: mpsc::Sender<PipelineTask>,
    queued: Arc<AtomicUsize>,
    workers: usize,
}

impl ExecutorHandle {
    /// Queue a task; it runs as soon as a worker is free
    pub fn submit(&self, task: PipelineTask) -> Result<(), ExecutorError> {
        self.queued.fetch_add(1, Ordering::SeqCst);
        self.sender.try_send(task).map_err(|e| {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            match e {
                TrySendError::Full(_) => ExecutorError::Full,
                TrySendError::Closed(_) => ExecutorError::Closed,
            }
        })
    }

    /// Tasks accepted but not yet holding a worker
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    pub fn workers(&self) -> usize {
        self.workers
    }
}

/// Fixed-size pool of pipeline workers
pub struct Executor {
    pipeline: Pipeline,
    receiver: mpsc::Receiver<PipelineTask>,
    semaphore: Arc<Semaphore>,
    queued: Arc<AtomicUsize>,
    cancel: CancellationToken,
}

impl Executor {
    /// Starts the dispatcher and returns the submission handle
    pub fn start(
        registry: Arc<JobRegistry>,
        runtime: Arc<dyn ContainerRuntime>,
        settings: ExecutorSettings,
        cancel: CancellationToken,
    ) -> (ExecutorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(settings.queue_capacity.max(1));
        let queued = Arc::new(AtomicUsize::new(0));
        let workers = settings.workers.max(1);

        let executor = Self {
            pipeline: Pipeline::new(registry, runtime, settings, cancel.clone()),
            receiver,
            semaphore: Arc::new(Semaphore::new(workers)),
            queued: Arc::clone(&queued),
            cancel,
        };

        let handle = ExecutorHandle {
            sender,
            queued,
            workers,
        };

        (handle, tokio::spawn(executor.dispatch()))
    }

    async fn dispatch(mut self) {
        info!(
            "Executor started with {} worker(s)",
            self.semaphore.available_permits()
        );

        loop {
            let task = tokio::select! {
                _ = self.cancel.cancelled() => break,
                task = self.receiver.recv() => match task {
                    Some(task) => task,
                    None => break,
                },
            };

            let permit = tokio::select! {
                _ = self.cancel.cancelled() => break,
                permit = Arc::clone(&self.semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            self.queued.fetch_sub(1, Ordering::SeqCst);
            debug!(
                "Dispatching job {} ({} worker(s) free, {} queued)",
                task.job_id,
                self.semaphore.available_permits(),
                self.queued.load(Ordering::SeqCst)
            );

            let pipeline = self.pipeline.clone();
            tokio::spawn(async move {
                pipeline.run(task).await;
                // Permit is released when dropped
                drop(permit);
            });
        }

        let abandoned = self.queued.load(Ordering::SeqCst);
        if abandoned > 0 {
            warn!("Executor stopping with {} queued task(s)", abandoned);
        }
        info!("Executor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::testing::{FakeRuntime, fast_settings};
    use mandrake_core::domain::job::JobState;
    use std::time::Duration;

    async fn wait_until_terminal(registry: &JobRegistry, ids: &[uuid::Uuid]) {
        for _ in 0..500 {
            let done = ids
                .iter()
                .all(|id| registry.get(*id).map(|j| j.state.is_terminal()).unwrap_or(false));
            if done {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("jobs did not reach a terminal state");
    }

    #[tokio::test]
    async fn test_pool_runs_submitted_jobs() {
        let registry = Arc::new(JobRegistry::new("/srv/ctx"));
        let runtime = Arc::new(FakeRuntime::new().with_output("done"));
        let (handle, _join) = Executor::start(
            Arc::clone(&registry),
            runtime,
            fast_settings(2),
            CancellationToken::new(),
        );

        let job = registry.create();
        handle
            .submit(PipelineTask {
                job_id: job.id,
                params: None,
            })
            .unwrap();

        wait_until_terminal(&registry, &[job.id]).await;
        let job = registry.get(job.id).unwrap();
        assert_eq!(job.state, JobState::Finished);
        assert_eq!(job.output.as_deref(), Some("done"));
        assert_eq!(handle.queued(), 0);
    }

    #[tokio::test]
    async fn test_pool_bounds_concurrent_pipelines() {
        let registry = Arc::new(JobRegistry::new("/srv/ctx"));
        let runtime = Arc::new(
            FakeRuntime::new()
                .with_build_delay(Duration::from_millis(30))
                .with_active_polls(3),
        );
        let (handle, _join) = Executor::start(
            Arc::clone(&registry),
            runtime.clone(),
            fast_settings(2),
            CancellationToken::new(),
        );
        assert_eq!(handle.workers(), 2);

        let ids: Vec<_> = (0..6).map(|_| registry.create().id).collect();
        for id in &ids {
            handle
                .submit(PipelineTask {
                    job_id: *id,
                    params: None,
                })
                .unwrap();
        }

        let mut max_active = 0;
        for _ in 0..500 {
            let active =
                registry.count_in(&[JobState::BuildingContainer, JobState::Running]);
            max_active = max_active.max(active);
            if ids
                .iter()
                .all(|id| registry.get(*id).unwrap().state.is_terminal())
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        wait_until_terminal(&registry, &ids).await;
        assert!(max_active <= 2, "observed {} active pipelines", max_active);
        assert_eq!(runtime.max_in_flight(), 2);
        assert_eq!(runtime.builds().len(), 6);
    }

    #[tokio::test]
    async fn test_full_queue_rejects_submissions() {
        let registry = Arc::new(JobRegistry::new("/srv/ctx"));
        let mut settings = fast_settings(1);
        settings.queue_capacity = 1;
        let (handle, _join) = Executor::start(
            Arc::clone(&registry),
            Arc::new(FakeRuntime::new()),
            settings,
            CancellationToken::new(),
        );

        // The dispatcher cannot run until this test yields
        let task = |job_id| PipelineTask {
            job_id,
            params: None,
        };
        let first = registry.create();
        let second = registry.create();
        handle.submit(task(first.id)).unwrap();
        let result = handle.submit(task(second.id));

        assert!(matches!(result, Err(ExecutorError::Full)));
        assert_eq!(handle.queued(), 1);

        wait_until_terminal(&registry, &[first.id]).await;
        assert_eq!(handle.queued(), 0);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_rejected() {
        let registry = Arc::new(JobRegistry::new("/srv/ctx"));
        let cancel = CancellationToken::new();
        let (handle, join) = Executor::start(
            Arc::clone(&registry),
            Arc::new(FakeRuntime::new()),
            fast_settings(1),
            cancel.clone(),
        );

        cancel.cancel();
        join.await.unwrap();

        let result = handle.submit(PipelineTask {
            job_id: uuid::Uuid::new_v4(),
            params: None,
        });
        assert!(matches!(result, Err(ExecutorError::Closed)));
        assert_eq!(handle.queued(), 0);
    }
}
