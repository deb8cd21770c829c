//! Remote run session
//!
//! One invocation of the CLI: bind the project to a job on the selected
//! remote, wait until the job can take new work, push the context, deliver
//! the command, then follow the job to a terminal state and pull the output.

use anyhow::{Context, Result};
use colored::*;
use mandrake_client::{ClientError, JobApi, RetryPolicy};
use mandrake_core::domain::job::{Job, JobState};
use mandrake_core::dto::job::DeliverCommand;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{ConfigError, MandrakeFile, Remote};
use crate::sync::Transfer;

/// The project directory's configuration, bound to one remote
#[derive(Debug)]
pub struct Project {
    pub path: PathBuf,
    pub file: MandrakeFile,
    pub remote: usize,
    /// Exclude list passed to the context upload, when present
    pub ignorefile: Option<PathBuf>,
}

impl Project {
    pub fn open(path: &Path, remote: Option<&str>, ignorefile: &Path) -> Result<Self, ConfigError> {
        let file = MandrakeFile::load(path)?;
        let remote = file.resolve_remote(remote, path)?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            remote,
            ignorefile: ignorefile.exists().then(|| ignorefile.to_path_buf()),
        })
    }

    pub fn remote(&self) -> &Remote {
        &self.file.remotes[self.remote]
    }

    /// Records the job for this remote and writes the file back
    fn bind_job(&mut self, id: Uuid) -> Result<(), ConfigError> {
        self.file.remotes[self.remote].job_id = Some(id);
        self.file.save(&self.path)
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub poll_interval: Duration,
    /// Upper bound on each wait loop
    pub timeout: Option<Duration>,
    pub retry: RetryPolicy,
    /// Skip waiting for an in-progress job
    pub force: bool,
    /// Create a new job even if one is cached
    pub create: bool,
}

/// How the job ended
#[derive(Debug)]
pub enum Outcome {
    Finished(Job),
    Failed(Job),
}

pub struct Session<'a> {
    api: &'a dyn JobApi,
    transfer: &'a dyn Transfer,
    settings: Settings,
}

impl<'a> Session<'a> {
    pub fn new(api: &'a dyn JobApi, transfer: &'a dyn Transfer, settings: Settings) -> Self {
        Self {
            api,
            transfer,
            settings,
        }
    }

    pub async fn run(&self, project: &mut Project, command: &[String]) -> Result<Outcome> {
        let mut job = self.bind(project).await?;

        if !self.settings.force && !job.state.is_restartable() {
            job = self
                .wait_for(job, "Job already in progress (pass -f to force):", |state| {
                    state.is_restartable()
                })
                .await?;
        }

        let ssh_host = project.remote().ssh.host.clone();

        println!("{}", "Sending context via rsync...".bold());
        self.transfer
            .push(&ssh_host, &job.context_dir, project.ignorefile.as_deref())
            .await
            .context("Failed to send context")?;

        println!(
            "{} {}",
            "Executing command on remote server:".bold(),
            command.join(" ").cyan()
        );
        let job = self.deliver(job.id, &DeliverCommand::run(command)).await?;

        let job = self
            .wait_for(job, "Job is", |state| state.is_terminal())
            .await?;

        if job.state != JobState::Finished {
            report_failure(&job);
            return Ok(Outcome::Failed(job));
        }

        println!("{} {}", "✓".green(), "Job finished".bold());
        if let Some(output) = &job.output {
            print!("{}", output);
            if !output.is_empty() && !output.ends_with('\n') {
                println!();
            }
        }

        match project.file.defaults.output.as_deref() {
            Some(output) => {
                println!("{} {}", "Retrieving output folder".bold(), output.cyan());
                self.transfer
                    .pull(&ssh_host, &job.context_dir, output)
                    .await
                    .context("Failed to retrieve output")?;
            }
            None => debug!("No output folder configured; nothing to retrieve"),
        }

        Ok(Outcome::Finished(job))
    }

    /// Returns the cached job, or creates one and persists its id
    async fn bind(&self, project: &mut Project) -> Result<Job> {
        let cached = if self.settings.create {
            None
        } else {
            project.remote().job_id
        };

        if let Some(id) = cached {
            match self.fetch(id).await {
                Ok(job) => return Ok(job),
                Err(e) if e.is_not_found() => {
                    warn!("Cached job {} is unknown to the remote", id);
                    println!(
                        "{}",
                        format!("Job {} no longer exists on the remote; creating a new one", id)
                            .yellow()
                    );
                }
                Err(e) => return Err(e).context("Failed to retrieve job status"),
            }
        }

        println!("{}", "Creating job...".bold());
        let job = self
            .settings
            .retry
            .run("create job", || self.api.create_job())
            .await
            .context("Failed to create job")?;

        println!(
            "Saving job id {} to {}",
            job.id.to_string().cyan(),
            project.path.display()
        );
        project.bind_job(job.id)?;

        Ok(job)
    }

    async fn deliver(&self, id: Uuid, cmd: &DeliverCommand) -> Result<Job> {
        let mut attempts = 0;
        let result = self
            .settings
            .retry
            .run("deliver command", || {
                attempts += 1;
                self.api.deliver_command(id, cmd)
            })
            .await;

        match result {
            Ok(job) => Ok(job),
            // Only transient failures are retried, so an earlier attempt may
            // have reached the server and scheduled the job itself
            Err(e) if e.is_conflict() && attempts > 1 => {
                warn!(
                    "Job {} refused a retried delivery as busy; following the earlier attempt",
                    id
                );
                self.fetch(id)
                    .await
                    .context("Failed to retrieve job status")
            }
            Err(e) if e.is_conflict() => Err(anyhow::anyhow!(
                "Job {} is still in progress on the remote and cannot take a new command",
                id
            )),
            Err(e) => Err(anyhow::Error::new(e).context("Failed to deliver command")),
        }
    }

    async fn fetch(&self, id: Uuid) -> Result<Job, ClientError> {
        self.settings
            .retry
            .run("get job", || self.api.get_job(id))
            .await
    }

    /// Polls the job until `done` holds, printing each newly observed state
    async fn wait_for(
        &self,
        mut job: Job,
        notice: &str,
        done: impl Fn(JobState) -> bool,
    ) -> Result<Job> {
        let started = Instant::now();
        let mut last = None;

        loop {
            if done(job.state) {
                return Ok(job);
            }

            if last != Some(job.state) {
                println!("{} {}", notice, colorize_state(job.state));
                last = Some(job.state);
            }

            if let Some(timeout) = self.settings.timeout {
                if started.elapsed() >= timeout {
                    anyhow::bail!(
                        "Timed out after {:?} waiting for job {} (state {})",
                        timeout,
                        job.id,
                        job.state
                    );
                }
            }

            tokio::time::sleep(self.settings.poll_interval).await;
            job = self
                .fetch(job.id)
                .await
                .context("Failed to retrieve job status")?;
        }
    }
}

fn report_failure(job: &Job) {
    eprintln!("{} Job {}", "✗".red(), colorize_state(job.state));
    match &job.err {
        Some(err) => eprintln!("{}", err.to_string().red()),
        None => eprintln!("{}", "No diagnostic was recorded".dimmed()),
    }
}

/// Colorize job state for display
fn colorize_state(state: JobState) -> ColoredString {
    let text = state.as_str();
    match state {
        JobState::Waiting | JobState::ContextDelivered => text.dimmed(),
        JobState::SubmittedToPool => text.yellow(),
        JobState::BuildingContainer | JobState::Running => text.cyan(),
        JobState::Finished => text.green(),
        JobState::BuildFailed | JobState::RunningFailed => text.red(),
    }
}
