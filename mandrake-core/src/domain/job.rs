//! Job domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use uuid::Uuid;

/// Job execution record
///
/// Structure shared between the server (owns and mutates it) and the client
/// (observes it by polling).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub state: JobState,
    pub context_dir: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<JobFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Number of pipelines scheduled for this job so far
    #[serde(default)]
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Creates a fresh job in the `WAITING` state
    ///
    /// The context directory is `context_base` joined with the job id.
    pub fn new(id: Uuid, context_base: impl Into<PathBuf>) -> Self {
        let now = Utc::now();
        let context_dir = context_base.into().join(id.to_string());

        Self {
            id,
            state: JobState::Waiting,
            context_dir,
            params: None,
            err: None,
            output: None,
            attempts: 0,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    /// Image tag used when building this job's context
    pub fn image_tag(&self) -> String {
        format!("mandrake-job-{}", self.id)
    }

    /// Clears the results of a previous execution attempt
    pub fn rearm(&mut self) {
        self.err = None;
        self.output = None;
        self.started_at = None;
        self.finished_at = None;
    }

    /// Marks the job failed in `state` with the given failure
    pub fn fail(&mut self, state: JobState, failure: JobFailure) {
        debug_assert!(state.is_failure());
        self.state = state;
        self.err = Some(failure);
        self.output = None;
        self.finished_at = Some(Utc::now());
    }

    /// Marks the job finished with its captured output
    pub fn finish(&mut self, output: String) {
        self.state = JobState::Finished;
        self.output = Some(output);
        self.err = None;
        self.finished_at = Some(Utc::now());
    }
}

/// Job lifecycle state
///
/// ```text
/// WAITING -> CONTEXT_DELIVERED -> SUBMITTED_TO_POOL -> BUILDING_CONTAINER
///     -> BUILD_FAILED
///     -> RUNNING -> RUNNING_FAILED | FINISHED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Waiting,
    ContextDelivered,
    SubmittedToPool,
    BuildingContainer,
    BuildFailed,
    Running,
    RunningFailed,
    Finished,
}

impl JobState {
    pub const ALL: [JobState; 8] = [
        JobState::Waiting,
        JobState::ContextDelivered,
        JobState::SubmittedToPool,
        JobState::BuildingContainer,
        JobState::BuildFailed,
        JobState::Running,
        JobState::RunningFailed,
        JobState::Finished,
    ];

    /// No further automatic transition happens from a terminal state
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::BuildFailed | JobState::RunningFailed | JobState::Finished
        )
    }

    pub fn is_failure(self) -> bool {
        matches!(self, JobState::BuildFailed | JobState::RunningFailed)
    }

    /// A new command may be delivered to a job in a restartable state
    pub fn is_restartable(self) -> bool {
        self == JobState::Waiting || self.is_terminal()
    }

    /// Whether the executor may move a job from `self` to `next`
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Waiting, ContextDelivered)
                | (ContextDelivered, SubmittedToPool)
                | (SubmittedToPool, BuildingContainer)
                | (BuildingContainer, BuildFailed)
                | (BuildingContainer, Running)
                | (Running, RunningFailed)
                | (Running, Finished)
        ) || (self.is_restartable() && matches!(next, Waiting | ContextDelivered))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Waiting => "WAITING",
            JobState::ContextDelivered => "CONTEXT_DELIVERED",
            JobState::SubmittedToPool => "SUBMITTED_TO_POOL",
            JobState::BuildingContainer => "BUILDING_CONTAINER",
            JobState::BuildFailed => "BUILD_FAILED",
            JobState::Running => "RUNNING",
            JobState::RunningFailed => "RUNNING_FAILED",
            JobState::Finished => "FINISHED",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an execution attempt failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl JobFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        let message = message.into();
        let message = if message.trim().is_empty() {
            format!("{} with no diagnostic output", kind)
        } else {
            message
        };

        Self { kind, message }
    }

    pub fn build(message: impl Into<String>) -> Self {
        Self::new(FailureKind::BuildFailure, message)
    }

    pub fn start(message: impl Into<String>) -> Self {
        Self::new(FailureKind::StartFailure, message)
    }

    pub fn run(message: impl Into<String>) -> Self {
        Self::new(FailureKind::RunFailure, message)
    }
}

impl std::fmt::Display for JobFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Failure category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// The image could not be built from the job context
    BuildFailure,
    /// The container could not be started
    StartFailure,
    /// Invalid run options, or the container could not be observed to completion
    RunFailure,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::BuildFailure => write!(f, "build failure"),
            FailureKind::StartFailure => write!(f, "start failure"),
            FailureKind::RunFailure => write!(f, "run failure"),
        }
    }
}
