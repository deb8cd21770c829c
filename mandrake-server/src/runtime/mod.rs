//! Container runtime
//!
//! The executor only needs four operations from the container runtime:
//! build an image from a context directory, start a detached container,
//! query its status and fetch its output. They are expressed as the
//! [`ContainerRuntime`] trait so the pipeline can run against the podman
//! CLI in production and against a scripted fake in tests.

pub mod podman;

use async_trait::async_trait;
use mandrake_core::domain::run::RunOptions;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub use podman::CliRuntime;

/// Mount point of the job context inside the container
pub const CONTEXT_MOUNT: &str = "/context";

/// Image identifier returned by a build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageId(pub String);

/// Container identifier returned by a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerId(pub String);

impl std::fmt::Display for ImageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Display for ContainerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Container status as reported by the runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerStatus {
    Created,
    Running,
    Exited,
    Other(String),
}

impl ContainerStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "created" | "configured" => ContainerStatus::Created,
            "running" => ContainerStatus::Running,
            "exited" | "stopped" => ContainerStatus::Exited,
            other => ContainerStatus::Other(other.to_string()),
        }
    }

    /// The container has not finished yet
    pub fn is_active(&self) -> bool {
        matches!(self, ContainerStatus::Created | ContainerStatus::Running)
    }
}

/// A bind mount from the host into the container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub source: PathBuf,
    pub target: String,
    pub read_only: bool,
}

/// Everything needed to start a job's container
#[derive(Debug, Clone, PartialEq)]
pub struct RunSpec {
    pub job_id: Uuid,
    pub image: ImageId,
    pub mounts: Vec<Mount>,
    pub options: RunOptions,
}

impl RunSpec {
    /// Spec for a job whose context is mounted read-write at [`CONTEXT_MOUNT`]
    pub fn for_job(job_id: Uuid, image: ImageId, context_dir: &Path, options: RunOptions) -> Self {
        Self {
            job_id,
            image,
            mounts: vec![Mount {
                source: context_dir.to_path_buf(),
                target: CONTEXT_MOUNT.to_string(),
                read_only: false,
            }],
            options,
        }
    }
}

/// Runtime error type
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("Failed to execute '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{action} failed (exit code {exit_code}): {stderr}")]
    CommandFailed {
        action: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Unexpected output from {action}: {output}")]
    InvalidOutput { action: String, output: String },
}

/// Operations the executor needs from a container runtime
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Build an image from `context` and tag it
    async fn build(&self, context: &Path, tag: &str) -> Result<ImageId, RuntimeError>;

    /// Start a detached container
    async fn run(&self, spec: &RunSpec) -> Result<ContainerId, RuntimeError>;

    async fn status(&self, container: &ContainerId) -> Result<ContainerStatus, RuntimeError>;

    /// Combined stdout and stderr of the container
    async fn logs(&self, container: &ContainerId) -> Result<String, RuntimeError>;
}
