//! Context and output transfer
//!
//! Files move between the project directory and the job's context directory
//! on the server host with rsync over ssh.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

const RSYNC_OPTIONS: [&str; 3] = ["--recursive", "--update", "-v"];

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("rsync exited with {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },
}

/// Moves files to and from a remote job context
#[async_trait]
pub trait Transfer: Send + Sync {
    /// Upload the current directory into the job context
    async fn push(
        &self,
        ssh_host: &str,
        context_dir: &Path,
        ignorefile: Option<&Path>,
    ) -> Result<(), TransferError>;

    /// Download `<context_dir>/<output>/` into `<output>/`
    async fn pull(
        &self,
        ssh_host: &str,
        context_dir: &Path,
        output: &str,
    ) -> Result<(), TransferError>;
}

/// Transfers through the `rsync` binary
#[derive(Debug, Clone)]
pub struct Rsync {
    program: PathBuf,
}

impl Default for Rsync {
    fn default() -> Self {
        Self::new("rsync")
    }
}

impl Rsync {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn exec(&self, args: Vec<String>) -> Result<(), TransferError> {
        debug!("{} {}", self.program.display(), args.join(" "));

        // Progress goes straight to the terminal; only stderr is kept
        let output = Command::new(&self.program)
            .args(&args)
            .stdout(std::process::Stdio::inherit())
            .stderr(std::process::Stdio::piped())
            .output()
            .await
            .map_err(|source| TransferError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(TransferError::Failed {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

#[async_trait]
impl Transfer for Rsync {
    async fn push(
        &self,
        ssh_host: &str,
        context_dir: &Path,
        ignorefile: Option<&Path>,
    ) -> Result<(), TransferError> {
        self.exec(push_args(ssh_host, context_dir, ignorefile)).await
    }

    async fn pull(
        &self,
        ssh_host: &str,
        context_dir: &Path,
        output: &str,
    ) -> Result<(), TransferError> {
        self.exec(pull_args(ssh_host, context_dir, output)).await
    }
}

fn base_args() -> Vec<String> {
    RSYNC_OPTIONS.iter().map(|s| s.to_string()).collect()
}

fn push_args(ssh_host: &str, context_dir: &Path, ignorefile: Option<&Path>) -> Vec<String> {
    let mut args = base_args();
    if let Some(ignore) = ignorefile {
        args.push(format!("--exclude-from={}", ignore.display()));
    }
    args.push("./".to_string());
    args.push(format!("{}:{}", ssh_host, context_dir.display()));
    args
}

fn pull_args(ssh_host: &str, context_dir: &Path, output: &str) -> Vec<String> {
    let output = output.trim_end_matches('/');
    let mut args = base_args();
    args.push(format!(
        "{}:{}/",
        ssh_host,
        context_dir.join(output).display()
    ));
    args.push(format!("{}/", output));
    args
}
