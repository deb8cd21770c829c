//! Podman container management
//!
//! Drives the container runtime through its command-line interface:
//! - Checking the runtime binary is available
//! - Building job images from their context directory
//! - Starting detached containers with the job context mounted
//! - Inspecting container status and collecting output
//!
//! Any docker-compatible CLI works; the binary defaults to `podman`.

use async_trait::async_trait;
use std::io::Read;
use std::path::Path;
use std::process::{Output, Stdio};
use tokio::process::Command;
use tracing::{debug, error, info};

use super::{ContainerId, ContainerRuntime, ContainerStatus, ImageId, RunSpec, RuntimeError};

/// Container runtime backed by the podman (or docker) CLI
#[derive(Debug, Clone)]
pub struct CliRuntime {
    binary: String,

    /// Daemon endpoint override, e.g. `unix:///run/podman/podman.sock`
    endpoint: Option<String>,
}

impl CliRuntime {
    pub fn new(binary: impl Into<String>, endpoint: Option<String>) -> Self {
        Self {
            binary: binary.into(),
            endpoint,
        }
    }

    /// Checks that the runtime binary is installed and answers
    pub async fn check_available(&self) -> Result<String, RuntimeError> {
        let output = self.exec("version check", &["--version".to_string()]).await?;
        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        info!("Container runtime is available: {}", version);
        Ok(version)
    }

    /// Global arguments placed before the subcommand
    fn global_args(&self) -> Vec<String> {
        match &self.endpoint {
            Some(endpoint) if self.is_docker() => vec!["-H".to_string(), endpoint.clone()],
            Some(endpoint) => vec!["--url".to_string(), endpoint.clone()],
            None => Vec::new(),
        }
    }

    fn is_docker(&self) -> bool {
        Path::new(&self.binary)
            .file_name()
            .map(|name| name.to_string_lossy().starts_with("docker"))
            .unwrap_or(false)
    }

    /// Runs the binary with `args` and fails on a non-zero exit
    async fn exec(&self, action: &str, args: &[String]) -> Result<Output, RuntimeError> {
        let mut command = Command::new(&self.binary);
        command.args(self.global_args()).args(args);

        debug!("Executing {} {:?}", self.binary, args);

        let output = command.output().await.map_err(|source| RuntimeError::Spawn {
            program: self.binary.clone(),
            source,
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            let exit_code = output.status.code().unwrap_or(-1);
            error!(
                "{} failed: exit_code={}, stdout='{}', stderr='{}'",
                action,
                exit_code,
                stdout.trim(),
                stderr.trim()
            );
            return Err(RuntimeError::CommandFailed {
                action: action.to_string(),
                exit_code,
                stderr: combine(&stdout, &stderr).trim().to_string(),
            });
        }

        if !stderr.trim().is_empty() {
            debug!("{} stderr: {}", action, stderr.trim());
        }

        Ok(output)
    }

    /// Like `exec`, but stdout and stderr share one pipe so their lines
    /// come back in the order the process wrote them
    async fn exec_merged(&self, action: &str, args: &[String]) -> Result<String, RuntimeError> {
        let spawn_error = |source| RuntimeError::Spawn {
            program: self.binary.clone(),
            source,
        };

        let (mut reader, writer) = std::io::pipe().map_err(spawn_error)?;
        let writer_err = writer.try_clone().map_err(spawn_error)?;

        let mut command = Command::new(&self.binary);
        command
            .args(self.global_args())
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(writer))
            .stderr(Stdio::from(writer_err));

        debug!("Executing {} {:?} (merged output)", self.binary, args);

        let mut child = command.spawn().map_err(spawn_error)?;
        // Our copies of the write end must close for the reader to see EOF
        drop(command);

        let read = tokio::task::spawn_blocking(move || {
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf).map(|_| buf)
        });

        let (read, status) = tokio::join!(read, child.wait());
        let status = status.map_err(spawn_error)?;
        let bytes = read
            .map_err(std::io::Error::other)
            .and_then(|result| result)
            .map_err(spawn_error)?;
        let output = String::from_utf8_lossy(&bytes).to_string();

        if !status.success() {
            let exit_code = status.code().unwrap_or(-1);
            error!(
                "{} failed: exit_code={}, output='{}'",
                action,
                exit_code,
                output.trim()
            );
            return Err(RuntimeError::CommandFailed {
                action: action.to_string(),
                exit_code,
                stderr: output.trim().to_string(),
            });
        }

        Ok(output)
    }
}

#[async_trait]
impl ContainerRuntime for CliRuntime {
    async fn build(&self, context: &Path, tag: &str) -> Result<ImageId, RuntimeError> {
        info!("Building image {} from {}", tag, context.display());

        let output = self.exec("image build", &build_args(context, tag)).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);

        // `build -q` prints only the image id, on the last line
        let image = last_line(&stdout).ok_or_else(|| RuntimeError::InvalidOutput {
            action: "image build".to_string(),
            output: stdout.to_string(),
        })?;

        info!("Built image {} ({})", tag, image);
        Ok(ImageId(image))
    }

    async fn run(&self, spec: &RunSpec) -> Result<ContainerId, RuntimeError> {
        let output = self.exec("container run", &run_args(spec)).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);

        let container = last_line(&stdout).ok_or_else(|| RuntimeError::InvalidOutput {
            action: "container run".to_string(),
            output: stdout.to_string(),
        })?;

        info!(
            "Container {} started for job {} from image {}",
            container, spec.job_id, spec.image
        );
        Ok(ContainerId(container))
    }

    async fn status(&self, container: &ContainerId) -> Result<ContainerStatus, RuntimeError> {
        let args = vec![
            "inspect".to_string(),
            "--format".to_string(),
            "{{.State.Status}}".to_string(),
            container.0.clone(),
        ];
        let output = self.exec("container inspect", &args).await?;

        Ok(ContainerStatus::parse(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn logs(&self, container: &ContainerId) -> Result<String, RuntimeError> {
        let args = vec!["logs".to_string(), container.0.clone()];
        self.exec_merged("container logs", &args).await
    }
}

fn build_args(context: &Path, tag: &str) -> Vec<String> {
    vec![
        "build".to_string(),
        "-q".to_string(),
        "-t".to_string(),
        tag.to_string(),
        context.to_string_lossy().to_string(),
    ]
}

fn run_args(spec: &RunSpec) -> Vec<String> {
    let options = &spec.options;
    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "--label".to_string(),
        format!("mandrake.job={}", spec.job_id),
    ];

    for mount in &spec.mounts {
        let mode = if mount.read_only { "ro" } else { "rw" };
        args.push("-v".to_string());
        args.push(format!(
            "{}:{}:{}",
            mount.source.to_string_lossy(),
            mount.target,
            mode
        ));
    }

    for (key, value) in &options.environment {
        args.push("-e".to_string());
        args.push(format!("{}={}", key, value));
    }

    if let Some(dir) = &options.working_dir {
        args.push("-w".to_string());
        args.push(dir.clone());
    }

    if let Some(memory) = &options.memory {
        args.push(format!("--memory={}", memory));
    }

    if let Some(cpus) = &options.cpus {
        args.push(format!("--cpus={}", cpus));
    }

    if let Some(user) = &options.user {
        args.push("--user".to_string());
        args.push(user.clone());
    }

    args.push(spec.image.0.clone());

    if let Some(command) = &options.command {
        args.extend(command.argv());
    }

    args
}

fn last_line(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .rfind(|line| !line.is_empty())
        .map(str::to_string)
}

fn combine(stdout: &str, stderr: &str) -> String {
    match (stdout.is_empty(), stderr.is_empty()) {
        (_, true) => stdout.to_string(),
        (true, false) => stderr.to_string(),
        (false, false) if stdout.ends_with('\n') => format!("{}{}", stdout, stderr),
        (false, false) => format!("{}\n{}", stdout, stderr),
    }
}
