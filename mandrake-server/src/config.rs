//! Server configuration
//!
//! Loaded from a TOML file given on the command line. A few settings can be
//! overridden through environment variables, which is convenient when the
//! server runs in a container.

use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::executor::ExecutorSettings;

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Base directory for job contexts; each job gets `<context-dir>/<id>`
    pub context_dir: PathBuf,

    /// Address the HTTP API binds to
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Container runtime CLI (podman or docker)
    #[serde(default = "default_runtime_binary")]
    pub runtime_binary: String,

    /// Container runtime daemon endpoint override
    #[serde(default)]
    pub runtime_url: Option<String>,

    /// Max parallel pipelines
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// How often running containers are polled
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Maximum container lifetime, unbounded when absent
    #[serde(default)]
    pub container_timeout_secs: Option<u64>,

    /// Delivered jobs that may wait for a free worker
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_bind() -> String {
    "0.0.0.0:5000".to_string()
}

fn default_runtime_binary() -> String {
    "podman".to_string()
}

fn default_workers() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_queue_capacity() -> usize {
    64
}

impl Config {
    /// Loads the configuration file and applies environment overrides
    ///
    /// Recognized environment variables:
    /// - MANDRAKE_CONTEXT_DIR
    /// - MANDRAKE_BIND_ADDR
    /// - MANDRAKE_RUNTIME_URL
    /// - MANDRAKE_WORKERS
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let mut config = Self::from_toml(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;

        Ok(config)
    }

    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Applies overrides looked up by environment variable name
    ///
    /// A value that cannot be parsed is an error rather than being ignored.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<()> {
        if let Some(dir) = lookup("MANDRAKE_CONTEXT_DIR") {
            self.context_dir = PathBuf::from(dir);
        }

        if let Some(bind) = lookup("MANDRAKE_BIND_ADDR") {
            self.bind = bind;
        }

        if let Some(url) = lookup("MANDRAKE_RUNTIME_URL") {
            self.runtime_url = Some(url);
        }

        if let Some(workers) = lookup("MANDRAKE_WORKERS") {
            self.workers = workers.trim().parse::<usize>().with_context(|| {
                format!("MANDRAKE_WORKERS must be a positive integer, got '{}'", workers)
            })?;
        }

        Ok(())
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.context_dir.as_os_str().is_empty() {
            anyhow::bail!("context-dir cannot be empty");
        }

        if self.bind.is_empty() {
            anyhow::bail!("bind cannot be empty");
        }

        if self.runtime_binary.is_empty() {
            anyhow::bail!("runtime-binary cannot be empty");
        }

        if self.workers == 0 {
            anyhow::bail!("workers must be greater than 0");
        }

        if self.poll_interval_ms == 0 {
            anyhow::bail!("poll-interval-ms must be greater than 0");
        }

        if self.queue_capacity == 0 {
            anyhow::bail!("queue-capacity must be greater than 0");
        }

        if self.container_timeout_secs == Some(0) {
            anyhow::bail!("container-timeout-secs must be greater than 0");
        }

        Ok(())
    }

    pub fn executor_settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            workers: self.workers,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            container_timeout: self.container_timeout_secs.map(Duration::from_secs),
            queue_capacity: self.queue_capacity,
        }
    }
}
