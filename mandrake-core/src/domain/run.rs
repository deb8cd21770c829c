//! Run options for the container stage
//!
//! Callers deliver run parameters as an open JSON object. The executor parses
//! them into [`RunOptions`] right before starting the container, so an
//! unrecognized key or a wrongly typed value surfaces as a run failure on the
//! job instead of being forwarded to the container runtime.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Recognized run options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunOptions {
    /// Command to execute instead of the image's default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandLine>,

    /// Extra environment variables
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,

    /// Working directory inside the container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,

    /// Memory limit, e.g. "2g"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,

    /// CPU limit, e.g. "1.5"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<Cpus>,

    /// User to run as inside the container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl RunOptions {
    /// Parses delivered parameters; `None` means the image defaults
    pub fn from_params(params: Option<&Map<String, Value>>) -> Result<Self, RunOptionsError> {
        let Some(params) = params else {
            return Ok(Self::default());
        };

        let options: RunOptions = serde_json::from_value(Value::Object(params.clone()))
            .map_err(|e| RunOptionsError::Invalid(e.to_string()))?;

        if let Some(command) = &options.command {
            if command.argv().is_empty() {
                return Err(RunOptionsError::EmptyCommand);
            }
        }

        Ok(options)
    }

    /// Builds the parameter object a client sends for a plain command
    pub fn command_params(argv: &[String]) -> Map<String, Value> {
        let mut params = Map::new();
        params.insert(
            "command".to_string(),
            Value::Array(argv.iter().cloned().map(Value::String).collect()),
        );
        params
    }
}

/// A command given either as a shell string or as an argv list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandLine {
    Shell(String),
    Argv(Vec<String>),
}

impl CommandLine {
    /// Arguments to append after the image name
    pub fn argv(&self) -> Vec<String> {
        match self {
            CommandLine::Shell(s) if s.trim().is_empty() => Vec::new(),
            CommandLine::Shell(s) => vec!["/bin/sh".to_string(), "-c".to_string(), s.clone()],
            CommandLine::Argv(args) => args.clone(),
        }
    }
}

/// CPU limit, accepted as a number or a string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cpus {
    Text(String),
    Number(serde_json::Number),
}

impl std::fmt::Display for Cpus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cpus::Text(s) => f.write_str(s),
            Cpus::Number(n) => write!(f, "{}", n),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RunOptionsError {
    #[error("invalid run parameters: {0}")]
    Invalid(String),
    #[error("invalid run parameters: command must not be empty")]
    EmptyCommand,
}
