//! Project configuration
//!
//! `Mandrake.toml` names the remotes a project can run on and caches the job
//! each remote is bound to. The file is rewritten when a job is created, so
//! keys this module does not know about are carried through untouched.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Failed to write {path}: {message}")]
    Write { path: PathBuf, message: String },

    #[error("No remotes defined in {0}")]
    NoRemotes(PathBuf),

    #[error("Remote '{0}' not found in config")]
    UnknownRemote(String),
}

/// Contents of `Mandrake.toml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MandrakeFile {
    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default)]
    pub remotes: Vec<Remote>,

    #[serde(flatten)]
    pub extra: toml::Table,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Defaults {
    /// Directory, relative to the job context, pulled back after a run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    #[serde(flatten)]
    pub extra: toml::Table,
}

/// A server the project can run on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Remote {
    pub name: String,

    /// Base URL of the server API
    pub host: String,

    #[serde(default)]
    pub default: bool,

    /// Job this project reuses on the remote
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,

    pub ssh: Ssh,

    #[serde(flatten)]
    pub extra: toml::Table,
}

/// File transfer endpoint for a remote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ssh {
    /// rsync destination host, e.g. `user@gpu-box`
    pub host: String,

    #[serde(flatten)]
    pub extra: toml::Table,
}

impl MandrakeFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let write_error = |message: String| ConfigError::Write {
            path: path.to_path_buf(),
            message,
        };

        let text = toml::to_string(self).map_err(|e| write_error(e.to_string()))?;
        std::fs::write(path, text).map_err(|e| write_error(e.to_string()))
    }

    /// Picks a remote: by name when given, else the first marked default,
    /// else the first one listed
    pub fn resolve_remote(&self, name: Option<&str>, path: &Path) -> Result<usize, ConfigError> {
        if self.remotes.is_empty() {
            return Err(ConfigError::NoRemotes(path.to_path_buf()));
        }

        if let Some(name) = name {
            return self
                .remotes
                .iter()
                .position(|r| r.name == name)
                .ok_or_else(|| ConfigError::UnknownRemote(name.to_string()));
        }

        Ok(self.remotes.iter().position(|r| r.default).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[defaults]
output = "output"

[[remotes]]
name = "cpu"
host = "http://cpu-box:5000"

[remotes.ssh]
host = "me@cpu-box"

[[remotes]]
name = "gpu"
host = "http://gpu-box:5000"
default = true
region = "basement"

[remotes.ssh]
host = "me@gpu-box"
"#;

    fn sample() -> MandrakeFile {
        toml::from_str(SAMPLE).unwrap()
    }

    #[test]
    fn test_parse() {
        let file = sample();

        assert_eq!(file.defaults.output.as_deref(), Some("output"));
        assert_eq!(file.remotes.len(), 2);
        assert_eq!(file.remotes[1].ssh.host, "me@gpu-box");
        assert_eq!(file.remotes[0].job_id, None);
        assert!(!file.remotes[0].default);
    }

    #[test]
    fn test_resolve_remote() {
        let file = sample();
        let path = Path::new("Mandrake.toml");

        assert_eq!(file.resolve_remote(None, path).unwrap(), 1);
        assert_eq!(file.resolve_remote(Some("cpu"), path).unwrap(), 0);
        assert!(matches!(
            file.resolve_remote(Some("tpu"), path),
            Err(ConfigError::UnknownRemote(name)) if name == "tpu"
        ));
    }

    #[test]
    fn test_resolve_falls_back_to_first_remote() {
        let mut file = sample();
        file.remotes[1].default = false;

        assert_eq!(file.resolve_remote(None, Path::new("x")).unwrap(), 0);
    }

    #[test]
    fn test_no_remotes_is_an_error() {
        let file = MandrakeFile::default();
        assert!(matches!(
            file.resolve_remote(None, Path::new("Mandrake.toml")),
            Err(ConfigError::NoRemotes(_))
        ));
    }

    #[test]
    fn test_save_keeps_job_id_and_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Mandrake.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let mut file = MandrakeFile::load(&path).unwrap();
        let id = Uuid::new_v4();
        file.remotes[1].job_id = Some(id);
        file.save(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("job-id"));

        let reloaded = MandrakeFile::load(&path).unwrap();
        assert_eq!(reloaded.remotes[1].job_id, Some(id));
        assert_eq!(
            reloaded.remotes[1].extra.get("region").and_then(|v| v.as_str()),
            Some("basement")
        );
        assert_eq!(reloaded, file);
    }

    #[test]
    fn test_missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            MandrakeFile::load(&dir.path().join("nope.toml")),
            Err(ConfigError::Read { .. })
        ));
    }
}
