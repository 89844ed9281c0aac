//! Host configuration, read from a TOML file.
//!
//! ```toml
//! working_dir = "."
//! poll_interval_ms = 10
//! records_path = "procwatch-records.json"
//! log_level = "info"
//!
//! [[kinds]]
//! kind = "build"
//! label = "Build"
//! program = "make"
//! args = ["all"]
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::errors::{Result, TaskError};
use crate::models::task::{TaskRegistry, TaskSpec};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub working_dir: PathBuf,
    pub poll_interval_ms: u64,
    pub records_path: PathBuf,
    pub log_level: String,
    pub kinds: Vec<TaskSpec>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            working_dir: PathBuf::from("."),
            poll_interval_ms: 10,
            records_path: PathBuf::from("procwatch-records.json"),
            log_level: "info".to_string(),
            kinds: vec![],
        }
    }
}

impl HostConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn default_path() -> PathBuf {
        PathBuf::from("procwatch.toml")
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn registry(&self) -> Result<TaskRegistry> {
        TaskRegistry::from_specs(self.kinds.iter().cloned())
    }

    fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(TaskError::Config("poll_interval_ms must be greater than zero".into()));
        }
        for spec in &self.kinds {
            if spec.kind.trim().is_empty() {
                return Err(TaskError::Config(format!("task '{}' has an empty kind", spec.label)));
            }
            if spec.program.trim().is_empty() {
                return Err(TaskError::Config(format!("task kind '{}' has no program", spec.kind)));
            }
        }
        self.registry().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = HostConfig::from_toml("").unwrap();
        assert_eq!(config, HostConfig::default());
        assert_eq!(config.poll_interval(), Duration::from_millis(10));
    }

    #[test]
    fn kinds_are_registered() {
        let config = HostConfig::from_toml(
            r#"
            poll_interval_ms = 25

            [[kinds]]
            kind = "build"
            label = "Build"
            program = "make"
            args = ["all"]

            [[kinds]]
            kind = "test"
            label = "Test"
            program = "make"
            cacheable = false
            "#,
        )
        .unwrap();

        let registry = config.registry().unwrap();
        assert_eq!(registry.get("build").unwrap().args, vec!["all".to_string()]);
        assert!(!registry.get("test").unwrap().cacheable);
        assert_eq!(config.poll_interval(), Duration::from_millis(25));
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let err = HostConfig::from_toml("poll_interval_ms = 0").unwrap_err();
        assert!(matches!(err, TaskError::Config(_)));
    }

    #[test]
    fn duplicate_kinds_are_rejected() {
        let text = r#"
            [[kinds]]
            kind = "a"
            label = "A"
            program = "true"

            [[kinds]]
            kind = "a"
            label = "B"
            program = "false"
        "#;
        assert!(matches!(HostConfig::from_toml(text), Err(TaskError::Config(_))));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = HostConfig::load_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, HostConfig::default());
    }
}
