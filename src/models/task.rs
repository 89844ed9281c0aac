use std::collections::HashMap;

use serde::Deserialize;

use crate::errors::{Result, TaskError};

/// Static description of one kind of supervised process.
///
/// Every kind carries its own command line, label and kind-tag. The tag is
/// what ends up in a resumption record, so it must be unique per registry.
///
/// `blocking` and `queue_policy` are hints for whatever schedules tasks; the
/// supervisor itself never reads them. A failed run of a non-critical kind is
/// reported at [`Severity::Warning`] at most.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TaskSpec {
    pub kind: String,
    pub label: String,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub blocking: bool,
    #[serde(default = "default_true")]
    pub critical: bool,
    #[serde(default = "default_true")]
    pub cacheable: bool,
    #[serde(default)]
    pub queue_policy: QueuePolicy,
    #[serde(default)]
    pub failure_severity: Severity,
}

fn default_true() -> bool {
    true
}

impl TaskSpec {
    pub fn new(kind: impl Into<String>, label: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            label: label.into(),
            program: program.into(),
            args: vec![],
            blocking: false,
            critical: true,
            cacheable: true,
            queue_policy: QueuePolicy::default(),
            failure_severity: Severity::default(),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self
    }

    pub fn critical(mut self, critical: bool) -> Self {
        self.critical = critical;
        self
    }

    pub fn cacheable(mut self, cacheable: bool) -> Self {
        self.cacheable = cacheable;
        self
    }

    pub fn queue_policy(mut self, policy: QueuePolicy) -> Self {
        self.queue_policy = policy;
        self
    }

    pub fn failure_severity(mut self, severity: Severity) -> Self {
        self.failure_severity = severity;
        self
    }

    /// Severity a failed run is reported with.
    pub fn reported_severity(&self) -> Severity {
        if self.critical {
            self.failure_severity
        } else {
            self.failure_severity.min(Severity::Warning)
        }
    }

    /// Command line as it would be shown to a user. Arguments are never
    /// passed through a shell.
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueuePolicy {
    /// Wait behind whatever the scheduler already has queued.
    #[default]
    Queue,
    /// Start as soon as the scheduler sees the task.
    Immediate,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    #[default]
    Critical,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskSnapshot {
    pub kind: String,
    pub label: String,
    pub progress: f32,
    pub done: bool,
    pub pid: Option<u32>,
    pub stdout_bytes: usize,
    pub stderr_bytes: usize,
}

/// Kind-tag lookup used to rebuild tasks from resumption records.
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    specs: HashMap<String, TaskSpec>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_specs(specs: impl IntoIterator<Item = TaskSpec>) -> Result<Self> {
        let mut registry = Self::new();
        for spec in specs {
            registry.register(spec)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, spec: TaskSpec) -> Result<()> {
        if self.specs.contains_key(&spec.kind) {
            return Err(TaskError::Config(format!("duplicate task kind '{}'", spec.kind)));
        }
        self.specs.insert(spec.kind.clone(), spec);
        Ok(())
    }

    pub fn get(&self, kind: &str) -> Result<&TaskSpec> {
        self.specs
            .get(kind)
            .ok_or_else(|| TaskError::UnknownKind(kind.to_string()))
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.specs.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_defaults_from_toml() {
        let spec: TaskSpec = toml::from_str(
            r#"
            kind = "build"
            label = "Build player"
            program = "make"
            "#,
        )
        .unwrap();

        assert!(spec.args.is_empty());
        assert!(!spec.blocking);
        assert!(spec.critical);
        assert!(spec.cacheable);
        assert_eq!(spec.queue_policy, QueuePolicy::Queue);
        assert_eq!(spec.failure_severity, Severity::Critical);
    }

    #[test]
    fn command_line_joins_arguments() {
        let spec = TaskSpec::new("lint", "Lint", "cargo").args(["clippy", "--all"]);
        assert_eq!(spec.command_line(), "cargo clippy --all");
    }

    #[test]
    fn non_critical_kinds_report_at_warning_at_most() {
        let spec = TaskSpec::new("k", "l", "p");
        assert_eq!(spec.reported_severity(), Severity::Critical);
        assert_eq!(spec.clone().critical(false).reported_severity(), Severity::Warning);

        let quiet = spec.failure_severity(Severity::Info);
        assert_eq!(quiet.clone().critical(false).reported_severity(), Severity::Info);
        assert_eq!(quiet.reported_severity(), Severity::Info);
    }

    #[test]
    fn queue_policy_parses_lowercase() {
        let spec: TaskSpec = toml::from_str(
            r#"
            kind = "k"
            label = "l"
            program = "p"
            queue_policy = "immediate"
            failure_severity = "warning"
            "#,
        )
        .unwrap();
        assert_eq!(spec.queue_policy, QueuePolicy::Immediate);
        assert_eq!(spec.failure_severity, Severity::Warning);
    }

    #[test]
    fn registry_rejects_duplicates_and_unknown_kinds() {
        let mut registry = TaskRegistry::from_specs([TaskSpec::new("a", "A", "true")]).unwrap();
        assert!(registry.register(TaskSpec::new("a", "Again", "true")).is_err());
        assert_eq!(registry.get("a").unwrap().label, "A");
        assert!(matches!(registry.get("b"), Err(TaskError::UnknownKind(kind)) if kind == "b"));
    }
}
