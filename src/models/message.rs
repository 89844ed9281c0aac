use super::task::Severity;

/// Notifications a task sends to the scheduler that owns it.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
    Started { label: String, pid: u32 },
    Finished { label: String },
    Failed { label: String, severity: Severity, message: String },
}
