//! Capabilities a task needs from the host that owns it.

use std::path::PathBuf;

use crate::models::task::Severity;

/// Work that must run on the host's main thread.
pub type MainThreadCallback = Box<dyn FnOnce() + Send + 'static>;

/// The scheduler owning a task. It decides which thread drives
/// [`ProcessTask::run`](crate::worker::supervisor::ProcessTask::run), and it
/// is where completion is reported back to.
pub trait Scheduler: Send + Sync {
    /// Queue `callback` for the main thread. Must not run it inline on the
    /// calling worker thread.
    fn schedule_on_main_thread(&self, callback: MainThreadCallback);

    /// The task's process is running, either freshly spawned or reattached.
    /// Called from the worker thread before polling begins.
    fn task_started(&self, task: &str, pid: u32);

    /// Surface a failed run. Called synchronously from the worker thread.
    fn report_failure(&self, severity: Severity, task: &str, message: &str);

    /// A task reached its terminal state (finished, aborted or found dead on
    /// resume).
    fn task_finished(&self, task: &str);
}

/// Resolves the directory spawned processes run in.
pub trait WorkingDir: Send + Sync {
    fn root(&self) -> PathBuf;
}

impl WorkingDir for PathBuf {
    fn root(&self) -> PathBuf {
        self.clone()
    }
}
