#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use procwatch::{MainThreadCallback, ProcessTask, Scheduler, Severity, TaskSpec, WorkingDir};

/// Scheduler double that records everything a task reports.
#[derive(Default)]
pub struct RecordingScheduler {
    pub started: Mutex<Vec<(String, u32)>>,
    pub failures: Mutex<Vec<(Severity, String, String)>>,
    pub finished: Mutex<Vec<String>>,
    pub main_thread: Mutex<Vec<MainThreadCallback>>,
}

impl RecordingScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Run queued main-thread callbacks, returning how many ran.
    pub fn run_main_thread(&self) -> usize {
        let callbacks: Vec<_> = self.main_thread.lock().unwrap().drain(..).collect();
        let count = callbacks.len();
        for callback in callbacks {
            callback();
        }
        count
    }

    pub fn started(&self) -> Vec<(String, u32)> {
        self.started.lock().unwrap().clone()
    }

    pub fn failures(&self) -> Vec<(Severity, String, String)> {
        self.failures.lock().unwrap().clone()
    }

    pub fn finished_count(&self) -> usize {
        self.finished.lock().unwrap().len()
    }
}

impl Scheduler for RecordingScheduler {
    fn task_started(&self, task: &str, pid: u32) {
        self.started.lock().unwrap().push((task.to_string(), pid));
    }

    fn schedule_on_main_thread(&self, callback: MainThreadCallback) {
        self.main_thread.lock().unwrap().push(callback);
    }

    fn report_failure(&self, severity: Severity, task: &str, message: &str) {
        self.failures
            .lock()
            .unwrap()
            .push((severity, task.to_string(), message.to_string()));
    }

    fn task_finished(&self, task: &str) {
        self.finished.lock().unwrap().push(task.to_string());
    }
}

pub fn cwd() -> Arc<dyn WorkingDir> {
    Arc::new(PathBuf::from("."))
}

pub fn shell(kind: &str, script: &str) -> TaskSpec {
    TaskSpec::new(kind, kind, "sh").args(["-c", script])
}

pub fn task(scheduler: &Arc<RecordingScheduler>, spec: TaskSpec) -> ProcessTask {
    ProcessTask::new(spec, scheduler.clone(), cwd())
}

pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}
