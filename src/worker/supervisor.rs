//! Supervision of a single external process.
//!
//! A [`ProcessTask`] either spawns its process or is handed one found by pid
//! after a host restart, then polls it until it exits. The loop sleeps for a
//! short fixed interval instead of blocking on a wait call so that an abort
//! from another thread is never stuck behind an uninterruptible wait.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::errors::{Result, TaskError};
use crate::manager::scheduler::{Scheduler, WorkingDir};
use crate::models::record::ResumptionRecord;
use crate::models::task::{TaskRegistry, TaskSnapshot, TaskSpec};
use crate::worker::handle::{ProcessHandle, SpawnedProcess};
use crate::worker::output::{classify, Accumulator, Outcome, OutputStreams};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long to wait for trailing output once the process has exited.
pub const EXIT_DRAIN_GRACE: Duration = Duration::from_secs(1);

pub type SuccessCallback = Box<dyn FnOnce(String) + Send + 'static>;
pub type FailureCallback = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct State {
    handle: Option<ProcessHandle>,
    streams: OutputStreams,
    stdout: Accumulator,
    stderr: Accumulator,
    progress: f32,
    done: bool,
    started: bool,
    classified: bool,
    finish_reported: bool,
    disposed: bool,
    on_success: Option<SuccessCallback>,
    on_failure: Option<FailureCallback>,
}

/// What a completed run hands over once the state lock is released.
struct Completion {
    outcome: Outcome,
    on_success: Option<SuccessCallback>,
    on_failure: Option<FailureCallback>,
}

pub struct ProcessTask {
    spec: TaskSpec,
    scheduler: Arc<dyn Scheduler>,
    working_dir: Arc<dyn WorkingDir>,
    poll_interval: Duration,
    state: Mutex<State>,
}

impl ProcessTask {
    pub fn new(spec: TaskSpec, scheduler: Arc<dyn Scheduler>, working_dir: Arc<dyn WorkingDir>) -> Self {
        Self {
            spec,
            scheduler,
            working_dir,
            poll_interval: DEFAULT_POLL_INTERVAL,
            state: Mutex::new(State::default()),
        }
    }

    /// Rebuild a task from a record written by a previous host session.
    ///
    /// If the recorded process cannot be found, or cannot be attached to on
    /// this platform, the task comes back already complete with no handle.
    /// That is not reported as a failure.
    pub fn resume(
        record: &ResumptionRecord,
        registry: &TaskRegistry,
        scheduler: Arc<dyn Scheduler>,
        working_dir: Arc<dyn WorkingDir>,
    ) -> Result<Self> {
        let spec = registry.get(&record.kind)?.clone();
        let task = Self::new(spec, scheduler, working_dir);
        {
            let mut state = task.lock();
            match record.pid().and_then(ProcessHandle::attach) {
                Some(handle) => {
                    info!("Reconnected to '{}' (pid {}).", task.spec.label, handle.pid());
                    state.handle = Some(handle);
                }
                None => {
                    info!(
                        "Nothing to resume for '{}' (pid {}); assuming it finished.",
                        task.spec.label, record.process_id
                    );
                    state.done = true;
                    state.progress = 1.0;
                }
            }
        }
        Ok(task)
    }

    pub fn resume_from_text(
        text: &str,
        registry: &TaskRegistry,
        scheduler: Arc<dyn Scheduler>,
        working_dir: Arc<dyn WorkingDir>,
    ) -> Result<Self> {
        let record = ResumptionRecord::from_text(text)?;
        Self::resume(&record, registry, scheduler, working_dir)
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Runs on the main thread with the trimmed standard output.
    pub fn on_success(self, callback: impl FnOnce(String) + Send + 'static) -> Self {
        self.lock().on_success = Some(Box::new(callback));
        self
    }

    /// Runs on the main thread after the failure has been reported.
    pub fn on_failure(self, callback: impl FnOnce() + Send + 'static) -> Self {
        self.lock().on_failure = Some(Box::new(callback));
        self
    }

    pub fn spec(&self) -> &TaskSpec {
        &self.spec
    }

    pub fn label(&self) -> &str {
        &self.spec.label
    }

    pub fn is_done(&self) -> bool {
        self.lock().done
    }

    pub fn progress(&self) -> f32 {
        self.lock().progress
    }

    pub fn pid(&self) -> Option<u32> {
        self.lock().handle.as_ref().map(ProcessHandle::pid)
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        let state = self.lock();
        TaskSnapshot {
            kind: self.spec.kind.clone(),
            label: self.spec.label.clone(),
            progress: state.progress,
            done: state.done,
            pid: state.handle.as_ref().map(ProcessHandle::pid),
            stdout_bytes: state.stdout.len(),
            stderr_bytes: state.stderr.len(),
        }
    }

    /// Standard output and error captured so far.
    pub fn output(&self) -> (String, String) {
        let state = self.lock();
        (state.stdout.text(), state.stderr.text())
    }

    /// Start the process (or pick up the attached one) and poll it until it
    /// exits, is aborted or is disconnected. Blocks the calling thread.
    ///
    /// Only a failed spawn is an error. A task may be run once.
    pub fn run(&self) -> Result<()> {
        let pid = {
            let mut state = self.lock();
            if state.done {
                drop(state);
                debug!("'{}' is already complete.", self.spec.label);
                self.notify_finished_once();
                return Ok(());
            }
            if state.started {
                return Err(TaskError::AlreadyStarted(self.spec.label.clone()));
            }
            state.started = true;

            match state.handle.as_ref().map(ProcessHandle::pid) {
                Some(pid) => {
                    info!("Resuming '{}' (pid {}).", self.spec.label, pid);
                    pid
                }
                None => {
                    let root = self.working_dir.root();
                    let spawned = self.spawn(&root)?;
                    let pid = spawned.handle.pid();
                    state.streams = OutputStreams::capture(spawned.stdout, spawned.stderr);
                    state.handle = Some(spawned.handle);
                    pid
                }
            }
        };

        self.scheduler.task_started(&self.spec.label, pid);
        self.poll();
        Ok(())
    }

    /// Kill the process and mark the task done. Safe to call from any thread
    /// at any time, including after the process has already exited. Output is
    /// not classified.
    pub fn abort(&self) {
        {
            let mut state = self.lock();
            if let Some(mut handle) = state.handle.take() {
                let pid = handle.pid();
                match handle.kill() {
                    Ok(()) => info!("Aborted '{}' (pid {}).", self.spec.label, pid),
                    Err(e) => debug!("Kill of '{}' (pid {}) failed: {}", self.spec.label, pid, e),
                }
            } else {
                info!("Aborted '{}'.", self.spec.label);
            }
            state.streams = OutputStreams::none();
            state.done = true;
            state.progress = 1.0;
            state.finish_reported = true;
        }
        self.scheduler.task_finished(&self.spec.label);
    }

    /// Let go of the process without killing it, so it can outlive this host.
    /// Anything it prints from now on is discarded.
    pub fn disconnect(&self) {
        let mut state = self.lock();
        match state.handle.take() {
            Some(handle) => info!(
                "Disconnected from '{}' (pid {}); leaving it running.",
                self.spec.label,
                handle.pid()
            ),
            None => debug!("'{}' has no process to disconnect from.", self.spec.label),
        }
        state.streams = OutputStreams::none();
    }

    /// Counterpart of [`disconnect`](Self::disconnect). Intentionally does
    /// nothing: a disconnected handle is never picked up again by the same
    /// task, resumption always goes through [`resume`](Self::resume).
    pub fn reconnect(&self) {
        debug!("Reconnect requested for '{}'; nothing to do.", self.spec.label);
    }

    /// Resumption record for this task, or `None` if the kind is not
    /// cacheable. The record carries `-1` when no process is held.
    pub fn record(&self) -> Option<ResumptionRecord> {
        if !self.spec.cacheable {
            return None;
        }
        let record = ResumptionRecord::new(&self.spec.kind, self.pid());
        info!(
            "Cached '{}' as {} (pid {}).",
            self.spec.label, record.kind, record.process_id
        );
        Some(record)
    }

    pub fn serialize(&self) -> Result<Option<String>> {
        self.record().map(|record| record.to_text()).transpose()
    }

    /// Release captured output. Repeated calls are no-ops.
    pub fn dispose(&self) {
        let mut state = self.lock();
        if state.disposed {
            return;
        }
        state.disposed = true;
        state.streams = OutputStreams::none();
        state.stdout.release();
        state.stderr.release();
        if state.handle.is_none() {
            state.done = true;
            state.progress = 1.0;
        }
        debug!("Disposed '{}'.", self.spec.label);
    }

    fn spawn(&self, root: &Path) -> Result<SpawnedProcess> {
        let spawned = ProcessHandle::spawn(&self.spec, root)?;
        info!(
            "Started '{}' (pid {}) in {}: {}",
            self.spec.label,
            spawned.handle.pid(),
            root.display(),
            self.spec.command_line()
        );
        Ok(spawned)
    }

    fn poll(&self) {
        loop {
            thread::sleep(self.poll_interval);

            let mut guard = self.lock();
            let state = &mut *guard;
            if state.done {
                return;
            }
            let Some(handle) = state.handle.as_mut() else {
                debug!("'{}' stopped polling after disconnect.", self.spec.label);
                return;
            };

            let exited = handle.has_exited();
            if state.streams.drain_into(&mut state.stdout, &mut state.stderr) > 0 {
                // Not done yet, so the hook has nothing to classify.
                let pending = Self::classify_if_done(state);
                debug_assert!(pending.is_none());
            }
            if !exited {
                continue;
            }

            // The final drain can wait out the grace period, so it runs
            // without the lock.
            let streams = std::mem::take(&mut state.streams);
            state.handle = None;
            drop(guard);

            let mut stdout = Accumulator::default();
            let mut stderr = Accumulator::default();
            streams.drain_to_end(&mut stdout, &mut stderr, EXIT_DRAIN_GRACE);
            drop(streams);

            let completion = {
                let mut state = self.lock();
                if state.done {
                    debug!("'{}' was stopped during its final drain.", self.spec.label);
                    drop(state);
                    self.notify_finished_once();
                    return;
                }
                state.stdout.absorb(stdout);
                state.stderr.absorb(stderr);
                state.progress = 1.0;
                state.done = true;
                Self::classify_if_done(&mut state)
            };

            if let Some(completion) = completion {
                self.report(completion);
            }
            self.notify_finished_once();
            info!("'{}' finished.", self.spec.label);
            return;
        }
    }

    /// Classifier hook. Does nothing until the task is done, then classifies
    /// exactly once.
    fn classify_if_done(state: &mut State) -> Option<Completion> {
        if !state.done || state.classified {
            return None;
        }
        state.classified = true;
        Some(Completion {
            outcome: classify(&state.stdout, &state.stderr),
            on_success: state.on_success.take(),
            on_failure: state.on_failure.take(),
        })
    }

    fn report(&self, completion: Completion) {
        match completion.outcome {
            Outcome::Success(output) => {
                debug!("'{}' succeeded.", self.spec.label);
                if let Some(callback) = completion.on_success {
                    self.scheduler
                        .schedule_on_main_thread(Box::new(move || callback(output)));
                }
            }
            Outcome::Failure(message) => {
                warn!("'{}' failed: {}", self.spec.label, message.trim_end());
                self.scheduler
                    .report_failure(self.spec.reported_severity(), &self.spec.label, &message);
                if let Some(callback) = completion.on_failure {
                    self.scheduler.schedule_on_main_thread(callback);
                }
            }
        }
    }

    fn notify_finished_once(&self) {
        {
            let mut state = self.lock();
            if state.finish_reported {
                return;
            }
            state.finish_reported = true;
        }
        self.scheduler.task_finished(&self.spec.label);
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifier_waits_for_terminal_state() {
        let mut state = State::default();
        state.stderr.append(b"boom");
        assert!(ProcessTask::classify_if_done(&mut state).is_none());

        state.done = true;
        let completion = ProcessTask::classify_if_done(&mut state).unwrap();
        assert_eq!(completion.outcome, Outcome::Failure("boom".into()));
        assert!(ProcessTask::classify_if_done(&mut state).is_none());
    }

    #[test]
    fn terminal_classification_hands_over_callbacks_once() {
        let mut state = State::default();
        state.stdout.append(b" done \n");
        state.on_success = Some(Box::new(|_| {}));
        state.done = true;

        let completion = ProcessTask::classify_if_done(&mut state).unwrap();
        assert_eq!(completion.outcome, Outcome::Success("done".into()));
        assert!(completion.on_success.is_some());
        assert!(completion.on_failure.is_none());
        assert!(state.on_success.is_none());
    }
}
