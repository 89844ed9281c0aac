use std::{
    collections::HashMap,
    fs,
    path::Path,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread::JoinHandle,
    time::Duration,
};

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{error, info, warn};

use crate::errors::{Result, TaskError};
use crate::manager::scheduler::{MainThreadCallback, Scheduler, WorkingDir};
use crate::models::message::SchedulerEvent;
use crate::models::record::ResumptionRecord;
use crate::models::task::{Severity, TaskRegistry, TaskSnapshot, TaskSpec};
use crate::worker::supervisor::ProcessTask;
use crate::worker::worker::spawn_worker_thread;

/// [`Scheduler`] that forwards everything over channels to whoever owns the
/// main thread.
pub struct ChannelScheduler {
    events: Sender<SchedulerEvent>,
    main_thread: Sender<MainThreadCallback>,
}

impl Scheduler for ChannelScheduler {
    fn task_started(&self, task: &str, pid: u32) {
        let _ = self.events.send(SchedulerEvent::Started {
            label: task.to_string(),
            pid,
        });
    }

    fn schedule_on_main_thread(&self, callback: MainThreadCallback) {
        if self.main_thread.send(callback).is_err() {
            warn!("Main thread queue is gone; dropping callback.");
        }
    }

    fn report_failure(&self, severity: Severity, task: &str, message: &str) {
        let _ = self.events.send(SchedulerEvent::Failed {
            label: task.to_string(),
            severity,
            message: message.to_string(),
        });
    }

    fn task_finished(&self, task: &str) {
        let _ = self.events.send(SchedulerEvent::Finished {
            label: task.to_string(),
        });
    }
}

struct ManagedTask {
    task: Arc<ProcessTask>,
    worker: Option<JoinHandle<Result<()>>>,
}

/// Owns every task of one host session: one worker thread per running task,
/// a queue of main-thread callbacks and the records file that carries tasks
/// over to the next session.
pub struct TaskManager {
    tasks: Arc<Mutex<HashMap<u64, ManagedTask>>>,
    scheduler: Arc<ChannelScheduler>,
    events: Receiver<SchedulerEvent>,
    main_thread: Receiver<MainThreadCallback>,
    registry: TaskRegistry,
    working_dir: Arc<dyn WorkingDir>,
    poll_interval: Duration,
    next_id: Arc<Mutex<u64>>,
}

impl TaskManager {
    pub fn new(registry: TaskRegistry, working_dir: Arc<dyn WorkingDir>, poll_interval: Duration) -> Self {
        let (event_tx, events) = unbounded();
        let (main_tx, main_thread) = unbounded();
        TaskManager {
            tasks: Arc::new(Mutex::new(HashMap::new())),
            scheduler: Arc::new(ChannelScheduler {
                events: event_tx,
                main_thread: main_tx,
            }),
            events,
            main_thread,
            registry,
            working_dir,
            poll_interval,
            next_id: Arc::new(Mutex::new(0)),
        }
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn scheduler(&self) -> Arc<dyn Scheduler> {
        self.scheduler.clone()
    }

    /// Build a task for `spec` without starting it.
    pub fn new_task(&self, spec: TaskSpec) -> ProcessTask {
        ProcessTask::new(spec, self.scheduler(), self.working_dir.clone()).with_poll_interval(self.poll_interval)
    }

    pub fn create_task(&self, task: ProcessTask) -> u64 {
        let id = {
            let mut next_id = self.next_id.lock().unwrap_or_else(PoisonError::into_inner);
            *next_id += 1;
            *next_id
        };
        info!("Task '{}' registered as {}.", task.label(), id);
        self.tasks().insert(
            id,
            ManagedTask {
                task: Arc::new(task),
                worker: None,
            },
        );
        id
    }

    pub fn create_kind(&self, kind: &str) -> Result<u64> {
        let spec = self.registry.get(kind)?.clone();
        Ok(self.create_task(self.new_task(spec)))
    }

    pub fn run_task(&self, id: u64) -> Result<bool> {
        let mut tasks = self.tasks();
        let Some(managed) = tasks.get_mut(&id) else {
            return Ok(false);
        };
        if managed.worker.is_some() {
            return Err(TaskError::AlreadyStarted(managed.task.label().to_string()));
        }
        managed.worker = Some(spawn_worker_thread(managed.task.clone())?);
        Ok(true)
    }

    pub fn abort_task(&self, id: u64) -> bool {
        let Some(task) = self.task(id) else {
            return false;
        };
        task.abort();
        true
    }

    pub fn task(&self, id: u64) -> Option<Arc<ProcessTask>> {
        self.tasks().get(&id).map(|managed| managed.task.clone())
    }

    pub fn get_task(&self, id: u64) -> Option<TaskSnapshot> {
        self.task(id).map(|task| task.snapshot())
    }

    pub fn get_all_tasks(&self) -> Vec<(u64, TaskSnapshot)> {
        let mut all: Vec<_> = self
            .tasks()
            .iter()
            .map(|(id, managed)| (*id, managed.task.snapshot()))
            .collect();
        all.sort_by_key(|(id, _)| *id);
        all
    }

    pub fn get_task_output(&self, id: u64) -> Option<(String, String)> {
        self.task(id).map(|task| task.output())
    }

    /// Run every callback queued for the main thread so far. Call this from
    /// the thread that owns the UI.
    pub fn run_main_thread_callbacks(&self) -> usize {
        let mut count = 0;
        for callback in self.main_thread.try_iter() {
            callback();
            count += 1;
        }
        count
    }

    pub fn drain_events(&self) -> Vec<SchedulerEvent> {
        self.events.try_iter().collect()
    }

    /// Write a record for every cacheable task, then let go of all processes
    /// so they keep running after this host goes away. Returns the number of
    /// records written.
    pub fn save_records(&self, path: impl AsRef<Path>) -> Result<usize> {
        let tasks: Vec<Arc<ProcessTask>> = self.tasks().values().map(|m| m.task.clone()).collect();
        let records: Vec<ResumptionRecord> = tasks
            .iter()
            .filter(|task| !task.is_done())
            .filter_map(|task| task.record())
            .collect();

        fs::write(path.as_ref(), serde_json::to_string_pretty(&records)?)?;
        info!("Saved {} record(s) to {}.", records.len(), path.as_ref().display());

        for task in &tasks {
            task.disconnect();
        }
        self.join_workers();
        Ok(records.len())
    }

    /// Resume every task recorded by a previous session and start polling the
    /// ones that are still alive. Records whose kind is unknown here are
    /// written back so a later session can still pick them up; the file is
    /// removed once nothing is left in it.
    pub fn restore(&self, path: impl AsRef<Path>) -> Result<Vec<u64>> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(vec![]);
        }
        let contents = fs::read_to_string(path)?;
        let records: Vec<ResumptionRecord> = serde_json::from_str(&contents)?;

        let mut ids = Vec::with_capacity(records.len());
        let mut skipped = Vec::new();
        for record in records {
            let task = match ProcessTask::resume(&record, &self.registry, self.scheduler(), self.working_dir.clone()) {
                Ok(task) => task.with_poll_interval(self.poll_interval),
                Err(e) => {
                    error!("Skipping record for '{}': {}", record.kind, e);
                    skipped.push(record);
                    continue;
                }
            };
            let id = self.create_task(task);
            self.run_task(id)?;
            ids.push(id);
        }

        if skipped.is_empty() {
            fs::remove_file(path)?;
        } else {
            fs::write(path, serde_json::to_string_pretty(&skipped)?)?;
            warn!("Kept {} unresolved record(s) in {}.", skipped.len(), path.display());
        }
        Ok(ids)
    }

    pub fn abort_all(&self) {
        let tasks: Vec<Arc<ProcessTask>> = self.tasks().values().map(|m| m.task.clone()).collect();
        for task in tasks.iter().filter(|task| !task.is_done()) {
            task.abort();
        }
        self.join_workers();
    }

    fn join_workers(&self) {
        let workers: Vec<_> = self
            .tasks()
            .values_mut()
            .filter_map(|managed| managed.worker.take())
            .collect();
        for worker in workers {
            if worker.join().is_err() {
                error!("A worker thread panicked.");
            }
        }
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<u64, ManagedTask>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
