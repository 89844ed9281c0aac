use std::{
    sync::Arc,
    thread::{self, JoinHandle},
};

use log::error;

use crate::errors::Result;
use crate::worker::supervisor::ProcessTask;

/// Drive `task` on its own OS thread. The join handle yields the result of
/// [`ProcessTask::run`], so a failed spawn still reaches whoever joins.
pub fn spawn_worker_thread(task: Arc<ProcessTask>) -> std::io::Result<JoinHandle<Result<()>>> {
    let name = format!("procwatch-{}", task.spec().kind);
    thread::Builder::new().name(name).spawn(move || {
        let result = task.run();
        if let Err(e) = &result {
            error!("Task '{}' could not run: {}", task.label(), e);
        }
        result
    })
}
