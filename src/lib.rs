//! Supervise external processes that can outlive the host application which
//! started them.
//!
//! A [`ProcessTask`] spawns (or reattaches to) a process, collects its output
//! on a dedicated worker thread and reports success or failure to a
//! [`Scheduler`]. Before the host goes away it can write a
//! [`ResumptionRecord`] and disconnect; the next host session resumes the task
//! from that record instead of starting the process again.

pub mod app;
pub mod config;
pub mod errors;
pub mod logging;
pub mod manager;
pub mod models;
pub mod worker;

pub use config::HostConfig;
pub use errors::{Result, TaskError};
pub use manager::scheduler::{MainThreadCallback, Scheduler, WorkingDir};
pub use manager::task_manager::TaskManager;
pub use models::message::SchedulerEvent;
pub use models::record::{ResumptionRecord, NO_PROCESS};
pub use models::task::{QueuePolicy, Severity, TaskRegistry, TaskSnapshot, TaskSpec};
pub use worker::supervisor::ProcessTask;
