//! OS process handles.
//!
//! A handle is either a child this host spawned itself, or a process found by
//! pid in the OS process table after a host restart. Attached processes give
//! no access to their output pipes; only liveness and termination are
//! available for them.

use std::io;
use std::path::Path;
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};

use log::{debug, warn};

use crate::errors::{Result, TaskError};
use crate::models::task::TaskSpec;

#[derive(Debug)]
pub enum ProcessHandle {
    Spawned(Child),
    Attached(u32),
}

pub struct SpawnedProcess {
    pub handle: ProcessHandle,
    pub stdout: Option<ChildStdout>,
    pub stderr: Option<ChildStderr>,
}

impl ProcessHandle {
    /// Start `spec.program` directly (no shell) inside `root` with both
    /// output streams piped and stdin closed.
    pub fn spawn(spec: &TaskSpec, root: &Path) -> Result<SpawnedProcess> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .current_dir(root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        hide_console_window(&mut command);

        let mut child = command.spawn().map_err(|source| TaskError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        Ok(SpawnedProcess {
            handle: ProcessHandle::Spawned(child),
            stdout,
            stderr,
        })
    }

    /// Look up a running process by pid. Returns `None` when the process is
    /// gone or the platform cannot attach to foreign processes.
    pub fn attach(pid: u32) -> Option<Self> {
        if pid == 0 || i32::try_from(pid).is_err() {
            return None;
        }
        if os::has_exited(pid) {
            debug!("No live process with pid {}.", pid);
            return None;
        }
        os::attach_supported().then_some(ProcessHandle::Attached(pid))
    }

    pub fn pid(&self) -> u32 {
        match self {
            ProcessHandle::Spawned(child) => child.id(),
            ProcessHandle::Attached(pid) => *pid,
        }
    }

    pub fn has_exited(&mut self) -> bool {
        match self {
            ProcessHandle::Spawned(child) => match child.try_wait() {
                Ok(status) => status.is_some(),
                Err(e) => {
                    warn!("Failed to query process {}: {}", child.id(), e);
                    true
                }
            },
            ProcessHandle::Attached(pid) => os::has_exited(*pid),
        }
    }

    pub fn kill(&mut self) -> io::Result<()> {
        match self {
            ProcessHandle::Spawned(child) => {
                child.kill()?;
                child.wait().map(|_| ())
            }
            ProcessHandle::Attached(pid) => os::kill(*pid),
        }
    }
}

#[cfg(windows)]
fn hide_console_window(command: &mut Command) {
    use std::os::windows::process::CommandExt;
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    command.creation_flags(CREATE_NO_WINDOW);
}

#[cfg(not(windows))]
fn hide_console_window(_command: &mut Command) {}

#[cfg(unix)]
mod os {
    use std::io;

    pub fn attach_supported() -> bool {
        true
    }

    /// Reaps `pid` if it is an exited child of ours, otherwise checks it with
    /// signal 0. A process we may not signal still counts as alive.
    pub fn has_exited(pid: u32) -> bool {
        let pid = pid as libc::pid_t;
        let mut status = 0;
        let reaped = unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) };
        if reaped == pid {
            return true;
        }
        if reaped == 0 {
            return false;
        }

        let rc = unsafe { libc::kill(pid, 0) };
        if rc == 0 {
            return false;
        }
        io::Error::last_os_error().raw_os_error() != Some(libc::EPERM)
    }

    pub fn kill(pid: u32) -> io::Result<()> {
        let pid = pid as libc::pid_t;
        let rc = unsafe { libc::kill(pid, libc::SIGKILL) };
        if rc == -1 {
            return Err(io::Error::last_os_error());
        }
        let mut status = 0;
        unsafe {
            libc::waitpid(pid, &mut status, libc::WNOHANG);
        }
        Ok(())
    }
}

#[cfg(not(unix))]
mod os {
    use std::io;

    pub fn attach_supported() -> bool {
        false
    }

    pub fn has_exited(_pid: u32) -> bool {
        true
    }

    pub fn kill(_pid: u32) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "attached processes cannot be signalled on this platform",
        ))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn attach_rejects_impossible_pids() {
        assert!(ProcessHandle::attach(0).is_none());
        assert!(ProcessHandle::attach(u32::MAX).is_none());
    }

    #[test]
    fn attach_finds_live_child_and_notices_exit() {
        let mut child = Command::new("sleep").arg("5").spawn().unwrap();
        let pid = child.id();

        let mut handle = ProcessHandle::attach(pid).expect("sleep should be alive");
        assert_eq!(handle.pid(), pid);
        assert!(!handle.has_exited());

        handle.kill().unwrap();
        let _ = child.wait();
        assert!(ProcessHandle::attach(pid).is_none());
    }

    #[test]
    fn spawn_failure_names_program() {
        let spec = TaskSpec::new("missing", "Missing", "/definitely/not/here");
        match ProcessHandle::spawn(&spec, Path::new(".")) {
            Err(TaskError::Spawn { program, .. }) => assert_eq!(program, "/definitely/not/here"),
            other => panic!("unexpected result: {:?}", other.map(|p| p.handle)),
        }
    }
}
