//! Purpose: Run each solver in its own process group so kills reach the whole process tree.
//! Exports: `CancelHandle`.
//! Role: Shared by the blocking and async runners for timeout, cancellation and drop.
//! Invariants: The group is only signalled while its leader is unreaped; `release` runs before `wait`.
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

/// Makes the spawned process lead a new process group. Drivers start the
/// actual solver as a child that inherits the output pipes.
#[cfg(unix)]
pub(crate) fn isolate(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    command.process_group(0);
}

#[cfg(not(unix))]
pub(crate) fn isolate(_command: &mut Command) {}

#[derive(Debug)]
pub(crate) struct ProcessGroup {
    leader: Mutex<Option<u32>>,
    cancelled: AtomicBool,
}

impl ProcessGroup {
    pub(crate) fn new(leader: Option<u32>) -> Arc<Self> {
        Arc::new(Self {
            leader: Mutex::new(leader),
            cancelled: AtomicBool::new(false),
        })
    }

    /// SIGKILLs every process in the group. No-op once released.
    pub(crate) fn kill(&self) {
        let leader = self.leader.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pid) = *leader {
            signal_group(pid);
        }
    }

    /// Called before reaping the leader; its pid may be reused afterwards.
    pub(crate) fn release(&self) {
        *self.leader.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

#[cfg(unix)]
fn signal_group(pid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc != 0 {
        debug!(pid, error = %std::io::Error::last_os_error(), "process group kill failed");
    }
}

#[cfg(not(unix))]
fn signal_group(pid: u32) {
    debug!(pid, "process groups are unsupported; only the driver is killed");
}

/// Stops a running invocation from another thread or task. The run ends with
/// an `Execution` error carrying what was parsed, and artifacts follow the
/// failure path.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    group: Arc<ProcessGroup>,
}

impl CancelHandle {
    pub(crate) fn new(group: Arc<ProcessGroup>) -> Self {
        Self { group }
    }

    pub fn cancel(&self) {
        self.group.cancelled.store(true, Ordering::Release);
        self.group.kill();
    }

    pub fn is_cancelled(&self) -> bool {
        self.group.is_cancelled()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::{CancelHandle, ProcessGroup, isolate};
    use std::process::Command;
    use std::time::{Duration, Instant};

    #[test]
    fn kill_reaches_grandchildren() {
        let mut command = Command::new("sh");
        command.arg("-c").arg("sleep 30; echo done");
        isolate(&mut command);
        let mut child = command.spawn().expect("spawn");
        let group = ProcessGroup::new(Some(child.id()));
        let started = Instant::now();
        CancelHandle::new(group.clone()).cancel();
        group.release();
        let status = child.wait().expect("wait");
        assert!(!status.success());
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(group.is_cancelled());
    }

    #[test]
    fn released_group_is_not_signalled() {
        let group = ProcessGroup::new(Some(u32::MAX));
        group.release();
        group.kill();
        assert!(!group.is_cancelled());
    }
}
