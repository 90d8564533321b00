//! Unix process control built on fork and signals
//!
//! The task engine creates its concurrency units by forking: the caller
//! forks a worker, the worker may fork a progress publisher. Processes
//! created this way are invisible to unrelated later invocations of the
//! caller, so every fork is paired with a PID registry marker and kills go
//! through the registry first.
//!
//! ## Signal handling
//!
//! - `detach()` sets `SIGCHLD` to ignore, so forked children are reaped by
//!   the kernel and a double fork needs no explicit grandchild reaping.
//!   The disposition is process-wide; the engine only applies it on the
//!   execute path, immediately before forking.
//! - Kills are forceful (`SIGKILL`) and best-effort: `ESRCH` and `EPERM`
//!   mean the target is already gone (or was never ours) and are not
//!   errors.

// Allow unsafe code for this module since fork, signal dispositions, and
// prctl require raw libc/nix calls
#![allow(unsafe_code)]

use crate::registry::PidRegistry;
use crate::{CoreError, Result};
use nix::errno::Errno;
use nix::sys::signal::{self, SigHandler, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{self, ForkResult, Pid};
use schema::{PidFilter, ProcessKind};
use tracing::{debug, error, warn};

/// Which side of a fork the current process is on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkRole {
    /// The original process; `child` is the forked pid
    Parent { child: u32 },
    /// The freshly forked process
    Child,
}

impl ForkRole {
    /// True when executing in the forked child
    pub fn is_child(self) -> bool {
        matches!(self, ForkRole::Child)
    }
}

/// Detach this process from child-termination signals.
///
/// After this call, forked children that exit are reaped by the kernel
/// instead of turning into zombies, which is what lets `execute` return
/// without supervising the worker.
///
/// # Errors
///
/// Returns `CoreError::ProcessControl` if the signal disposition cannot be
/// set.
pub fn detach() -> Result<()> {
    // Safety: installing SIG_IGN carries no handler code to run; the
    // disposition change itself is the entire effect.
    unsafe { signal::signal(Signal::SIGCHLD, SigHandler::SigIgn) }
        .map(|_| ())
        .map_err(|e| CoreError::ProcessControl(format!("Failed to set a signal handler: {}", e)))
}

/// Fork the current process.
///
/// Returns which side of the fork the caller is on. A failed fork (resource
/// exhaustion) is unrecoverable for the execute protocol and exits the
/// process after logging.
pub fn fork() -> ForkRole {
    // Safety: callers of the engine are single-purpose processes; the child
    // proceeds straight into the worker protocol and terminates via
    // process::exit without returning into caller code.
    match unsafe { unistd::fork() } {
        Ok(ForkResult::Parent { child }) => {
            debug!("Forked child process {}", child);
            ForkRole::Parent {
                child: child.as_raw() as u32,
            }
        }
        Ok(ForkResult::Child) => ForkRole::Child,
        Err(e) => {
            error!("Fork failed: {}", e);
            std::process::exit(1);
        }
    }
}

/// The current process id
pub fn current_pid() -> u32 {
    std::process::id()
}

/// Best-effort rename of the process's displayed command line.
///
/// # Errors
///
/// Returns `CoreError::ProcessControl` if the platform does not support
/// retitling or the underlying call fails.
pub fn set_title(title: &str) -> Result<()> {
    #[cfg(target_os = "linux")]
    {
        let name = std::ffi::CString::new(title).map_err(|_| {
            CoreError::ProcessControl("Process title contains an interior NUL byte".to_string())
        })?;

        // Safety: PR_SET_NAME reads a NUL-terminated string (truncated to 15
        // bytes by the kernel) and does not retain the pointer.
        let rc = unsafe { libc::prctl(libc::PR_SET_NAME, name.as_ptr()) };
        if rc == -1 {
            return Err(CoreError::ProcessControl(format!(
                "Could not set process title for PID {}: {}",
                current_pid(),
                std::io::Error::last_os_error()
            )));
        }
        debug!("Set process title to '{}'", title);
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    {
        let _ = title;
        Err(CoreError::ProcessControl(
            "Setting the process title is not supported on this platform".to_string(),
        ))
    }
}

/// Non-blocking check of whether a child pid has exited.
///
/// Returns `true` for pid 0 (no-op), for children that have exited, and for
/// pids that are not waitable children of this process — callers waiting on
/// a pid from a foreign process tree must never hang here.
pub fn try_wait(pid: u32) -> bool {
    if pid == 0 {
        return true;
    }

    match waitpid(Pid::from_raw(pid as i32), Some(WaitPidFlag::WNOHANG)) {
        Ok(WaitStatus::StillAlive) => false,
        Ok(status) => {
            debug!("Process {} exited: {:?}", pid, status);
            true
        }
        Err(Errno::ECHILD) => {
            // Not our child (or already reaped elsewhere); nothing to wait on
            debug!("Process {} is not a waitable child", pid);
            true
        }
        Err(e) => {
            warn!("Failed to wait for process {}: {}", pid, e);
            true
        }
    }
}

/// Remove the pid's worker marker and send it a forceful termination
/// signal. Best-effort: does not confirm death.
pub fn kill(registry: &PidRegistry, pid: u32) {
    if pid == 0 {
        // Signalling pid 0 would target the whole process group
        return;
    }

    registry.remove(pid, ProcessKind::Worker);
    send_sigkill(pid);
}

/// Send a forceful termination signal to every pid currently recorded in
/// the registry, consuming the markers as they are read.
pub fn kill_all(registry: &PidRegistry) {
    for pid in registry.open_pids(PidFilter::All, true) {
        if pid == 0 {
            continue;
        }
        send_sigkill(pid);
    }
}

fn send_sigkill(pid: u32) {
    match signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) => {
            debug!("Sent SIGKILL to process {}", pid);
        }
        Err(Errno::ESRCH) => {
            // Process already exited
            debug!("Process {} already exited", pid);
        }
        Err(Errno::EPERM) => {
            debug!(
                "Permission denied signalling process {} (likely already exited)",
                pid
            );
        }
        Err(e) => {
            warn!("Failed to send SIGKILL to process {}: {}", pid, e);
        }
    }
}
