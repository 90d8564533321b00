//! The IPC store capability interface
//!
//! Processes in a task group share no memory by default; everything they
//! exchange (status, worker pid, publisher pid) travels through an
//! [`IpcStore`]. Backings are pluggable — the shipped ones are the
//! System-V shared memory reference backing and a process-local in-memory
//! backing for tests — and the protocol-level helpers (status and pid
//! slots) are provided on the trait so every backing behaves identically.

use crate::identity::TaskIdentity;
use crate::Result;
use schema::TaskStatus;
use serde_json::Value;

/// Slot holding the current [`TaskStatus`] code
pub const STATUS_KEY: &str = "status";

/// Slot holding the worker process id
pub const WORKER_PID_KEY: &str = "pid";

/// Slot holding the progress publisher process id
pub const PUBLISHER_PID_KEY: &str = "publisher-pid";

/// Map a textual key to the backing's numeric slot space.
///
/// Concatenates the decimal value of every byte (wrapping in u64). The
/// mapping is deterministic across processes and collision-free for the
/// fixed key set actually used (`status`, `pid`, `publisher-pid`).
pub fn slot_key(key: &str) -> u64 {
    key.bytes()
        .fold(0u64, |acc, b| acc.wrapping_mul(1000).wrapping_add(u64::from(b)))
}

/// Keyed storage shared between the processes of one task.
///
/// `get`/`has`/`remove` never fail: a missing key is simply "not present".
/// Only `initialize` and `write` can surface errors.
pub trait IpcStore {
    /// Attach this store to a task identity; must precede `initialize`
    fn bind(&mut self, identity: TaskIdentity);

    /// The identity this store is bound to, if any
    fn identity(&self) -> Option<&TaskIdentity>;

    /// Open (or re-open) the backing state for the bound identity.
    ///
    /// Always lands on live state: after a teardown, a fresh call opens a
    /// new, empty namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unbound or the backing cannot be
    /// opened.
    fn initialize(&mut self) -> Result<()>;

    /// Tear down this identity's state; with `including_group`, the
    /// per-definition group state too. Best-effort: already-bound readers
    /// keep observing the final values, fresh ones observe nothing.
    fn teardown(&mut self, including_group: bool);

    /// Check for a key
    fn has(&self, key: &str) -> bool;

    /// Read the value of a key, or `None` if absent
    fn get(&self, key: &str) -> Option<Value>;

    /// Remove a key; returns whether it was present
    fn remove(&mut self, key: &str) -> bool;

    /// Write a value under a key.
    ///
    /// # Errors
    ///
    /// Returns [`crate::IpcError::WriteFailed`] naming the key and segment
    /// if the backing rejects the value.
    fn write(&mut self, key: &str, value: Value) -> Result<()>;

    /// Short name of the backing, recorded in registry marker payloads
    fn backend_name(&self) -> &'static str;

    /// Publish a status transition
    fn set_status(&mut self, status: TaskStatus) -> Result<()> {
        self.write(STATUS_KEY, Value::from(status.code()))
    }

    /// Read the current status; an uninitialized or missing slot is
    /// [`TaskStatus::Undefined`]
    fn status(&self) -> TaskStatus {
        self.get(STATUS_KEY)
            .and_then(|v| v.as_u64())
            .and_then(|code| u8::try_from(code).ok())
            .and_then(TaskStatus::from_code)
            .unwrap_or(TaskStatus::Undefined)
    }

    /// Whether the task was cancelled before completing normally
    fn is_cancelled(&self) -> bool {
        self.status() == TaskStatus::Canceled
    }

    /// Read the recorded worker pid
    fn worker_pid(&self) -> Option<u32> {
        self.get(WORKER_PID_KEY)
            .and_then(|v| v.as_u64())
            .and_then(|pid| u32::try_from(pid).ok())
    }

    /// Record the worker pid
    fn record_worker_pid(&mut self, pid: u32) -> Result<()> {
        self.write(WORKER_PID_KEY, Value::from(pid))
    }

    /// Clear the worker pid slot, marking the run as no longer live
    fn clear_worker_pid(&mut self) -> bool {
        self.remove(WORKER_PID_KEY)
    }

    /// Read the recorded publisher pid
    fn publisher_pid(&self) -> Option<u32> {
        self.get(PUBLISHER_PID_KEY)
            .and_then(|v| v.as_u64())
            .and_then(|pid| u32::try_from(pid).ok())
    }

    /// Record the progress publisher pid
    fn record_publisher_pid(&mut self, pid: u32) -> Result<()> {
        self.write(PUBLISHER_PID_KEY, Value::from(pid))
    }
}
