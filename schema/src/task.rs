//! Task lifecycle types shared across processes
//!
//! This module contains the status codes exchanged through the IPC store and
//! the process-kind / filter vocabulary used by the PID registry. The numeric
//! status codes are persisted into shared memory and read back by unrelated
//! process invocations, so their values are frozen.
//!
//! ## Task Lifecycle
//!
//! Tasks progress through the following states:
//! - `Pending`: the task has been constructed but not yet forked
//! - `Running`: the worker process has started and published its pid
//! - `Finished`: the task body completed normally
//! - `Canceled`: the run was cancelled and the worker killed
//! - `Undefined`: the store holds no status for this identity
//!
//! `Finished` and `Canceled` are terminal; a fresh `execute` is required to
//! re-enter `Pending`.

use schemars::JsonSchema;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Current status of a task, as observed through the IPC store.
///
/// The discriminants are the persisted wire format; they must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TaskStatus {
    /// Constructed and initialized, not yet forked
    Pending = 0,
    /// Worker process is executing the task body
    Running = 1,
    /// Task body completed normally
    Finished = 2,
    /// Run was cancelled and the worker killed
    Canceled = 3,
    /// No status has ever been written for this identity
    Undefined = 4,
}

impl TaskStatus {
    /// The persisted numeric code for this status
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Decode a persisted status code; unknown codes yield `None`
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(TaskStatus::Pending),
            1 => Some(TaskStatus::Running),
            2 => Some(TaskStatus::Finished),
            3 => Some(TaskStatus::Canceled),
            4 => Some(TaskStatus::Undefined),
            _ => None,
        }
    }

    /// Check if the task is in a terminal state
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Finished | TaskStatus::Canceled)
    }
}

// Status travels as its numeric code, not a name: the shared-memory slots
// and any persisted copies must stay readable by older readers.
impl Serialize for TaskStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for TaskStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = u8::deserialize(deserializer)?;
        TaskStatus::from_code(code)
            .ok_or_else(|| D::Error::custom(format!("unknown task status code {}", code)))
    }
}

impl JsonSchema for TaskStatus {
    fn schema_name() -> String {
        "TaskStatus".to_owned()
    }

    fn json_schema(gen: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
        gen.subschema_for::<u8>()
    }
}

/// Kind of forked process recorded in the PID registry
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ProcessKind {
    /// The process running the task body
    Worker,
    /// The optional process periodically invoking the progress hook
    Publisher,
}

impl ProcessKind {
    /// Token embedded in registry marker filenames for this kind
    pub fn marker_token(self) -> &'static str {
        match self {
            ProcessKind::Worker => "PID",
            ProcessKind::Publisher => "PPPID",
        }
    }
}

/// Filter selecting a subset of PID registry markers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum PidFilter {
    /// Every marker, regardless of kind
    All,
    /// Worker markers only
    Worker,
    /// Publisher markers only
    Publisher,
}

impl PidFilter {
    /// Filename substring that markers in this subset contain
    pub fn pattern(self) -> &'static str {
        match self {
            PidFilter::All => ".AT.",
            PidFilter::Worker => ".PID.AT.",
            PidFilter::Publisher => ".PPPID.AT.",
        }
    }
}
