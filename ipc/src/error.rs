//! IPC store error types and utilities

use thiserror::Error;

/// IPC-specific error types
#[derive(Error, Debug)]
pub enum IpcError {
    #[error("Failed to put key '{key}' into segment {segment}")]
    WriteFailed { key: String, segment: i32 },

    #[error("Unable to create the shared memory segment for key {key}: {reason}")]
    SegmentCreate { key: i32, reason: String },

    #[error("Unable to attach the shared memory segment {id}: {reason}")]
    SegmentAttach { id: i32, reason: String },

    #[error("Store is not bound to a task identity")]
    Unbound,

    #[error("Store is not initialized")]
    Uninitialized,

    #[error("Serialization failed: {0}")]
    SerializationFailed(String),
}

impl IpcError {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            IpcError::WriteFailed { .. } => "IPC001",
            IpcError::SegmentCreate { .. } => "IPC002",
            IpcError::SegmentAttach { .. } => "IPC003",
            IpcError::Unbound => "IPC004",
            IpcError::Uninitialized => "IPC005",
            IpcError::SerializationFailed(_) => "IPC006",
        }
    }
}

/// IPC-specific result type
pub type Result<T> = std::result::Result<T, IpcError>;
