//! Core error types and utilities

use thiserror::Error;

/// Core-specific error types
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("The previous run of this task is not yet complete")]
    AlreadyRunning,

    #[error("Identity error: {0}")]
    Identity(#[from] ipc::IdentityError),

    #[error("IPC store error: {0}")]
    Ipc(#[from] ipc::IpcError),

    #[error("Process control error: {0}")]
    ProcessControl(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Initialization error: {0}")]
    InitializationError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl CoreError {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::AlreadyRunning => "CORE001",
            CoreError::Identity(_) => "CORE002",
            CoreError::Ipc(_) => "CORE003",
            CoreError::ProcessControl(_) => "CORE004",
            CoreError::ConfigurationError(_) => "CORE005",
            CoreError::ValidationError(_) => "CORE006",
            CoreError::InitializationError(_) => "CORE007",
            CoreError::IoError(_) => "CORE008",
        }
    }
}

/// Core-specific result type
pub type Result<T> = std::result::Result<T, CoreError>;
