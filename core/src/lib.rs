//! Core functionality for the forktask project
//!
//! This crate contains the task execution engine and the pieces it
//! orchestrates: the process-control wrapper, the filesystem PID registry,
//! and task configuration. State shared between processes travels through
//! the `ipc` crate's store.

pub mod config;
pub mod error;
pub mod process;
pub mod registry;
pub mod task;


// Re-export schema types for convenience
pub use schema::*;

pub use config::{load_task_config_from_toml_path, load_task_config_from_toml_str, TaskConfig};
pub use error::{CoreError, Result};
pub use registry::PidRegistry;
pub use task::{AsyncTask, TaskDefinition, DEFAULT_PROGRESS_DELAY_MICROS};

/// Core utilities and helper functions
pub mod utils {
    use tracing::info;

    /// Initialize tracing for the application
    pub fn init_tracing(level: &str) -> crate::Result<()> {
        use tracing_subscriber::{fmt, EnvFilter};

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

        fmt()
            .with_env_filter(filter)
            .try_init()
            .map_err(|e| crate::CoreError::InitializationError(e.to_string()))?;

        info!("Tracing initialized with level: {}", level);
        Ok(())
    }
}
