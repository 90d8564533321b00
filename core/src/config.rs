//! Task configuration loading and validation
//!
//! This module parses a TOML configuration into a `TaskConfig`, applies
//! defaults via serde, and validates the values before they reach the
//! engine.

use crate::{CoreError, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Runtime configuration applied to a task before execution
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TaskConfig {
    /// Process title applied to the worker (the publisher gets a
    /// " (progress)" suffix); no title is applied when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Minimum microseconds between progress-hook invocations
    #[serde(default = "default_progress_delay_micros")]
    pub progress_delay_micros: u64,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            title: None,
            progress_delay_micros: default_progress_delay_micros(),
        }
    }
}

const fn default_progress_delay_micros() -> u64 {
    1_000_000
}

impl TaskConfig {
    /// Get the progress delay as a Duration
    pub fn progress_delay(&self) -> Duration {
        Duration::from_micros(self.progress_delay_micros)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.progress_delay_micros == 0 {
            return Err(CoreError::ValidationError(
                "progressDelayMicros: must be greater than 0".to_string(),
            ));
        }
        if let Some(title) = &self.title {
            if title.trim().is_empty() {
                return Err(CoreError::ValidationError(
                    "title: cannot be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Load a task configuration from a TOML file path
pub fn load_task_config_from_toml_path(path: impl AsRef<Path>) -> Result<TaskConfig> {
    let data = std::fs::read_to_string(&path).map_err(|e| {
        CoreError::ConfigurationError(format!("Failed to read config {:?}: {}", path.as_ref(), e))
    })?;
    load_task_config_from_toml_str(&data)
}

/// Load a task configuration from a TOML string
pub fn load_task_config_from_toml_str(input: &str) -> Result<TaskConfig> {
    let cfg: TaskConfig = toml::from_str(input)
        .map_err(|e| CoreError::ConfigurationError(format!("TOML parse error: {}", e)))?;
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = TaskConfig::default();
        assert_eq!(cfg.title, None);
        assert_eq!(cfg.progress_delay_micros, 1_000_000);
        assert_eq!(cfg.progress_delay(), Duration::from_secs(1));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_delay_is_rejected() {
        let cfg = TaskConfig {
            title: None,
            progress_delay_micros: 0,
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("progressDelayMicros"));
    }

    #[test]
    fn empty_title_is_rejected() {
        let cfg = TaskConfig {
            title: Some("   ".to_string()),
            progress_delay_micros: 1000,
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn load_from_toml_str() {
        let cfg = load_task_config_from_toml_str(
            r#"
title = "indexer"
progressDelayMicros = 250000
"#,
        )
        .expect("valid config");
        assert_eq!(cfg.title.as_deref(), Some("indexer"));
        assert_eq!(cfg.progress_delay_micros, 250_000);
    }

    #[test]
    fn load_applies_defaults_for_missing_fields() {
        let cfg = load_task_config_from_toml_str("").expect("empty config is valid");
        assert_eq!(cfg, TaskConfig::default());
    }

    #[test]
    fn load_rejects_invalid_values() {
        let err = load_task_config_from_toml_str("progressDelayMicros = 0").unwrap_err();
        assert!(matches!(err, CoreError::ValidationError(_)));
    }
}
