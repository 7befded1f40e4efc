//! Core error types for taskgate-core.
//!
//! Failures in this crate are always local and reported as results.
//! Rejected state transitions are not errors at all: they are carried in
//! [`Outcome::Rejected`](crate::machine::Outcome) so callers can treat them
//! as a flag.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for taskgate-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Operation referenced a task the store does not hold
    #[error("Unknown task: {0}")]
    UnknownTask(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The engine needs a Tokio runtime to host its countdown timers
    #[error("Runtime unavailable: {0}")]
    Runtime(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Key does not exist in the configuration tree
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Failed to parse configuration
    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),
}

/// Validation errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Task duration must be a positive number of minutes
    #[error("Invalid duration for task '{task_id}': must be greater than zero minutes")]
    InvalidDuration { task_id: String },

    /// Invalid time range
    #[error("Invalid time range: end ({end}) must not precede start ({start})")]
    InvalidTimeRange {
        start: chrono::DateTime<chrono::Utc>,
        end: chrono::DateTime<chrono::Utc>,
    },

    /// A set-once field was written a second time
    #[error("Field '{field}' of task '{task_id}' is already set and cannot change")]
    ImmutableField { task_id: String, field: &'static str },

    /// A monotonic flag was cleared
    #[error("Flag '{field}' of task '{task_id}' cannot be reset once raised")]
    FlagReset { task_id: String, field: &'static str },

    /// Two tasks with the same id were supplied to a store
    #[error("Duplicate task id: {0}")]
    DuplicateTask(String),
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_converts_into_core_error() {
        let err: CoreError = ValidationError::DuplicateTask("a".into()).into();
        assert!(matches!(err, CoreError::Validation(_)));
        assert_eq!(err.to_string(), "Validation error: Duplicate task id: a");
    }

    #[test]
    fn unknown_task_message_names_the_id() {
        let err = CoreError::UnknownTask("task-9".into());
        assert_eq!(err.to_string(), "Unknown task: task-9");
    }
}
