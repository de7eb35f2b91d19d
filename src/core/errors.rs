/*!
 * Error Types
 * Centralized error handling with thiserror, miette and serde support
 */

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Common result type for lifecycle operations
pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Kind of registry entry an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Process,
    Stage,
    Event,
    Worker,
    Channel,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Process => "process",
            EntityKind::Stage => "stage",
            EntityKind::Event => "event",
            EntityKind::Worker => "worker",
            EntityKind::Channel => "channel",
        };
        f.write_str(name)
    }
}

/// Lifecycle errors with serialization support
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum LifecycleError {
    #[error("{kind} '{name}' not found")]
    #[diagnostic(
        code(lifecycle::not_found),
        help("Register the entry before referring to it.")
    )]
    NotFound { kind: EntityKind, name: String },

    #[error("{kind} '{name}' already exists")]
    #[diagnostic(
        code(lifecycle::already_exists),
        help("Names are unique per registry. Remove the existing entry or pick another name.")
    )]
    AlreadyExists { kind: EntityKind, name: String },

    #[error("worker slot {slot} out of range (pool size {len})")]
    #[diagnostic(
        code(lifecycle::out_of_range),
        help("Worker slots are addressed from 0 to the pool limit minus one.")
    )]
    OutOfRange { slot: usize, len: usize },

    #[error("validation failed: {0}")]
    #[diagnostic(code(lifecycle::validation_failure))]
    ValidationFailure(String),

    #[error("state conflict: {0}")]
    #[diagnostic(
        code(lifecycle::state_conflict),
        help("Operation cannot be performed in the current state.")
    )]
    StateConflict(String),

    #[error("spawn failed: {0}")]
    #[diagnostic(
        code(lifecycle::spawn_failed),
        help("Check that the command exists and is executable.")
    )]
    SpawnFailed(String),

    #[error("process '{name}' failed: {reason}")]
    #[diagnostic(code(lifecycle::process_failed))]
    ProcessFailed { name: String, reason: String },

    #[error("{operation} timed out after {timeout_ms}ms")]
    #[diagnostic(
        code(lifecycle::timeout),
        help("The task did not exit before the deadline and was aborted.")
    )]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("invalid configuration: {0}")]
    #[diagnostic(
        code(lifecycle::invalid_config),
        help("Check the file named by LIFECYCLE_CONFIG.")
    )]
    InvalidConfig(String),
}

impl LifecycleError {
    pub fn not_found(kind: EntityKind, name: impl Into<String>) -> Self {
        LifecycleError::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn already_exists(kind: EntityKind, name: impl Into<String>) -> Self {
        LifecycleError::AlreadyExists {
            kind,
            name: name.into(),
        }
    }

    /// Short machine-readable tag, matches the serde tag
    pub fn error_type(&self) -> &'static str {
        match self {
            LifecycleError::NotFound { .. } => "not_found",
            LifecycleError::AlreadyExists { .. } => "already_exists",
            LifecycleError::OutOfRange { .. } => "out_of_range",
            LifecycleError::ValidationFailure(_) => "validation_failure",
            LifecycleError::StateConflict(_) => "state_conflict",
            LifecycleError::SpawnFailed(_) => "spawn_failed",
            LifecycleError::ProcessFailed { .. } => "process_failed",
            LifecycleError::Timeout { .. } => "timeout",
            LifecycleError::InvalidConfig(_) => "invalid_config",
        }
    }
}

impl From<std::io::Error> for LifecycleError {
    fn from(err: std::io::Error) -> Self {
        LifecycleError::SpawnFailed(err.to_string())
    }
}
