/*!
 * Core Types
 * Common types used across the lifecycle layer
 */

use serde::{Deserialize, Serialize};
use std::fmt;

/// Worker identifier, unique within a pool
pub type WorkerId = usize;

/// Worker pool slot index
pub type Slot = usize;

/// OS-level process id
pub type OsPid = u32;

/// Job identifier
pub type JobId = uuid::Uuid;

/// Execution status shared by workers and pools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Stopped,
    Running,
}

impl WorkerStatus {
    #[inline]
    pub fn is_running(self) -> bool {
        matches!(self, WorkerStatus::Running)
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerStatus::Stopped => f.write_str("Stopped"),
            WorkerStatus::Running => f.write_str("Running"),
        }
    }
}
