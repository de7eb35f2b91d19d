/*!
 * Process Types
 */

use crate::core::errors::LifecycleResult;
use crate::core::types::OsPid;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// In-process function run in place of an external command
pub type CustomFn = Arc<dyn Fn() -> BoxFuture<'static, LifecycleResult<()>> + Send + Sync>;

/// How a managed process is launched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ProcessConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Block `start` until the command exits
    #[serde(default)]
    pub wait: bool,
    /// Re-run a waiting command after an unsuccessful exit
    #[serde(default)]
    pub restart: bool,
}

impl ProcessConfig {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            wait: false,
            restart: false,
        }
    }

    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_wait(mut self, wait: bool) -> Self {
        self.wait = wait;
        self
    }

    #[must_use]
    pub fn with_restart(mut self, restart: bool) -> Self {
        self.restart = restart;
        self
    }
}

/// How the process is currently executing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Idle,
    Waiting,
    Detached,
    Custom,
}

/// Serializable process snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ProcessInfo {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub mode: ExecutionMode,
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<OsPid>,
    pub starts: u64,
    pub restarts: u64,
}
