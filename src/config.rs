/*!
 * Configuration
 *
 * JSON settings for the IPC server, worker pools and shutdown deadlines.
 *
 * Sources, later ones winning:
 * - built-in defaults
 * - the file named by `LIFECYCLE_CONFIG`, either the full nested document or
 *   the legacy `{"auth_token": "..."}` form
 * - `LIFECYCLE_IPC_TOKEN`
 */

use crate::core::errors::{LifecycleError, LifecycleResult};
use crate::core::limits::{
    DEFAULT_IPC_BIND_ADDR, DEFAULT_IPC_PORT, DEFAULT_STOP_TIMEOUT, DEFAULT_WORKER_LIMIT,
    MAX_WORKER_LIMIT,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Path of the JSON config file
pub const CONFIG_PATH_ENV: &str = "LIFECYCLE_CONFIG";

/// Shared-secret override
pub const IPC_TOKEN_ENV: &str = "LIFECYCLE_IPC_TOKEN";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct IpcConfig {
    pub enabled: bool,
    pub bind_addr: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_addr: DEFAULT_IPC_BIND_ADDR.to_string(),
            port: DEFAULT_IPC_PORT,
            auth_token: None,
        }
    }
}

impl IpcConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct WorkerConfig {
    pub default_limit: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_WORKER_LIMIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ShutdownConfig {
    pub stop_timeout_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            stop_timeout_ms: DEFAULT_STOP_TIMEOUT.as_millis() as u64,
        }
    }
}

impl ShutdownConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct LifecycleConfig {
    pub ipc: IpcConfig,
    pub workers: WorkerConfig,
    pub shutdown: ShutdownConfig,
}

/// On-disk shape, accepting the legacy top-level token
#[derive(Deserialize)]
struct ConfigFile {
    #[serde(flatten)]
    config: LifecycleConfig,
    auth_token: Option<String>,
}

impl LifecycleConfig {
    /// Load from the environment: config file if `LIFECYCLE_CONFIG` is set,
    /// then the token override
    pub fn load() -> LifecycleResult<Self> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> LifecycleResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            LifecycleError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_json(&contents)?;
        info!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    pub fn from_json(contents: &str) -> LifecycleResult<Self> {
        let file: ConfigFile = serde_json::from_str(contents)
            .map_err(|e| LifecycleError::InvalidConfig(e.to_string()))?;

        let mut config = file.config;
        if config.ipc.auth_token.is_none() {
            config.ipc.auth_token = file.auth_token;
        }
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(token) = std::env::var(IPC_TOKEN_ENV) {
            if !token.is_empty() {
                self.ipc.auth_token = Some(token);
            }
        }
    }

    pub fn validate(&self) -> LifecycleResult<()> {
        if self.workers.default_limit > MAX_WORKER_LIMIT {
            return Err(LifecycleError::InvalidConfig(format!(
                "workers.default_limit {} exceeds maximum of {}",
                self.workers.default_limit, MAX_WORKER_LIMIT
            )));
        }
        if self.ipc.auth_token.as_deref() == Some("") {
            return Err(LifecycleError::InvalidConfig(
                "ipc.auth_token must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Shared secret for the IPC server. Generates and logs one when none
    /// is configured.
    pub fn ensure_token(&mut self) -> String {
        if let Some(token) = &self.ipc.auth_token {
            return token.clone();
        }
        let token = Uuid::new_v4().simple().to_string();
        warn!(token = %token, "No IPC token configured, generated one");
        self.ipc.auth_token = Some(token.clone());
        token
    }
}
