/*!
 * Lifecycle Kernel Library
 * Supervision of processes and stage-based work through managed channels,
 * workers and worker pools
 */

pub mod channel;
pub mod config;
pub mod core;
pub mod ipc;
pub mod lifecycle;
pub mod monitoring;
pub mod process;
pub mod stage;
pub mod worker;

// Re-exports
pub use channel::{ChannelCommand, ManagedChannel};
pub use config::LifecycleConfig;
pub use crate::core::errors::{EntityKind, LifecycleError, LifecycleResult};
pub use crate::core::types::{WorkerId, WorkerStatus};
pub use ipc::IpcServer;
pub use lifecycle::{LifecycleEvent, LifecycleManager, LifecycleManagerBuilder, ShutdownSignal};
pub use monitoring::init_tracing;
pub use process::{ManagedProcess, ProcessConfig};
pub use stage::{base_stages, Stage};
pub use worker::{Job, JobRef, TaskJob, Worker, WorkerHooks, WorkerPool};
