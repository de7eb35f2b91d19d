/*!
 * Worker Module
 * Concurrent job executors and the bounded pool that owns them
 */

pub mod job;
pub mod pool;
#[allow(clippy::module_inception)]
pub mod worker;

pub use job::{Job, JobRef, JobResult, JobStatus, NoopHooks, TaskJob, WorkerFault, WorkerHooks};
pub use pool::{PoolStats, WorkerPool};
pub use worker::{Worker, WorkerStats};
