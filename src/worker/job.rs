/*!
 * Jobs
 * Units of work consumed by workers, their results and the worker hook points
 */

use crate::core::errors::{LifecycleError, LifecycleResult};
use crate::core::types::{JobId, WorkerId};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

/// Shared handle to a job, the item type of a worker's job queue
pub type JobRef = Arc<dyn Job>;

/// A unit of work a worker can execute
pub trait Job: Send + Sync + 'static {
    fn id(&self) -> JobId;

    fn name(&self) -> &str {
        "job"
    }

    /// Whether the job is still executable. Checked after `handle_job`.
    fn can_execute(&self) -> bool {
        true
    }

    fn execute(&self) -> BoxFuture<'_, LifecycleResult<()>>;
}

enum Task {
    Blocking(Box<dyn FnOnce() -> LifecycleResult<()> + Send>),
    Async(BoxFuture<'static, LifecycleResult<()>>),
}

/// One-shot job wrapping a closure or a future
pub struct TaskJob {
    id: JobId,
    name: String,
    task: Mutex<Option<Task>>,
}

impl TaskJob {
    /// Wrap a closure; it runs on the worker's task
    pub fn new<F>(name: impl Into<String>, task: F) -> Self
    where
        F: FnOnce() -> LifecycleResult<()> + Send + 'static,
    {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            task: Mutex::new(Some(Task::Blocking(Box::new(task)))),
        }
    }

    /// Wrap a future; the worker awaits it
    pub fn from_future<F>(name: impl Into<String>, future: F) -> Self
    where
        F: Future<Output = LifecycleResult<()>> + Send + 'static,
    {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            task: Mutex::new(Some(Task::Async(future.boxed()))),
        }
    }

    pub fn into_ref(self) -> JobRef {
        Arc::new(self)
    }
}

impl Job for TaskJob {
    fn id(&self) -> JobId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn can_execute(&self) -> bool {
        self.task.lock().is_some()
    }

    fn execute(&self) -> BoxFuture<'_, LifecycleResult<()>> {
        let task = self.task.lock().take();
        async move {
            match task {
                Some(Task::Blocking(f)) => f(),
                Some(Task::Async(fut)) => fut.await,
                None => Err(LifecycleError::StateConflict(format!(
                    "job '{}' already executed",
                    self.name
                ))),
            }
        }
        .boxed()
    }
}

/// Outcome of one job execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Succeeded,
    Failed,
    Skipped,
}

/// Result record pushed on a worker's result queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct JobResult {
    pub job_id: JobId,
    pub job_name: String,
    pub worker_id: WorkerId,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_us: u64,
}

/// Failure record pushed on a worker's error queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WorkerFault {
    pub worker_id: WorkerId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    pub error: LifecycleError,
}

/// Override points invoked by a worker's execution loop
pub trait WorkerHooks: Send + Sync + 'static {
    /// Called for every dequeued job before it is executed
    fn handle_job(&self, _worker: WorkerId, _job: &dyn Job) -> LifecycleResult<()> {
        Ok(())
    }

    /// Called for every result drained from the result queue
    fn handle_result(&self, _result: &JobResult) -> LifecycleResult<()> {
        Ok(())
    }

    /// Called for every fault drained from the error queue
    fn handle_error(&self, _fault: &WorkerFault) -> LifecycleResult<()> {
        Ok(())
    }
}

/// Default hooks, all no-ops
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl WorkerHooks for NoopHooks {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_task_job_runs_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let job = TaskJob::new("count", move || {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert!(job.can_execute());
        job.execute().await.unwrap();
        assert!(!job.can_execute());
        assert!(job.execute().await.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_future_job() {
        let job = TaskJob::from_future("async", async {
            tokio::task::yield_now().await;
            Err(LifecycleError::ValidationFailure("bad input".into()))
        });
        assert_eq!(job.name(), "async");
        let err = job.execute().await.unwrap_err();
        assert_eq!(err.error_type(), "validation_failure");
    }
}
