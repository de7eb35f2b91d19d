/*!
 * Worker
 *
 * One concurrent executor. A background task selects over the stop signal,
 * the job queue, the result queue and the error queue:
 *
 * - jobs are handed to `WorkerHooks::handle_job`, then executed if they
 *   still report `can_execute`
 * - each execution pushes a `JobResult`; failures also push a `WorkerFault`
 * - results drained from the result queue go to `WorkerHooks::handle_result`
 * - faults drained from the error queue go to `WorkerHooks::handle_error`
 *
 * Job failures are logged, never fatal. A panic inside the loop is caught and
 * forces the status back to `Stopped`.
 */

use super::job::{Job, JobRef, JobResult, JobStatus, NoopHooks, WorkerFault, WorkerHooks};
use crate::channel::ManagedChannel;
use crate::core::errors::{LifecycleError, LifecycleResult};
use crate::core::limits::DEFAULT_CHANNEL_BUFFER;
use crate::core::types::{WorkerId, WorkerStatus};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Execution counters
#[derive(Debug, Default)]
struct Counters {
    executed: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

/// Snapshot of a worker's counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WorkerStats {
    pub executed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub launches: u64,
}

struct Running {
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// A single job executor
pub struct Worker {
    id: WorkerId,
    status: Arc<RwLock<WorkerStatus>>,
    jobs: Arc<ManagedChannel<JobRef>>,
    results: Arc<ManagedChannel<JobResult>>,
    errors: Arc<ManagedChannel<WorkerFault>>,
    hooks: Arc<dyn WorkerHooks>,
    running: Mutex<Option<Running>>,
    counters: Arc<Counters>,
    launches: AtomicU64,
}

impl Worker {
    pub fn new(id: WorkerId) -> Self {
        Self::with_hooks(id, Arc::new(NoopHooks))
    }

    pub fn with_hooks(id: WorkerId, hooks: Arc<dyn WorkerHooks>) -> Self {
        Self {
            id,
            status: Arc::new(RwLock::new(WorkerStatus::Stopped)),
            jobs: Arc::new(ManagedChannel::new(
                format!("worker-{}-jobs", id),
                DEFAULT_CHANNEL_BUFFER,
            )),
            results: Arc::new(ManagedChannel::new(
                format!("worker-{}-results", id),
                DEFAULT_CHANNEL_BUFFER,
            )),
            errors: Arc::new(ManagedChannel::new(
                format!("worker-{}-errors", id),
                DEFAULT_CHANNEL_BUFFER,
            )),
            hooks,
            running: Mutex::new(None),
            counters: Arc::new(Counters::default()),
            launches: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn id(&self) -> WorkerId {
        self.id
    }

    #[inline]
    pub fn status(&self) -> WorkerStatus {
        *self.status.read()
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.status().is_running()
    }

    /// Number of execution tasks ever launched by this worker
    #[inline]
    pub fn launch_count(&self) -> u64 {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn jobs(&self) -> &Arc<ManagedChannel<JobRef>> {
        &self.jobs
    }

    pub fn results(&self) -> &Arc<ManagedChannel<JobResult>> {
        &self.results
    }

    pub fn errors(&self) -> &Arc<ManagedChannel<WorkerFault>> {
        &self.errors
    }

    /// Most recent result seen by the result queue's monitor
    pub fn last_result(&self) -> Option<Arc<JobResult>> {
        self.results.get_last()
    }

    /// Most recent fault seen by the error queue's monitor
    pub fn last_fault(&self) -> Option<Arc<WorkerFault>> {
        self.errors.get_last()
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            executed: self.counters.executed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
            launches: self.launch_count(),
        }
    }

    /// Queue a job for this worker
    pub async fn submit(&self, job: JobRef) -> LifecycleResult<()> {
        self.jobs.send(job).await
    }

    /// Queue a job without waiting for capacity
    pub fn try_submit(&self, job: JobRef) -> LifecycleResult<()> {
        self.jobs.try_send(job)
    }

    /// Start the execution task. Idempotent: returns `false` if already running.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn start(&self) -> bool {
        let mut running = self.running.lock();
        {
            let mut status = self.status.write();
            if status.is_running() {
                return false;
            }
            *status = WorkerStatus::Running;
        }

        self.jobs.reopen();
        self.results.reopen();
        self.errors.reopen();
        self.results.start_monitor();
        self.errors.start_monitor();

        let (stop_tx, stop_rx) = oneshot::channel();
        let exec = Execution {
            id: self.id,
            jobs: Arc::clone(&self.jobs),
            results: Arc::clone(&self.results),
            errors: Arc::clone(&self.errors),
            hooks: Arc::clone(&self.hooks),
            counters: Arc::clone(&self.counters),
        };
        let status = Arc::clone(&self.status);
        let id = self.id;

        let handle = tokio::spawn(async move {
            if let Err(panic) = AssertUnwindSafe(exec.run(stop_rx)).catch_unwind().await {
                error!(
                    worker_id = id,
                    panic = %panic_message(&*panic),
                    "Worker recovered from panic"
                );
            }
            *status.write() = WorkerStatus::Stopped;
        });

        self.launches.fetch_add(1, Ordering::SeqCst);
        *running = Some(Running { stop_tx, handle });
        info!(worker_id = self.id, "Worker started");
        true
    }

    /// Stop the execution task and wait for it to exit. No-op when stopped.
    pub async fn stop(&self) -> LifecycleResult<()> {
        self.shutdown(None).await
    }

    /// Like `stop`, but aborts the task if it has not exited by the deadline
    pub async fn stop_with_timeout(&self, timeout: Duration) -> LifecycleResult<()> {
        self.shutdown(Some(timeout)).await
    }

    async fn shutdown(&self, deadline: Option<Duration>) -> LifecycleResult<()> {
        let running = {
            let mut running = self.running.lock();
            if !self.is_running() {
                // Drop the handle of a task that exited on its own
                running.take();
                return Ok(());
            }
            running.take()
        };
        let Some(Running { stop_tx, mut handle }) = running else {
            return Ok(());
        };

        let _ = stop_tx.send(());

        let outcome = match deadline {
            None => {
                if let Err(e) = (&mut handle).await {
                    warn!(worker_id = self.id, error = %e, "Worker task join error");
                }
                Ok(())
            }
            Some(timeout) => match tokio::time::timeout(timeout, &mut handle).await {
                Ok(Err(e)) => {
                    warn!(worker_id = self.id, error = %e, "Worker task join error");
                    Ok(())
                }
                Ok(Ok(())) => Ok(()),
                Err(_) => {
                    handle.abort();
                    warn!(
                        worker_id = self.id,
                        timeout_ms = timeout.as_millis() as u64,
                        "Worker did not stop before deadline, aborted"
                    );
                    Err(LifecycleError::Timeout {
                        operation: format!("stop worker {}", self.id),
                        timeout_ms: timeout.as_millis() as u64,
                    })
                }
            },
        };

        *self.status.write() = WorkerStatus::Stopped;
        self.results.stop_monitor().await;
        self.errors.stop_monitor().await;
        info!(worker_id = self.id, "Worker stopped");
        outcome
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("status", &self.status())
            .finish()
    }
}

/// State moved into the execution task
struct Execution {
    id: WorkerId,
    jobs: Arc<ManagedChannel<JobRef>>,
    results: Arc<ManagedChannel<JobResult>>,
    errors: Arc<ManagedChannel<WorkerFault>>,
    hooks: Arc<dyn WorkerHooks>,
    counters: Arc<Counters>,
}

impl Execution {
    async fn run(self, mut stop_rx: oneshot::Receiver<()>) {
        let mut results_open = true;
        let mut errors_open = true;
        debug!(worker_id = self.id, "Worker loop running");

        loop {
            tokio::select! {
                biased;

                _ = &mut stop_rx => {
                    debug!(worker_id = self.id, "Worker stop signal received");
                    break;
                }

                job = self.jobs.recv() => match job {
                    Some(job) => self.process(job).await,
                    None => {
                        warn!(worker_id = self.id, "Job queue closed");
                        break;
                    }
                },

                result = self.results.recv(), if results_open => match result {
                    Some(result) => {
                        if let Err(e) = self.hooks.handle_result(&result) {
                            error!(worker_id = self.id, error = %e, "Error handling result");
                        }
                    }
                    None => results_open = false,
                },

                fault = self.errors.recv(), if errors_open => match fault {
                    Some(fault) => {
                        if let Err(e) = self.hooks.handle_error(&fault) {
                            error!(worker_id = self.id, error = %e, "Error handling fault");
                        }
                    }
                    None => errors_open = false,
                },
            }
        }
    }

    async fn process(&self, job: JobRef) {
        if let Err(e) = self.hooks.handle_job(self.id, job.as_ref()) {
            error!(worker_id = self.id, job = job.name(), error = %e, "Error handling job");
            self.fault(Some(job.as_ref()), e);
        }

        if !job.can_execute() {
            warn!(worker_id = self.id, job = job.name(), "Job cannot be executed");
            self.counters.skipped.fetch_add(1, Ordering::Relaxed);
            self.publish(job.as_ref(), JobStatus::Skipped, None, Duration::ZERO);
            return;
        }

        let start = Instant::now();
        match job.execute().await {
            Ok(()) => {
                self.counters.executed.fetch_add(1, Ordering::Relaxed);
                self.publish(job.as_ref(), JobStatus::Succeeded, None, start.elapsed());
            }
            Err(e) => {
                error!(worker_id = self.id, job = job.name(), error = %e, "Error executing job");
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                self.publish(
                    job.as_ref(),
                    JobStatus::Failed,
                    Some(e.to_string()),
                    start.elapsed(),
                );
                self.fault(Some(job.as_ref()), e);
            }
        }
    }

    fn publish(&self, job: &dyn Job, status: JobStatus, error: Option<String>, took: Duration) {
        let result = JobResult {
            job_id: job.id(),
            job_name: job.name().to_string(),
            worker_id: self.id,
            status,
            error,
            duration_us: took.as_micros() as u64,
        };
        if let Err(e) = self.results.try_send(result) {
            debug!(worker_id = self.id, error = %e, "Result dropped");
        }
    }

    fn fault(&self, job: Option<&dyn Job>, error: LifecycleError) {
        let fault = WorkerFault {
            worker_id: self.id,
            job_id: job.map(|j| j.id()),
            error,
        };
        if let Err(e) = self.errors.try_send(fault) {
            debug!(worker_id = self.id, error = %e, "Fault dropped");
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::job::TaskJob;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let worker = Worker::new(0);
        assert!(worker.start());
        assert!(!worker.start());
        assert_eq!(worker.status(), WorkerStatus::Running);
        assert_eq!(worker.launch_count(), 1);

        worker.stop().await.unwrap();
        assert_eq!(worker.status(), WorkerStatus::Stopped);
    }

    #[tokio::test]
    async fn test_stop_never_started_returns_immediately() {
        let worker = Worker::new(3);
        tokio::time::timeout(Duration::from_millis(100), worker.stop())
            .await
            .expect("stop should not block")
            .unwrap();
        assert_eq!(worker.launch_count(), 0);
    }

    #[tokio::test]
    async fn test_executes_submitted_job() {
        let worker = Worker::new(1);
        worker.start();

        let flag = Arc::new(AtomicBool::new(false));
        let f = flag.clone();
        worker
            .submit(
                TaskJob::new("flip", move || {
                    f.store(true, Ordering::SeqCst);
                    Ok(())
                })
                .into_ref(),
            )
            .await
            .unwrap();

        assert!(wait_until(|| flag.load(Ordering::SeqCst)).await);
        assert!(wait_until(|| worker.stats().executed == 1).await);
        assert!(
            wait_until(|| worker
                .last_result()
                .is_some_and(|r| r.status == JobStatus::Succeeded))
            .await
        );
        worker.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_job_is_not_fatal() {
        let worker = Worker::new(2);
        worker.start();

        worker
            .submit(
                TaskJob::new("boom", || {
                    Err(LifecycleError::ValidationFailure("nope".into()))
                })
                .into_ref(),
            )
            .await
            .unwrap();

        assert!(wait_until(|| worker.stats().failed == 1).await);
        assert!(wait_until(|| worker.last_fault().is_some()).await);
        assert!(worker.is_running());
        worker.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_panic_forces_stopped() {
        let worker = Worker::new(4);
        worker.start();

        worker
            .submit(TaskJob::new("panic", || panic!("job exploded")).into_ref())
            .await
            .unwrap();

        assert!(wait_until(|| !worker.is_running()).await);
        // Stop after a crash is a no-op, and the worker can be restarted
        worker.stop().await.unwrap();
        assert!(worker.start());
        assert_eq!(worker.launch_count(), 2);
        worker.stop().await.unwrap();
    }

    struct CountingHooks {
        jobs: AtomicUsize,
        results: AtomicUsize,
        faults: AtomicUsize,
    }

    impl WorkerHooks for CountingHooks {
        fn handle_job(&self, _worker: WorkerId, _job: &dyn Job) -> LifecycleResult<()> {
            self.jobs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn handle_result(&self, _result: &JobResult) -> LifecycleResult<()> {
            self.results.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn handle_error(&self, _fault: &WorkerFault) -> LifecycleResult<()> {
            self.faults.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn counting_hooks() -> Arc<CountingHooks> {
        Arc::new(CountingHooks {
            jobs: AtomicUsize::new(0),
            results: AtomicUsize::new(0),
            faults: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn test_hooks_see_jobs_and_results() {
        let hooks = counting_hooks();
        let worker = Worker::with_hooks(5, hooks.clone());
        worker.start();

        for i in 0..3 {
            worker
                .submit(TaskJob::new(format!("job-{}", i), || Ok(())).into_ref())
                .await
                .unwrap();
        }

        assert!(wait_until(|| hooks.jobs.load(Ordering::SeqCst) == 3).await);
        assert!(wait_until(|| hooks.results.load(Ordering::SeqCst) == 3).await);
        worker.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_last_fault_tracks_beyond_queue_capacity() {
        let hooks = counting_hooks();
        let worker = Worker::with_hooks(8, hooks.clone());
        worker.start();

        let total = DEFAULT_CHANNEL_BUFFER + 50;
        let failing = |i: usize| {
            TaskJob::new(format!("fail-{}", i), || {
                Err(LifecycleError::ValidationFailure("boom".into()))
            })
            .into_ref()
        };

        for i in 0..total - 1 {
            worker.submit(failing(i)).await.unwrap();
        }
        assert!(wait_until(|| worker.stats().failed == (total - 1) as u64).await);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let last = failing(total - 1);
        let last_id = last.id();
        worker.submit(last).await.unwrap();

        assert!(wait_until(|| worker.stats().failed == total as u64).await);
        assert!(
            wait_until(|| worker
                .last_fault()
                .is_some_and(|f| f.job_id == Some(last_id)))
            .await
        );
        assert!(wait_until(|| hooks.faults.load(Ordering::SeqCst) == total).await);
        worker.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_with_timeout_aborts_stuck_job() {
        let worker = Worker::new(6);
        worker.start();

        worker
            .submit(
                TaskJob::from_future("stuck", async {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(())
                })
                .into_ref(),
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let err = worker
            .stop_with_timeout(Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Timeout { .. }));
        assert_eq!(worker.status(), WorkerStatus::Stopped);
    }
}
