/*!
 * Worker Tests
 * Custom jobs, skipped jobs and relaunching a stopped worker
 */

use futures::future::BoxFuture;
use futures::FutureExt;
use lifecycle_kernel::core::types::JobId;
use lifecycle_kernel::worker::JobStatus;
use lifecycle_kernel::{Job, LifecycleResult, TaskJob, Worker, WorkerStatus};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Job that runs only while its gate is open
struct GatedJob {
    id: JobId,
    open: Arc<AtomicBool>,
    runs: Arc<AtomicUsize>,
}

impl Job for GatedJob {
    fn id(&self) -> JobId {
        self.id
    }

    fn name(&self) -> &str {
        "gated"
    }

    fn can_execute(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn execute(&self) -> BoxFuture<'_, LifecycleResult<()>> {
        async move {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        .boxed()
    }
}

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
async fn test_closed_gate_skips_job() {
    let worker = Worker::new(7);
    worker.start();

    let open = Arc::new(AtomicBool::new(false));
    let runs = Arc::new(AtomicUsize::new(0));
    let job = Arc::new(GatedJob {
        id: Uuid::new_v4(),
        open: open.clone(),
        runs: runs.clone(),
    });

    worker.submit(job.clone()).await.unwrap();
    assert!(wait_until(|| worker.stats().skipped == 1).await);
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    open.store(true, Ordering::SeqCst);
    worker.submit(job).await.unwrap();
    assert!(wait_until(|| runs.load(Ordering::SeqCst) == 1).await);
    assert!(
        wait_until(|| worker
            .last_result()
            .is_some_and(|r| r.status == JobStatus::Succeeded && r.worker_id == 7))
        .await
    );

    worker.stop().await.unwrap();
}

#[tokio::test]
async fn test_worker_relaunches_after_stop() {
    let worker = Worker::new(0);
    assert!(worker.start());
    worker.stop().await.unwrap();
    assert_eq!(worker.status(), WorkerStatus::Stopped);

    assert!(worker.start());
    assert_eq!(worker.launch_count(), 2);

    let hits = Arc::new(AtomicUsize::new(0));
    let h = hits.clone();
    worker
        .submit(
            TaskJob::from_future("async", async move {
                h.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .into_ref(),
        )
        .await
        .unwrap();

    assert!(wait_until(|| hits.load(Ordering::SeqCst) == 1).await);
    worker.stop().await.unwrap();
    assert!(!worker.is_running());
}
