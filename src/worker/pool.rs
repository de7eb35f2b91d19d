/*!
 * Worker Pool
 *
 * Fixed-capacity slot array of workers addressed by index. The slot array
 * always has exactly `limit` entries and `limit` stays within
 * `[0, MAX_WORKER_LIMIT]`. `add_worker` assigns into an existing slot; it never
 * grows the pool. `set_worker_limit` resizes the slot array but refuses to
 * drop occupied slots.
 */

use super::job::JobRef;
use super::worker::Worker;
use crate::core::errors::{EntityKind, LifecycleError, LifecycleResult};
use crate::core::limits::MAX_WORKER_LIMIT;
use crate::core::types::{Slot, WorkerStatus};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

struct PoolState {
    limit: usize,
    slots: Vec<Option<Arc<Worker>>>,
}

/// Pool statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PoolStats {
    pub id: Uuid,
    pub limit: usize,
    pub occupied: usize,
    pub running: usize,
    pub dispatched: u64,
    pub rejected: u64,
}

/// Bounded, slot-indexed collection of workers
pub struct WorkerPool {
    id: Uuid,
    state: RwLock<PoolState>,
    dispatched: AtomicU64,
    rejected: AtomicU64,
}

fn validate_limit(limit: usize) -> LifecycleResult<()> {
    if limit > MAX_WORKER_LIMIT {
        return Err(LifecycleError::ValidationFailure(format!(
            "worker limit {} exceeds maximum of {}",
            limit, MAX_WORKER_LIMIT
        )));
    }
    Ok(())
}

impl WorkerPool {
    /// Create a pool with `limit` empty slots
    pub fn new(limit: usize) -> LifecycleResult<Self> {
        validate_limit(limit)?;
        let id = Uuid::new_v4();
        debug!(pool_id = %id, limit, "Worker pool created");
        Ok(Self {
            id,
            state: RwLock::new(PoolState {
                limit,
                slots: vec![None; limit],
            }),
            dispatched: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        })
    }

    #[inline]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Length of the slot array
    #[inline]
    pub fn len(&self) -> usize {
        self.state.read().slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn worker_limit(&self) -> usize {
        self.state.read().limit
    }

    /// Number of occupied slots
    pub fn worker_count(&self) -> usize {
        self.state.read().slots.iter().flatten().count()
    }

    /// First empty slot, if any
    pub fn next_free_slot(&self) -> Option<Slot> {
        self.state.read().slots.iter().position(Option::is_none)
    }

    /// Assign a worker into an existing slot
    pub fn add_worker(&self, slot: Slot, worker: Arc<Worker>) -> LifecycleResult<()> {
        let mut state = self.state.write();
        let len = state.slots.len();
        let entry = state
            .slots
            .get_mut(slot)
            .ok_or(LifecycleError::OutOfRange { slot, len })?;
        if entry.is_some() {
            debug!(pool_id = %self.id, slot, "Replacing worker in occupied slot");
        }
        *entry = Some(worker);
        Ok(())
    }

    pub fn get_worker(&self, slot: Slot) -> LifecycleResult<Arc<Worker>> {
        let state = self.state.read();
        let len = state.slots.len();
        state
            .slots
            .get(slot)
            .ok_or(LifecycleError::OutOfRange { slot, len })?
            .clone()
            .ok_or_else(|| LifecycleError::not_found(EntityKind::Worker, format!("slot {}", slot)))
    }

    /// Empty a slot, returning the worker it held
    pub fn remove_worker(&self, slot: Slot) -> LifecycleResult<Option<Arc<Worker>>> {
        let mut state = self.state.write();
        let len = state.slots.len();
        let entry = state
            .slots
            .get_mut(slot)
            .ok_or(LifecycleError::OutOfRange { slot, len })?;
        Ok(entry.take())
    }

    /// Route a job into the worker at `slot`
    pub async fn send_to_worker(&self, slot: Slot, job: JobRef) -> LifecycleResult<()> {
        let worker = match self.get_worker(slot) {
            Ok(worker) => worker,
            Err(e) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };

        match worker.submit(job).await {
            Ok(()) => {
                self.dispatched.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Change the limit. The slot array follows the new limit; shrinking
    /// fails if it would drop an occupied slot.
    pub fn set_worker_limit(&self, limit: usize) -> LifecycleResult<()> {
        validate_limit(limit)?;
        let mut state = self.state.write();

        if state.slots.iter().skip(limit).any(Option::is_some) {
            return Err(LifecycleError::ValidationFailure(format!(
                "worker limit {} would drop occupied slots",
                limit
            )));
        }

        state.slots.resize(limit, None);
        state.limit = limit;
        info!(pool_id = %self.id, limit, "Worker limit updated");
        Ok(())
    }

    /// Replace the slot array. Shorter inputs are padded with empty slots.
    pub fn set_worker_pool(&self, mut workers: Vec<Option<Arc<Worker>>>) -> LifecycleResult<()> {
        let mut state = self.state.write();
        if workers.len() > state.limit {
            return Err(LifecycleError::ValidationFailure(format!(
                "worker pool of {} exceeds worker limit {}",
                workers.len(),
                state.limit
            )));
        }
        workers.resize(state.limit, None);
        state.slots = workers;
        Ok(())
    }

    /// Snapshot of the slot array
    pub fn workers(&self) -> Vec<Option<Arc<Worker>>> {
        self.state.read().slots.clone()
    }

    /// Start every worker in the pool; returns how many were newly started.
    /// Must run inside a tokio runtime, see `Worker::start`.
    pub fn start_all(&self) -> usize {
        self.occupied()
            .iter()
            .filter(|worker| worker.start())
            .count()
    }

    /// Stop every worker. All workers are attempted; the first error is returned.
    pub async fn stop_all(&self, timeout: Option<Duration>) -> LifecycleResult<()> {
        let mut first_error = None;
        for worker in self.occupied() {
            let result = match timeout {
                Some(d) => worker.stop_with_timeout(d).await,
                None => worker.stop().await,
            };
            if let Err(e) = result {
                warn!(pool_id = %self.id, worker_id = worker.id(), error = %e, "Failed to stop worker");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.read();
        let occupied: Vec<_> = state.slots.iter().flatten().collect();
        PoolStats {
            id: self.id,
            limit: state.limit,
            occupied: occupied.len(),
            running: occupied.iter().filter(|w| w.is_running()).count(),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }

    /// Per-slot status report, for diagnostics
    pub fn report(&self) -> String {
        let state = self.state.read();
        let mut report = format!(
            "WorkerPool {}\nWorkerCount: {} | WorkerLimit: {}\n",
            self.id,
            state.slots.iter().flatten().count(),
            state.limit
        );
        for (slot, worker) in state.slots.iter().enumerate() {
            let status = worker
                .as_ref()
                .map_or_else(|| "Empty".to_string(), |w| w.status().to_string());
            let _ = writeln!(report, "Worker {} | Status: {}", slot, status);
        }
        report
    }

    /// Log the report at debug level
    pub fn debug(&self) {
        for line in self.report().lines() {
            debug!(pool_id = %self.id, "{}", line);
        }
    }

    /// Status per slot, `None` for empty slots
    pub fn statuses(&self) -> Vec<Option<WorkerStatus>> {
        self.state
            .read()
            .slots
            .iter()
            .map(|w| w.as_ref().map(|w| w.status()))
            .collect()
    }

    fn occupied(&self) -> Vec<Arc<Worker>> {
        self.state.read().slots.iter().flatten().cloned().collect()
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("id", &self.id)
            .field("limit", &self.worker_limit())
            .field("workers", &self.worker_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::job::TaskJob;

    #[test]
    fn test_rejects_limit_above_max() {
        assert!(WorkerPool::new(MAX_WORKER_LIMIT).is_ok());
        let err = WorkerPool::new(MAX_WORKER_LIMIT + 1).unwrap_err();
        assert!(matches!(err, LifecycleError::ValidationFailure(_)));
    }

    #[test]
    fn test_zero_limit_pool() {
        let pool = WorkerPool::new(0).unwrap();
        assert!(pool.is_empty());
        assert_eq!(pool.next_free_slot(), None);
        assert!(matches!(
            pool.add_worker(0, Arc::new(Worker::new(0))),
            Err(LifecycleError::OutOfRange { slot: 0, len: 0 })
        ));
    }

    #[test]
    fn test_empty_slot_is_not_found() {
        let pool = WorkerPool::new(2).unwrap();
        assert!(matches!(
            pool.get_worker(1),
            Err(LifecycleError::NotFound { .. })
        ));
    }

    #[test]
    fn test_set_worker_limit_keeps_occupied_slots() {
        let pool = WorkerPool::new(4).unwrap();
        pool.add_worker(3, Arc::new(Worker::new(3))).unwrap();

        assert!(pool.set_worker_limit(2).is_err());
        assert_eq!(pool.len(), 4);

        pool.remove_worker(3).unwrap();
        pool.set_worker_limit(2).unwrap();
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.worker_limit(), 2);

        pool.set_worker_limit(6).unwrap();
        assert_eq!(pool.len(), 6);
    }

    #[test]
    fn test_set_worker_pool_validates_length() {
        let pool = WorkerPool::new(2).unwrap();
        let too_many = vec![None, None, None];
        assert!(pool.set_worker_pool(too_many).is_err());

        pool.set_worker_pool(vec![Some(Arc::new(Worker::new(9)))]).unwrap();
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.worker_count(), 1);
        assert_eq!(pool.get_worker(0).unwrap().id(), 9);
    }

    #[test]
    fn test_report_lists_every_slot() {
        let pool = WorkerPool::new(2).unwrap();
        pool.add_worker(0, Arc::new(Worker::new(0))).unwrap();
        let report = pool.report();
        assert!(report.contains("WorkerCount: 1 | WorkerLimit: 2"));
        assert!(report.contains("Worker 0 | Status: Stopped"));
        assert!(report.contains("Worker 1 | Status: Empty"));
    }

    #[tokio::test]
    async fn test_send_to_worker_counts() {
        let pool = WorkerPool::new(2).unwrap();
        pool.add_worker(0, Arc::new(Worker::new(0))).unwrap();

        let job = TaskJob::new("noop", || Ok(())).into_ref();
        pool.send_to_worker(0, job).await.unwrap();

        let job = TaskJob::new("noop", || Ok(())).into_ref();
        assert!(pool.send_to_worker(5, job).await.is_err());

        let stats = pool.stats();
        assert_eq!(stats.dispatched, 1);
        assert_eq!(stats.rejected, 1);
    }

    #[tokio::test]
    async fn test_start_and_stop_all() {
        let pool = WorkerPool::new(3).unwrap();
        pool.add_worker(0, Arc::new(Worker::new(0))).unwrap();
        pool.add_worker(2, Arc::new(Worker::new(2))).unwrap();

        assert_eq!(pool.start_all(), 2);
        assert_eq!(pool.start_all(), 0);
        assert_eq!(pool.stats().running, 2);

        pool.stop_all(Some(Duration::from_secs(1))).await.unwrap();
        assert_eq!(pool.stats().running, 0);
    }
}
