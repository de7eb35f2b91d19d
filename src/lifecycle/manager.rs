/*!
 * Lifecycle Manager
 *
 * Registers processes, stages and events, drives stage transitions and
 * start/stop/restart/status for the whole system.
 *
 * Registries sit behind `parking_lot::RwLock`s. Entries are cloned out as
 * `Arc`s before any callback runs or any future is awaited, so no lock is held
 * across user code or an await point.
 *
 * Shutdown is signalled through a `watch` channel (the done queue). The OS
 * signal queue is an mpsc channel drained by `listen_for_signals`.
 */

use super::events::LifecycleEvent;
use super::signals::{forward_os_signals, ShutdownSignal};
use crate::core::errors::{EntityKind, LifecycleError, LifecycleResult};
use crate::core::limits::{
    DEFAULT_STOP_TIMEOUT, DEFAULT_WORKER_LIMIT, EVENT_QUEUE_SIZE, MAX_WORKER_LIMIT,
    SIGNAL_QUEUE_SIZE,
};
use crate::monitoring::OperationSpan;
use crate::process::{ManagedProcess, ProcessInfo};
use crate::stage::{base_stages, Stage, StageInfo};
use crate::worker::WorkerPool;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Builder for LifecycleManager
pub struct LifecycleManagerBuilder<T> {
    stop_timeout: Duration,
    worker_limit: usize,
    stages: Vec<Stage<T>>,
}

impl<T> LifecycleManagerBuilder<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            worker_limit: DEFAULT_WORKER_LIMIT,
            stages: Vec::new(),
        }
    }

    /// Deadline applied to each process and worker pool by `stop_all`
    #[must_use]
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Pool size of stages created through `define_stage`
    #[must_use]
    pub fn with_worker_limit(mut self, limit: usize) -> Self {
        self.worker_limit = limit;
        self
    }

    /// Register the init/execute/end stages
    #[must_use]
    pub fn with_base_stages(mut self) -> Self {
        self.stages.extend(base_stages());
        self
    }

    #[must_use]
    pub fn with_stage(mut self, stage: Stage<T>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn build(self) -> LifecycleResult<LifecycleManager<T>> {
        if self.worker_limit > MAX_WORKER_LIMIT {
            return Err(LifecycleError::ValidationFailure(format!(
                "worker limit {} exceeds maximum of {}",
                self.worker_limit, MAX_WORKER_LIMIT
            )));
        }

        let manager = LifecycleManager::with_settings(self.stop_timeout, self.worker_limit);

        for stage in self.stages {
            manager.register_stage(stage)?;
        }

        info!(
            manager_id = %manager.id,
            stages = manager.stages.read().len(),
            "Lifecycle manager initialized"
        );
        Ok(manager)
    }
}

impl<T> Default for LifecycleManagerBuilder<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

pub struct LifecycleManager<T = serde_json::Value> {
    id: Uuid,
    processes: RwLock<BTreeMap<String, Arc<ManagedProcess>>>,
    stages: RwLock<BTreeMap<String, Arc<Stage<T>>>>,
    current: RwLock<Option<String>>,
    event_tx: broadcast::Sender<LifecycleEvent<T>>,
    signal_tx: mpsc::Sender<ShutdownSignal>,
    signal_rx: Mutex<Option<mpsc::Receiver<ShutdownSignal>>>,
    done_tx: watch::Sender<bool>,
    stop_timeout: Duration,
    worker_limit: usize,
}

impl<T> LifecycleManager<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn builder() -> LifecycleManagerBuilder<T> {
        LifecycleManagerBuilder::new()
    }

    /// Manager with default settings and no stages
    pub fn new() -> Self {
        Self::with_settings(DEFAULT_STOP_TIMEOUT, DEFAULT_WORKER_LIMIT)
    }

    fn with_settings(stop_timeout: Duration, worker_limit: usize) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_QUEUE_SIZE);
        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_QUEUE_SIZE);
        let (done_tx, _) = watch::channel(false);
        Self {
            id: Uuid::new_v4(),
            processes: RwLock::new(BTreeMap::new()),
            stages: RwLock::new(BTreeMap::new()),
            current: RwLock::new(None),
            event_tx,
            signal_tx,
            signal_rx: Mutex::new(Some(signal_rx)),
            done_tx,
            stop_timeout,
            worker_limit,
        }
    }

    #[inline]
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn stop_timeout(&self) -> Duration {
        self.stop_timeout
    }

    // =========================================================================
    // Registration
    // =========================================================================

    pub fn register_process(&self, process: ManagedProcess) -> LifecycleResult<Arc<ManagedProcess>> {
        let name = process.name().to_string();
        let mut processes = self.processes.write();
        if processes.contains_key(&name) {
            return Err(LifecycleError::already_exists(EntityKind::Process, name));
        }
        let process = Arc::new(process);
        processes.insert(name.clone(), Arc::clone(&process));
        info!(process = %name, "Process registered");
        Ok(process)
    }

    pub fn register_stage(&self, stage: Stage<T>) -> LifecycleResult<Arc<Stage<T>>> {
        let name = stage.name().to_string();
        let mut stages = self.stages.write();
        if stages.contains_key(&name) {
            return Err(LifecycleError::already_exists(EntityKind::Stage, name));
        }
        let stage = Arc::new(stage);
        stages.insert(name.clone(), Arc::clone(&stage));
        debug!(stage = %name, "Stage registered");
        Ok(stage)
    }

    /// Create and register an empty stage with a worker pool sized by the
    /// manager's worker limit
    pub fn define_stage(&self, name: impl Into<String>) -> LifecycleResult<Arc<Stage<T>>> {
        let stage = Stage::new(name).with_pool(WorkerPool::new(self.worker_limit)?);
        self.register_stage(stage)
    }

    pub fn register_event<F>(&self, stage: &str, event: &str, callback: F) -> LifecycleResult<()>
    where
        F: Fn(Option<&T>) + Send + Sync + 'static,
    {
        let target = self.require_stage(stage)?;
        target.add_event(event, Arc::new(callback))?;
        debug!(stage, event, "Event registered");
        Ok(())
    }

    pub fn remove_event(&self, stage: &str, event: &str) -> LifecycleResult<()> {
        self.require_stage(stage)?.remove_event(event)
    }

    pub fn stage(&self, name: &str) -> Option<Arc<Stage<T>>> {
        self.stages.read().get(name).cloned()
    }

    pub fn process(&self, name: &str) -> Option<Arc<ManagedProcess>> {
        self.processes.read().get(name).cloned()
    }

    pub fn stage_names(&self) -> Vec<String> {
        self.stages.read().keys().cloned().collect()
    }

    pub fn process_names(&self) -> Vec<String> {
        self.processes.read().keys().cloned().collect()
    }

    pub fn stage_info(&self) -> Vec<StageInfo> {
        self.stage_list().iter().map(|s| s.info()).collect()
    }

    pub fn process_info(&self) -> Vec<ProcessInfo> {
        self.process_list().iter().map(|p| p.info()).collect()
    }

    fn require_stage(&self, name: &str) -> LifecycleResult<Arc<Stage<T>>> {
        self.stage(name)
            .ok_or_else(|| LifecycleError::not_found(EntityKind::Stage, name))
    }

    fn require_process(&self, name: &str) -> LifecycleResult<Arc<ManagedProcess>> {
        self.process(name)
            .ok_or_else(|| LifecycleError::not_found(EntityKind::Process, name))
    }

    fn stage_list(&self) -> Vec<Arc<Stage<T>>> {
        self.stages.read().values().cloned().collect()
    }

    fn process_list(&self) -> Vec<Arc<ManagedProcess>> {
        self.processes.read().values().cloned().collect()
    }

    // =========================================================================
    // Events and stages
    // =========================================================================

    /// Run an event callback and republish it to subscribers.
    ///
    /// Failures (missing stage or event, panicking callback) are logged, not
    /// returned. Returns whether the callback ran to completion.
    pub fn trigger(&self, stage: &str, event: &str, data: Option<T>) -> bool {
        let Some(target) = self.stage(stage) else {
            error!(stage, event, "Trigger failed: stage not found");
            return false;
        };
        let Some(callback) = target.event(event) else {
            error!(stage, event, "Trigger failed: event not found");
            return false;
        };

        if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| callback(data.as_ref())))
        {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(stage, event, panic = %message, "Event callback panicked");
            return false;
        }

        debug!(stage, event, "Event triggered");
        self.publish(LifecycleEvent::Triggered {
            stage: stage.to_string(),
            event: event.to_string(),
            data,
        });
        true
    }

    /// Subscribe to the internal event queue
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent<T>> {
        self.event_tx.subscribe()
    }

    /// The event queue as a `Stream`, for push-notification endpoints.
    /// Lagged receivers yield an error item and continue.
    pub fn event_stream(&self) -> BroadcastStream<LifecycleEvent<T>> {
        BroadcastStream::new(self.subscribe())
    }

    fn publish(&self, event: LifecycleEvent<T>) {
        // No subscribers is not an error
        let _ = self.event_tx.send(event);
    }

    pub fn current_stage(&self) -> Option<Arc<Stage<T>>> {
        let current = self.current.read().clone()?;
        self.stage(&current)
    }

    /// Move to `target`. From no current stage any registered stage may be
    /// entered; afterwards the current stage must allow the move.
    pub fn transition_to(&self, target: &str) -> LifecycleResult<()> {
        let next = self.require_stage(target)?;

        let previous = {
            let mut current = self.current.write();
            let previous = match current.as_deref() {
                Some(name) => {
                    let stage = self.require_stage(name)?;
                    if !stage.can_transition_to(target) {
                        return Err(LifecycleError::StateConflict(format!(
                            "cannot transition from '{}' to '{}'",
                            name, target
                        )));
                    }
                    Some(stage)
                }
                None => None,
            };
            *current = Some(target.to_string());
            previous
        };

        if let Some(stage) = &previous {
            stage.exit();
        }
        next.enter();

        let from = previous.map(|s| s.name().to_string());
        info!(from = ?from, to = target, "Stage transition");
        self.publish(LifecycleEvent::Transitioned {
            from,
            to: target.to_string(),
        });
        Ok(())
    }

    /// Dispatch a closure to slot 0 of a stage's worker pool
    pub async fn dispatch<F>(&self, stage: &str, task: F) -> LifecycleResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let target = self.require_stage(stage)?;
        target.dispatch(task).await
    }

    /// Payload carried by a stage
    pub fn receive(&self, stage: &str) -> LifecycleResult<Option<T>> {
        Ok(self.require_stage(stage)?.payload())
    }

    // =========================================================================
    // Processes
    // =========================================================================

    /// Start every registered process. Stops at the first error; processes
    /// already started keep running.
    pub async fn start_all(&self) -> LifecycleResult<()> {
        let span = OperationSpan::new("start_all");
        span.finish(self.start_each().await)
    }

    /// Alias of `start_all`
    pub async fn start(&self) -> LifecycleResult<()> {
        self.start_all().await
    }

    async fn start_each(&self) -> LifecycleResult<()> {
        let mut started = 0usize;
        for process in self.process_list() {
            if let Err(e) = process.start().await {
                error!(
                    process = %process.name(),
                    started,
                    error = %e,
                    "Failed to start process"
                );
                return Err(e);
            }
            started += 1;
            self.publish(LifecycleEvent::ProcessStarted {
                name: process.name().to_string(),
            });
        }
        info!(started, "Processes started");
        Ok(())
    }

    pub async fn start_process(&self, name: &str) -> LifecycleResult<()> {
        self.require_process(name)?.start().await?;
        self.publish(LifecycleEvent::ProcessStarted {
            name: name.to_string(),
        });
        Ok(())
    }

    /// Stop every process, keeping them registered. All processes are
    /// attempted; the first error is returned.
    pub async fn stop(&self) -> LifecycleResult<()> {
        let span = OperationSpan::new("stop");
        let mut first_error = None;
        for process in self.process_list() {
            match process.stop().await {
                Ok(()) => self.publish(LifecycleEvent::ProcessStopped {
                    name: process.name().to_string(),
                }),
                Err(e) => {
                    error!(process = %process.name(), error = %e, "Failed to stop process");
                    first_error.get_or_insert(e);
                }
            }
        }
        span.finish(first_error.map_or(Ok(()), Err))
    }

    pub async fn stop_process(&self, name: &str) -> LifecycleResult<()> {
        self.require_process(name)?.stop().await?;
        self.publish(LifecycleEvent::ProcessStopped {
            name: name.to_string(),
        });
        Ok(())
    }

    /// Stop every process and every stage's workers using the manager's stop
    /// timeout. Processes that stopped are removed from the registry.
    pub async fn stop_all(&self) -> LifecycleResult<()> {
        self.stop_all_with_timeout(self.stop_timeout).await
    }

    pub async fn stop_all_with_timeout(&self, timeout: Duration) -> LifecycleResult<()> {
        let span = OperationSpan::new("stop_all");
        let mut first_error = None;

        for process in self.process_list() {
            let name = process.name().to_string();
            let outcome = match tokio::time::timeout(timeout, process.stop()).await {
                Ok(result) => result,
                Err(_) => Err(LifecycleError::Timeout {
                    operation: format!("stop process {}", name),
                    timeout_ms: timeout.as_millis() as u64,
                }),
            };
            match outcome {
                Ok(()) => {
                    self.processes.write().remove(&name);
                    self.publish(LifecycleEvent::ProcessStopped { name });
                }
                Err(e) => {
                    error!(process = %name, error = %e, "Failed to stop process");
                    first_error.get_or_insert(e);
                }
            }
        }

        for stage in self.stage_list() {
            let Some(pool) = stage.pool() else { continue };
            if let Err(e) = pool.stop_all(Some(timeout)).await {
                warn!(stage = %stage.name(), error = %e, "Failed to stop stage workers");
                first_error.get_or_insert(e);
            }
        }

        span.finish(first_error.map_or(Ok(()), Err))
    }

    /// Stop then start every process
    pub async fn restart(&self) -> LifecycleResult<()> {
        let span = OperationSpan::new("restart");
        let result: LifecycleResult<()> = async {
            self.stop().await?;
            self.start_each().await
        }
        .await;
        span.finish(result)
    }

    pub async fn restart_process(&self, name: &str) -> LifecycleResult<()> {
        self.require_process(name)?.restart().await
    }

    /// One-line summary of every process
    pub fn status(&self) -> String {
        let processes = self.process_list();
        if processes.is_empty() {
            return "no processes".to_string();
        }
        processes
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }

    // =========================================================================
    // Signals and shutdown
    // =========================================================================

    /// Sender feeding the signal queue
    pub fn signal_sender(&self) -> mpsc::Sender<ShutdownSignal> {
        self.signal_tx.clone()
    }

    pub fn raise_signal(&self, signal: ShutdownSignal) -> LifecycleResult<()> {
        self.signal_tx.try_send(signal).map_err(|e| {
            LifecycleError::StateConflict(format!("signal queue rejected {}: {}", signal, e))
        })
    }

    /// Forward SIGINT/SIGTERM/SIGQUIT into the signal queue
    pub fn install_signal_handlers(&self) -> JoinHandle<()> {
        forward_os_signals(self.signal_sender())
    }

    /// Close the done queue
    pub fn shutdown(&self) {
        if !self.done_tx.send_replace(true) {
            info!(manager_id = %self.id, "Lifecycle manager shutting down");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        *self.done_tx.borrow()
    }

    /// Receiver observing the done queue; its value turns `true` on shutdown
    pub fn done(&self) -> watch::Receiver<bool> {
        self.done_tx.subscribe()
    }

    /// Resolve once the done queue is closed
    pub async fn wait_for_shutdown(&self) {
        let mut done = self.done();
        let _ = done.wait_for(|closed| *closed).await;
    }

    /// Select over the event queue, the done queue and the signal queue
    /// until the done queue closes or a signal has been handled. A signal
    /// stops everything and then closes the done queue.
    pub async fn listen_for_signals(&self) -> LifecycleResult<()> {
        let signals = self.signal_rx.lock().take();
        let mut signals = signals.ok_or_else(|| {
            LifecycleError::StateConflict("signal listener already running".to_string())
        })?;
        let mut events = self.subscribe();
        let mut done = self.done();

        info!(manager_id = %self.id, "Listening for signals");
        loop {
            let closed = *done.borrow_and_update();
            if closed {
                break;
            }
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => debug!(kind = event.kind(), "Lifecycle event"),
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Signal listener lagged behind the event queue");
                    }
                    Err(RecvError::Closed) => break,
                },

                changed = done.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }

                signal = signals.recv() => {
                    if let Some(signal) = signal {
                        info!(%signal, "Signal received, stopping all processes");
                        self.publish(LifecycleEvent::Signal(signal));
                        if let Err(e) = self.stop_all().await {
                            error!(error = %e, "Error stopping processes on signal");
                        }
                        self.shutdown();
                    }
                    break;
                }
            }
        }

        *self.signal_rx.lock() = Some(signals);
        debug!(manager_id = %self.id, "Signal listener stopped");
        Ok(())
    }
}

impl<T> Default for LifecycleManager<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for LifecycleManager<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let processes = self.processes.read().len();
        let stages = self.stages.read().len();
        let current = self.current.read().clone();
        f.debug_struct("LifecycleManager")
            .field("id", &self.id)
            .field("processes", &processes)
            .field("stages", &stages)
            .field("current", &current)
            .finish()
    }
}
