/*!
 * Stage
 *
 * A passive node of the lifecycle graph. A stage owns its event callbacks,
 * enter/exit hooks, an optional payload and a worker pool. It never moves
 * itself; the lifecycle manager decides when to transition.
 */

use super::types::{
    EventFn, HookFn, StageInfo, BASE_KIND, END_STAGE, EXECUTE_STAGE, INIT_STAGE,
};
use crate::core::errors::{EntityKind, LifecycleError, LifecycleResult};
use crate::worker::{JobRef, TaskJob, Worker, WorkerPool};
use ahash::AHashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Slot that receives dispatched work
const DISPATCH_SLOT: usize = 0;

pub struct Stage<T = serde_json::Value> {
    id: Uuid,
    name: String,
    kind: String,
    description: String,
    tags: Vec<String>,
    metadata: HashMap<String, serde_json::Value>,
    possible_next: Vec<String>,
    possible_prev: Vec<String>,
    payload: RwLock<Option<T>>,
    events: RwLock<AHashMap<String, EventFn<T>>>,
    on_enter: RwLock<Option<HookFn>>,
    on_exit: RwLock<Option<HookFn>>,
    pool: RwLock<Option<Arc<WorkerPool>>>,
}

impl<T> Stage<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            kind: String::new(),
            description: String::new(),
            tags: Vec::new(),
            metadata: HashMap::new(),
            possible_next: Vec::new(),
            possible_prev: Vec::new(),
            payload: RwLock::new(None),
            events: RwLock::new(AHashMap::new()),
            on_enter: RwLock::new(None),
            on_exit: RwLock::new(None),
            pool: RwLock::new(None),
        }
    }

    #[must_use]
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn with_next<I, S>(mut self, stages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.possible_next = stages.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_prev<I, S>(mut self, stages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.possible_prev = stages.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_payload(self, payload: T) -> Self {
        *self.payload.write() = Some(payload);
        self
    }

    #[must_use]
    pub fn with_pool(self, pool: WorkerPool) -> Self {
        *self.pool.write() = Some(Arc::new(pool));
        self
    }

    #[inline]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn metadata(&self) -> &HashMap<String, serde_json::Value> {
        &self.metadata
    }

    pub fn possible_next(&self) -> &[String] {
        &self.possible_next
    }

    pub fn possible_prev(&self) -> &[String] {
        &self.possible_prev
    }

    pub fn payload(&self) -> Option<T> {
        self.payload.read().clone()
    }

    pub fn set_payload(&self, payload: Option<T>) {
        *self.payload.write() = payload;
    }

    /// Register the enter hook, replacing any previous one
    pub fn on_enter<F>(&self, hook: F) -> &Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.on_enter.write() = Some(Arc::new(hook));
        self
    }

    /// Register the exit hook, replacing any previous one
    pub fn on_exit<F>(&self, hook: F) -> &Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.on_exit.write() = Some(Arc::new(hook));
        self
    }

    /// Register an event callback, replacing any callback of the same name
    pub fn on_event<F>(&self, event: impl Into<String>, callback: F) -> &Self
    where
        F: Fn(Option<&T>) + Send + Sync + 'static,
    {
        self.events.write().insert(event.into(), Arc::new(callback));
        self
    }

    /// Register an event callback, failing if the name is taken
    pub fn add_event(&self, event: impl Into<String>, callback: EventFn<T>) -> LifecycleResult<()> {
        let event = event.into();
        let mut events = self.events.write();
        if events.contains_key(&event) {
            return Err(LifecycleError::already_exists(EntityKind::Event, event));
        }
        events.insert(event, callback);
        Ok(())
    }

    pub fn remove_event(&self, event: &str) -> LifecycleResult<()> {
        self.events
            .write()
            .remove(event)
            .map(|_| ())
            .ok_or_else(|| LifecycleError::not_found(EntityKind::Event, event))
    }

    pub fn event(&self, event: &str) -> Option<EventFn<T>> {
        self.events.read().get(event).cloned()
    }

    pub fn has_event(&self, event: &str) -> bool {
        self.events.read().contains_key(event)
    }

    /// Registered event names, sorted
    pub fn event_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.events.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Invoke an event callback. The callback runs outside the event lock.
    pub fn fire(&self, event: &str, data: Option<&T>) -> LifecycleResult<()> {
        let callback = self
            .event(event)
            .ok_or_else(|| LifecycleError::not_found(EntityKind::Event, event))?;
        callback(data);
        Ok(())
    }

    /// Run the enter hook, if any
    pub fn enter(&self) {
        let hook = self.on_enter.read().clone();
        debug!(stage = %self.name, "Entering stage");
        if let Some(hook) = hook {
            hook();
        }
    }

    /// Run the exit hook, if any
    pub fn exit(&self) {
        let hook = self.on_exit.read().clone();
        debug!(stage = %self.name, "Exiting stage");
        if let Some(hook) = hook {
            hook();
        }
    }

    /// True when `target` is a declared next or previous stage
    pub fn can_transition_to(&self, target: &str) -> bool {
        self.possible_next
            .iter()
            .chain(self.possible_prev.iter())
            .any(|s| s == target)
    }

    pub fn pool(&self) -> Option<Arc<WorkerPool>> {
        self.pool.read().clone()
    }

    pub fn set_pool(&self, pool: Arc<WorkerPool>) {
        *self.pool.write() = Some(pool);
    }

    /// Add one started worker to the stage's pool.
    ///
    /// Exactly one worker is added per call. When the stage has no pool yet,
    /// one is created with room for `n` workers (at least one).
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime; the new worker's task is
    /// spawned immediately.
    pub fn auto_scale(&self, n: usize) -> LifecycleResult<&Self> {
        if n != 1 {
            debug!(
                stage = %self.name,
                requested = n,
                "auto_scale adds a single worker per call"
            );
        }

        let pool = {
            let mut guard = self.pool.write();
            match guard.as_ref() {
                Some(pool) => Arc::clone(pool),
                None => {
                    let pool = Arc::new(WorkerPool::new(n.max(1))?);
                    *guard = Some(Arc::clone(&pool));
                    pool
                }
            }
        };

        let slot = pool.next_free_slot().ok_or_else(|| {
            LifecycleError::ValidationFailure(format!(
                "worker pool of stage '{}' is full ({} workers)",
                self.name,
                pool.worker_limit()
            ))
        })?;

        let worker = Arc::new(Worker::new(slot));
        pool.add_worker(slot, Arc::clone(&worker))?;
        worker.start();
        info!(stage = %self.name, slot, "Worker added to stage");
        Ok(self)
    }

    /// Wrap a closure as a job and route it to worker slot 0
    pub async fn dispatch<F>(&self, task: F) -> LifecycleResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let job = TaskJob::new(format!("{}-dispatch", self.name), move || {
            task();
            Ok(())
        });
        self.dispatch_job(job.into_ref()).await
    }

    /// Route a job to worker slot 0
    pub async fn dispatch_job(&self, job: JobRef) -> LifecycleResult<()> {
        let pool = self.pool().ok_or_else(|| {
            LifecycleError::ValidationFailure(format!(
                "stage '{}' has no worker pool",
                self.name
            ))
        })?;
        pool.send_to_worker(DISPATCH_SLOT, job).await
    }

    pub fn info(&self) -> StageInfo {
        StageInfo {
            id: self.id,
            name: self.name.clone(),
            kind: self.kind.clone(),
            description: self.description.clone(),
            tags: self.tags.clone(),
            possible_next: self.possible_next.clone(),
            possible_prev: self.possible_prev.clone(),
            events: self.event_names(),
            pool: self.pool().map(|p| p.stats()),
        }
    }
}

impl<T> std::fmt::Debug for Stage<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("next", &self.possible_next)
            .field("prev", &self.possible_prev)
            .finish()
    }
}

/// The static base graph: `init <-> execute <-> end`, with `end -> init`
/// for restarts
pub fn base_stages<T>() -> Vec<Stage<T>>
where
    T: Clone + Send + Sync + 'static,
{
    let init = Stage::new(INIT_STAGE)
        .with_kind(BASE_KIND)
        .with_description("Initialization stage")
        .with_next([EXECUTE_STAGE]);
    let execute = Stage::new(EXECUTE_STAGE)
        .with_kind(BASE_KIND)
        .with_description("Execution stage")
        .with_next([END_STAGE])
        .with_prev([INIT_STAGE]);
    let end = Stage::new(END_STAGE)
        .with_kind(BASE_KIND)
        .with_description("End stage")
        .with_next([INIT_STAGE])
        .with_prev([EXECUTE_STAGE]);

    for stage in [&init, &execute, &end] {
        let name = stage.name().to_string();
        stage.on_enter(move || debug!(stage = %name, "Stage started"));
    }

    vec![init, execute, end]
}
