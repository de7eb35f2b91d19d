/*!
 * Managed Channel
 *
 * A bounded data queue paired with a control sideband and an atomically
 * cached last value.
 *
 * # Architecture
 *
 * - **Data queue**: producers and consumers use it directly, no cache locking
 * - **Mirror queue**: every sent value is mirrored here while a monitor runs
 * - **Monitor task**: sole writer of the cache, serializes control commands
 * - **Cache**: `ArcSwapOption`, updated by compare-and-swap, read lock-free
 *
 * At most one monitor task is active per channel. Stopping the monitor
 * closes the control and mirror queues and leaves the channel ready for a
 * new `start_monitor` call.
 */

use super::types::{ChannelCommand, ChannelSnapshot};
use crate::core::errors::{EntityKind, LifecycleError, LifecycleResult};
use crate::core::limits::{CONTROL_QUEUE_SIZE, MIN_CHANNEL_BUFFER};
use arc_swap::ArcSwapOption;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

type SharedReceiver<T> = Arc<AsyncMutex<mpsc::Receiver<T>>>;

struct Queues<T> {
    data_tx: Option<mpsc::Sender<T>>,
    data_rx: Option<SharedReceiver<T>>,
    mirror_tx: Option<mpsc::Sender<T>>,
}

impl<T> Queues<T> {
    fn open(buffer: usize) -> Self {
        let (tx, rx) = mpsc::channel(buffer);
        Self {
            data_tx: Some(tx),
            data_rx: Some(Arc::new(AsyncMutex::new(rx))),
            mirror_tx: None,
        }
    }

    fn closed() -> Self {
        Self {
            data_tx: None,
            data_rx: None,
            mirror_tx: None,
        }
    }
}

struct Monitor<T> {
    control_tx: mpsc::Sender<ChannelCommand<T>>,
    handle: JoinHandle<()>,
}

/// Generic data channel with a control sideband and cached last value
pub struct ManagedChannel<T> {
    id: Uuid,
    name: String,
    buffer: usize,
    queues: RwLock<Queues<T>>,
    last: Arc<ArcSwapOption<T>>,
    monitor: Mutex<Option<Monitor<T>>>,
}

impl<T> ManagedChannel<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create an open channel with the given data-queue capacity
    pub fn new(name: impl Into<String>, buffer: usize) -> Self {
        let buffer = buffer.max(MIN_CHANNEL_BUFFER);
        let name = name.into();
        debug!(channel = %name, buffer, "Managed channel created");
        Self {
            id: Uuid::new_v4(),
            name,
            buffer,
            queues: RwLock::new(Queues::open(buffer)),
            last: Arc::new(ArcSwapOption::empty()),
            monitor: Mutex::new(None),
        }
    }

    /// Seed the cached value before any monitor runs
    #[must_use]
    pub fn with_initial(self, value: T) -> Self {
        self.last.store(Some(Arc::new(value)));
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
    pub fn buffer(&self) -> usize {
        self.buffer
    }

    /// Push a value onto the data queue, mirroring it to the monitor if one runs
    pub async fn send(&self, value: T) -> LifecycleResult<()> {
        let (data_tx, mirror_tx) = self.senders()?;
        let mirrored = mirror_tx.map(|tx| (tx, value.clone()));

        data_tx
            .send(value)
            .await
            .map_err(|_| self.closed_error())?;

        if let Some((tx, value)) = mirrored {
            self.mirror(&tx, value);
        }
        Ok(())
    }

    /// Push without waiting for capacity
    pub fn try_send(&self, value: T) -> LifecycleResult<()> {
        let (data_tx, mirror_tx) = self.senders()?;
        let mirrored = mirror_tx.map(|tx| (tx, value.clone()));

        match data_tx.try_send(value) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                return Err(LifecycleError::StateConflict(format!(
                    "channel '{}' is full ({} slots)",
                    self.name, self.buffer
                )))
            }
            Err(TrySendError::Closed(_)) => return Err(self.closed_error()),
        }

        if let Some((tx, value)) = mirrored {
            self.mirror(&tx, value);
        }
        Ok(())
    }

    /// Receive the next value; `None` once the channel is closed and drained
    pub async fn recv(&self) -> Option<T> {
        let rx = self.queues.read().data_rx.clone()?;
        let mut rx = rx.lock().await;
        rx.recv().await
    }

    /// Cached last value, read without locking
    #[inline]
    pub fn get_last(&self) -> Option<Arc<T>> {
        self.last.load_full()
    }

    /// Spawn the monitor task. Returns `false` if one is already active.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn start_monitor(&self) -> bool {
        let mut monitor = self.monitor.lock();
        if monitor.as_ref().is_some_and(|m| !m.handle.is_finished()) {
            debug!(channel = %self.name, "Monitor already active");
            return false;
        }

        let (control_tx, control_rx) = mpsc::channel(CONTROL_QUEUE_SIZE);
        let (mirror_tx, mirror_rx) = mpsc::channel(self.buffer);

        let data_tx = {
            let mut queues = self.queues.write();
            queues.mirror_tx = Some(mirror_tx);
            queues.data_tx.as_ref().map(mpsc::Sender::downgrade)
        };

        let name = self.name.clone();
        let last = Arc::clone(&self.last);
        let handle = tokio::spawn(async move {
            run_monitor(name, last, control_rx, mirror_rx, data_tx).await;
        });

        info!(channel = %self.name, id = %self.id, "Channel monitor started");
        *monitor = Some(Monitor { control_tx, handle });
        true
    }

    /// Stop the monitor, close its control and mirror queues and wait for exit
    pub async fn stop_monitor(&self) {
        let monitor = self.monitor.lock().take();
        let Some(monitor) = monitor else {
            return;
        };
        self.queues.write().mirror_tx = None;

        let _ = monitor.control_tx.send(ChannelCommand::Stop).await;
        drop(monitor.control_tx);

        if let Err(e) = monitor.handle.await {
            warn!(channel = %self.name, error = %e, "Channel monitor exited abnormally");
        }
    }

    /// Submit a control command to the running monitor
    pub async fn control(&self, command: ChannelCommand<T>) -> LifecycleResult<()> {
        let control_tx = self
            .monitor
            .lock()
            .as_ref()
            .filter(|m| !m.handle.is_finished())
            .map(|m| m.control_tx.clone())
            .ok_or_else(|| {
                LifecycleError::StateConflict(format!(
                    "channel '{}' has no active monitor",
                    self.name
                ))
            })?;

        trace!(channel = %self.name, command = command.name(), "Control command");
        control_tx
            .send(command)
            .await
            .map_err(|_| self.closed_error())
    }

    /// Ask the monitor for the cached value, serialized with other commands
    pub async fn request_last(&self) -> LifecycleResult<Option<Arc<T>>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.control(ChannelCommand::Get(reply_tx)).await?;
        reply_rx.await.map_err(|_| self.closed_error())
    }

    #[inline]
    pub fn is_monitoring(&self) -> bool {
        self.monitor
            .lock()
            .as_ref()
            .is_some_and(|m| !m.handle.is_finished())
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.queues.read().data_tx.is_none()
    }

    /// Close every queue. Idempotent; the cached value is kept.
    pub fn close(&self) {
        if let Some(monitor) = self.monitor.lock().take() {
            // The task exits once its control queue is gone
            let _ = monitor.control_tx.try_send(ChannelCommand::Stop);
        }

        let mut queues = self.queues.write();
        if queues.data_tx.is_none() {
            return;
        }
        *queues = Queues::closed();
        debug!(channel = %self.name, "Channel closed");
    }

    /// Recreate the data queue of a closed channel
    pub fn reopen(&self) {
        let mut queues = self.queues.write();
        if queues.data_tx.is_some() {
            return;
        }
        *queues = Queues::open(self.buffer);
        debug!(channel = %self.name, "Channel reopened");
    }

    pub fn snapshot(&self) -> ChannelSnapshot {
        ChannelSnapshot {
            id: self.id,
            name: self.name.clone(),
            buffer: self.buffer,
            closed: self.is_closed(),
            monitoring: self.is_monitoring(),
            has_last: self.last.load().is_some(),
        }
    }

    fn senders(&self) -> LifecycleResult<(mpsc::Sender<T>, Option<mpsc::Sender<T>>)> {
        let queues = self.queues.read();
        let data_tx = queues.data_tx.clone().ok_or_else(|| self.closed_error())?;
        Ok((data_tx, queues.mirror_tx.clone()))
    }

    fn mirror(&self, tx: &mpsc::Sender<T>, value: T) {
        if let Err(TrySendError::Full(_)) = tx.try_send(value) {
            trace!(channel = %self.name, "Mirror queue full, cache update skipped");
        }
    }

    fn closed_error(&self) -> LifecycleError {
        LifecycleError::StateConflict(format!(
            "{} '{}' is closed",
            EntityKind::Channel,
            self.name
        ))
    }
}

impl<T> std::fmt::Debug for ManagedChannel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedChannel")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("buffer", &self.buffer)
            .finish()
    }
}

/// Monitor loop - single writer of the cached value
async fn run_monitor<T>(
    name: String,
    last: Arc<ArcSwapOption<T>>,
    mut control_rx: mpsc::Receiver<ChannelCommand<T>>,
    mut mirror_rx: mpsc::Receiver<T>,
    data_tx: Option<mpsc::WeakSender<T>>,
) where
    T: Clone + Send + Sync + 'static,
{
    loop {
        tokio::select! {
            biased;

            command = control_rx.recv() => {
                let Some(command) = command else { break };
                match command {
                    ChannelCommand::Stop => {
                        debug!(channel = %name, "Monitor stop requested");
                        break;
                    }
                    ChannelCommand::Get(reply) => {
                        let _ = reply.send(last.load_full());
                    }
                    ChannelCommand::Set(value) => {
                        swap_last(&name, &last, value);
                    }
                    ChannelCommand::Clear => {
                        last.store(None);
                    }
                    ChannelCommand::Save(value) => {
                        last.store(Some(Arc::new(value.clone())));
                        match data_tx.as_ref().and_then(mpsc::WeakSender::upgrade) {
                            Some(tx) => {
                                if tx.try_send(value).is_err() {
                                    warn!(channel = %name, "Save: data queue unavailable");
                                }
                            }
                            None => warn!(channel = %name, "Save: data queue closed"),
                        }
                    }
                }
            }

            Some(value) = mirror_rx.recv() => {
                swap_last(&name, &last, value);
            }
        }
    }

    debug!(channel = %name, "Channel monitor exited");
}

/// Replace the cached value using compare-and-swap
fn swap_last<T>(name: &str, last: &ArcSwapOption<T>, value: T) {
    let current = last.load();
    let previous = last.compare_and_swap(&current, Some(Arc::new(value)));
    if !same_value(&previous, &current) {
        trace!(channel = %name, "Cache changed under the monitor, update dropped");
    }
}

fn same_value<T>(a: &Option<Arc<T>>, b: &Option<Arc<T>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}
