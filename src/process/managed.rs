/*!
 * Managed Process
 *
 * Supervised external command or in-process function with start, stop and
 * restart control.
 *
 * - custom function: spawned as a task, `start` returns immediately and
 *   failures are only logged
 * - wait mode: `start` resolves when the command exits; `stop` from another
 *   task kills it
 * - detached mode: `start` returns once spawned; the child handle is kept so
 *   `is_running` and `pid` stay accurate
 *
 * `stop` is an unconditional kill and a no-op when nothing is running.
 * Wait-mode children are killed on drop, so cancelling `start` also ends
 * the command.
 */

use super::types::{CustomFn, ExecutionMode, ProcessConfig, ProcessInfo};
use super::validation::{validate_argument, validate_command};
use crate::core::errors::{LifecycleError, LifecycleResult};
use crate::core::limits::MAX_PROCESS_RESTARTS;
use crate::core::types::OsPid;
use futures::FutureExt;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

enum RunState {
    Idle,
    Waiting {
        run: u64,
        pid: Option<OsPid>,
        kill_tx: oneshot::Sender<()>,
    },
    Detached {
        child: Child,
    },
    Custom {
        handle: JoinHandle<()>,
    },
}

impl RunState {
    fn mode(&self) -> ExecutionMode {
        match self {
            RunState::Idle => ExecutionMode::Idle,
            RunState::Waiting { .. } => ExecutionMode::Waiting,
            RunState::Detached { .. } => ExecutionMode::Detached,
            RunState::Custom { .. } => ExecutionMode::Custom,
        }
    }

    /// Reset to `Idle` if the execution has finished; returns whether it is
    /// still running
    fn refresh(&mut self) -> bool {
        let running = match self {
            RunState::Idle => false,
            RunState::Waiting { .. } => true,
            RunState::Detached { child } => matches!(child.try_wait(), Ok(None)),
            RunState::Custom { handle } => !handle.is_finished(),
        };
        if !running {
            *self = RunState::Idle;
        }
        running
    }
}

pub struct ManagedProcess {
    config: ProcessConfig,
    custom: Option<CustomFn>,
    state: Mutex<RunState>,
    starts: AtomicU64,
    restarts: AtomicU64,
    runs: AtomicU64,
}

impl ManagedProcess {
    /// Supervise an external command. The command and its arguments are
    /// validated up front.
    pub fn new(config: ProcessConfig) -> LifecycleResult<Self> {
        validate_command(&config.command)?;
        for arg in &config.args {
            validate_argument(arg)?;
        }
        Ok(Self::build(config, None))
    }

    /// Supervise an in-process function
    pub fn custom<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = LifecycleResult<()>> + Send + 'static,
    {
        let custom: CustomFn = Arc::new(move || f().boxed());
        Self::build(ProcessConfig::new(name, String::new()), Some(custom))
    }

    fn build(config: ProcessConfig, custom: Option<CustomFn>) -> Self {
        Self {
            config,
            custom,
            state: Mutex::new(RunState::Idle),
            starts: AtomicU64::new(0),
            restarts: AtomicU64::new(0),
            runs: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().refresh()
    }

    /// OS pid of the running command, `None` for functions or when stopped
    pub fn pid(&self) -> Option<OsPid> {
        let mut state = self.state.lock();
        state.refresh();
        match &*state {
            RunState::Waiting { pid, .. } => *pid,
            RunState::Detached { child } => child.id(),
            RunState::Idle | RunState::Custom { .. } => None,
        }
    }

    /// Number of automatic re-runs after unsuccessful exits
    pub fn restart_count(&self) -> u64 {
        self.restarts.load(Ordering::Relaxed)
    }

    pub fn info(&self) -> ProcessInfo {
        let mut state = self.state.lock();
        let running = state.refresh();
        let pid = match &*state {
            RunState::Waiting { pid, .. } => *pid,
            RunState::Detached { child } => child.id(),
            _ => None,
        };
        ProcessInfo {
            name: self.config.name.clone(),
            command: self.config.command.clone(),
            args: self.config.args.clone(),
            mode: state.mode(),
            running,
            pid,
            starts: self.starts.load(Ordering::Relaxed),
            restarts: self.restart_count(),
        }
    }

    /// Start the process. Fails with `StateConflict` if it is already running.
    pub async fn start(&self) -> LifecycleResult<()> {
        if let Some(custom) = &self.custom {
            return self.start_custom(custom);
        }
        if self.config.wait {
            self.run_waiting().await
        } else {
            self.start_detached()
        }
    }

    /// Kill the process. No-op when it is not running.
    pub async fn stop(&self) -> LifecycleResult<()> {
        let previous = {
            let mut state = self.state.lock();
            if !state.refresh() {
                return Ok(());
            }
            std::mem::replace(&mut *state, RunState::Idle)
        };

        match previous {
            RunState::Idle => {}
            RunState::Waiting { pid, kill_tx, .. } => {
                if kill_tx.send(()).is_err() {
                    // The run was abandoned; its child is killed on drop
                    warn!(
                        process = %self.config.name,
                        os_pid = ?pid,
                        "Wait-mode run already gone"
                    );
                }
            }
            RunState::Detached { mut child } => {
                if let Err(e) = child.kill().await {
                    let mut state = self.state.lock();
                    if matches!(*state, RunState::Idle) {
                        *state = RunState::Detached { child };
                    }
                    return Err(LifecycleError::ProcessFailed {
                        name: self.config.name.clone(),
                        reason: format!("kill failed: {}", e),
                    });
                }
            }
            RunState::Custom { handle } => {
                handle.abort();
                let _ = handle.await;
            }
        }

        info!(process = %self.config.name, "Process stopped");
        Ok(())
    }

    /// Stop, then start. No backoff.
    pub async fn restart(&self) -> LifecycleResult<()> {
        self.stop().await?;
        self.start().await
    }

    fn ensure_idle(&self, state: &mut RunState) -> LifecycleResult<()> {
        if state.refresh() {
            return Err(LifecycleError::StateConflict(format!(
                "process '{}' is already running",
                self.config.name
            )));
        }
        Ok(())
    }

    fn spawn(&self, kill_on_drop: bool) -> LifecycleResult<Child> {
        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(kill_on_drop);

        let child = cmd.spawn().map_err(|e| {
            LifecycleError::SpawnFailed(format!("{}: {}", self.config.command, e))
        })?;
        self.starts.fetch_add(1, Ordering::Relaxed);
        info!(
            process = %self.config.name,
            command = %self.config.command,
            os_pid = ?child.id(),
            "Spawned process"
        );
        Ok(child)
    }

    fn start_custom(&self, custom: &CustomFn) -> LifecycleResult<()> {
        let mut state = self.state.lock();
        self.ensure_idle(&mut state)?;

        let future = custom();
        let name = self.config.name.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = future.await {
                error!(process = %name, error = %e, "Process function failed");
            }
        });

        *state = RunState::Custom { handle };
        self.starts.fetch_add(1, Ordering::Relaxed);
        info!(process = %self.config.name, "Process function started");
        Ok(())
    }

    fn start_detached(&self) -> LifecycleResult<()> {
        let mut state = self.state.lock();
        self.ensure_idle(&mut state)?;
        let child = self.spawn(false)?;
        *state = RunState::Detached { child };
        Ok(())
    }

    /// Run the command to completion, re-running failed exits when
    /// configured. The state stays `Waiting` across attempts so a `stop`
    /// between two attempts ends the run. Children are killed on drop, so a
    /// cancelled `start` leaves nothing running.
    async fn run_waiting(&self) -> LifecycleResult<()> {
        let run = self.runs.fetch_add(1, Ordering::Relaxed);
        let (kill_tx, mut kill_rx) = oneshot::channel();
        {
            let mut state = self.state.lock();
            self.ensure_idle(&mut state)?;
            *state = RunState::Waiting {
                run,
                pid: None,
                kill_tx,
            };
        }
        let _run = WaitingRun {
            state: &self.state,
            run,
        };

        let mut attempt = 0;
        loop {
            let mut child = {
                let mut state = self.state.lock();
                match &mut *state {
                    RunState::Waiting {
                        run: current, pid, ..
                    } if *current == run => {
                        let child = self.spawn(true)?;
                        *pid = child.id();
                        child
                    }
                    _ => {
                        info!(process = %self.config.name, "Process stopped before restart");
                        return Ok(());
                    }
                }
            };

            let exited = tokio::select! {
                status = child.wait() => Some(status),
                _ = &mut kill_rx => None,
            };

            let status = match exited {
                Some(status) => status,
                None => {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    return Ok(());
                }
            };

            if let RunState::Waiting {
                run: current, pid, ..
            } = &mut *self.state.lock()
            {
                if *current == run {
                    *pid = None;
                }
            }

            let status = status?;
            if status.success() {
                info!(process = %self.config.name, "Process exited");
                return Ok(());
            }

            if self.config.restart && attempt < MAX_PROCESS_RESTARTS {
                attempt += 1;
                self.restarts.fetch_add(1, Ordering::Relaxed);
                warn!(
                    process = %self.config.name,
                    %status,
                    attempt,
                    "Process exited unsuccessfully, restarting"
                );
                continue;
            }

            return Err(LifecycleError::ProcessFailed {
                name: self.config.name.clone(),
                reason: format!("exited with {}", status),
            });
        }
    }
}

/// Returns the state to `Idle` when a wait-mode run ends, including when
/// the `start` future is dropped mid-run
struct WaitingRun<'a> {
    state: &'a Mutex<RunState>,
    run: u64,
}

impl Drop for WaitingRun<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        if matches!(&*state, RunState::Waiting { run, .. } if *run == self.run) {
            *state = RunState::Idle;
        }
    }
}

impl fmt::Display for ManagedProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let info = self.info();
        match info.pid {
            Some(pid) => write!(
                f,
                "process '{}' (pid {}) running: {}",
                info.name, pid, info.running
            ),
            None => write!(f, "process '{}' running: {}", info.name, info.running),
        }
    }
}

impl fmt::Debug for ManagedProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedProcess")
            .field("config", &self.config)
            .field("custom", &self.custom.is_some())
            .finish()
    }
}
