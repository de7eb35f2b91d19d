/*!
 * OS Signals
 *
 * Forwards termination signals into the manager's signal queue.
 *
 * On Unix SIGINT, SIGTERM and SIGQUIT are handled, with `ctrl_c` as a
 * fallback. Elsewhere only `ctrl_c` is awaited.
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Signal delivered on the manager's signal queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
    Quit,
    /// Raised programmatically, e.g. from tests or an admin command
    Requested,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShutdownSignal::Interrupt => "SIGINT",
            ShutdownSignal::Terminate => "SIGTERM",
            ShutdownSignal::Quit => "SIGQUIT",
            ShutdownSignal::Requested => "requested",
        };
        f.write_str(name)
    }
}

/// Wait for the next termination signal
#[cfg(unix)]
pub async fn next_os_signal() -> std::io::Result<ShutdownSignal> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    let received = tokio::select! {
        res = tokio::signal::ctrl_c() => { res?; ShutdownSignal::Interrupt }
        _ = sigint.recv() => ShutdownSignal::Interrupt,
        _ = sigterm.recv() => ShutdownSignal::Terminate,
        _ = sigquit.recv() => ShutdownSignal::Quit,
    };
    Ok(received)
}

#[cfg(not(unix))]
pub async fn next_os_signal() -> std::io::Result<ShutdownSignal> {
    tokio::signal::ctrl_c().await?;
    Ok(ShutdownSignal::Interrupt)
}

/// Spawn a task that forwards OS signals into `tx` until the queue closes
pub fn forward_os_signals(tx: mpsc::Sender<ShutdownSignal>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let signal = match next_os_signal().await {
                Ok(signal) => signal,
                Err(e) => {
                    warn!(error = %e, "Failed to install OS signal handlers");
                    return;
                }
            };
            debug!(%signal, "OS signal received");
            if tx.send(signal).await.is_err() {
                return;
            }
        }
    })
}
