/*!
 * Lifecycle Daemon - Main Entry Point
 *
 * Builds a lifecycle manager with the base stages, forwards OS signals into
 * it, serves the IPC control protocol and runs the signal listener until
 * shutdown.
 */

use anyhow::Context;
use lifecycle_kernel::{init_tracing, IpcServer, LifecycleConfig, LifecycleManager};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Lifecycle daemon starting...");

    let mut config = LifecycleConfig::load().context("Failed to load configuration")?;

    let manager: Arc<LifecycleManager> = Arc::new(
        LifecycleManager::builder()
            .with_stop_timeout(config.shutdown.stop_timeout())
            .with_worker_limit(config.workers.default_limit)
            .with_base_stages()
            .build()
            .context("Failed to build lifecycle manager")?,
    );

    let signals = manager.install_signal_handlers();

    let server = if config.ipc.enabled {
        let token = config.ensure_token();
        let server = IpcServer::bind(&config.ipc, token, Arc::clone(&manager))
            .await
            .context("Failed to start IPC server")?;
        Some(tokio::spawn(server.serve()))
    } else {
        info!("IPC server disabled");
        None
    };

    info!("Lifecycle daemon ready, press Ctrl+C to exit");

    if let Err(e) = manager.listen_for_signals().await {
        error!(error = %e, "Signal listener failed");
    }
    manager.shutdown();

    signals.abort();
    if let Some(server) = server {
        if let Err(e) = server.await {
            error!(error = %e, "IPC server task failed");
        }
    }

    info!("Lifecycle daemon stopped");
    Ok(())
}
