/*!
 * IPC Server
 *
 * TCP accept loop for the control protocol. One task per connection; every
 * task and the accept loop end when the manager's done queue closes.
 */

use super::protocol::{
    status_reply, token_matches, Command, ACCESS_DENIED, RESTARTED, STARTED, STOPPED,
    UNKNOWN_COMMAND,
};
use crate::config::IpcConfig;
use crate::core::errors::{LifecycleError, LifecycleResult};
use crate::core::limits::MAX_IPC_LINE;
use crate::lifecycle::LifecycleManager;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub struct IpcServer<T = serde_json::Value> {
    listener: TcpListener,
    token: Arc<str>,
    manager: Arc<LifecycleManager<T>>,
    connections: Arc<AtomicU64>,
}

impl<T> IpcServer<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Bind to the configured address. The token must already be resolved.
    pub async fn bind(
        config: &IpcConfig,
        token: impl Into<Arc<str>>,
        manager: Arc<LifecycleManager<T>>,
    ) -> LifecycleResult<Self> {
        let token = token.into();
        if token.is_empty() {
            return Err(LifecycleError::InvalidConfig(
                "IPC token must not be empty".to_string(),
            ));
        }

        let address = config.address();
        let listener = TcpListener::bind(&address).await.map_err(|e| {
            LifecycleError::InvalidConfig(format!("cannot bind IPC server to {}: {}", address, e))
        })?;
        info!(address = %address, "IPC server listening");

        Ok(Self {
            listener,
            token,
            manager,
            connections: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn local_addr(&self) -> LifecycleResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Total connections accepted so far
    pub fn connection_count(&self) -> u64 {
        self.connections.load(Ordering::Relaxed)
    }

    /// Accept connections until the manager shuts down
    pub async fn serve(self) {
        let mut done = self.manager.done();

        loop {
            let closed = *done.borrow_and_update();
            if closed {
                break;
            }

            tokio::select! {
                changed = done.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }

                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        self.connections.fetch_add(1, Ordering::Relaxed);
                        debug!(%peer, "IPC connection accepted");
                        let connection = Connection {
                            token: Arc::clone(&self.token),
                            manager: Arc::clone(&self.manager),
                            done: self.manager.done(),
                        };
                        tokio::spawn(async move {
                            if let Err(e) = connection.handle(stream).await {
                                debug!(%peer, error = %e, "IPC connection ended with error");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "Failed to accept IPC connection"),
                },
            }
        }

        info!("IPC server stopped");
    }
}

struct Connection<T> {
    token: Arc<str>,
    manager: Arc<LifecycleManager<T>>,
    done: watch::Receiver<bool>,
}

impl<T> Connection<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn handle(mut self, stream: TcpStream) -> std::io::Result<()> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut line = Vec::new();

        if !self.read_line(&mut reader, &mut line).await? {
            return Ok(());
        }
        if !token_matches(&line, &self.token) {
            warn!("IPC connection rejected: invalid token");
            writer.write_all(ACCESS_DENIED.as_bytes()).await?;
            writer.shutdown().await?;
            return Ok(());
        }

        while self.read_line(&mut reader, &mut line).await? {
            let command = Command::parse(&String::from_utf8_lossy(&line));
            let reply = self.execute(command).await;
            writer.write_all(reply.as_bytes()).await?;
        }
        Ok(())
    }

    /// Read one line into `line`; `false` on EOF or shutdown
    async fn read_line<R>(&mut self, reader: &mut R, line: &mut Vec<u8>) -> std::io::Result<bool>
    where
        R: AsyncBufRead + Unpin,
    {
        line.clear();
        let closed = *self.done.borrow_and_update();
        if closed {
            return Ok(false);
        }
        tokio::select! {
            read = read_bounded_line(reader, line) => read,
            _ = self.done.changed() => Ok(false),
        }
    }

    async fn execute(&self, command: Command) -> String {
        match command {
            Command::Start => {
                if let Err(e) = self.manager.start_all().await {
                    error!(error = %e, "IPC START failed");
                }
                STARTED.to_string()
            }
            Command::Stop => {
                if let Err(e) = self.manager.stop().await {
                    error!(error = %e, "IPC STOP failed");
                }
                STOPPED.to_string()
            }
            Command::Restart => {
                if let Err(e) = self.manager.restart().await {
                    error!(error = %e, "IPC RESTART failed");
                }
                RESTARTED.to_string()
            }
            Command::Status => status_reply(&self.manager.status()),
            Command::Unknown => UNKNOWN_COMMAND.to_string(),
        }
    }
}

/// Read one line of at most `MAX_IPC_LINE` bytes. The rest of a longer line
/// is discarded so every client line gets exactly one reply.
async fn read_bounded_line<R>(reader: &mut R, line: &mut Vec<u8>) -> std::io::Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    let read = (&mut *reader)
        .take(MAX_IPC_LINE as u64)
        .read_until(b'\n', line)
        .await?;
    if read == 0 {
        return Ok(false);
    }
    if read == MAX_IPC_LINE && line.last() != Some(&b'\n') {
        debug!(limit = MAX_IPC_LINE, "IPC line too long, discarding remainder");
        discard_line(reader).await?;
    }
    Ok(true)
}

/// Skip input up to and including the next newline
async fn discard_line<R>(reader: &mut R) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let (newline, available) = {
            let buf = reader.fill_buf().await?;
            (buf.iter().position(|b| *b == b'\n'), buf.len())
        };
        match newline {
            Some(pos) => {
                reader.consume(pos + 1);
                return Ok(());
            }
            None if available == 0 => return Ok(()),
            None => reader.consume(available),
        }
    }
}
