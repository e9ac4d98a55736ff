//! Connection task of one node
//!
//! ```text
//! connect ──▶ [SASL first, input held back] ──▶ select loop ──fault──▶ setup_resend
//!    ▲                                              │                       │
//!    └──────────────────── backoff ◀────────────────┴───────────────────────┘
//! ```
//!
//! The loop waits on whichever comes first: a submission wakeup, socket
//! readable, socket writable (only while `wbuf` holds bytes), or shutdown.

use std::sync::Arc;
use std::time::Duration;

use bytes::Buf;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::queue::NodeIo;
use super::Node;
use crate::config::ClientConfig;
use crate::error::{CacheError, Result};
use crate::metrics;
use crate::ops::{self, NoopCallback, Operation};

const BASE_RECONNECT_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub connect_timeout: Duration,
    pub max_reconnect_delay: Duration,
}

impl From<&ClientConfig> for ConnectionSettings {
    fn from(config: &ClientConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            max_reconnect_delay: config.max_reconnect_delay(),
        }
    }
}

/// Delay before reconnect attempt `attempt` (1-based): doubles from
/// 100ms up to `max`.
pub fn reconnect_delay(attempt: u32, max: Duration) -> Duration {
    let shift = attempt.saturating_sub(1).min(16);
    BASE_RECONNECT_DELAY
        .saturating_mul(1u32 << shift)
        .min(max)
}

/// Drives `node` until shutdown, reconnecting after faults.
pub async fn run(node: Arc<Node>, mut io: NodeIo, settings: ConnectionSettings) {
    let mut shutdown = node.shutdown_signal();
    let mut attempt: u32 = 0;

    while !*shutdown.borrow() {
        if attempt > 0 {
            metrics::RECONNECTS.with_label_values(&[node.name()]).inc();
        }
        match connect(node.name(), settings.connect_timeout).await {
            Ok(stream) => {
                attempt = 0;
                node.health().reset();
                metrics::CONNECTED_NODES.inc();
                info!(node = %node.name(), "Connected");

                let result = drive(&node, &mut io, stream, &mut shutdown).await;
                metrics::CONNECTED_NODES.dec();
                if node.credentials().is_some() {
                    node.set_authenticated(false);
                }
                match result {
                    Ok(()) => break,
                    Err(e) => {
                        warn!(node = %node.name(), error = %e, "Connection lost");
                        io.setup_resend("connection lost");
                    }
                }
            }
            Err(e) => {
                warn!(node = %node.name(), error = %e, attempt, "Connect failed");
            }
        }

        attempt += 1;
        let delay = reconnect_delay(attempt, settings.max_reconnect_delay);
        debug!(node = %node.name(), delay_ms = delay.as_millis() as u64, "Reconnecting after delay");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => {}
        }
    }

    io.destroy("node shut down");
}

async fn connect(addr: &str, timeout: Duration) -> Result<TcpStream> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| CacheError::NodeUnavailable(format!("connect to {} timed out", addr)))??;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Runs one established connection. `Ok` means shutdown was requested.
async fn drive(
    node: &Arc<Node>,
    io: &mut NodeIo,
    stream: TcpStream,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<()> {
    let (mut reader, mut writer) = stream.into_split();

    let mut auth_op: Option<Arc<Operation>> = node.credentials().map(|creds| {
        let op = ops::sasl_plain(&creds.username, &creds.password, Arc::new(NoopCallback));
        op.set_node(Arc::downgrade(node));
        io.push_front(op.clone());
        op
    });

    loop {
        if auth_op.is_none() {
            io.copy_input_queue();
        }
        io.fill_write_buffer();

        tokio::select! {
            _ = node.wakeup().notified() => {}
            read = reader.read_buf(&mut io.rbuf) => {
                if read? == 0 {
                    return Err(CacheError::NodeUnavailable(format!(
                        "{} closed the connection",
                        node.name()
                    )));
                }
                io.process_read_buffer()?;
                if let Some(op) = auth_op.as_ref().filter(|op| op.state().is_terminal()) {
                    match op.status() {
                        Some(status) if status.is_success() => {
                            info!(node = %node.name(), "Authenticated");
                            node.set_authenticated(true);
                            auth_op = None;
                        }
                        status => {
                            return Err(CacheError::NodeUnavailable(format!(
                                "authentication with {} failed: {}",
                                node.name(),
                                status.map(|s| s.to_string()).unwrap_or_default()
                            )));
                        }
                    }
                }
            }
            written = writer.write(&io.wbuf), if !io.wbuf.is_empty() => {
                let n = written?;
                io.wbuf.advance(n);
            }
            _ = shutdown.changed() => {
                let _ = writer.shutdown().await;
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_then_caps() {
        let max = Duration::from_secs(2);
        assert_eq!(reconnect_delay(1, max), Duration::from_millis(100));
        assert_eq!(reconnect_delay(2, max), Duration::from_millis(200));
        assert_eq!(reconnect_delay(4, max), Duration::from_millis(800));
        assert_eq!(reconnect_delay(6, max), max);
        assert_eq!(reconnect_delay(u32::MAX, max), max);
    }
}
