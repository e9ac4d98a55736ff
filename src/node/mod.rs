//! Client-side view of one cache server
//!
//! A [`Node`] is the submission side: any task may hand it operations.
//! The connection task spawned with it owns the socket and the
//! [`NodeIo`] queues, and is the only place operations are written,
//! read and completed.

pub mod connection;
pub mod health;
pub mod queue;

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::{ClientConfig, Credentials};
use crate::error::{CacheError, Result};
use crate::ops::Operation;

pub use health::{ops_succeeded, ops_timed_out, NodeHealth, TimeoutRatioWindow};
pub use queue::{IoSettings, NodeIo};

pub struct Node {
    name: String,
    input: mpsc::Sender<Arc<Operation>>,
    wakeup: Notify,
    authenticated: watch::Sender<bool>,
    credentials: Option<Credentials>,
    auth_wait: Duration,
    health: NodeHealth,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    self_ref: Weak<Node>,
}

impl Node {
    /// Creates the node and its I/O queues without starting a connection.
    pub fn new(addr: impl Into<String>, config: &ClientConfig) -> (Arc<Self>, NodeIo) {
        let name = addr.into();
        let (tx, rx) = mpsc::channel(config.input_queue_capacity);
        let (authenticated, _) = watch::channel(config.auth.is_none());
        let (shutdown, _) = watch::channel(false);
        let node = Arc::new_cyclic(|weak| Node {
            name: name.clone(),
            input: tx,
            wakeup: Notify::new(),
            authenticated,
            credentials: config.auth.clone(),
            auth_wait: config.auth_wait(),
            health: NodeHealth::new(config.timeout_ratio_window),
            shutdown,
            task: Mutex::new(None),
            self_ref: weak.clone(),
        });
        let io = NodeIo::new(name, rx, Arc::downgrade(&node), IoSettings::from(config));
        (node, io)
    }

    /// Creates the node and spawns its connection task.
    pub fn spawn(addr: impl Into<String>, config: &ClientConfig) -> Arc<Self> {
        let (node, io) = Self::new(addr, config);
        let settings = connection::ConnectionSettings::from(config);
        let handle = tokio::spawn(connection::run(node.clone(), io, settings));
        *node.task.lock() = Some(handle);
        node
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn health(&self) -> &NodeHealth {
        &self.health
    }

    pub fn is_authenticated(&self) -> bool {
        *self.authenticated.borrow()
    }

    pub(crate) fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub(crate) fn set_authenticated(&self, value: bool) {
        self.authenticated.send_replace(value);
    }

    pub(crate) fn wakeup(&self) -> &Notify {
        &self.wakeup
    }

    pub(crate) fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Queues `op` for this node.
    ///
    /// While the node is authenticating the call waits up to the configured
    /// auth window; if that passes the operation is cancelled instead of
    /// queued.
    pub async fn add_op(&self, op: Arc<Operation>) -> Result<()> {
        op.set_node(self.self_ref.clone());

        if !self.is_authenticated() {
            let mut rx = self.authenticated.subscribe();
            let authed = tokio::time::timeout(self.auth_wait, rx.wait_for(|ok| *ok)).await;
            if !matches!(authed, Ok(Ok(_))) {
                debug!(node = %self.name, op = %op, "Cancelling operation behind authentication");
                op.cancel("authentication timeout");
                return Ok(());
            }
        }

        self.input.try_send(op).map_err(|e| match e {
            mpsc::error::TrySendError::Full(op) => {
                op.cancel("input queue full");
                CacheError::QueueFull(self.name.clone())
            }
            mpsc::error::TrySendError::Closed(op) => {
                op.cancel("node shut down");
                CacheError::NodeUnavailable(self.name.clone())
            }
        })?;
        self.wakeup.notify_one();
        Ok(())
    }

    /// Stops the connection task, cancelling whatever it still holds.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(node = %self.name, error = %e, "Connection task failed");
            }
        }
        info!(node = %self.name, "Node shut down");
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("authenticated", &self.is_authenticated())
            .field("continuous_timeouts", &self.health.continuous_timeouts())
            .finish()
    }
}
