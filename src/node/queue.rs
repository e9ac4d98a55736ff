//! Operation queues and byte buffers of one connection
//!
//! Owned by the connection task; nothing here touches a socket, so the
//! packing and dispatch rules can be exercised directly.
//!
//! ```text
//! input (mpsc) ──copy_input_queue──▶ write_q ──fill_write_buffer──▶ wbuf ──▶ socket
//!                                       │
//!                                       └── fully copied ──▶ read_q ◀── rbuf ◀── socket
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use bytes::BytesMut;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::Node;
use crate::config::ClientConfig;
use crate::error::{CacheError, OperationException, Result};
use crate::metrics;
use crate::ops::{self, BatchCommand, BatchFamily, FrameOutcome, Operation, OperationCallback};
use crate::protocol::{Frame, OperationStatus, RES_MAGIC};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoSettings {
    pub read_buffer_size: usize,
    pub write_buffer_size: usize,
    pub write_queue_capacity: usize,
    pub optimize: bool,
    pub max_batch_keys: usize,
    pub max_batch_bytes: usize,
}

impl From<&ClientConfig> for IoSettings {
    fn from(config: &ClientConfig) -> Self {
        Self {
            read_buffer_size: config.read_buffer_size,
            write_buffer_size: config.write_buffer_size,
            write_queue_capacity: config.write_queue_capacity,
            optimize: config.optimize,
            max_batch_keys: config.max_batch_keys,
            max_batch_bytes: config.max_batch_bytes,
        }
    }
}

impl Default for IoSettings {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

/// Terminal observer of batches: logs the aggregate outcome.
struct BatchObserver {
    node: String,
}

impl OperationCallback for BatchObserver {
    fn received_status(&self, status: &OperationStatus) {
        if !status.is_success() {
            debug!(node = %self.node, %status, "Batch finished with a failing sub-operation");
        }
    }

    fn complete(&self) {}
}

pub struct NodeIo {
    name: String,
    node: Weak<Node>,
    input: mpsc::Receiver<Arc<Operation>>,
    write_q: VecDeque<Arc<Operation>>,
    read_q: VecDeque<Arc<Operation>>,
    settings: IoSettings,
    batch_observer: Arc<dyn OperationCallback>,
    pub(crate) wbuf: BytesMut,
    pub(crate) rbuf: BytesMut,
}

impl NodeIo {
    pub fn new(
        name: impl Into<String>,
        input: mpsc::Receiver<Arc<Operation>>,
        node: Weak<Node>,
        settings: IoSettings,
    ) -> Self {
        let name = name.into();
        Self {
            batch_observer: Arc::new(BatchObserver { node: name.clone() }),
            name,
            node,
            input,
            write_q: VecDeque::new(),
            read_q: VecDeque::new(),
            wbuf: BytesMut::with_capacity(settings.write_buffer_size),
            rbuf: BytesMut::with_capacity(settings.read_buffer_size),
            settings,
        }
    }

    pub fn write_queue_len(&self) -> usize {
        self.write_q.len()
    }

    pub fn read_queue_len(&self) -> usize {
        self.read_q.len()
    }

    pub fn has_pending_writes(&self) -> bool {
        !self.wbuf.is_empty() || !self.write_q.is_empty()
    }

    /// Puts `op` ahead of everything already queued for writing.
    pub fn push_front(&mut self, op: Arc<Operation>) {
        self.write_q.push_front(op);
    }

    /// Moves submissions into the write queue while it has room.
    pub fn copy_input_queue(&mut self) -> usize {
        let mut moved = 0;
        while self.write_q.len() < self.settings.write_queue_capacity {
            match self.input.try_recv() {
                Ok(op) if op.is_cancelled() => {}
                Ok(op) => {
                    self.write_q.push_back(op);
                    moved += 1;
                }
                Err(_) => break,
            }
        }
        moved
    }

    /// Packs queued request bytes into `wbuf` until it is full.
    pub fn fill_write_buffer(&mut self) {
        while self.wbuf.len() < self.settings.write_buffer_size {
            let op = match self.write_q.front() {
                Some(op) => op.clone(),
                None => break,
            };
            if !op.write_started() {
                if op.is_cancelled() {
                    self.write_q.pop_front();
                    continue;
                }
                if self.settings.optimize {
                    self.optimize();
                }
            }
            let op = match self.write_q.front() {
                Some(op) => op.clone(),
                None => break,
            };

            let room = self.settings.write_buffer_size - self.wbuf.len();
            op.fill(&mut self.wbuf, room);
            if op.write_remaining() > 0 {
                break;
            }
            self.write_q.pop_front();
            op.write_complete();
            self.read_q.push_back(op);
        }
    }

    /// Replaces a run of same-family operations at the head of the write
    /// queue with one pipelined batch.
    fn optimize(&mut self) {
        let family = match self.write_q.front().and_then(|op| BatchCommand::family_of(op)) {
            Some(family) => family,
            None => return,
        };

        let mut count = 0;
        let mut bytes = 0;
        for op in self.write_q.iter() {
            if count >= self.settings.max_batch_keys
                || op.write_started()
                || op.is_cancelled()
                || BatchCommand::family_of(op) != Some(family)
            {
                break;
            }
            let size = op.write_remaining();
            if count > 0 && bytes + size > self.settings.max_batch_bytes {
                break;
            }
            bytes += size;
            count += 1;
        }
        if count < 2 {
            return;
        }

        let subs: Vec<_> = self.write_q.drain(..count).collect();
        let batch = ops::batch(family, subs, self.batch_observer.clone());
        batch.set_node(self.node.clone());
        let label = match family {
            BatchFamily::Get => "get",
            BatchFamily::Store => "store",
        };
        metrics::BATCHED_OPERATIONS
            .with_label_values(&[label])
            .inc_by(count as u64);
        debug!(node = %self.name, batch = %batch, bytes, "Optimized write queue");
        self.write_q.push_front(batch);
    }

    /// Dispatches every complete frame in `rbuf` to the head of the read
    /// queue. An error means the connection must be dropped.
    pub fn process_read_buffer(&mut self) -> Result<()> {
        loop {
            match Frame::parse(&mut self.rbuf, RES_MAGIC) {
                Ok(None) => return Ok(()),
                Ok(Some(frame)) => {
                    let op = match self.read_q.front() {
                        Some(op) => op.clone(),
                        None => {
                            warn!(node = %self.name, opaque = frame.opaque(), "Response with nothing waiting");
                            return Err(CacheError::Protocol(OperationException::general(
                                format!("unsolicited response opaque {}", frame.opaque()),
                            )));
                        }
                    };
                    match op.handle_frame(&frame) {
                        FrameOutcome::Pending => {}
                        FrameOutcome::Done => {
                            self.read_q.pop_front();
                        }
                        FrameOutcome::ConnectionFatal => {
                            self.read_q.pop_front();
                            return Err(CacheError::Protocol(OperationException::client(
                                format!("{} rejected, dropping connection", op),
                            )));
                        }
                    }
                }
                Err(e) => {
                    warn!(node = %self.name, error = %e, "Malformed response");
                    if let Some(op) = self.read_q.pop_front() {
                        op.fail(OperationException::general(e.reason.clone()));
                    }
                    if !e.consumed {
                        return Err(CacheError::Protocol(OperationException::general(
                            e.to_string(),
                        )));
                    }
                }
            }
        }
    }

    /// Prepares for a fresh connection after a fault.
    ///
    /// Operations awaiting a response are cancelled. A partially written
    /// operation is rewound when it is safe to send twice and cancelled
    /// otherwise. Unsent operations stay queued.
    pub fn setup_resend(&mut self, cause: &str) {
        for op in self.read_q.drain(..) {
            op.cancel(cause);
        }
        if let Some(op) = self.write_q.front().cloned() {
            if op.write_started() {
                if op.is_idempotent() && !op.is_cancelled() {
                    op.reset();
                } else {
                    op.cancel(cause);
                    self.write_q.pop_front();
                }
            }
        }
        self.write_q.retain(|op| !op.is_cancelled());
        self.wbuf.clear();
        self.rbuf.clear();
        debug!(node = %self.name, pending = self.write_q.len(), "Set up for resend");
    }

    /// Cancels everything this connection still holds.
    pub fn destroy(&mut self, cause: &str) {
        for op in self.read_q.drain(..).chain(self.write_q.drain(..)) {
            op.cancel(cause);
        }
        self.input.close();
        while let Ok(op) = self.input.try_recv() {
            op.cancel(cause);
        }
        self.wbuf.clear();
        self.rbuf.clear();
    }
}
