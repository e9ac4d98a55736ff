//! Operation lifecycle
//!
//! ```text
//! WriteQueued ──write bytes──▶ Writing ──all bytes copied──▶ Reading ──parsed──▶ Complete
//!      │  ▲                       │                              │
//!      │  └──────── reset ────────┘                              │
//!      └───────────────────────── cancel ───────────────────────┴──▶ Cancelled
//! ```
//!
//! State only moves forward, except `reset` which rewinds a queued or
//! partially written operation for resend. The terminal callback is guarded
//! by its own flag so a cancel racing a normal completion delivers exactly
//! one `received_status` + `complete` pair.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tracing::{debug, error, trace};

use super::callback::{OperationCallback, OperationData};
use super::command::{Command, Decoded};
use crate::error::{ErrorKind, OperationException};
use crate::metrics;
use crate::node::Node;
use crate::protocol::status::is_connection_fatal;
use crate::protocol::{Frame, OperationStatus, StatusCode};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_OPAQUE: AtomicU32 = AtomicU32::new(1);

/// Allocates a correlation id. Zero is never handed out.
pub(crate) fn next_opaque() -> u32 {
    loop {
        let opaque = NEXT_OPAQUE.fetch_add(1, Ordering::Relaxed);
        if opaque != 0 {
            return opaque;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum OperationState {
    WriteQueued = 0,
    Writing = 1,
    Reading = 2,
    Complete = 3,
    Cancelled = 4,
}

impl OperationState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => OperationState::WriteQueued,
            1 => OperationState::Writing,
            2 => OperationState::Reading,
            3 => OperationState::Complete,
            _ => OperationState::Cancelled,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OperationState::Complete | OperationState::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKind {
    Set,
    Add,
    Replace,
    Append,
    Prepend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchFamily {
    Get,
    Store,
}

/// Static description of what an operation does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Get,
    Gets,
    Store(StoreKind),
    Cas,
    Delete,
    Incr,
    Decr,
    Flush,
    NoOp,
    Version,
    SaslAuth,
    SortRange,
    Batch(BatchFamily),
}

impl OpKind {
    pub fn name(self) -> &'static str {
        match self {
            OpKind::Get => "get",
            OpKind::Gets => "gets",
            OpKind::Store(StoreKind::Set) => "set",
            OpKind::Store(StoreKind::Add) => "add",
            OpKind::Store(StoreKind::Replace) => "replace",
            OpKind::Store(StoreKind::Append) => "append",
            OpKind::Store(StoreKind::Prepend) => "prepend",
            OpKind::Cas => "cas",
            OpKind::Delete => "delete",
            OpKind::Incr => "incr",
            OpKind::Decr => "decr",
            OpKind::Flush => "flush",
            OpKind::NoOp => "noop",
            OpKind::Version => "version",
            OpKind::SaslAuth => "sasl-auth",
            OpKind::SortRange => "sort-range",
            OpKind::Batch(BatchFamily::Get) => "batch-get",
            OpKind::Batch(BatchFamily::Store) => "batch-store",
        }
    }

    pub fn is_read(self) -> bool {
        matches!(
            self,
            OpKind::Get
                | OpKind::Gets
                | OpKind::SortRange
                | OpKind::Version
                | OpKind::Batch(BatchFamily::Get)
        )
    }

    pub fn is_write(self) -> bool {
        matches!(
            self,
            OpKind::Store(_)
                | OpKind::Cas
                | OpKind::Delete
                | OpKind::Incr
                | OpKind::Decr
                | OpKind::Flush
                | OpKind::Batch(BatchFamily::Store)
        )
    }

    /// Whether replaying after a connection fault leaves the same outcome.
    pub fn is_idempotent(self) -> bool {
        match self {
            OpKind::Get
            | OpKind::Gets
            | OpKind::SortRange
            | OpKind::Version
            | OpKind::NoOp
            | OpKind::SaslAuth
            | OpKind::Store(StoreKind::Set)
            | OpKind::Store(StoreKind::Replace)
            | OpKind::Batch(BatchFamily::Get) => true,
            OpKind::Store(_)
            | OpKind::Cas
            | OpKind::Delete
            | OpKind::Incr
            | OpKind::Decr
            | OpKind::Flush
            | OpKind::Batch(BatchFamily::Store) => false,
        }
    }
}

/// What the read loop should do after feeding a frame to an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// More frames belong to this operation.
    Pending,
    /// The operation is finished and leaves the read queue.
    Done,
    /// Finished, and the server asked for the connection to be dropped.
    ConnectionFatal,
}

struct WriteBuffer {
    bytes: Bytes,
    pos: usize,
}

/// One request/response unit.
pub struct Operation {
    id: u64,
    opaque: u32,
    kind: OpKind,
    idempotent: bool,
    description: String,
    command: Mutex<Command>,
    state: AtomicU8,
    write_buf: Mutex<Option<WriteBuffer>>,
    callback: Arc<dyn OperationCallback>,
    listener: Mutex<Option<Arc<dyn OperationCallback>>>,
    delivered: AtomicBool,
    status: Mutex<Option<OperationStatus>>,
    exception: Mutex<Option<OperationException>>,
    cancel_cause: Mutex<Option<String>>,
    timed_out: AtomicBool,
    node: Mutex<Option<Weak<Node>>>,
}

impl Operation {
    pub(crate) fn new(command: Command, callback: Arc<dyn OperationCallback>) -> Arc<Self> {
        Self::with_opaque(command, callback, next_opaque())
    }

    pub(crate) fn with_opaque(
        command: Command,
        callback: Arc<dyn OperationCallback>,
        opaque: u32,
    ) -> Arc<Self> {
        let kind = command.kind();
        let idempotent = command.is_idempotent();
        let description = format!("{}(opaque={}{})", kind.name(), opaque, command.describe());
        Arc::new(Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            opaque,
            kind,
            idempotent,
            description,
            command: Mutex::new(command),
            state: AtomicU8::new(OperationState::WriteQueued as u8),
            write_buf: Mutex::new(None),
            callback,
            listener: Mutex::new(None),
            delivered: AtomicBool::new(false),
            status: Mutex::new(None),
            exception: Mutex::new(None),
            cancel_cause: Mutex::new(None),
            timed_out: AtomicBool::new(false),
            node: Mutex::new(None),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn opaque(&self) -> u32 {
        self.opaque
    }

    pub fn kind(&self) -> OpKind {
        self.kind
    }

    pub fn is_idempotent(&self) -> bool {
        self.idempotent
    }

    pub fn state(&self) -> OperationState {
        OperationState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == OperationState::Cancelled
    }

    pub fn is_complete(&self) -> bool {
        self.state() == OperationState::Complete
    }

    /// Final status, once delivered.
    pub fn status(&self) -> Option<OperationStatus> {
        self.status.lock().clone()
    }

    pub fn exception(&self) -> Option<OperationException> {
        self.exception.lock().clone()
    }

    pub fn cancel_cause(&self) -> Option<String> {
        self.cancel_cause.lock().clone()
    }

    pub fn is_timed_out(&self) -> bool {
        self.timed_out.load(Ordering::Acquire)
    }

    pub(crate) fn mark_timed_out(&self) {
        self.timed_out.store(true, Ordering::Release);
    }

    pub fn node(&self) -> Option<Arc<Node>> {
        self.node.lock().as_ref().and_then(Weak::upgrade)
    }

    pub fn node_name(&self) -> String {
        self.node()
            .map(|node| node.name().to_string())
            .unwrap_or_else(|| "<unassigned>".to_string())
    }

    pub(crate) fn set_node(&self, node: Weak<Node>) {
        *self.node.lock() = Some(node);
    }

    /// Registers a second observer of the terminal callback.
    ///
    /// Returns false when the terminal callback was already delivered, in
    /// which case the listener will never hear from this operation.
    pub(crate) fn set_listener(&self, listener: Arc<dyn OperationCallback>) -> bool {
        let mut slot = self.listener.lock();
        if self.delivered.load(Ordering::Acquire) {
            return false;
        }
        *slot = Some(listener);
        true
    }

    /// Keys touched by this operation.
    pub fn keys(&self) -> Vec<String> {
        self.command.lock().keys()
    }

    pub(crate) fn with_command<R>(&self, f: impl FnOnce(&Command) -> R) -> R {
        f(&self.command.lock())
    }

    /// Sub-operations of a batch, empty for plain operations.
    pub(crate) fn batch_subs(&self) -> Vec<Arc<Operation>> {
        self.command.lock().batch_subs()
    }

    /// Forward-only state move. Terminal states never change.
    fn transition(&self, to: OperationState) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let from = OperationState::from_u8(current);
            if from.is_terminal() || to <= from {
                return false;
            }
            match self.state.compare_exchange(
                current,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    trace!(op = %self, ?from, ?to, "State transition");
                    return true;
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Rewinds a queued or partially written operation so it can be sent
    /// again from the first byte.
    pub fn reset(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let from = OperationState::from_u8(current);
            if !matches!(from, OperationState::WriteQueued | OperationState::Writing) {
                return false;
            }
            match self.state.compare_exchange(
                current,
                OperationState::WriteQueued as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        if let Some(buf) = self.write_buf.lock().as_mut() {
            buf.pos = 0;
        }
        for sub in self.batch_subs() {
            sub.reset();
        }
        debug!(op = %self, "Operation reset for resend");
        true
    }

    fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.command.lock().encode(self.opaque, &mut buf);
        buf.freeze()
    }

    /// Copies up to `room` pending request bytes into `dst`.
    pub(crate) fn fill(&self, dst: &mut BytesMut, room: usize) -> usize {
        let mut guard = self.write_buf.lock();
        if guard.is_none() {
            *guard = Some(WriteBuffer {
                bytes: self.encode(),
                pos: 0,
            });
        }
        let buf = match guard.as_mut() {
            Some(buf) => buf,
            None => return 0,
        };
        let n = room.min(buf.bytes.len() - buf.pos);
        dst.extend_from_slice(&buf.bytes[buf.pos..buf.pos + n]);
        buf.pos += n;
        drop(guard);

        if n > 0 && self.transition(OperationState::Writing) {
            for sub in self.batch_subs() {
                sub.transition(OperationState::Writing);
            }
        }
        n
    }

    /// Request bytes not yet copied out. Encodes lazily on first use.
    pub(crate) fn write_remaining(&self) -> usize {
        let mut guard = self.write_buf.lock();
        if guard.is_none() {
            *guard = Some(WriteBuffer {
                bytes: self.encode(),
                pos: 0,
            });
        }
        guard
            .as_ref()
            .map(|buf| buf.bytes.len() - buf.pos)
            .unwrap_or(0)
    }

    pub(crate) fn write_started(&self) -> bool {
        self.write_buf
            .lock()
            .as_ref()
            .map(|buf| buf.pos > 0)
            .unwrap_or(false)
    }

    /// Every request byte has been handed to the socket buffer.
    pub(crate) fn write_complete(&self) {
        if self.transition(OperationState::Reading) {
            for sub in self.batch_subs() {
                sub.transition(OperationState::Reading);
            }
        } else if self.state().is_terminal() {
            self.write_buf.lock().take();
        }
    }

    /// Feeds one response frame to this operation.
    pub(crate) fn handle_frame(&self, frame: &Frame) -> FrameOutcome {
        let decoded = self.command.lock().handle_frame(self, frame);
        match decoded {
            Ok(Decoded::Pending) => FrameOutcome::Pending,
            Ok(Decoded::Done(status)) => {
                self.complete(status);
                FrameOutcome::Done
            }
            Err(exception) => {
                let fatal =
                    exception.kind == ErrorKind::Client && is_connection_fatal(frame.status());
                if fatal {
                    error!(
                        op = %self,
                        message = %exception.message,
                        buffer = %self.dump_write_buffer(),
                        "Client error, dumping outgoing buffer"
                    );
                }
                self.fail(exception);
                if fatal {
                    FrameOutcome::ConnectionFatal
                } else {
                    FrameOutcome::Done
                }
            }
        }
    }

    /// Completes with an attached protocol error.
    pub(crate) fn fail(&self, exception: OperationException) {
        for sub in self.batch_subs() {
            if !sub.state().is_terminal() {
                sub.fail(exception.clone());
            }
        }
        let code = match exception.kind {
            ErrorKind::Client => StatusCode::ErrClient,
            ErrorKind::Server => StatusCode::ErrServer,
            ErrorKind::General => StatusCode::ErrError,
        };
        let status = OperationStatus::new(code, exception.message.clone());
        *self.exception.lock() = Some(exception);
        self.complete(status);
    }

    pub(crate) fn complete(&self, status: OperationStatus) {
        if self.transition(OperationState::Complete) {
            metrics::record_completion(self.kind, &status);
            self.deliver(status);
        }
    }

    /// Cancels the operation from any thread.
    ///
    /// Returns true when the operation had not started writing, i.e. the
    /// server never saw it.
    pub fn cancel(&self, cause: &str) -> bool {
        let previous = self.state();
        let unsent = previous == OperationState::WriteQueued && !self.write_started();
        if self.transition(OperationState::Cancelled) {
            *self.cancel_cause.lock() = Some(cause.to_string());
            for sub in self.batch_subs() {
                sub.cancel(cause);
            }
            metrics::OPERATIONS_CANCELLED.inc();
            debug!(op = %self, cause, "Operation cancelled");
            self.deliver(OperationStatus::cancelled(cause));
        }
        unsent
    }

    pub(crate) fn deliver_data(&self, data: OperationData) {
        if !self.delivered.load(Ordering::Acquire) {
            self.callback.got_data(data);
        }
    }

    fn deliver(&self, status: OperationStatus) {
        {
            // a listener refused by `set_listener` must find the status already set
            let _slot = self.listener.lock();
            if self
                .delivered
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }
            *self.status.lock() = Some(status.clone());
        }
        {
            // a half-written request must still be flushed to keep the stream aligned
            let mut buf = self.write_buf.lock();
            let in_flight = buf
                .as_ref()
                .map(|b| b.pos > 0 && b.pos < b.bytes.len())
                .unwrap_or(false);
            if !in_flight {
                buf.take();
            }
        }
        self.callback.received_status(&status);
        self.callback.complete();
        let listener = self.listener.lock().clone();
        if let Some(listener) = listener {
            listener.received_status(&status);
            listener.complete();
        }
    }

    fn dump_write_buffer(&self) -> String {
        let bytes = match self.write_buf.lock().as_ref() {
            Some(buf) => buf.bytes.clone(),
            None => self.encode(),
        };
        bytes
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("id", &self.id)
            .field("op", &self.description)
            .field("state", &self.state())
            .finish()
    }
}
