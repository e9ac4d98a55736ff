//! Pipelined batch of homogeneous operations
//!
//! Sub-requests go out in their quiet form followed by a NOOP carrying the
//! batch's own opaque. Quiet commands only answer when they have something
//! to say (a hit, or a failed store), so when the NOOP answer arrives every
//! sub-operation still waiting gets its implicit outcome.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tracing::warn;

use super::callback::{MultiplexCallback, OperationCallback};
use super::command::{Command, Decoded};
use super::operation::{BatchFamily, FrameOutcome, OpKind, Operation};
use crate::error::OperationException;
use crate::protocol::{Frame, Opcode, OperationStatus, StatusCode};

pub struct BatchCommand {
    family: BatchFamily,
    subs: Vec<Arc<Operation>>,
    index: HashMap<u32, usize>,
    mux: Arc<MultiplexCallback>,
}

impl BatchCommand {
    /// Wires every sub-operation's terminal report into one multiplexer that
    /// reports to `aggregate` once all of them are done.
    pub(crate) fn new(
        family: BatchFamily,
        subs: Vec<Arc<Operation>>,
        aggregate: Arc<dyn OperationCallback>,
    ) -> Self {
        let mux = Arc::new(MultiplexCallback::new(subs.len(), aggregate));
        for sub in &subs {
            if !sub.set_listener(mux.clone()) {
                // finished before it joined the batch
                let status = sub
                    .status()
                    .unwrap_or_else(|| OperationStatus::cancelled("finished before batching"));
                mux.received_status(&status);
                mux.complete();
            }
        }
        let index = subs
            .iter()
            .enumerate()
            .map(|(i, sub)| (sub.opaque(), i))
            .collect();
        Self {
            family,
            subs,
            index,
            mux,
        }
    }

    /// Batch family an operation can join, if any.
    pub(crate) fn family_of(op: &Operation) -> Option<BatchFamily> {
        match op.kind() {
            OpKind::Get => Some(BatchFamily::Get),
            OpKind::Store(_) | OpKind::Cas => op.with_command(|cmd| match cmd {
                Command::Store(store) if store.is_batchable() => Some(BatchFamily::Store),
                _ => None,
            }),
            _ => None,
        }
    }

    pub fn family(&self) -> BatchFamily {
        self.family
    }

    pub fn subs(&self) -> &[Arc<Operation>] {
        &self.subs
    }

    pub fn pending_reports(&self) -> usize {
        self.mux.remaining()
    }

    pub(crate) fn encode(&self, opaque: u32, dst: &mut BytesMut) {
        for sub in &self.subs {
            if sub.is_cancelled() {
                continue;
            }
            sub.with_command(|cmd| cmd.encode_quiet(sub.opaque(), dst));
        }
        Frame::request(Opcode::NoOp, Bytes::new(), Bytes::new(), Bytes::new(), opaque, 0)
            .encode(dst);
    }

    fn implicit_status(&self) -> OperationStatus {
        match self.family {
            BatchFamily::Get => OperationStatus::new(StatusCode::ErrNotFound, "NOT_FOUND"),
            BatchFamily::Store => OperationStatus::success(),
        }
    }

    pub(crate) fn handle_frame(
        &self,
        op: &Operation,
        frame: &Frame,
    ) -> Result<Decoded, OperationException> {
        if frame.opaque() == op.opaque() {
            let implicit = self.implicit_status();
            for sub in &self.subs {
                if !sub.state().is_terminal() {
                    sub.complete(implicit.clone());
                }
            }
            return Ok(Decoded::Done(OperationStatus::success()));
        }

        let sub = match self.index.get(&frame.opaque()) {
            Some(&i) => &self.subs[i],
            None => {
                warn!(batch = %op, opaque = frame.opaque(), "Response for unknown sub-operation");
                return Ok(Decoded::Pending);
            }
        };
        match sub.handle_frame(frame) {
            FrameOutcome::ConnectionFatal => Err(OperationException::client(format!(
                "{} rejected by server",
                sub
            ))),
            FrameOutcome::Pending | FrameOutcome::Done => Ok(Decoded::Pending),
        }
    }
}
