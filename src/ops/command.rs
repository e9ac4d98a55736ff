//! Request encoding and shared response handling
//!
//! Every command shares one header/status pass; concrete commands only
//! interpret their own payload.

use std::sync::Arc;

use bytes::BytesMut;

use super::batch::BatchCommand;
use super::get::GetCommand;
use super::misc::{DeleteCommand, SimpleCommand};
use super::mutate::MutateCommand;
use super::operation::{OpKind, Operation};
use super::sasl::SaslCommand;
use super::sort_range::SortRangeCommand;
use super::store::StoreCommand;
use crate::error::OperationException;
use crate::protocol::status::wire;
use crate::protocol::{Frame, OperationStatus, StatusCode};

/// Result of feeding one frame to a command.
#[derive(Debug)]
pub(crate) enum Decoded {
    Pending,
    Done(OperationStatus),
}

pub enum Command {
    Get(GetCommand),
    Store(StoreCommand),
    Delete(DeleteCommand),
    Mutate(MutateCommand),
    Simple(SimpleCommand),
    Sasl(SaslCommand),
    SortRange(SortRangeCommand),
    Batch(BatchCommand),
}

impl Command {
    pub fn kind(&self) -> OpKind {
        match self {
            Command::Get(c) => c.kind(),
            Command::Store(c) => c.kind(),
            Command::Delete(_) => OpKind::Delete,
            Command::Mutate(c) => c.kind(),
            Command::Simple(c) => c.kind(),
            Command::Sasl(_) => OpKind::SaslAuth,
            Command::SortRange(_) => OpKind::SortRange,
            Command::Batch(c) => OpKind::Batch(c.family()),
        }
    }

    pub fn is_idempotent(&self) -> bool {
        match self {
            Command::Batch(c) => c.subs().iter().all(|sub| sub.is_idempotent()),
            other => other.kind().is_idempotent(),
        }
    }

    /// Suffix for the operation's display name.
    pub(crate) fn describe(&self) -> String {
        match self {
            Command::Get(c) => format!(", key={}", c.key()),
            Command::Store(c) => format!(", key={}, {} bytes", c.key(), c.data_len()),
            Command::Delete(c) => format!(", key={}", c.key()),
            Command::Mutate(c) => format!(", key={}, by={}", c.key(), c.by()),
            Command::Simple(_) => String::new(),
            Command::Sasl(c) => format!(", mech={}", c.mechanism()),
            Command::SortRange(c) => format!(", {} keys, count={}", c.keys().len(), c.count()),
            Command::Batch(c) => format!(", {} ops", c.subs().len()),
        }
    }

    pub fn keys(&self) -> Vec<String> {
        match self {
            Command::Get(c) => vec![c.key().to_string()],
            Command::Store(c) => vec![c.key().to_string()],
            Command::Delete(c) => vec![c.key().to_string()],
            Command::Mutate(c) => vec![c.key().to_string()],
            Command::Simple(_) | Command::Sasl(_) => Vec::new(),
            Command::SortRange(c) => c.keys().to_vec(),
            Command::Batch(c) => c.subs().iter().flat_map(|sub| sub.keys()).collect(),
        }
    }

    pub(crate) fn batch_subs(&self) -> Vec<Arc<Operation>> {
        match self {
            Command::Batch(c) => c.subs().to_vec(),
            _ => Vec::new(),
        }
    }

    pub(crate) fn encode(&self, opaque: u32, dst: &mut BytesMut) {
        let frame = match self {
            Command::Get(c) => c.request(opaque),
            Command::Store(c) => c.request(opaque),
            Command::Delete(c) => c.request(opaque),
            Command::Mutate(c) => c.request(opaque),
            Command::Simple(c) => c.request(opaque),
            Command::Sasl(c) => c.request(opaque),
            Command::SortRange(c) => c.request(opaque),
            Command::Batch(c) => return c.encode(opaque, dst),
        };
        frame.encode(dst);
    }

    /// Quiet form used inside a batch. Only batchable commands have one.
    pub(crate) fn encode_quiet(&self, opaque: u32, dst: &mut BytesMut) -> bool {
        let frame = match self {
            Command::Get(c) => c.quiet_request(opaque),
            Command::Store(c) => match c.quiet_request(opaque) {
                Some(frame) => frame,
                None => return false,
            },
            _ => return false,
        };
        frame.encode(dst);
        true
    }

    pub(crate) fn handle_frame(
        &self,
        op: &Operation,
        frame: &Frame,
    ) -> Result<Decoded, OperationException> {
        if let Command::Batch(batch) = self {
            return batch.handle_frame(op, frame);
        }

        if frame.opaque() != op.opaque() {
            return Err(OperationException::general(format!(
                "response opaque {} does not match request opaque {}",
                frame.opaque(),
                op.opaque()
            )));
        }

        if frame.status() != wire::NO_ERROR {
            let status = OperationStatus::from_wire(frame.status(), &frame.value);
            return match status.code() {
                StatusCode::ErrClient => Err(OperationException::client(status.message())),
                StatusCode::ErrServer => Err(OperationException::server(status.message())),
                _ => Ok(Decoded::Done(status)),
            };
        }

        match self {
            Command::Get(c) => op.deliver_data(c.decode(frame)?),
            Command::Mutate(c) => op.deliver_data(c.decode(frame)?),
            Command::Simple(c) => {
                if let Some(data) = c.decode(frame)? {
                    op.deliver_data(data);
                }
            }
            Command::SortRange(c) => op.deliver_data(c.decode(frame)?),
            Command::Store(_) | Command::Delete(_) | Command::Sasl(_) | Command::Batch(_) => {}
        }
        Ok(Decoded::Done(OperationStatus::success()))
    }
}
