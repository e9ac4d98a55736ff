//! delete, flush, noop and version

use bytes::{BufMut, Bytes, BytesMut};

use super::callback::OperationData;
use super::operation::OpKind;
use crate::error::OperationException;
use crate::protocol::{Frame, Opcode};

pub struct DeleteCommand {
    key: String,
}

impl DeleteCommand {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn request(&self, opaque: u32) -> Frame {
        Frame::request(
            Opcode::Delete,
            Bytes::new(),
            Bytes::copy_from_slice(self.key.as_bytes()),
            Bytes::new(),
            opaque,
            0,
        )
    }
}

/// Keyless administrative commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimpleCommand {
    Flush { delay: u32 },
    NoOp,
    Version,
}

impl SimpleCommand {
    pub(crate) fn kind(&self) -> OpKind {
        match self {
            SimpleCommand::Flush { .. } => OpKind::Flush,
            SimpleCommand::NoOp => OpKind::NoOp,
            SimpleCommand::Version => OpKind::Version,
        }
    }

    pub(crate) fn request(&self, opaque: u32) -> Frame {
        let (opcode, extras) = match self {
            SimpleCommand::Flush { delay } => {
                let mut extras = BytesMut::with_capacity(4);
                extras.put_u32(*delay);
                (Opcode::Flush, extras.freeze())
            }
            SimpleCommand::NoOp => (Opcode::NoOp, Bytes::new()),
            SimpleCommand::Version => (Opcode::Version, Bytes::new()),
        };
        Frame::request(opcode, extras, Bytes::new(), Bytes::new(), opaque, 0)
    }

    pub(crate) fn decode(
        &self,
        frame: &Frame,
    ) -> Result<Option<OperationData>, OperationException> {
        match self {
            SimpleCommand::Version => {
                let version = std::str::from_utf8(&frame.value).map_err(|e| {
                    OperationException::general(format!("version is not UTF-8: {}", e))
                })?;
                Ok(Some(OperationData::Version(version.to_string())))
            }
            _ => Ok(None),
        }
    }
}
