//! incr / decr

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::callback::OperationData;
use super::operation::OpKind;
use crate::error::OperationException;
use crate::protocol::{Frame, Opcode};

/// Expiration value telling the server not to create a missing counter.
const NO_AUTO_CREATE: u32 = 0xffff_ffff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutateKind {
    Incr,
    Decr,
}

pub struct MutateCommand {
    mutator: MutateKind,
    key: String,
    by: u64,
    default: Option<u64>,
    exptime: u32,
}

impl MutateCommand {
    /// `default` seeds a missing counter; `None` leaves it missing.
    pub fn new(
        mutator: MutateKind,
        key: impl Into<String>,
        by: u64,
        default: Option<u64>,
        exptime: u32,
    ) -> Self {
        Self {
            mutator,
            key: key.into(),
            by,
            default,
            exptime,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn by(&self) -> u64 {
        self.by
    }

    pub(crate) fn kind(&self) -> OpKind {
        match self.mutator {
            MutateKind::Incr => OpKind::Incr,
            MutateKind::Decr => OpKind::Decr,
        }
    }

    pub(crate) fn request(&self, opaque: u32) -> Frame {
        let opcode = match self.mutator {
            MutateKind::Incr => Opcode::Increment,
            MutateKind::Decr => Opcode::Decrement,
        };
        let mut extras = BytesMut::with_capacity(20);
        extras.put_u64(self.by);
        extras.put_u64(self.default.unwrap_or(0));
        extras.put_u32(match self.default {
            Some(_) => self.exptime,
            None => NO_AUTO_CREATE,
        });
        Frame::request(
            opcode,
            extras.freeze(),
            Bytes::copy_from_slice(self.key.as_bytes()),
            Bytes::new(),
            opaque,
            0,
        )
    }

    pub(crate) fn decode(&self, frame: &Frame) -> Result<OperationData, OperationException> {
        if frame.value.len() != 8 {
            return Err(OperationException::general(format!(
                "counter response for {} has {} bytes, expected 8",
                self.key,
                frame.value.len()
            )));
        }
        Ok(OperationData::Counter((&frame.value[..]).get_u64()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::REQ_MAGIC;

    #[test]
    fn test_extras_layout() {
        let cmd = MutateCommand::new(MutateKind::Decr, "n", 3, None, 0);
        let mut buf = BytesMut::new();
        cmd.request(1).encode(&mut buf);
        let frame = Frame::parse(&mut buf, REQ_MAGIC).unwrap().unwrap();
        assert_eq!(frame.header.opcode, Opcode::Decrement.as_u8());
        assert_eq!(frame.extras.len(), 20);
        assert_eq!(&frame.extras[..8], &3u64.to_be_bytes());
        assert_eq!(&frame.extras[16..], &[0xff, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn test_decode_counter() {
        let cmd = MutateCommand::new(MutateKind::Incr, "n", 1, Some(0), 0);
        let ok = Frame::response(
            Opcode::Increment,
            0,
            Bytes::new(),
            Bytes::new(),
            Bytes::copy_from_slice(&41u64.to_be_bytes()),
            1,
            0,
        );
        assert!(matches!(cmd.decode(&ok).unwrap(), OperationData::Counter(41)));

        let short = Frame::response(
            Opcode::Increment,
            0,
            Bytes::new(),
            Bytes::new(),
            Bytes::from_static(&[1, 2, 3]),
            1,
            0,
        );
        assert!(cmd.decode(&short).is_err());
    }
}
