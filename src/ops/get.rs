//! get / gets

use bytes::{Buf, Bytes};

use super::callback::OperationData;
use super::operation::OpKind;
use crate::error::OperationException;
use crate::protocol::{Frame, Opcode};
use crate::transcoder::CachedData;

pub struct GetCommand {
    key: String,
    with_cas: bool,
}

impl GetCommand {
    pub fn new(key: impl Into<String>, with_cas: bool) -> Self {
        Self {
            key: key.into(),
            with_cas,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn kind(&self) -> OpKind {
        if self.with_cas {
            OpKind::Gets
        } else {
            OpKind::Get
        }
    }

    fn frame(&self, opcode: Opcode, opaque: u32) -> Frame {
        Frame::request(
            opcode,
            Bytes::new(),
            Bytes::copy_from_slice(self.key.as_bytes()),
            Bytes::new(),
            opaque,
            0,
        )
    }

    /// GETK, so the response echoes the key.
    pub(crate) fn request(&self, opaque: u32) -> Frame {
        self.frame(Opcode::GetK, opaque)
    }

    /// GETKQ: the server stays silent on a miss.
    pub(crate) fn quiet_request(&self, opaque: u32) -> Frame {
        self.frame(Opcode::GetKQ, opaque)
    }

    pub(crate) fn decode(&self, frame: &Frame) -> Result<OperationData, OperationException> {
        if frame.extras.len() != 4 {
            return Err(OperationException::general(format!(
                "get response for {} has {} extras bytes, expected 4",
                self.key,
                frame.extras.len()
            )));
        }
        if !frame.key.is_empty() && frame.key[..] != *self.key.as_bytes() {
            return Err(OperationException::general(format!(
                "get response key {:?} does not match {}",
                String::from_utf8_lossy(&frame.key),
                self.key
            )));
        }
        let flags = (&frame.extras[..]).get_u32();
        Ok(OperationData::Value {
            key: self.key.clone(),
            value: CachedData::new(flags, frame.value.clone()),
            cas: frame.header.cas,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::REQ_MAGIC;
    use bytes::BytesMut;

    #[test]
    fn test_requests() {
        let cmd = GetCommand::new("user:1", true);
        assert_eq!(cmd.kind(), OpKind::Gets);

        let mut buf = BytesMut::new();
        cmd.request(3).encode(&mut buf);
        cmd.quiet_request(4).encode(&mut buf);
        let loud = Frame::parse(&mut buf, REQ_MAGIC).unwrap().unwrap();
        let quiet = Frame::parse(&mut buf, REQ_MAGIC).unwrap().unwrap();
        assert_eq!(loud.header.opcode, Opcode::GetK.as_u8());
        assert_eq!(quiet.header.opcode, Opcode::GetKQ.as_u8());
        assert_eq!(&quiet.key[..], b"user:1");
        assert_eq!(quiet.opaque(), 4);
    }

    #[test]
    fn test_decode_flags_then_value() {
        let cmd = GetCommand::new("k", false);
        let frame = Frame::response(
            Opcode::GetK,
            0,
            Bytes::from_static(&[0, 0, 1, 0]),
            Bytes::from_static(b"k"),
            Bytes::from_static(b"{}"),
            1,
            5,
        );
        match cmd.decode(&frame).unwrap() {
            OperationData::Value { value, cas, .. } => {
                assert_eq!(value.flags, 0x100);
                assert_eq!(&value.data[..], b"{}");
                assert_eq!(cas, 5);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_decode_rejects_short_extras() {
        let cmd = GetCommand::new("k", false);
        let frame = Frame::response(
            Opcode::GetK,
            0,
            Bytes::from_static(&[0, 0]),
            Bytes::from_static(b"k"),
            Bytes::new(),
            1,
            0,
        );
        assert!(cmd.decode(&frame).is_err());
    }
}
