//! set / add / replace / append / prepend / cas

use bytes::{BufMut, Bytes, BytesMut};

use super::operation::{OpKind, StoreKind};
use crate::protocol::{Frame, Opcode};

pub struct StoreCommand {
    kind: StoreKind,
    key: String,
    flags: u32,
    exptime: u32,
    data: Bytes,
    cas: u64,
}

impl StoreCommand {
    pub fn new(
        kind: StoreKind,
        key: impl Into<String>,
        flags: u32,
        exptime: u32,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            kind,
            key: key.into(),
            flags,
            exptime,
            data: data.into(),
            cas: 0,
        }
    }

    /// A set that only succeeds while the item still carries `cas`.
    pub fn with_cas(
        key: impl Into<String>,
        cas: u64,
        flags: u32,
        exptime: u32,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            cas,
            ..Self::new(StoreKind::Set, key, flags, exptime, data)
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn data_len(&self) -> usize {
        self.data.len()
    }

    pub fn store_kind(&self) -> StoreKind {
        self.kind
    }

    pub(crate) fn kind(&self) -> OpKind {
        if self.cas != 0 {
            OpKind::Cas
        } else {
            OpKind::Store(self.kind)
        }
    }

    fn opcode(&self) -> Opcode {
        match self.kind {
            StoreKind::Set => Opcode::Set,
            StoreKind::Add => Opcode::Add,
            StoreKind::Replace => Opcode::Replace,
            StoreKind::Append => Opcode::Append,
            StoreKind::Prepend => Opcode::Prepend,
        }
    }

    fn frame(&self, opcode: Opcode, opaque: u32) -> Frame {
        // append/prepend carry no extras
        let extras = match self.kind {
            StoreKind::Append | StoreKind::Prepend => Bytes::new(),
            _ => {
                let mut extras = BytesMut::with_capacity(8);
                extras.put_u32(self.flags);
                extras.put_u32(self.exptime);
                extras.freeze()
            }
        };
        Frame::request(
            opcode,
            extras,
            Bytes::copy_from_slice(self.key.as_bytes()),
            self.data.clone(),
            opaque,
            self.cas,
        )
    }

    pub(crate) fn request(&self, opaque: u32) -> Frame {
        self.frame(self.opcode(), opaque)
    }

    pub(crate) fn quiet_request(&self, opaque: u32) -> Option<Frame> {
        let quiet = match self.kind {
            StoreKind::Set | StoreKind::Add | StoreKind::Replace => self.opcode().quiet()?,
            StoreKind::Append | StoreKind::Prepend => return None,
        };
        Some(self.frame(quiet, opaque))
    }

    pub(crate) fn is_batchable(&self) -> bool {
        matches!(
            self.kind,
            StoreKind::Set | StoreKind::Add | StoreKind::Replace
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::REQ_MAGIC;

    #[test]
    fn test_set_extras_and_cas() {
        let cmd = StoreCommand::with_cas("k", 99, 0x100, 60, Bytes::from_static(b"value"));
        assert_eq!(cmd.kind(), OpKind::Cas);
        let mut buf = BytesMut::new();
        cmd.request(8).encode(&mut buf);
        let frame = Frame::parse(&mut buf, REQ_MAGIC).unwrap().unwrap();
        assert_eq!(frame.header.opcode, Opcode::Set.as_u8());
        assert_eq!(&frame.extras[..], &[0, 0, 1, 0, 0, 0, 0, 60]);
        assert_eq!(frame.header.cas, 99);
        assert_eq!(&frame.value[..], b"value");
    }

    #[test]
    fn test_append_has_no_extras_or_quiet_form() {
        let cmd = StoreCommand::new(StoreKind::Append, "k", 0, 0, Bytes::from_static(b"tail"));
        let mut buf = BytesMut::new();
        cmd.request(1).encode(&mut buf);
        let frame = Frame::parse(&mut buf, REQ_MAGIC).unwrap().unwrap();
        assert!(frame.extras.is_empty());
        assert!(cmd.quiet_request(1).is_none());
        assert!(!cmd.is_batchable());
    }

    #[test]
    fn test_quiet_opcodes() {
        let add = StoreCommand::new(StoreKind::Add, "k", 0, 0, Bytes::new());
        assert_eq!(
            add.quiet_request(2).unwrap().header.opcode,
            Opcode::AddQ.as_u8()
        );
        let replace = StoreCommand::new(StoreKind::Replace, "k", 0, 0, Bytes::new());
        assert_eq!(
            replace.quiet_request(2).unwrap().header.opcode,
            Opcode::ReplaceQ.as_u8()
        );
    }
}
