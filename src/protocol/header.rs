//! 24-byte header codec and whole-frame parsing

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use super::opcode::Opcode;

pub const HEADER_LEN: usize = 24;
pub const REQ_MAGIC: u8 = 0x80;
pub const RES_MAGIC: u8 = 0x81;

/// Largest body the decoder accepts before declaring the stream corrupt.
pub const MAX_BODY_LEN: u32 = 64 * 1024 * 1024;

/// Framing failure. `consumed` tells whether the offending frame was
/// skipped so the stream is still aligned on a frame boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed frame (opaque {opaque}): {reason}")]
pub struct FrameError {
    pub opaque: u32,
    pub reason: String,
    pub consumed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    pub magic: u8,
    pub opcode: u8,
    pub key_len: u16,
    pub extras_len: u8,
    pub data_type: u8,
    /// vbucket id in requests, response status in responses
    pub status: u16,
    pub total_body_len: u32,
    pub opaque: u32,
    pub cas: u64,
}

impl Header {
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(HEADER_LEN);
        dst.put_u8(self.magic);
        dst.put_u8(self.opcode);
        dst.put_u16(self.key_len);
        dst.put_u8(self.extras_len);
        dst.put_u8(self.data_type);
        dst.put_u16(self.status);
        dst.put_u32(self.total_body_len);
        dst.put_u32(self.opaque);
        dst.put_u64(self.cas);
    }

    /// Decodes a header from the first 24 bytes of `src`.
    pub fn decode(mut src: &[u8]) -> Option<Self> {
        if src.len() < HEADER_LEN {
            return None;
        }
        Some(Header {
            magic: src.get_u8(),
            opcode: src.get_u8(),
            key_len: src.get_u16(),
            extras_len: src.get_u8(),
            data_type: src.get_u8(),
            status: src.get_u16(),
            total_body_len: src.get_u32(),
            opaque: src.get_u32(),
            cas: src.get_u64(),
        })
    }

    pub fn value_len(&self) -> Option<usize> {
        (self.total_body_len as usize).checked_sub(self.key_len as usize + self.extras_len as usize)
    }

    pub fn opcode(&self) -> Option<Opcode> {
        Opcode::from_u8(self.opcode)
    }
}

/// One complete request or response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: Header,
    pub extras: Bytes,
    pub key: Bytes,
    pub value: Bytes,
}

impl Frame {
    pub fn request(
        opcode: Opcode,
        extras: Bytes,
        key: Bytes,
        value: Bytes,
        opaque: u32,
        cas: u64,
    ) -> Self {
        Self::build(REQ_MAGIC, opcode, 0, extras, key, value, opaque, cas)
    }

    pub fn response(
        opcode: Opcode,
        status: u16,
        extras: Bytes,
        key: Bytes,
        value: Bytes,
        opaque: u32,
        cas: u64,
    ) -> Self {
        Self::build(RES_MAGIC, opcode, status, extras, key, value, opaque, cas)
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        magic: u8,
        opcode: Opcode,
        status: u16,
        extras: Bytes,
        key: Bytes,
        value: Bytes,
        opaque: u32,
        cas: u64,
    ) -> Self {
        let header = Header {
            magic,
            opcode: opcode.as_u8(),
            key_len: key.len() as u16,
            extras_len: extras.len() as u8,
            data_type: 0,
            status,
            total_body_len: (extras.len() + key.len() + value.len()) as u32,
            opaque,
            cas,
        };
        Frame {
            header,
            extras,
            key,
            value,
        }
    }

    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.header.total_body_len as usize
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        self.header.encode(dst);
        dst.put_slice(&self.extras);
        dst.put_slice(&self.key);
        dst.put_slice(&self.value);
    }

    pub fn status(&self) -> u16 {
        self.header.status
    }

    pub fn opaque(&self) -> u32 {
        self.header.opaque
    }

    /// Splits one frame off the front of `buf`.
    ///
    /// Returns `Ok(None)` until a whole frame is buffered. A frame with the
    /// wrong magic or inconsistent lengths is consumed and reported so the
    /// caller can fail the operation it belonged to.
    pub fn parse(buf: &mut BytesMut, expected_magic: u8) -> Result<Option<Frame>, FrameError> {
        let header = match Header::decode(buf) {
            Some(header) => header,
            None => return Ok(None),
        };

        if header.total_body_len > MAX_BODY_LEN {
            return Err(FrameError {
                opaque: header.opaque,
                reason: format!("body length {} exceeds limit", header.total_body_len),
                consumed: false,
            });
        }

        let frame_len = HEADER_LEN + header.total_body_len as usize;
        if buf.len() < frame_len {
            buf.reserve(frame_len - buf.len());
            return Ok(None);
        }

        let mut body = buf.split_to(frame_len).freeze();
        body.advance(HEADER_LEN);

        if header.magic != expected_magic {
            return Err(FrameError {
                opaque: header.opaque,
                reason: format!("bad magic 0x{:02x}", header.magic),
                consumed: true,
            });
        }

        let value_len = header.value_len().ok_or_else(|| FrameError {
            opaque: header.opaque,
            reason: format!(
                "key ({}) and extras ({}) exceed body length {}",
                header.key_len, header.extras_len, header.total_body_len
            ),
            consumed: true,
        })?;

        let extras = body.split_to(header.extras_len as usize);
        let key = body.split_to(header.key_len as usize);
        let value = body.split_to(value_len);

        Ok(Some(Frame {
            header,
            extras,
            key,
            value,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encode_decode() {
        let header = Header {
            magic: REQ_MAGIC,
            opcode: Opcode::Set.as_u8(),
            key_len: 3,
            extras_len: 4,
            data_type: 0,
            status: 0,
            total_body_len: 10,
            opaque: 7,
            cas: 0,
        };
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), HEADER_LEN);
        assert_eq!(buf[0], 0x80);
        assert_eq!(&buf[2..4], &[0, 3]);
        assert_eq!(&buf[8..12], &[0, 0, 0, 10]);
        assert_eq!(&buf[12..16], &[0, 0, 0, 7]);
        assert_eq!(Header::decode(&buf), Some(header));
    }

    #[test]
    fn test_frame_fields_survive_encode_and_parse() {
        let frame = Frame::request(
            Opcode::Set,
            Bytes::from_static(&[0, 0, 0, 1]),
            Bytes::from_static(b"key"),
            Bytes::from_static(b"val"),
            7,
            0,
        );
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);

        let parsed = Frame::parse(&mut buf, REQ_MAGIC).unwrap().unwrap();
        assert_eq!(parsed.header.key_len, 3);
        assert_eq!(parsed.header.extras_len, 4);
        assert_eq!(parsed.header.total_body_len, 10);
        assert_eq!(parsed.header.opaque, 7);
        assert_eq!(parsed.header.magic, REQ_MAGIC);
        assert_eq!(&parsed.key[..], b"key");
        assert_eq!(&parsed.value[..], b"val");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_frame_waits() {
        let frame = Frame::response(
            Opcode::Get,
            0,
            Bytes::from_static(&[0, 0, 0, 0]),
            Bytes::new(),
            Bytes::from_static(b"hello"),
            1,
            9,
        );
        let mut full = BytesMut::new();
        frame.encode(&mut full);

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&full[..10]);
        assert_eq!(Frame::parse(&mut buf, RES_MAGIC).unwrap(), None);
        buf.extend_from_slice(&full[10..30]);
        assert_eq!(Frame::parse(&mut buf, RES_MAGIC).unwrap(), None);
        buf.extend_from_slice(&full[30..]);
        let parsed = Frame::parse(&mut buf, RES_MAGIC).unwrap().unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn test_bad_magic_is_consumed() {
        let frame = Frame::request(Opcode::NoOp, Bytes::new(), Bytes::new(), Bytes::new(), 5, 0);
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);
        let err = Frame::parse(&mut buf, RES_MAGIC).unwrap_err();
        assert_eq!(err.opaque, 5);
        assert!(err.consumed);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_inconsistent_lengths_rejected() {
        let header = Header {
            magic: RES_MAGIC,
            opcode: Opcode::Get.as_u8(),
            key_len: 8,
            extras_len: 4,
            total_body_len: 6,
            opaque: 11,
            ..Default::default()
        };
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        buf.extend_from_slice(&[0u8; 6]);
        let err = Frame::parse(&mut buf, RES_MAGIC).unwrap_err();
        assert_eq!(err.opaque, 11);
        assert!(buf.is_empty());
    }
}
