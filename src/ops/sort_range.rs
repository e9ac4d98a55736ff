//! Per-shard sorted range read backing smget
//!
//! Request: extras `count:u32 mode:u8 bkey_kind:u8 reserved:u16`, empty
//! key, value `from to key_count:u32 keys...`. Order keys and cache keys are
//! u16-length prefixed.
//!
//! Response value:
//!
//! ```text
//! element_count:u32 { key flags:u32 bkey value_len:u32 value }*
//! missed_count:u32  { key status:u16 }*
//! trimmed_count:u32 { key bkey }*
//! trailer:u8        bit0 = tail trimmed
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::callback::OperationData;
use crate::error::OperationException;
use crate::protocol::{Frame, Opcode, OperationStatus};
use crate::smget::{BKey, BKeyRange, SMGetElement, SMGetMode, SMGetTrimKey, ShardSortResult};
use crate::transcoder::CachedData;

const MODE_UNIQUE: u8 = 1;
const TRAILER_TAIL_TRIMMED: u8 = 0x01;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortRangeCommand {
    keys: Vec<String>,
    range: BKeyRange,
    count: u32,
    mode: SMGetMode,
}

impl SortRangeCommand {
    pub fn new(keys: Vec<String>, range: BKeyRange, count: u32, mode: SMGetMode) -> Self {
        Self {
            keys,
            range,
            count,
            mode,
        }
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn range(&self) -> &BKeyRange {
        &self.range
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn mode(&self) -> SMGetMode {
        self.mode
    }

    pub(crate) fn request(&self, opaque: u32) -> Frame {
        let mut extras = BytesMut::with_capacity(8);
        extras.put_u32(self.count);
        extras.put_u8(if self.mode.is_unique() { MODE_UNIQUE } else { 0 });
        extras.put_u8(self.range.kind());
        extras.put_u16(0);

        let mut value = BytesMut::new();
        self.range.from.encode(&mut value);
        self.range.to.encode(&mut value);
        value.put_u32(self.keys.len() as u32);
        for key in &self.keys {
            put_str(&mut value, key);
        }

        Frame::request(
            Opcode::SortRange,
            extras.freeze(),
            Bytes::new(),
            value.freeze(),
            opaque,
            0,
        )
    }

    /// Server side of the request encoding.
    pub fn parse_request(extras: &[u8], value: &[u8]) -> Result<Self, OperationException> {
        let mut extras = extras;
        if extras.len() != 8 {
            return Err(malformed("request extras"));
        }
        let count = extras.get_u32();
        let mode = if extras.get_u8() == MODE_UNIQUE {
            SMGetMode::Unique
        } else {
            SMGetMode::Duplicate
        };
        let kind = extras.get_u8();

        let mut src = value;
        let from = BKey::decode(kind, &mut src).ok_or_else(|| malformed("from bkey"))?;
        let to = BKey::decode(kind, &mut src).ok_or_else(|| malformed("to bkey"))?;
        let key_count = get_u32(&mut src)?;
        let keys = (0..key_count)
            .map(|_| get_str(&mut src))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(keys, BKeyRange { from, to }, count, mode))
    }

    pub(crate) fn decode(&self, frame: &Frame) -> Result<OperationData, OperationException> {
        let kind = self.range.kind();
        let mut src = &frame.value[..];
        let mut result = ShardSortResult::default();

        for _ in 0..get_u32(&mut src)? {
            let key = get_str(&mut src)?;
            let flags = get_u32(&mut src)?;
            let bkey = BKey::decode(kind, &mut src).ok_or_else(|| malformed("element bkey"))?;
            let len = get_u32(&mut src)? as usize;
            if src.remaining() < len {
                return Err(malformed("element value"));
            }
            let data = Bytes::copy_from_slice(&src[..len]);
            src.advance(len);
            result
                .elements
                .push(SMGetElement::new(key, bkey, CachedData::new(flags, data)));
        }

        for _ in 0..get_u32(&mut src)? {
            let key = get_str(&mut src)?;
            if src.remaining() < 2 {
                return Err(malformed("missed status"));
            }
            let status = src.get_u16();
            result
                .missed
                .push((key, OperationStatus::from_wire(status, &[])));
        }

        for _ in 0..get_u32(&mut src)? {
            let key = get_str(&mut src)?;
            let bkey = BKey::decode(kind, &mut src).ok_or_else(|| malformed("trimmed bkey"))?;
            result.trimmed.push(SMGetTrimKey { key, bkey });
        }

        if src.remaining() != 1 {
            return Err(malformed("trailer"));
        }
        result.tail_trimmed = src.get_u8() & TRAILER_TAIL_TRIMMED != 0;
        Ok(OperationData::SortRange(result))
    }
}

/// Server side of the response encoding.
pub fn encode_response(result: &ShardSortResult<CachedData>) -> Bytes {
    let mut dst = BytesMut::new();
    dst.put_u32(result.elements.len() as u32);
    for element in &result.elements {
        put_str(&mut dst, &element.key);
        dst.put_u32(element.value.flags);
        element.bkey.encode(&mut dst);
        dst.put_u32(element.value.data.len() as u32);
        dst.put_slice(&element.value.data);
    }
    dst.put_u32(result.missed.len() as u32);
    for (key, status) in &result.missed {
        put_str(&mut dst, key);
        dst.put_u16(status.code().to_wire());
    }
    dst.put_u32(result.trimmed.len() as u32);
    for trim in &result.trimmed {
        put_str(&mut dst, &trim.key);
        trim.bkey.encode(&mut dst);
    }
    dst.put_u8(if result.tail_trimmed {
        TRAILER_TAIL_TRIMMED
    } else {
        0
    });
    dst.freeze()
}

fn malformed(what: &str) -> OperationException {
    OperationException::general(format!("malformed sort-range {}", what))
}

fn put_str(dst: &mut BytesMut, s: &str) {
    dst.put_u16(s.len() as u16);
    dst.put_slice(s.as_bytes());
}

fn get_u32(src: &mut &[u8]) -> Result<u32, OperationException> {
    if src.remaining() < 4 {
        return Err(malformed("count"));
    }
    Ok(src.get_u32())
}

fn get_str(src: &mut &[u8]) -> Result<String, OperationException> {
    if src.remaining() < 2 {
        return Err(malformed("key length"));
    }
    let len = src.get_u16() as usize;
    if src.remaining() < len {
        return Err(malformed("key"));
    }
    let key = String::from_utf8(src[..len].to_vec()).map_err(|_| malformed("key encoding"))?;
    src.advance(len);
    Ok(key)
}
