//! Sorted multi-get element types

use std::cmp::Ordering;
use std::fmt;

use bytes::{Buf, BufMut, BytesMut};

use crate::protocol::OperationStatus;

/// Order key of an element inside a sorted collection.
///
/// Numeric and byte-string keys never mix within one query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BKey {
    Long(u64),
    Bytes(Vec<u8>),
}

impl BKey {
    pub const KIND_LONG: u8 = 0;
    pub const KIND_BYTES: u8 = 1;

    pub fn kind(&self) -> u8 {
        match self {
            BKey::Long(_) => Self::KIND_LONG,
            BKey::Bytes(_) => Self::KIND_BYTES,
        }
    }

    /// Writes the key as a u16 length followed by its bytes.
    pub fn encode(&self, dst: &mut BytesMut) {
        match self {
            BKey::Long(v) => {
                dst.put_u16(8);
                dst.put_u64(*v);
            }
            BKey::Bytes(b) => {
                dst.put_u16(b.len() as u16);
                dst.put_slice(b);
            }
        }
    }

    /// Reads a length-prefixed key of the given kind.
    pub fn decode(kind: u8, src: &mut &[u8]) -> Option<BKey> {
        if src.remaining() < 2 {
            return None;
        }
        let len = src.get_u16() as usize;
        if src.remaining() < len {
            return None;
        }
        match kind {
            Self::KIND_LONG if len == 8 => Some(BKey::Long(src.get_u64())),
            Self::KIND_BYTES => {
                let bytes = src[..len].to_vec();
                src.advance(len);
                Some(BKey::Bytes(bytes))
            }
            _ => None,
        }
    }
}

impl fmt::Display for BKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BKey::Long(v) => write!(f, "{}", v),
            BKey::Bytes(b) => {
                f.write_str("0x")?;
                for byte in b {
                    write!(f, "{:02X}", byte)?;
                }
                Ok(())
            }
        }
    }
}

impl From<u64> for BKey {
    fn from(v: u64) -> Self {
        BKey::Long(v)
    }
}

impl From<Vec<u8>> for BKey {
    fn from(v: Vec<u8>) -> Self {
        BKey::Bytes(v)
    }
}

/// Inclusive order-key range. `from > to` scans descending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BKeyRange {
    pub from: BKey,
    pub to: BKey,
}

impl BKeyRange {
    pub fn new(from: impl Into<BKey>, to: impl Into<BKey>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn is_reverse(&self) -> bool {
        self.from > self.to
    }

    pub fn kind(&self) -> u8 {
        self.from.kind()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SMGetMode {
    /// Keep one element per order key.
    Unique,
    /// Keep every element; equal order keys are reported.
    Duplicate,
}

impl SMGetMode {
    pub fn is_unique(self) -> bool {
        self == SMGetMode::Unique
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SMGetElement<T> {
    pub key: String,
    pub bkey: BKey,
    pub value: T,
}

impl<T> SMGetElement<T> {
    pub fn new(key: impl Into<String>, bkey: impl Into<BKey>, value: T) -> Self {
        Self {
            key: key.into(),
            bkey: bkey.into(),
            value,
        }
    }

    /// Order by `(bkey, key)`, flipped when `reverse`.
    pub fn compare(&self, other: &Self, reverse: bool) -> Ordering {
        let ord = self
            .bkey
            .cmp(&other.bkey)
            .then_with(|| self.key.cmp(&other.key));
        if reverse {
            ord.reverse()
        } else {
            ord
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> SMGetElement<U> {
        SMGetElement {
            key: self.key,
            bkey: self.bkey,
            value: f(self.value),
        }
    }
}

/// Where a shard stopped returning elements for one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SMGetTrimKey {
    pub key: String,
    pub bkey: BKey,
}

impl SMGetTrimKey {
    pub fn new(key: impl Into<String>, bkey: impl Into<BKey>) -> Self {
        Self {
            key: key.into(),
            bkey: bkey.into(),
        }
    }
}

/// One shard's answer to a sort-range read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardSortResult<T> {
    /// Sorted in the query direction.
    pub elements: Vec<SMGetElement<T>>,
    pub missed: Vec<(String, OperationStatus)>,
    pub trimmed: Vec<SMGetTrimKey>,
    /// The shard hit its own cap before exhausting the range.
    pub tail_trimmed: bool,
}

impl<T> Default for ShardSortResult<T> {
    fn default() -> Self {
        Self {
            elements: Vec::new(),
            missed: Vec::new(),
            trimmed: Vec::new(),
            tail_trimmed: false,
        }
    }
}

impl<T> ShardSortResult<T> {
    pub fn with_elements(elements: Vec<SMGetElement<T>>) -> Self {
        Self {
            elements,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bkey_order_and_display() {
        assert!(BKey::Long(2) < BKey::Long(10));
        assert!(BKey::Bytes(vec![0x01]) < BKey::Bytes(vec![0x01, 0x00]));
        assert_eq!(BKey::Bytes(vec![0x0a, 0xff]).to_string(), "0x0AFF");
        assert_eq!(BKey::Long(42).to_string(), "42");
    }

    #[test]
    fn test_bkey_wire_form() {
        let mut buf = BytesMut::new();
        BKey::Long(7).encode(&mut buf);
        BKey::Bytes(b"ab".to_vec()).encode(&mut buf);
        assert_eq!(buf.len(), 2 + 8 + 2 + 2);

        let mut src = &buf[..];
        assert_eq!(BKey::decode(BKey::KIND_LONG, &mut src), Some(BKey::Long(7)));
        assert_eq!(
            BKey::decode(BKey::KIND_BYTES, &mut src),
            Some(BKey::Bytes(b"ab".to_vec()))
        );
        assert!(src.is_empty());
        assert_eq!(BKey::decode(BKey::KIND_LONG, &mut &[0u8, 3, 1, 2, 3][..]), None);
    }

    #[test]
    fn test_element_compare_direction() {
        let a = SMGetElement::new("a", 1u64, ());
        let b = SMGetElement::new("b", 1u64, ());
        let c = SMGetElement::new("a", 2u64, ());
        assert_eq!(a.compare(&b, false), Ordering::Less);
        assert_eq!(a.compare(&c, false), Ordering::Less);
        assert_eq!(a.compare(&c, true), Ordering::Greater);
        assert!(BKeyRange::new(9u64, 1u64).is_reverse());
        assert!(!BKeyRange::new(1u64, 9u64).is_reverse());
    }
}
