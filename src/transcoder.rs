//! Value transcoding between typed values and stored bytes

use std::marker::PhantomData;

use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{CacheError, Result};

/// Flag bit marking a value serialized as JSON.
pub const JSON_FLAG: u32 = 0x0100;

/// Raw stored value: user flags plus payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedData {
    pub flags: u32,
    pub data: Bytes,
}

impl CachedData {
    pub fn new(flags: u32, data: impl Into<Bytes>) -> Self {
        Self {
            flags,
            data: data.into(),
        }
    }
}

/// Converts typed values to and from `CachedData`.
pub trait Transcoder<T>: Send + Sync {
    fn encode(&self, value: &T) -> Result<CachedData>;
    fn decode(&self, data: &CachedData) -> Result<T>;
}

/// Passes payload bytes through untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytesTranscoder;

impl Transcoder<Bytes> for BytesTranscoder {
    fn encode(&self, value: &Bytes) -> Result<CachedData> {
        Ok(CachedData::new(0, value.clone()))
    }

    fn decode(&self, data: &CachedData) -> Result<Bytes> {
        Ok(data.data.clone())
    }
}

/// UTF-8 strings.
#[derive(Debug, Default, Clone, Copy)]
pub struct StringTranscoder;

impl Transcoder<String> for StringTranscoder {
    fn encode(&self, value: &String) -> Result<CachedData> {
        Ok(CachedData::new(0, Bytes::copy_from_slice(value.as_bytes())))
    }

    fn decode(&self, data: &CachedData) -> Result<String> {
        String::from_utf8(data.data.to_vec())
            .map_err(|e| CacheError::Transcode(format!("value is not UTF-8: {}", e)))
    }
}

/// serde_json encoding, tagged with [`JSON_FLAG`].
pub struct JsonTranscoder<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonTranscoder<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonTranscoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Transcoder<T> for JsonTranscoder<T>
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T) -> Result<CachedData> {
        let bytes = serde_json::to_vec(value)
            .map_err(|e| CacheError::Transcode(format!("Failed to serialize value: {}", e)))?;
        Ok(CachedData::new(JSON_FLAG, bytes))
    }

    fn decode(&self, data: &CachedData) -> Result<T> {
        if data.flags & JSON_FLAG == 0 {
            return Err(CacheError::Transcode(format!(
                "value flags 0x{:x} are not JSON",
                data.flags
            )));
        }
        serde_json::from_slice(&data.data)
            .map_err(|e| CacheError::Transcode(format!("Failed to deserialize value: {}", e)))
    }
}
