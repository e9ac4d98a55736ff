//! SASL authentication request
//!
//! Only the request shape matters here; the mechanism payload is opaque.

use bytes::{BufMut, Bytes, BytesMut};

use crate::protocol::{Frame, Opcode};

pub struct SaslCommand {
    mechanism: String,
    payload: Bytes,
}

impl SaslCommand {
    pub fn new(mechanism: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            mechanism: mechanism.into(),
            payload: payload.into(),
        }
    }

    /// PLAIN: `\0username\0password`.
    pub fn plain(username: &str, password: &str) -> Self {
        let mut payload = BytesMut::with_capacity(username.len() + password.len() + 2);
        payload.put_u8(0);
        payload.put_slice(username.as_bytes());
        payload.put_u8(0);
        payload.put_slice(password.as_bytes());
        Self::new("PLAIN", payload.freeze())
    }

    pub fn mechanism(&self) -> &str {
        &self.mechanism
    }

    pub(crate) fn request(&self, opaque: u32) -> Frame {
        Frame::request(
            Opcode::SaslAuth,
            Bytes::new(),
            Bytes::copy_from_slice(self.mechanism.as_bytes()),
            self.payload.clone(),
            opaque,
            0,
        )
    }
}
