//! Binary cache protocol
//!
//! Every request and response is a fixed 24-byte header followed by
//! extras, key and value bytes.
//!
//! ```text
//!  Byte/     0       |       1       |       2       |       3       |
//!     +---------------+---------------+---------------+---------------+
//!    0| magic         | opcode        | key length                    |
//!     +---------------+---------------+---------------+---------------+
//!    4| extras length | data type     | status / reserved             |
//!     +---------------+---------------+---------------+---------------+
//!    8| total body length                                             |
//!     +---------------+---------------+---------------+---------------+
//!   12| opaque                                                        |
//!     +---------------+---------------+---------------+---------------+
//!   16| cas                                                           |
//!     |                                                               |
//!     +---------------+---------------+---------------+---------------+
//!   24| extras, key, value ...
//! ```
//!
//! The opaque field correlates pipelined responses with their requests.

pub mod header;
pub mod opcode;
pub mod status;

pub use header::{Frame, FrameError, Header, HEADER_LEN, REQ_MAGIC, RES_MAGIC};
pub use opcode::Opcode;
pub use status::{OperationStatus, StatusCode};
