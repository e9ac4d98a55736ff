//! Response status vocabulary

use std::fmt;

use tracing::warn;

/// Binary response status values.
pub mod wire {
    pub const NO_ERROR: u16 = 0x0000;
    pub const KEY_NOT_FOUND: u16 = 0x0001;
    pub const KEY_EXISTS: u16 = 0x0002;
    pub const VALUE_TOO_LARGE: u16 = 0x0003;
    pub const INVALID_ARGUMENTS: u16 = 0x0004;
    pub const ITEM_NOT_STORED: u16 = 0x0005;
    pub const NON_NUMERIC: u16 = 0x0006;
    pub const AUTH_ERROR: u16 = 0x0020;
    pub const AUTH_CONTINUE: u16 = 0x0021;
    pub const UNKNOWN_COMMAND: u16 = 0x0081;
    pub const OUT_OF_MEMORY: u16 = 0x0082;
    pub const INTERNAL_ERROR: u16 = 0x0084;
    pub const BUSY: u16 = 0x0085;
}

/// Canonical outcome codes shared by every operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Success,
    ErrNotFound,
    ErrNotStored,
    ErrExists,
    ErrTypeMismatch,
    ErrError,
    ErrServer,
    ErrClient,
    Cancelled,
    Undefined,
}

impl StatusCode {
    /// Maps an ASCII-protocol status line onto a canonical code.
    pub fn from_ascii(line: &str) -> Self {
        match line {
            "OK" | "END" | "STORED" | "DELETED" => StatusCode::Success,
            "NOT_STORED" => StatusCode::ErrNotStored,
            "EXISTS" => StatusCode::ErrExists,
            "NOT_FOUND" => StatusCode::ErrNotFound,
            "TYPE_MISMATCH" => StatusCode::ErrTypeMismatch,
            "ERROR" => StatusCode::ErrError,
            "SERVER_ERROR" => StatusCode::ErrServer,
            "CLIENT_ERROR" => StatusCode::ErrClient,
            other => {
                warn!(status = %other, "Undefined response status");
                StatusCode::Undefined
            }
        }
    }

    pub fn from_wire(status: u16) -> Self {
        match status {
            wire::NO_ERROR => StatusCode::Success,
            wire::KEY_NOT_FOUND => StatusCode::ErrNotFound,
            wire::KEY_EXISTS => StatusCode::ErrExists,
            wire::VALUE_TOO_LARGE | wire::INVALID_ARGUMENTS => StatusCode::ErrClient,
            wire::ITEM_NOT_STORED => StatusCode::ErrNotStored,
            wire::NON_NUMERIC => StatusCode::ErrTypeMismatch,
            wire::AUTH_ERROR | wire::AUTH_CONTINUE | wire::UNKNOWN_COMMAND => StatusCode::ErrError,
            wire::OUT_OF_MEMORY | wire::INTERNAL_ERROR | wire::BUSY => StatusCode::ErrServer,
            other => {
                warn!(status = other, "Undefined response status");
                StatusCode::Undefined
            }
        }
    }

    pub fn to_wire(self) -> u16 {
        match self {
            StatusCode::Success => wire::NO_ERROR,
            StatusCode::ErrNotFound => wire::KEY_NOT_FOUND,
            StatusCode::ErrExists => wire::KEY_EXISTS,
            StatusCode::ErrNotStored => wire::ITEM_NOT_STORED,
            StatusCode::ErrTypeMismatch => wire::NON_NUMERIC,
            StatusCode::ErrClient => wire::INVALID_ARGUMENTS,
            StatusCode::ErrServer => wire::INTERNAL_ERROR,
            StatusCode::ErrError | StatusCode::Cancelled | StatusCode::Undefined => {
                wire::UNKNOWN_COMMAND
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StatusCode::Success => "SUCCESS",
            StatusCode::ErrNotFound => "NOT_FOUND",
            StatusCode::ErrNotStored => "NOT_STORED",
            StatusCode::ErrExists => "EXISTS",
            StatusCode::ErrTypeMismatch => "TYPE_MISMATCH",
            StatusCode::ErrError => "ERROR",
            StatusCode::ErrServer => "SERVER_ERROR",
            StatusCode::ErrClient => "CLIENT_ERROR",
            StatusCode::Cancelled => "CANCELLED",
            StatusCode::Undefined => "UNDEFINED",
        }
    }
}

/// Whether a wire status should tear the connection down.
///
/// Oversized values are rejected per request and leave the stream usable.
pub fn is_connection_fatal(status: u16) -> bool {
    status == wire::INVALID_ARGUMENTS
}

/// Typed status carried by an operation and its future.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationStatus {
    success: bool,
    code: StatusCode,
    message: String,
}

impl OperationStatus {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            success: code == StatusCode::Success,
            code,
            message: message.into(),
        }
    }

    pub fn success() -> Self {
        Self::new(StatusCode::Success, "OK")
    }

    pub fn cancelled(cause: impl Into<String>) -> Self {
        Self::new(StatusCode::Cancelled, cause)
    }

    /// Builds a status from a wire code, using the response body as the
    /// message when the server sent one.
    pub fn from_wire(status: u16, body: &[u8]) -> Self {
        let code = StatusCode::from_wire(status);
        let message = if body.is_empty() || code == StatusCode::Success {
            code.as_str().to_string()
        } else {
            String::from_utf8_lossy(body).into_owned()
        };
        Self::new(code, message)
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn code(&self) -> StatusCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code.as_str(), self.message)
    }
}
