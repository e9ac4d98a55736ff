//! Error types surfaced by operations and futures

use std::fmt;

use thiserror::Error;

use crate::ops::OperationState;

/// Classification of a protocol failure attached to a single operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed frame or unexpected response shape
    General,
    /// The server rejected the request as malformed
    Client,
    /// The server failed internally
    Server,
}

/// Protocol error scoped to one operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind:?} error: {message}")]
pub struct OperationException {
    pub kind: ErrorKind,
    pub message: String,
}

impl OperationException {
    pub fn general(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::General,
            message: message.into(),
        }
    }

    pub fn client(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Client,
            message: message.into(),
        }
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Server,
            message: message.into(),
        }
    }
}

/// An operation that was still in flight when a wait expired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedOutOperation {
    pub node: String,
    pub operation: String,
    pub state: OperationState,
}

impl fmt::Display for TimedOutOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{:?}] on {}", self.operation, self.state, self.node)
    }
}

/// pipecache error types
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("timed out waiting for {} operation(s): {}", .0.len(), join(.0))]
    Timeout(Vec<TimedOutOperation>),

    #[error("operation cancelled: {0}")]
    Cancelled(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] OperationException),

    #[error("{} operations failed: {}", .0.len(), join(.0))]
    Composite(Vec<CacheError>),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("transcoding error: {0}")]
    Transcode(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("node unavailable: {0}")]
    NodeUnavailable(String),

    #[error("input queue full on {0}")]
    QueueFull(String),
}

impl CacheError {
    /// Folds several failures into one error, keeping a lone failure as-is.
    pub fn from_many(mut errors: Vec<CacheError>) -> Option<CacheError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(CacheError::Composite(errors)),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, CacheError::Timeout(_))
    }
}

fn join<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|item| item.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, CacheError>;
