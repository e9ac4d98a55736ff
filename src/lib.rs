// pipecache - pipelined binary-protocol cache client
// Operations, per-node write batching, futures and sorted multi-get

#![warn(rust_2018_idioms)]

pub mod client;
pub mod config;
pub mod error;
pub mod future;
pub mod locator;
pub mod metrics;
pub mod node;
pub mod ops;
pub mod protocol;
pub mod smget;
pub mod transcoder;

// Re-exports for convenience
pub use client::{CacheClient, CasResponse, CasValue};
pub use config::ClientConfig;
pub use error::{CacheError, Result};
pub use future::{BulkFuture, OperationFuture, PipedFuture, SMGetFuture, SMGetResponse};
pub use transcoder::{BytesTranscoder, CachedData, JsonTranscoder, StringTranscoder, Transcoder};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
