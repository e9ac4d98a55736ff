//! Awaitable results of client calls
//!
//! Operations complete on node I/O tasks; the futures here wait on a
//! shared [`CountdownLatch`] with a deadline, charge node health on expiry
//! and decode the collected payload once.

pub mod bulk;
pub mod latch;
pub mod operation;
pub mod piped;
pub mod smget;

pub use bulk::{BulkEntry, BulkFuture};
pub use latch::CountdownLatch;
pub use operation::{Completion, OperationFuture};
pub use piped::PipedFuture;
pub use smget::{SMGetFuture, SMGetResponse, ShardCallback};
