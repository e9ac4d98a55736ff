//! Protocol operations
//!
//! An [`Operation`] is one request/response exchange. The functions in this
//! module build the concrete kinds; nodes drive them through their
//! lifecycle and callbacks observe the result.

pub mod batch;
pub mod callback;
pub mod command;
pub mod get;
pub mod misc;
pub mod mutate;
pub mod operation;
pub mod sasl;
pub mod sort_range;
pub mod store;

use std::sync::Arc;

use bytes::Bytes;

pub use batch::BatchCommand;
pub use callback::{MultiplexCallback, NoopCallback, OperationCallback, OperationData};
pub use command::Command;
pub use get::GetCommand;
pub use misc::{DeleteCommand, SimpleCommand};
pub use mutate::{MutateCommand, MutateKind};
pub use operation::{
    BatchFamily, FrameOutcome, OpKind, Operation, OperationState, StoreKind,
};
pub use sasl::SaslCommand;
pub use sort_range::SortRangeCommand;
pub use store::StoreCommand;

use crate::smget::{BKeyRange, SMGetMode};

pub fn get(key: impl Into<String>, callback: Arc<dyn OperationCallback>) -> Arc<Operation> {
    Operation::new(Command::Get(GetCommand::new(key, false)), callback)
}

/// Get that also reports the item's CAS value.
pub fn gets(key: impl Into<String>, callback: Arc<dyn OperationCallback>) -> Arc<Operation> {
    Operation::new(Command::Get(GetCommand::new(key, true)), callback)
}

pub fn store(
    kind: StoreKind,
    key: impl Into<String>,
    flags: u32,
    exptime: u32,
    data: impl Into<Bytes>,
    callback: Arc<dyn OperationCallback>,
) -> Arc<Operation> {
    Operation::new(
        Command::Store(StoreCommand::new(kind, key, flags, exptime, data)),
        callback,
    )
}

pub fn set(
    key: impl Into<String>,
    flags: u32,
    exptime: u32,
    data: impl Into<Bytes>,
    callback: Arc<dyn OperationCallback>,
) -> Arc<Operation> {
    store(StoreKind::Set, key, flags, exptime, data, callback)
}

pub fn add(
    key: impl Into<String>,
    flags: u32,
    exptime: u32,
    data: impl Into<Bytes>,
    callback: Arc<dyn OperationCallback>,
) -> Arc<Operation> {
    store(StoreKind::Add, key, flags, exptime, data, callback)
}

pub fn cas(
    key: impl Into<String>,
    cas: u64,
    flags: u32,
    exptime: u32,
    data: impl Into<Bytes>,
    callback: Arc<dyn OperationCallback>,
) -> Arc<Operation> {
    Operation::new(
        Command::Store(StoreCommand::with_cas(key, cas, flags, exptime, data)),
        callback,
    )
}

pub fn delete(key: impl Into<String>, callback: Arc<dyn OperationCallback>) -> Arc<Operation> {
    Operation::new(Command::Delete(DeleteCommand::new(key)), callback)
}

pub fn mutate(
    kind: MutateKind,
    key: impl Into<String>,
    by: u64,
    default: Option<u64>,
    exptime: u32,
    callback: Arc<dyn OperationCallback>,
) -> Arc<Operation> {
    Operation::new(
        Command::Mutate(MutateCommand::new(kind, key, by, default, exptime)),
        callback,
    )
}

pub fn incr(
    key: impl Into<String>,
    by: u64,
    default: u64,
    callback: Arc<dyn OperationCallback>,
) -> Arc<Operation> {
    mutate(MutateKind::Incr, key, by, Some(default), 0, callback)
}

pub fn decr(
    key: impl Into<String>,
    by: u64,
    default: u64,
    callback: Arc<dyn OperationCallback>,
) -> Arc<Operation> {
    mutate(MutateKind::Decr, key, by, Some(default), 0, callback)
}

pub fn flush(delay: u32, callback: Arc<dyn OperationCallback>) -> Arc<Operation> {
    Operation::new(Command::Simple(SimpleCommand::Flush { delay }), callback)
}

pub fn noop(callback: Arc<dyn OperationCallback>) -> Arc<Operation> {
    Operation::new(Command::Simple(SimpleCommand::NoOp), callback)
}

pub fn version(callback: Arc<dyn OperationCallback>) -> Arc<Operation> {
    Operation::new(Command::Simple(SimpleCommand::Version), callback)
}

pub fn sasl_plain(
    username: &str,
    password: &str,
    callback: Arc<dyn OperationCallback>,
) -> Arc<Operation> {
    Operation::new(Command::Sasl(SaslCommand::plain(username, password)), callback)
}

pub fn sort_range(
    keys: Vec<String>,
    range: BKeyRange,
    count: u32,
    mode: SMGetMode,
    callback: Arc<dyn OperationCallback>,
) -> Arc<Operation> {
    Operation::new(
        Command::SortRange(SortRangeCommand::new(keys, range, count, mode)),
        callback,
    )
}

/// Coalesces `subs` into one pipelined operation. The batch's own callback
/// is silent; `aggregate` hears once every sub-operation has finished.
pub(crate) fn batch(
    family: BatchFamily,
    subs: Vec<Arc<Operation>>,
    aggregate: Arc<dyn OperationCallback>,
) -> Arc<Operation> {
    Operation::new(
        Command::Batch(BatchCommand::new(family, subs, aggregate)),
        Arc::new(NoopCallback),
    )
}
