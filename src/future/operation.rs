//! Futures over one or more operations

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use super::latch::CountdownLatch;
use crate::error::{CacheError, Result, TimedOutOperation};
use crate::node::{ops_succeeded, ops_timed_out};
use crate::ops::{Operation, OperationCallback, OperationData};
use crate::protocol::OperationStatus;
use crate::transcoder::CachedData;

/// Grace period for callbacks still running when the wait expires.
const COMPLETION_GRACE: Duration = Duration::from_millis(50);

/// Callback that records an operation's outcome and counts down a latch.
#[derive(Debug)]
pub struct Completion {
    latch: CountdownLatch,
    status: Mutex<Option<OperationStatus>>,
    data: Mutex<Vec<OperationData>>,
}

impl Completion {
    pub fn new(count: usize) -> Self {
        Self::with_latch(CountdownLatch::new(count))
    }

    /// Shares `latch` with other completions of the same future.
    pub fn with_latch(latch: CountdownLatch) -> Self {
        Self {
            latch,
            status: Mutex::new(None),
            data: Mutex::new(Vec::new()),
        }
    }

    pub fn latch(&self) -> &CountdownLatch {
        &self.latch
    }

    pub fn status(&self) -> Option<OperationStatus> {
        self.status.lock().clone()
    }

    pub fn data(&self) -> Vec<OperationData> {
        self.data.lock().clone()
    }

    /// First value payload, with its CAS.
    pub fn value(&self) -> Option<(CachedData, u64)> {
        self.data.lock().iter().find_map(|data| match data {
            OperationData::Value { value, cas, .. } => Some((value.clone(), *cas)),
            _ => None,
        })
    }

    pub fn counter(&self) -> Option<u64> {
        self.data.lock().iter().find_map(|data| match data {
            OperationData::Counter(n) => Some(*n),
            _ => None,
        })
    }

    pub fn version(&self) -> Option<String> {
        self.data.lock().iter().find_map(|data| match data {
            OperationData::Version(v) => Some(v.clone()),
            _ => None,
        })
    }
}

impl OperationCallback for Completion {
    fn got_data(&self, data: OperationData) {
        self.data.lock().push(data);
    }

    fn received_status(&self, status: &OperationStatus) {
        *self.status.lock() = Some(status.clone());
    }

    fn complete(&self) {
        self.latch.count_down();
    }
}

/// Waits on `latch` and settles node health bookkeeping.
///
/// On expiry every unfinished operation is reported. If all of them turn
/// out to be finished (their callbacks raced the deadline) the wait counts
/// as a success.
pub(crate) async fn await_ops(
    latch: &CountdownLatch,
    ops: &[Arc<Operation>],
    timeout: Duration,
) -> Result<()> {
    if latch.wait(timeout).await {
        ops_succeeded(ops);
        return Ok(());
    }
    let pending = timed_out_ops(ops);
    if pending.is_empty() && latch.wait(COMPLETION_GRACE).await {
        ops_succeeded(ops);
        return Ok(());
    }
    ops_timed_out(ops);
    debug!(pending = pending.len(), "Wait timed out");
    Err(CacheError::Timeout(pending))
}

pub(crate) fn timed_out_ops(ops: &[Arc<Operation>]) -> Vec<TimedOutOperation> {
    ops.iter()
        .filter(|op| !op.state().is_terminal())
        .map(|op| TimedOutOperation {
            node: op.node_name(),
            operation: op.to_string(),
            state: op.state(),
        })
        .collect()
}

/// Surfaces attached exceptions and cancellations, bundled when several
/// operations failed.
pub(crate) fn check_failures(ops: &[Arc<Operation>]) -> Result<()> {
    let errors: Vec<CacheError> = ops
        .iter()
        .filter_map(|op| {
            if let Some(exception) = op.exception() {
                Some(CacheError::Protocol(exception))
            } else if op.is_cancelled() {
                Some(CacheError::Cancelled(
                    op.cancel_cause().unwrap_or_else(|| "cancelled".to_string()),
                ))
            } else {
                None
            }
        })
        .collect();
    match CacheError::from_many(errors) {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

pub(crate) fn cancel_all(ops: &[Arc<Operation>]) -> bool {
    ops.iter()
        .map(|op| op.cancel("cancelled by application"))
        .fold(false, |any, unsent| any || unsent)
}

type Decoder<T> = Box<dyn Fn(&Completion) -> Result<T> + Send + Sync>;

/// Result of one logical call backed by one or more operations that all
/// report into a single [`Completion`].
pub struct OperationFuture<T> {
    ops: Vec<Arc<Operation>>,
    completion: Arc<Completion>,
    timeout: Duration,
    decode: Decoder<T>,
    value: OnceLock<T>,
}

impl<T: Clone> OperationFuture<T> {
    pub fn new(
        ops: Vec<Arc<Operation>>,
        completion: Arc<Completion>,
        timeout: Duration,
        decode: impl Fn(&Completion) -> Result<T> + Send + Sync + 'static,
    ) -> Self {
        Self {
            ops,
            completion,
            timeout,
            decode: Box::new(decode),
            value: OnceLock::new(),
        }
    }

    pub async fn get(&self) -> Result<T> {
        self.get_timeout(self.timeout).await
    }

    pub async fn get_timeout(&self, timeout: Duration) -> Result<T> {
        await_ops(self.completion.latch(), &self.ops, timeout).await?;
        check_failures(&self.ops)?;
        if let Some(value) = self.value.get() {
            return Ok(value.clone());
        }
        let value = (self.decode)(&self.completion)?;
        Ok(self.value.get_or_init(|| value).clone())
    }

    /// Final status once the operations are done.
    pub fn status(&self) -> Option<OperationStatus> {
        self.completion.status()
    }

    pub fn is_done(&self) -> bool {
        self.completion.latch().is_open()
    }

    pub fn is_cancelled(&self) -> bool {
        self.ops.iter().any(|op| op.is_cancelled())
    }

    /// True when at least one operation had not started writing.
    pub fn cancel(&self) -> bool {
        cancel_all(&self.ops)
    }

    pub fn operations(&self) -> &[Arc<Operation>] {
        &self.ops
    }
}
