//! Completion callbacks and the batch completion multiplexer

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::protocol::OperationStatus;
use crate::smget::ShardSortResult;
use crate::transcoder::CachedData;

/// Decoded payload handed to a callback before the terminal status.
#[derive(Debug, Clone)]
pub enum OperationData {
    Value {
        key: String,
        value: CachedData,
        cas: u64,
    },
    Counter(u64),
    Version(String),
    SortRange(ShardSortResult<CachedData>),
}

/// Receives an operation's results on the I/O task.
///
/// `received_status` and `complete` are delivered exactly once per
/// operation, in that order. Implementations must not block.
pub trait OperationCallback: Send + Sync {
    fn got_data(&self, _data: OperationData) {}

    fn received_status(&self, status: &OperationStatus);

    fn complete(&self);
}

/// Callback for operations nobody waits on.
#[derive(Debug, Default)]
pub struct NoopCallback;

impl OperationCallback for NoopCallback {
    fn received_status(&self, _status: &OperationStatus) {}

    fn complete(&self) {}
}

/// Fans N terminal reports into one.
///
/// The aggregate callback fires once the N-th `complete` arrives. The
/// reported status is the most recent failing one, or success when every
/// report succeeded.
pub struct MultiplexCallback {
    remaining: AtomicUsize,
    failing: Mutex<Option<OperationStatus>>,
    aggregate: Arc<dyn OperationCallback>,
}

impl MultiplexCallback {
    pub fn new(count: usize, aggregate: Arc<dyn OperationCallback>) -> Self {
        Self {
            remaining: AtomicUsize::new(count),
            failing: Mutex::new(None),
            aggregate,
        }
    }

    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }
}

impl OperationCallback for MultiplexCallback {
    fn got_data(&self, data: OperationData) {
        self.aggregate.got_data(data);
    }

    fn received_status(&self, status: &OperationStatus) {
        if !status.is_success() {
            *self.failing.lock() = Some(status.clone());
        }
    }

    fn complete(&self) {
        let previous = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if previous == Ok(1) {
            let status = self
                .failing
                .lock()
                .take()
                .unwrap_or_else(OperationStatus::success);
            self.aggregate.received_status(&status);
            self.aggregate.complete();
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingCallback;
    use super::*;
    use crate::protocol::StatusCode;

    #[test]
    fn test_multiplex_fires_once_after_all_reports() {
        let aggregate = Arc::new(RecordingCallback::default());
        let mux = MultiplexCallback::new(3, aggregate.clone());

        for _ in 0..2 {
            mux.received_status(&OperationStatus::success());
            mux.complete();
        }
        assert_eq!(aggregate.completions(), 0);

        mux.received_status(&OperationStatus::success());
        mux.complete();
        assert_eq!(aggregate.completions(), 1);
        assert!(aggregate.last_status().unwrap().is_success());

        // extra reports are ignored
        mux.complete();
        assert_eq!(aggregate.completions(), 1);
    }

    #[test]
    fn test_multiplex_keeps_failing_status() {
        let aggregate = Arc::new(RecordingCallback::default());
        let mux = MultiplexCallback::new(3, aggregate.clone());

        mux.received_status(&OperationStatus::success());
        mux.complete();
        mux.received_status(&OperationStatus::new(StatusCode::ErrNotStored, "not stored"));
        mux.complete();
        mux.received_status(&OperationStatus::success());
        mux.complete();

        let status = aggregate.last_status().unwrap();
        assert_eq!(status.code(), StatusCode::ErrNotStored);
        assert_eq!(aggregate.statuses.lock().len(), 1);
    }
}
