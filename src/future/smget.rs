//! Sorted multi-get future
//!
//! Each shard operation reports into a [`ShardCallback`] that folds its
//! slice into the shared [`SMGetResult`] on the shard's I/O task. The
//! future finalizes the result once every shard has answered.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use super::latch::CountdownLatch;
use super::operation::{await_ops, cancel_all, check_failures};
use crate::error::Result;
use crate::ops::{Operation, OperationCallback, OperationData};
use crate::protocol::{OperationStatus, StatusCode};
use crate::smget::{SMGetElement, SMGetResult, SMGetStatus, SMGetTrimKey};
use crate::transcoder::{CachedData, Transcoder};

type SharedResult = Arc<Mutex<SMGetResult<CachedData>>>;

/// Folds one shard's answer into the shared result.
pub struct ShardCallback {
    keys: Vec<String>,
    result: SharedResult,
    latch: CountdownLatch,
}

impl ShardCallback {
    pub fn new(keys: Vec<String>, result: SharedResult, latch: CountdownLatch) -> Self {
        Self {
            keys,
            result,
            latch,
        }
    }
}

impl OperationCallback for ShardCallback {
    fn got_data(&self, data: OperationData) {
        if let OperationData::SortRange(shard) = data {
            self.result.lock().add_shard_result(shard);
        }
    }

    fn received_status(&self, status: &OperationStatus) {
        match status.code() {
            StatusCode::Success => {}
            // none of this shard's keys exist
            StatusCode::ErrNotFound => {
                self.result
                    .lock()
                    .add_missed_keys(self.keys.iter().cloned(), status);
            }
            _ => {
                debug!(keys = self.keys.len(), %status, "smget shard failed");
                self.result.lock().fail(status.clone());
            }
        }
    }

    fn complete(&self) {
        self.latch.count_down();
    }
}

/// Finished smget answer.
#[derive(Debug, Clone)]
pub struct SMGetResponse<V> {
    pub elements: Vec<SMGetElement<V>>,
    pub missed: Vec<(String, OperationStatus)>,
    pub trimmed: Vec<SMGetTrimKey>,
    pub status: SMGetStatus,
}

impl<V> SMGetResponse<V> {
    pub fn missed_keys(&self) -> Vec<&str> {
        self.missed.iter().map(|(key, _)| key.as_str()).collect()
    }
}

pub struct SMGetFuture<V> {
    ops: Vec<Arc<Operation>>,
    result: SharedResult,
    latch: CountdownLatch,
    timeout: Duration,
    transcoder: Arc<dyn Transcoder<V>>,
    response: OnceLock<SMGetResponse<V>>,
}

impl<V: Clone> SMGetFuture<V> {
    pub fn new(
        ops: Vec<Arc<Operation>>,
        result: SharedResult,
        latch: CountdownLatch,
        timeout: Duration,
        transcoder: Arc<dyn Transcoder<V>>,
    ) -> Self {
        Self {
            ops,
            result,
            latch,
            timeout,
            transcoder,
            response: OnceLock::new(),
        }
    }

    pub async fn get(&self) -> Result<SMGetResponse<V>> {
        self.get_timeout(self.timeout).await
    }

    /// Merged elements, or the failure of any shard.
    pub async fn get_timeout(&self, timeout: Duration) -> Result<SMGetResponse<V>> {
        await_ops(&self.latch, &self.ops, timeout).await?;
        check_failures(&self.ops)?;
        if let Some(response) = self.response.get() {
            return Ok(response.clone());
        }

        let response = {
            let mut result = self.result.lock();
            let status = result.make_result_status();
            let elements = result
                .elements()
                .iter()
                .map(|element| {
                    let value = self.transcoder.decode(&element.value)?;
                    Ok(SMGetElement::new(element.key.clone(), element.bkey.clone(), value))
                })
                .collect::<Result<Vec<_>>>()?;
            SMGetResponse {
                elements,
                missed: result.missed().to_vec(),
                trimmed: result.trimmed_keys().to_vec(),
                status,
            }
        };
        Ok(self.response.get_or_init(|| response).clone())
    }

    /// Final status, once every shard has answered.
    pub fn status(&self) -> Option<SMGetStatus> {
        if !self.latch.is_open() {
            return None;
        }
        Some(self.result.lock().make_result_status())
    }

    pub fn is_done(&self) -> bool {
        self.latch.is_open()
    }

    pub fn cancel(&self) -> bool {
        cancel_all(&self.ops)
    }

    pub fn shards(&self) -> usize {
        self.ops.len()
    }
}
