//! Per-index status future for pipelined bulk stores

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use super::latch::CountdownLatch;
use super::operation::{await_ops, cancel_all, check_failures, Completion};
use crate::error::Result;
use crate::ops::Operation;
use crate::protocol::OperationStatus;

/// Maps each item's position to its failing status. An empty map means
/// every item was stored.
#[derive(Debug)]
pub struct PipedFuture {
    ops: Vec<Arc<Operation>>,
    completions: Vec<Arc<Completion>>,
    latch: CountdownLatch,
    timeout: Duration,
    failures: OnceLock<BTreeMap<usize, OperationStatus>>,
}

impl PipedFuture {
    pub fn new(
        items: Vec<(Arc<Operation>, Arc<Completion>)>,
        latch: CountdownLatch,
        timeout: Duration,
    ) -> Self {
        let (ops, completions) = items.into_iter().unzip();
        Self {
            ops,
            completions,
            latch,
            timeout,
            failures: OnceLock::new(),
        }
    }

    pub async fn get(&self) -> Result<BTreeMap<usize, OperationStatus>> {
        self.get_timeout(self.timeout).await
    }

    pub async fn get_timeout(&self, timeout: Duration) -> Result<BTreeMap<usize, OperationStatus>> {
        await_ops(&self.latch, &self.ops, timeout).await?;
        check_failures(&self.ops)?;
        let failures = self.failures.get_or_init(|| {
            self.completions
                .iter()
                .enumerate()
                .filter_map(|(index, completion)| {
                    completion
                        .status()
                        .filter(|status| !status.is_success())
                        .map(|status| (index, status))
                })
                .collect()
        });
        Ok(failures.clone())
    }

    pub fn is_done(&self) -> bool {
        self.latch.is_open()
    }

    pub fn cancel(&self) -> bool {
        cancel_all(&self.ops)
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}
