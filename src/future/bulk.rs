//! Multi-key get future

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::warn;

use super::latch::CountdownLatch;
use super::operation::{await_ops, cancel_all, check_failures, Completion};
use crate::error::Result;
use crate::node::{ops_succeeded, ops_timed_out};
use crate::ops::Operation;
use crate::transcoder::Transcoder;

/// One requested key and the operation fetching it.
pub struct BulkEntry {
    pub key: String,
    pub op: Arc<Operation>,
    pub completion: Arc<Completion>,
}

/// Gets of many keys sharing one latch.
///
/// Values are decoded on first access and cached per key. [`get_some`]
/// never fails; it returns what arrived in time and remembers whether the
/// wait expired.
///
/// [`get_some`]: BulkFuture::get_some
pub struct BulkFuture<V> {
    entries: Vec<BulkEntry>,
    latch: CountdownLatch,
    timeout: Duration,
    transcoder: Arc<dyn Transcoder<V>>,
    decoded: Mutex<HashMap<String, V>>,
    timed_out: AtomicBool,
    final_map: OnceLock<HashMap<String, V>>,
}

impl<V: Clone> BulkFuture<V> {
    pub fn new(
        entries: Vec<BulkEntry>,
        latch: CountdownLatch,
        timeout: Duration,
        transcoder: Arc<dyn Transcoder<V>>,
    ) -> Self {
        Self {
            entries,
            latch,
            timeout,
            transcoder,
            decoded: Mutex::new(HashMap::new()),
            timed_out: AtomicBool::new(false),
            final_map: OnceLock::new(),
        }
    }

    fn operations(&self) -> Vec<Arc<Operation>> {
        self.entries.iter().map(|entry| entry.op.clone()).collect()
    }

    pub async fn get(&self) -> Result<HashMap<String, V>> {
        self.get_timeout(self.timeout).await
    }

    /// Every hit, or the first failure among the keys.
    pub async fn get_timeout(&self, timeout: Duration) -> Result<HashMap<String, V>> {
        let ops = self.operations();
        await_ops(&self.latch, &ops, timeout).await?;
        check_failures(&ops)?;
        if let Some(map) = self.final_map.get() {
            return Ok(map.clone());
        }
        let mut map = HashMap::with_capacity(self.entries.len());
        for entry in &self.entries {
            if let Some(value) = self.value_of(entry)? {
                map.insert(entry.key.clone(), value);
            }
        }
        Ok(self.final_map.get_or_init(|| map).clone())
    }

    /// Whatever arrived before `timeout`. Keys that failed to decode are
    /// left out.
    pub async fn get_some(&self, timeout: Duration) -> HashMap<String, V> {
        if let Some(map) = self.final_map.get() {
            return map.clone();
        }
        let complete = self.latch.wait(timeout).await;
        if complete {
            ops_succeeded(&self.operations());
        } else {
            self.timed_out.store(true, Ordering::Release);
            ops_timed_out(&self.operations());
        }

        let mut map = HashMap::new();
        for entry in &self.entries {
            if !entry.op.state().is_terminal() {
                continue;
            }
            match self.value_of(entry) {
                Ok(Some(value)) => {
                    map.insert(entry.key.clone(), value);
                }
                Ok(None) => {}
                Err(e) => warn!(key = %entry.key, error = %e, "Dropping undecodable value"),
            }
        }
        if complete {
            return self.final_map.get_or_init(|| map).clone();
        }
        map
    }

    fn value_of(&self, entry: &BulkEntry) -> Result<Option<V>> {
        if let Some(value) = self.decoded.lock().get(&entry.key) {
            return Ok(Some(value.clone()));
        }
        let data = match entry.completion.value() {
            Some((data, _)) => data,
            None => return Ok(None),
        };
        let value = self.transcoder.decode(&data)?;
        self.decoded.lock().insert(entry.key.clone(), value.clone());
        Ok(Some(value))
    }

    /// Whether a partial read gave up waiting.
    pub fn is_timed_out(&self) -> bool {
        self.timed_out.load(Ordering::Acquire)
    }

    pub fn is_done(&self) -> bool {
        self.latch.is_open()
    }

    pub fn cancel(&self) -> bool {
        cancel_all(&self.operations())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.key.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;
    use crate::ops;
    use crate::protocol::{Frame, Opcode};
    use crate::transcoder::StringTranscoder;
    use bytes::{Bytes, BytesMut};

    fn bulk(keys: &[&str], timeout: Duration) -> BulkFuture<String> {
        let latch = CountdownLatch::new(keys.len());
        let entries = keys
            .iter()
            .map(|key| {
                let completion = Arc::new(Completion::with_latch(latch.clone()));
                BulkEntry {
                    key: key.to_string(),
                    op: ops::get(*key, completion.clone()),
                    completion,
                }
            })
            .collect();
        BulkFuture::new(entries, latch, timeout, Arc::new(StringTranscoder))
    }

    fn answer(op: &Operation, value: Option<&'static [u8]>) {
        let mut out = BytesMut::new();
        let n = op.write_remaining();
        op.fill(&mut out, n);
        op.write_complete();
        let status = if value.is_some() { 0 } else { 0x0001 };
        op.handle_frame(&Frame::response(
            Opcode::GetK,
            status,
            if value.is_some() {
                Bytes::from_static(&[0, 0, 0, 0])
            } else {
                Bytes::new()
            },
            Bytes::new(),
            Bytes::from_static(value.unwrap_or(b"Not found")),
            op.opaque(),
            0,
        ));
    }

    #[tokio::test]
    async fn test_get_collects_hits_only() {
        let future = bulk(&["a", "b", "c"], Duration::from_secs(1));
        answer(&future.entries[0].op, Some(b"1"));
        answer(&future.entries[1].op, None);
        answer(&future.entries[2].op, Some(b"3"));

        let map = future.get().await.unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["a"], "1");
        assert_eq!(map["c"], "3");
        assert!(!future.is_timed_out());
    }

    #[tokio::test]
    async fn test_get_some_returns_partial_and_flags_timeout() {
        let future = bulk(&["a", "b"], Duration::from_secs(1));
        answer(&future.entries[0].op, Some(b"1"));

        let partial = future.get_some(Duration::from_millis(10)).await;
        assert_eq!(partial.len(), 1);
        assert!(future.is_timed_out());
        assert!(future.entries[1].op.is_timed_out());

        answer(&future.entries[1].op, Some(b"2"));
        let full = future.get_some(Duration::from_millis(10)).await;
        assert_eq!(full.len(), 2);
        // the final map is remembered
        assert_eq!(future.get_some(Duration::ZERO).await, full);
    }

    #[tokio::test]
    async fn test_get_some_in_time_resets_node_timeouts() {
        let config = crate::config::ClientConfig::default();
        let (node, _io) = crate::node::Node::new("10.1.1.2:11211", &config);
        let future = bulk(&["a", "b"], Duration::from_secs(1));
        for entry in &future.entries {
            entry.op.set_node(Arc::downgrade(&node));
        }
        answer(&future.entries[0].op, Some(b"1"));

        future.get_some(Duration::from_millis(10)).await;
        assert_eq!(node.health().continuous_timeouts(), 1);

        answer(&future.entries[1].op, Some(b"2"));
        let full = future.get_some(Duration::from_millis(10)).await;
        assert_eq!(full.len(), 2);
        assert_eq!(node.health().continuous_timeouts(), 0);
    }

    #[tokio::test]
    async fn test_get_times_out_with_pending_keys() {
        let future = bulk(&["a", "b"], Duration::from_millis(10));
        answer(&future.entries[0].op, Some(b"1"));
        match future.get().await {
            Err(CacheError::Timeout(pending)) => {
                assert_eq!(pending.len(), 1);
                assert!(pending[0].operation.contains("key=b"));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancelled_key_fails_get() {
        let future = bulk(&["a", "b"], Duration::from_secs(1));
        answer(&future.entries[0].op, Some(b"1"));
        future.entries[1].op.cancel("node down");
        assert!(matches!(
            future.get().await,
            Err(CacheError::Cancelled(cause)) if cause == "node down"
        ));
        // partial reads still see the hit
        assert_eq!(future.get_some(Duration::ZERO).await.len(), 1);
    }
}
