//! Client facade
//!
//! Routes keys to nodes, builds operations and hands back the matching
//! future. Every call returns once its operations are queued; waiting
//! happens on the returned future.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{CacheError, Result};
use crate::future::{
    BulkEntry, BulkFuture, Completion, CountdownLatch, OperationFuture, PipedFuture,
    SMGetFuture, ShardCallback,
};
use crate::locator::{ArrayModLocator, NodeLocator};
use crate::metrics;
use crate::node::Node;
use crate::ops::{self, MultiplexCallback, OperationCallback, StoreKind};
use crate::protocol::StatusCode;
use crate::smget::{BKeyRange, SMGetMode, SMGetResult, MAX_SMGET_COUNT};
use crate::transcoder::Transcoder;

/// Longest key the binary protocol accepts.
pub const MAX_KEY_LENGTH: usize = 250;

/// Value read together with its CAS token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CasValue<V> {
    pub cas: u64,
    pub value: V,
}

/// Outcome of a compare-and-swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasResponse {
    Ok,
    /// Someone else modified the item first
    Exists,
    NotFound,
    Failed,
}

pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(CacheError::InvalidArgument("key must not be empty".into()));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(CacheError::InvalidArgument(format!(
            "key is {} bytes, limit is {}",
            key.len(),
            MAX_KEY_LENGTH
        )));
    }
    Ok(())
}

/// Cancels what a fan-out already queued once a later submission fails,
/// so a call that returns an error leaves nothing on the wire.
fn abandon(queued: &[Arc<ops::Operation>], err: CacheError) -> CacheError {
    let unsent = queued
        .iter()
        .filter(|op| op.cancel("fan-out aborted"))
        .count();
    warn!(queued = queued.len(), unsent, error = %err, "Fan-out aborted");
    err
}

fn succeeded(completion: &Completion) -> Result<bool> {
    Ok(completion
        .status()
        .map(|status| status.is_success())
        .unwrap_or(false))
}

pub struct CacheClient {
    config: ClientConfig,
    locator: Box<dyn NodeLocator>,
    nodes: DashMap<String, Arc<Node>>,
}

impl CacheClient {
    /// Spawns one connection task per configured server. Must be called
    /// from within a tokio runtime.
    pub fn connect(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let nodes: Vec<Arc<Node>> = config
            .servers
            .iter()
            .map(|addr| Node::spawn(addr.clone(), &config))
            .collect();
        info!(servers = nodes.len(), "Cache client started");
        Ok(Self::with_locator(config, Box::new(ArrayModLocator::new(nodes))))
    }

    /// Uses already created nodes behind `locator`.
    pub fn with_locator(config: ClientConfig, locator: Box<dyn NodeLocator>) -> Self {
        let nodes = DashMap::new();
        for node in locator.all() {
            nodes.insert(node.name().to_string(), node.clone());
        }
        Self {
            config,
            locator,
            nodes,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn node(&self, name: &str) -> Option<Arc<Node>> {
        self.nodes.get(name).map(|entry| entry.value().clone())
    }

    pub fn nodes(&self) -> &[Arc<Node>] {
        self.locator.all()
    }

    async fn single<T: Clone>(
        &self,
        key: &str,
        build: impl FnOnce(Arc<dyn OperationCallback>) -> Arc<ops::Operation>,
        decode: impl Fn(&Completion) -> Result<T> + Send + Sync + 'static,
    ) -> Result<OperationFuture<T>> {
        validate_key(key)?;
        let completion = Arc::new(Completion::new(1));
        let op = build(completion.clone());
        self.locator.primary(key).add_op(op.clone()).await?;
        Ok(OperationFuture::new(
            vec![op],
            completion,
            self.config.op_timeout(),
            decode,
        ))
    }

    pub async fn get<V, T>(&self, key: &str, transcoder: T) -> Result<OperationFuture<Option<V>>>
    where
        V: Clone + 'static,
        T: Transcoder<V> + 'static,
    {
        self.single(
            key,
            |cb| ops::get(key, cb),
            move |c| {
                c.value()
                    .map(|(data, _)| transcoder.decode(&data))
                    .transpose()
            },
        )
        .await
    }

    pub async fn gets<V, T>(
        &self,
        key: &str,
        transcoder: T,
    ) -> Result<OperationFuture<Option<CasValue<V>>>>
    where
        V: Clone + 'static,
        T: Transcoder<V> + 'static,
    {
        self.single(
            key,
            |cb| ops::gets(key, cb),
            move |c| {
                c.value()
                    .map(|(data, cas)| {
                        Ok(CasValue {
                            cas,
                            value: transcoder.decode(&data)?,
                        })
                    })
                    .transpose()
            },
        )
        .await
    }

    pub async fn store<V>(
        &self,
        kind: StoreKind,
        key: &str,
        exptime: u32,
        value: &V,
        transcoder: &dyn Transcoder<V>,
    ) -> Result<OperationFuture<bool>> {
        let data = transcoder.encode(value)?;
        self.single(
            key,
            |cb| ops::store(kind, key, data.flags, exptime, data.data, cb),
            succeeded,
        )
        .await
    }

    pub async fn set<V>(
        &self,
        key: &str,
        exptime: u32,
        value: &V,
        transcoder: &dyn Transcoder<V>,
    ) -> Result<OperationFuture<bool>> {
        self.store(StoreKind::Set, key, exptime, value, transcoder)
            .await
    }

    pub async fn add<V>(
        &self,
        key: &str,
        exptime: u32,
        value: &V,
        transcoder: &dyn Transcoder<V>,
    ) -> Result<OperationFuture<bool>> {
        self.store(StoreKind::Add, key, exptime, value, transcoder)
            .await
    }

    pub async fn replace<V>(
        &self,
        key: &str,
        exptime: u32,
        value: &V,
        transcoder: &dyn Transcoder<V>,
    ) -> Result<OperationFuture<bool>> {
        self.store(StoreKind::Replace, key, exptime, value, transcoder)
            .await
    }

    pub async fn append<V>(
        &self,
        key: &str,
        value: &V,
        transcoder: &dyn Transcoder<V>,
    ) -> Result<OperationFuture<bool>> {
        self.store(StoreKind::Append, key, 0, value, transcoder)
            .await
    }

    pub async fn prepend<V>(
        &self,
        key: &str,
        value: &V,
        transcoder: &dyn Transcoder<V>,
    ) -> Result<OperationFuture<bool>> {
        self.store(StoreKind::Prepend, key, 0, value, transcoder)
            .await
    }

    pub async fn cas<V>(
        &self,
        key: &str,
        cas: u64,
        exptime: u32,
        value: &V,
        transcoder: &dyn Transcoder<V>,
    ) -> Result<OperationFuture<CasResponse>> {
        let data = transcoder.encode(value)?;
        self.single(
            key,
            |cb| ops::cas(key, cas, data.flags, exptime, data.data, cb),
            |c| {
                Ok(match c.status().map(|status| status.code()) {
                    Some(StatusCode::Success) => CasResponse::Ok,
                    Some(StatusCode::ErrExists) => CasResponse::Exists,
                    Some(StatusCode::ErrNotFound) => CasResponse::NotFound,
                    _ => CasResponse::Failed,
                })
            },
        )
        .await
    }

    pub async fn delete(&self, key: &str) -> Result<OperationFuture<bool>> {
        self.single(key, |cb| ops::delete(key, cb), succeeded).await
    }

    /// Adds `by`, creating the counter at `default` when absent. `None`
    /// when the server refused (for example a non-numeric value).
    pub async fn incr(&self, key: &str, by: u64, default: u64) -> Result<OperationFuture<Option<u64>>> {
        self.single(
            key,
            |cb| ops::incr(key, by, default, cb),
            |c| Ok(c.counter()),
        )
        .await
    }

    pub async fn decr(&self, key: &str, by: u64, default: u64) -> Result<OperationFuture<Option<u64>>> {
        self.single(
            key,
            |cb| ops::decr(key, by, default, cb),
            |c| Ok(c.counter()),
        )
        .await
    }

    /// Flushes every node. The future succeeds only if all nodes did.
    pub async fn flush(&self, delay: u32) -> Result<OperationFuture<bool>> {
        let nodes = self.locator.all();
        let completion = Arc::new(Completion::new(1));
        let mux: Arc<dyn OperationCallback> =
            Arc::new(MultiplexCallback::new(nodes.len(), completion.clone()));
        let mut flushes = Vec::with_capacity(nodes.len());
        for node in nodes {
            let op = ops::flush(delay, mux.clone());
            if let Err(e) = node.add_op(op.clone()).await {
                return Err(abandon(&flushes, e));
            }
            flushes.push(op);
        }
        Ok(OperationFuture::new(
            flushes,
            completion,
            self.config.op_timeout(),
            succeeded,
        ))
    }

    /// Server version of every node, keyed by node name.
    pub async fn versions(&self) -> Result<HashMap<String, String>> {
        let mut pending: Vec<(String, OperationFuture<String>)> = Vec::new();
        for node in self.locator.all() {
            let completion = Arc::new(Completion::new(1));
            let op = ops::version(completion.clone());
            if let Err(e) = node.add_op(op.clone()).await {
                let queued: Vec<_> = pending
                    .iter()
                    .flat_map(|(_, future)| future.operations().to_vec())
                    .collect();
                return Err(abandon(&queued, e));
            }
            let future = OperationFuture::new(
                vec![op],
                completion,
                self.config.op_timeout(),
                |c: &Completion| Ok(c.version().unwrap_or_default()),
            );
            pending.push((node.name().to_string(), future));
        }

        let mut versions = HashMap::with_capacity(pending.len());
        for (name, future) in pending {
            versions.insert(name, future.get().await?);
        }
        Ok(versions)
    }

    /// Gets many keys at once. Duplicate keys are fetched once.
    pub async fn get_bulk<V, T>(
        &self,
        keys: impl IntoIterator<Item = impl Into<String>>,
        transcoder: T,
    ) -> Result<BulkFuture<V>>
    where
        V: Clone + 'static,
        T: Transcoder<V> + 'static,
    {
        let mut seen = HashSet::new();
        let keys: Vec<String> = keys
            .into_iter()
            .map(Into::into)
            .filter(|key| seen.insert(key.clone()))
            .collect();
        for key in &keys {
            validate_key(key)?;
        }

        let latch = CountdownLatch::new(keys.len());
        let mut entries: Vec<BulkEntry> = Vec::with_capacity(keys.len());
        for key in keys {
            let completion = Arc::new(Completion::with_latch(latch.clone()));
            let op = ops::get(key.clone(), completion.clone());
            if let Err(e) = self.locator.primary(&key).add_op(op.clone()).await {
                let queued: Vec<_> = entries.iter().map(|entry| entry.op.clone()).collect();
                return Err(abandon(&queued, e));
            }
            entries.push(BulkEntry {
                key,
                op,
                completion,
            });
        }
        debug!(keys = entries.len(), "Bulk get queued");
        Ok(BulkFuture::new(
            entries,
            latch,
            self.config.op_timeout(),
            Arc::new(transcoder),
        ))
    }

    /// Stores every item with `set`. The future maps item positions to
    /// their failing status.
    pub async fn set_bulk<V>(
        &self,
        items: &[(String, V)],
        exptime: u32,
        transcoder: &dyn Transcoder<V>,
    ) -> Result<PipedFuture> {
        let mut encoded = Vec::with_capacity(items.len());
        for (key, value) in items {
            validate_key(key)?;
            encoded.push((key, transcoder.encode(value)?));
        }

        let latch = CountdownLatch::new(encoded.len());
        let mut piped: Vec<(Arc<ops::Operation>, Arc<Completion>)> = Vec::with_capacity(encoded.len());
        for (key, data) in encoded {
            let completion = Arc::new(Completion::with_latch(latch.clone()));
            let op = ops::set(key.clone(), data.flags, exptime, data.data, completion.clone());
            if let Err(e) = self.locator.primary(key).add_op(op.clone()).await {
                let queued: Vec<_> = piped.iter().map(|(op, _)| op.clone()).collect();
                return Err(abandon(&queued, e));
            }
            piped.push((op, completion));
        }
        Ok(PipedFuture::new(piped, latch, self.config.op_timeout()))
    }

    /// Sorted multi-get over `keys`, returning at most `count` elements of
    /// `range` ordered by bkey.
    pub async fn smget<V, T>(
        &self,
        keys: &[String],
        range: BKeyRange,
        count: usize,
        mode: SMGetMode,
        transcoder: T,
    ) -> Result<SMGetFuture<V>>
    where
        V: Clone + 'static,
        T: Transcoder<V> + 'static,
    {
        validate_smget(keys, 0, count)?;
        let result = SMGetResult::new(count, range.is_reverse(), mode.is_unique());
        self.fan_out_smget(keys, range, count, mode, result, "current", transcoder)
            .await
    }

    /// Sorted multi-get that skips `offset` merged elements. Each shard is
    /// asked for `offset + count` elements.
    pub async fn smget_legacy<V, T>(
        &self,
        keys: &[String],
        range: BKeyRange,
        offset: usize,
        count: usize,
        mode: SMGetMode,
        transcoder: T,
    ) -> Result<SMGetFuture<V>>
    where
        V: Clone + 'static,
        T: Transcoder<V> + 'static,
    {
        validate_smget(keys, offset, count)?;
        let result = SMGetResult::legacy(count, offset, range.is_reverse(), mode.is_unique());
        self.fan_out_smget(keys, range, offset + count, mode, result, "legacy", transcoder)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn fan_out_smget<V, T>(
        &self,
        keys: &[String],
        range: BKeyRange,
        shard_count: usize,
        mode: SMGetMode,
        result: SMGetResult<crate::transcoder::CachedData>,
        policy: &str,
        transcoder: T,
    ) -> Result<SMGetFuture<V>>
    where
        V: Clone + 'static,
        T: Transcoder<V> + 'static,
    {
        let shards = self.group_by_node(keys);
        metrics::SMGET_SHARDS
            .with_label_values(&[policy])
            .observe(shards.len() as f64);

        let latch = CountdownLatch::new(shards.len());
        let result = Arc::new(parking_lot::Mutex::new(result));
        let mut sort_ops = Vec::with_capacity(shards.len());
        for (node, shard_keys) in shards {
            let callback = ShardCallback::new(shard_keys.clone(), result.clone(), latch.clone());
            let op = ops::sort_range(
                shard_keys,
                range.clone(),
                shard_count as u32,
                mode,
                Arc::new(callback),
            );
            if let Err(e) = node.add_op(op.clone()).await {
                return Err(abandon(&sort_ops, e));
            }
            sort_ops.push(op);
        }
        debug!(shards = sort_ops.len(), policy, "smget queued");
        Ok(SMGetFuture::new(
            sort_ops,
            result,
            latch,
            self.config.op_timeout(),
            Arc::new(transcoder),
        ))
    }

    /// Groups keys by owning node, in first-seen order.
    fn group_by_node(&self, keys: &[String]) -> Vec<(Arc<Node>, Vec<String>)> {
        let mut groups: Vec<(Arc<Node>, Vec<String>)> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for key in keys {
            let node = self.locator.primary(key);
            match index.get(node.name()) {
                Some(&i) => groups[i].1.push(key.clone()),
                None => {
                    index.insert(node.name().to_string(), groups.len());
                    groups.push((node, vec![key.clone()]));
                }
            }
        }
        groups
    }

    /// Stops every node, cancelling what they still hold.
    pub async fn shutdown(&self) {
        for node in self.locator.all() {
            node.shutdown().await;
        }
        info!("Cache client shut down");
    }
}

fn validate_smget(keys: &[String], offset: usize, count: usize) -> Result<()> {
    if keys.is_empty() {
        return Err(CacheError::InvalidArgument("smget needs at least one key".into()));
    }
    if count == 0 || offset + count > MAX_SMGET_COUNT {
        return Err(CacheError::InvalidArgument(format!(
            "offset + count must be within 1..={}, got {}",
            MAX_SMGET_COUNT,
            offset + count
        )));
    }
    let mut seen = HashSet::with_capacity(keys.len());
    for key in keys {
        validate_key(key)?;
        if !seen.insert(key.as_str()) {
            return Err(CacheError::InvalidArgument(format!(
                "duplicate smget key {:?}",
                key
            )));
        }
    }
    Ok(())
}
