//! Prometheus metrics for operations and connections
//!
//! Counters are process-global. Call [`init_metrics`] once to register them
//! with [`METRICS_REGISTRY`] before exporting.

use prometheus::{
    core::{AtomicU64, GenericCounter, GenericGauge},
    Encoder, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use tracing::{error, info};

use crate::ops::OpKind;
use crate::protocol::OperationStatus;

lazy_static::lazy_static! {
    /// Global metrics registry
    pub static ref METRICS_REGISTRY: Registry = Registry::new();

    pub static ref OPERATIONS_COMPLETED: IntCounterVec = IntCounterVec::new(
        Opts::new("pipecache_operations_completed_total", "Operations completed by kind and status"),
        &["kind", "status"]
    ).unwrap();

    pub static ref OPERATIONS_CANCELLED: GenericCounter<AtomicU64> = GenericCounter::new(
        "pipecache_operations_cancelled_total",
        "Operations cancelled before completing"
    ).unwrap();

    pub static ref WAIT_TIMEOUTS: IntCounterVec = IntCounterVec::new(
        Opts::new("pipecache_wait_timeouts_total", "Future waits that timed out, per node"),
        &["node"]
    ).unwrap();

    pub static ref BATCHED_OPERATIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("pipecache_batched_operations_total", "Operations sent inside a pipelined batch"),
        &["family"]
    ).unwrap();

    pub static ref RECONNECTS: IntCounterVec = IntCounterVec::new(
        Opts::new("pipecache_reconnects_total", "Connection attempts after a failure"),
        &["node"]
    ).unwrap();

    pub static ref CONNECTED_NODES: GenericGauge<AtomicU64> = GenericGauge::new(
        "pipecache_connected_nodes",
        "Nodes with an established connection"
    ).unwrap();

    pub static ref SMGET_SHARDS: HistogramVec = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "pipecache_smget_shards",
            "Shards touched by one sorted multi-get"
        ).buckets(vec![1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0]),
        &["policy"]
    ).unwrap();
}

/// Initialize metrics registry
pub fn init_metrics() {
    info!("Initializing Prometheus metrics");

    METRICS_REGISTRY.register(Box::new(OPERATIONS_COMPLETED.clone())).ok();
    METRICS_REGISTRY.register(Box::new(OPERATIONS_CANCELLED.clone())).ok();
    METRICS_REGISTRY.register(Box::new(WAIT_TIMEOUTS.clone())).ok();
    METRICS_REGISTRY.register(Box::new(BATCHED_OPERATIONS.clone())).ok();
    METRICS_REGISTRY.register(Box::new(RECONNECTS.clone())).ok();
    METRICS_REGISTRY.register(Box::new(CONNECTED_NODES.clone())).ok();
    METRICS_REGISTRY.register(Box::new(SMGET_SHARDS.clone())).ok();
}

pub(crate) fn record_completion(kind: OpKind, status: &OperationStatus) {
    OPERATIONS_COMPLETED
        .with_label_values(&[kind.name(), status.code().as_str()])
        .inc();
}

/// Export all metrics in Prometheus text format
pub fn export_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = METRICS_REGISTRY.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return String::from("# Error encoding metrics\n");
    }

    String::from_utf8(buffer).unwrap_or_else(|_| String::from("# Error converting metrics\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::StoreKind;

    #[test]
    fn test_export_after_init() {
        init_metrics();
        init_metrics();
        record_completion(OpKind::Store(StoreKind::Set), &OperationStatus::success());
        BATCHED_OPERATIONS.with_label_values(&["get"]).inc_by(3);

        let text = export_metrics();
        assert!(text.contains("pipecache_operations_completed_total"));
        assert!(text.contains("kind=\"set\""));
        assert!(text.contains("pipecache_batched_operations_total"));
    }
}
