//! Per-node timeout accounting
//!
//! Futures report back after every wait: a timed-out wait bumps the
//! continuous-timeout counter of each node it touched, a successful one
//! clears it. The optional ratio window keeps the last
//! [`TIMEOUT_WINDOW_SIZE`] outcomes.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::Node;
use crate::metrics;
use crate::ops::Operation;

pub const TIMEOUT_WINDOW_SIZE: usize = 100;

/// Fixed ring of recent outcomes, O(1) per record.
#[derive(Debug, Clone)]
pub struct TimeoutRatioWindow {
    slots: Vec<bool>,
    next: usize,
    filled: usize,
    timeouts: usize,
}

impl TimeoutRatioWindow {
    pub fn new(size: usize) -> Self {
        Self {
            slots: vec![false; size.max(1)],
            next: 0,
            filled: 0,
            timeouts: 0,
        }
    }

    pub fn record(&mut self, timed_out: bool) {
        if self.filled == self.slots.len() {
            if self.slots[self.next] {
                self.timeouts -= 1;
            }
        } else {
            self.filled += 1;
        }
        self.slots[self.next] = timed_out;
        if timed_out {
            self.timeouts += 1;
        }
        self.next = (self.next + 1) % self.slots.len();
    }

    /// Percentage of timed-out outcomes in the window.
    pub fn ratio(&self) -> u32 {
        if self.filled == 0 {
            return 0;
        }
        (self.timeouts * 100 / self.filled) as u32
    }

    pub fn len(&self) -> usize {
        self.filled
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    pub fn reset(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = false);
        self.next = 0;
        self.filled = 0;
        self.timeouts = 0;
    }
}

#[derive(Debug)]
pub struct NodeHealth {
    continuous_timeouts: AtomicU32,
    window: Option<Mutex<TimeoutRatioWindow>>,
}

impl NodeHealth {
    pub fn new(track_ratio: bool) -> Self {
        Self {
            continuous_timeouts: AtomicU32::new(0),
            window: track_ratio.then(|| Mutex::new(TimeoutRatioWindow::new(TIMEOUT_WINDOW_SIZE))),
        }
    }

    pub fn record_timeout(&self) -> u32 {
        if let Some(window) = &self.window {
            window.lock().record(true);
        }
        self.continuous_timeouts.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn record_success(&self) {
        if let Some(window) = &self.window {
            window.lock().record(false);
        }
        self.continuous_timeouts.store(0, Ordering::Release);
    }

    pub fn continuous_timeouts(&self) -> u32 {
        self.continuous_timeouts.load(Ordering::Acquire)
    }

    /// Timeout percentage over the window, when tracked.
    pub fn timeout_ratio(&self) -> Option<u32> {
        self.window.as_ref().map(|window| window.lock().ratio())
    }

    pub fn reset(&self) {
        self.continuous_timeouts.store(0, Ordering::Release);
        if let Some(window) = &self.window {
            window.lock().reset();
        }
    }
}

fn distinct_nodes(ops: &[Arc<Operation>]) -> Vec<Arc<Node>> {
    let mut nodes: Vec<Arc<Node>> = Vec::new();
    for node in ops.iter().filter_map(|op| op.node()) {
        if !nodes.iter().any(|seen| Arc::ptr_eq(seen, &node)) {
            nodes.push(node);
        }
    }
    nodes
}

/// A wait on `ops` expired: flag the unfinished ones and charge their nodes.
pub fn ops_timed_out(ops: &[Arc<Operation>]) {
    let pending: Vec<_> = ops
        .iter()
        .filter(|op| !op.state().is_terminal())
        .cloned()
        .collect();
    for op in &pending {
        op.mark_timed_out();
    }
    for node in distinct_nodes(&pending) {
        let count = node.health().record_timeout();
        metrics::WAIT_TIMEOUTS.with_label_values(&[node.name()]).inc();
        debug!(node = %node.name(), continuous = count, "Wait timed out");
    }
}

/// A wait on `ops` finished in time.
pub fn ops_succeeded(ops: &[Arc<Operation>]) {
    for node in distinct_nodes(ops) {
        node.health().record_success();
    }
}
