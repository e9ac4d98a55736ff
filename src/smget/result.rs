//! Running smget result shared by every shard callback

use std::cmp::Ordering;

use tracing::debug;

use super::element::{SMGetElement, SMGetTrimKey, ShardSortResult};
use super::merge::{CurrentMerge, LegacyMerge, MergeOptions, MergePolicy, SMGetStatus};
use crate::protocol::OperationStatus;

pub struct SMGetResult<T> {
    opts: MergeOptions,
    policy: Box<dyn MergePolicy<T>>,
    merged: Vec<SMGetElement<T>>,
    missed: Vec<(String, OperationStatus)>,
    trimmed: Vec<SMGetTrimKey>,
    failure: Option<OperationStatus>,
    status: Option<SMGetStatus>,
}

impl<T: Send + 'static> SMGetResult<T> {
    pub fn new(count: usize, reverse: bool, unique: bool) -> Self {
        Self::with_policy(
            MergeOptions {
                count,
                offset: 0,
                reverse,
                unique,
            },
            Box::new(CurrentMerge),
        )
    }

    /// Legacy paging: `offset` elements are skipped once the result is final.
    pub fn legacy(count: usize, offset: usize, reverse: bool, unique: bool) -> Self {
        Self::with_policy(
            MergeOptions {
                count,
                offset,
                reverse,
                unique,
            },
            Box::new(LegacyMerge::default()),
        )
    }

    pub fn with_policy(opts: MergeOptions, policy: Box<dyn MergePolicy<T>>) -> Self {
        Self {
            opts,
            policy,
            merged: Vec::new(),
            missed: Vec::new(),
            trimmed: Vec::new(),
            failure: None,
            status: None,
        }
    }
}

impl<T> SMGetResult<T> {
    pub fn options(&self) -> &MergeOptions {
        &self.opts
    }

    /// Folds one shard's answer in. Ignored once the call has failed.
    pub fn add_shard_result(&mut self, shard: ShardSortResult<T>) {
        if self.failure.is_some() {
            return;
        }
        self.missed.extend(shard.missed);
        self.trimmed.extend(shard.trimmed);
        self.policy
            .merge(&mut self.merged, shard.elements, shard.tail_trimmed, &self.opts);
    }

    /// Records keys whose shard had nothing for them.
    pub fn add_missed_keys(&mut self, keys: impl IntoIterator<Item = String>, status: &OperationStatus) {
        if self.failure.is_some() {
            return;
        }
        self.missed
            .extend(keys.into_iter().map(|key| (key, status.clone())));
    }

    /// Hard shard failure: drop everything gathered so far.
    pub fn fail(&mut self, status: OperationStatus) {
        debug!(%status, "smget shard failed, discarding partial result");
        self.merged.clear();
        self.missed.clear();
        self.trimmed.clear();
        if self.failure.is_none() {
            self.failure = Some(status);
        }
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// Finalizes the result. Later calls return the same status.
    pub fn make_result_status(&mut self) -> SMGetStatus {
        if let Some(status) = &self.status {
            return status.clone();
        }
        let status = match &self.failure {
            Some(failure) => SMGetStatus::Failed(failure.clone()),
            None => {
                self.policy.finish(&mut self.merged, &self.opts);
                self.refine_trimmed_keys();
                self.missed.sort_by(|a, b| a.0.cmp(&b.0));
                self.policy.status(&self.merged, &self.opts)
            }
        };
        self.status = Some(status.clone());
        status
    }

    /// Drops trim markers lying strictly beyond the last element of a full
    /// result; the caller could not page to them anyway.
    fn refine_trimmed_keys(&mut self) {
        let reverse = self.opts.reverse;
        let order = |a: &SMGetTrimKey, b: &SMGetTrimKey| {
            let ord = a.bkey.cmp(&b.bkey).then_with(|| a.key.cmp(&b.key));
            if reverse {
                ord.reverse()
            } else {
                ord
            }
        };
        self.trimmed.sort_by(order);

        if self.merged.len() < self.opts.count {
            return;
        }
        if let Some(last) = self.merged.last() {
            let boundary = last.bkey.clone();
            self.trimmed.retain(|trim| {
                let ord = trim.bkey.cmp(&boundary);
                let beyond = if reverse {
                    ord == Ordering::Less
                } else {
                    ord == Ordering::Greater
                };
                !beyond
            });
        }
    }

    pub fn status(&self) -> Option<&SMGetStatus> {
        self.status.as_ref()
    }

    pub fn elements(&self) -> &[SMGetElement<T>] {
        &self.merged
    }

    pub fn into_elements(self) -> Vec<SMGetElement<T>> {
        self.merged
    }

    pub fn missed(&self) -> &[(String, OperationStatus)] {
        &self.missed
    }

    pub fn missed_keys(&self) -> Vec<String> {
        self.missed.iter().map(|(key, _)| key.clone()).collect()
    }

    pub fn trimmed_keys(&self) -> &[SMGetTrimKey] {
        &self.trimmed
    }

    /// Splits the finished result into its parts.
    pub fn into_parts(
        self,
    ) -> (
        Vec<SMGetElement<T>>,
        Vec<(String, OperationStatus)>,
        Vec<SMGetTrimKey>,
    ) {
        (self.merged, self.missed, self.trimmed)
    }
}
