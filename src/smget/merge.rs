//! Merge policies for shard results
//!
//! Both policies keep `merged` sorted by `(bkey, key)` in the query
//! direction and never let it grow past its cap.

use std::cmp::Ordering;

use super::element::{BKey, SMGetElement};

/// Query parameters shared by every merge round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOptions {
    pub count: usize,
    pub offset: usize,
    pub reverse: bool,
    pub unique: bool,
}

/// Final classification of a merged result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SMGetStatus {
    End,
    Duplicated,
    Trimmed,
    DuplicatedTrimmed,
    Failed(crate::protocol::OperationStatus),
}

impl SMGetStatus {
    pub fn is_success(&self) -> bool {
        !matches!(self, SMGetStatus::Failed(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SMGetStatus::End => "END",
            SMGetStatus::Duplicated => "DUPLICATED",
            SMGetStatus::Trimmed => "TRIMMED",
            SMGetStatus::DuplicatedTrimmed => "DUPLICATED_TRIMMED",
            SMGetStatus::Failed(_) => "FAILED",
        }
    }
}

/// Strategy for folding one shard's sorted elements into the running result.
pub trait MergePolicy<T>: Send {
    fn merge(
        &mut self,
        merged: &mut Vec<SMGetElement<T>>,
        shard: Vec<SMGetElement<T>>,
        tail_trimmed: bool,
        opts: &MergeOptions,
    );

    /// Runs once after the last shard, before the result is read.
    fn finish(&mut self, _merged: &mut Vec<SMGetElement<T>>, _opts: &MergeOptions) {}

    fn status(&self, merged: &[SMGetElement<T>], opts: &MergeOptions) -> SMGetStatus;
}

fn has_adjacent_duplicates<T>(merged: &[SMGetElement<T>]) -> bool {
    merged.windows(2).any(|w| w[0].bkey == w[1].bkey)
}

/// Two-pointer merge capped at `count`.
#[derive(Debug, Default)]
pub struct CurrentMerge;

impl<T: Send> MergePolicy<T> for CurrentMerge {
    fn merge(
        &mut self,
        merged: &mut Vec<SMGetElement<T>>,
        shard: Vec<SMGetElement<T>>,
        _tail_trimmed: bool,
        opts: &MergeOptions,
    ) {
        let previous = std::mem::take(merged);
        let mut out = Vec::with_capacity(opts.count.min(previous.len() + shard.len()));
        let mut left = previous.into_iter().peekable();
        let mut right = shard.into_iter().peekable();

        while out.len() < opts.count {
            let next = match (left.peek(), right.peek()) {
                // the element merged in an earlier round wins a unique tie
                (Some(l), Some(r)) if opts.unique && l.bkey == r.bkey => {
                    right.next();
                    left.next()
                }
                (Some(l), Some(r)) if l.compare(r, opts.reverse) != Ordering::Greater => left.next(),
                (Some(_), Some(_)) => right.next(),
                (Some(_), None) => left.next(),
                (None, Some(_)) => right.next(),
                (None, None) => break,
            };
            let Some(next) = next else { break };

            if opts.unique {
                let last: Option<&BKey> = out.last().map(|e: &SMGetElement<T>| &e.bkey);
                if last == Some(&next.bkey) {
                    continue;
                }
            }
            out.push(next);
        }
        *merged = out;
    }

    fn status(&self, merged: &[SMGetElement<T>], opts: &MergeOptions) -> SMGetStatus {
        if !opts.unique && has_adjacent_duplicates(merged) {
            SMGetStatus::Duplicated
        } else {
            SMGetStatus::End
        }
    }
}

/// Insertion merge that pages with an offset and refuses to extend past a
/// trimmed tail with a different order key.
#[derive(Debug, Default)]
pub struct LegacyMerge {
    merged_trim: bool,
    offset_applied: bool,
}

impl LegacyMerge {
    pub fn is_trimmed(&self) -> bool {
        self.merged_trim
    }
}

impl<T: Send> MergePolicy<T> for LegacyMerge {
    fn merge(
        &mut self,
        merged: &mut Vec<SMGetElement<T>>,
        shard: Vec<SMGetElement<T>>,
        tail_trimmed: bool,
        opts: &MergeOptions,
    ) {
        let total = opts.offset + opts.count;
        let shard_last = shard.last().map(|e| (e.key.clone(), e.bkey.clone()));

        if merged.is_empty() {
            merged.extend(shard.into_iter().take(total));
            self.merged_trim = tail_trimmed;
        } else {
            let mut pos = 0;
            for element in shard {
                while pos < merged.len()
                    && merged[pos].compare(&element, opts.reverse) == Ordering::Less
                {
                    pos += 1;
                }
                if pos >= total {
                    break;
                }
                // past a trimmed tail only an equal order key is known to be contiguous
                if pos >= merged.len()
                    && self.merged_trim
                    && pos > 0
                    && merged[pos - 1].bkey != element.bkey
                {
                    break;
                }
                if opts.unique {
                    if pos > 0 && merged[pos - 1].bkey == element.bkey {
                        continue;
                    }
                    if pos < merged.len() && merged[pos].bkey == element.bkey {
                        pos += 1;
                        continue;
                    }
                }
                merged.insert(pos, element);
                merged.truncate(total);
                pos += 1;
            }

            if tail_trimmed {
                if let (Some((key, bkey)), Some(tail)) = (&shard_last, merged.last()) {
                    if &tail.key == key && &tail.bkey == bkey {
                        self.merged_trim = true;
                    }
                }
            }
        }

        if merged.len() >= total {
            self.merged_trim = false;
        }
    }

    fn finish(&mut self, merged: &mut Vec<SMGetElement<T>>, opts: &MergeOptions) {
        if !self.offset_applied {
            self.offset_applied = true;
            let skip = opts.offset.min(merged.len());
            merged.drain(..skip);
        }
    }

    fn status(&self, merged: &[SMGetElement<T>], opts: &MergeOptions) -> SMGetStatus {
        let duplicated = !opts.unique && has_adjacent_duplicates(merged);
        match (duplicated, self.merged_trim) {
            (true, true) => SMGetStatus::DuplicatedTrimmed,
            (true, false) => SMGetStatus::Duplicated,
            (false, true) => SMGetStatus::Trimmed,
            (false, false) => SMGetStatus::End,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn el(bkey: u64, key: &str) -> SMGetElement<()> {
        SMGetElement::new(key, bkey, ())
    }

    fn opts(count: usize, reverse: bool, unique: bool) -> MergeOptions {
        MergeOptions {
            count,
            offset: 0,
            reverse,
            unique,
        }
    }

    fn pairs(merged: &[SMGetElement<()>]) -> Vec<(u64, &str)> {
        merged
            .iter()
            .map(|e| match e.bkey {
                BKey::Long(v) => (v, e.key.as_str()),
                BKey::Bytes(_) => unreachable!(),
            })
            .collect()
    }

    #[test]
    fn test_current_three_shards() {
        let o = opts(4, false, true);
        let mut policy = CurrentMerge;
        let mut merged = Vec::new();
        policy.merge(&mut merged, vec![el(1, "a"), el(3, "a")], false, &o);
        policy.merge(&mut merged, vec![el(2, "b"), el(4, "b")], false, &o);
        policy.merge(&mut merged, vec![el(5, "c"), el(6, "c")], false, &o);
        assert_eq!(pairs(&merged), vec![(1, "a"), (2, "b"), (3, "a"), (4, "b")]);
        assert_eq!(policy.status(&merged, &o), SMGetStatus::End);
    }

    #[test]
    fn test_current_unique_keeps_first_encountered() {
        let o = opts(10, false, true);
        let mut policy = CurrentMerge;
        let mut merged = Vec::new();
        policy.merge(&mut merged, vec![el(1, "b"), el(2, "b")], false, &o);
        policy.merge(&mut merged, vec![el(1, "a"), el(3, "a")], false, &o);
        assert_eq!(pairs(&merged), vec![(1, "b"), (2, "b"), (3, "a")]);
        assert_eq!(policy.status(&merged, &o), SMGetStatus::End);
    }

    #[test]
    fn test_current_unique_tie_descending() {
        let o = opts(10, true, true);
        let mut policy = CurrentMerge;
        let mut merged = Vec::new();
        policy.merge(&mut merged, vec![el(5, "b"), el(3, "b")], false, &o);
        policy.merge(&mut merged, vec![el(5, "a"), el(4, "a"), el(3, "c")], false, &o);
        assert_eq!(pairs(&merged), vec![(5, "b"), (4, "a"), (3, "b")]);
    }

    #[test]
    fn test_current_duplicates_reported() {
        let o = opts(10, false, false);
        let mut policy = CurrentMerge;
        let mut merged = Vec::new();
        policy.merge(&mut merged, vec![el(1, "b")], false, &o);
        policy.merge(&mut merged, vec![el(1, "a")], false, &o);
        assert_eq!(pairs(&merged), vec![(1, "a"), (1, "b")]);
        assert_eq!(policy.status(&merged, &o), SMGetStatus::Duplicated);
    }

    #[test]
    fn test_current_reverse() {
        let o = opts(3, true, false);
        let mut policy = CurrentMerge;
        let mut merged = Vec::new();
        policy.merge(&mut merged, vec![el(9, "a"), el(4, "a")], false, &o);
        policy.merge(&mut merged, vec![el(7, "b"), el(1, "b")], false, &o);
        assert_eq!(pairs(&merged), vec![(9, "a"), (7, "b"), (4, "a")]);
    }

    #[test]
    fn test_legacy_offset_applied_once() {
        let o = MergeOptions {
            count: 2,
            offset: 1,
            reverse: false,
            unique: false,
        };
        let mut policy = LegacyMerge::default();
        let mut merged = Vec::new();
        policy.merge(&mut merged, vec![el(1, "a"), el(4, "a")], false, &o);
        policy.merge(&mut merged, vec![el(2, "b"), el(3, "b"), el(5, "b")], false, &o);
        assert_eq!(merged.len(), 3);

        policy.finish(&mut merged, &o);
        assert_eq!(pairs(&merged), vec![(2, "b"), (3, "b")]);
        policy.finish(&mut merged, &o);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_legacy_stops_past_trimmed_tail() {
        let o = opts(10, false, false);
        let mut policy = LegacyMerge::default();
        let mut merged = Vec::new();
        // first shard hit its own cap at bkey 3
        policy.merge(&mut merged, vec![el(1, "a"), el(3, "a")], true, &o);
        assert!(policy.is_trimmed());

        // 3 continues the trimmed tail, 8 would skip whatever shard a dropped
        policy.merge(&mut merged, vec![el(2, "b"), el(3, "b"), el(8, "b")], false, &o);
        assert_eq!(pairs(&merged), vec![(1, "a"), (2, "b"), (3, "a"), (3, "b")]);
        assert_eq!(policy.status(&merged, &o), SMGetStatus::DuplicatedTrimmed);
    }

    #[test]
    fn test_legacy_front_insert_while_trimmed() {
        let o = opts(10, false, false);
        let mut policy = LegacyMerge::default();
        let mut merged = Vec::new();
        policy.merge(&mut merged, vec![el(5, "a")], true, &o);
        assert!(policy.is_trimmed());

        // 1 lands at the front, 5 continues the tail, 9 would skip a gap
        policy.merge(&mut merged, vec![el(1, "b"), el(5, "b"), el(9, "b")], false, &o);
        assert_eq!(pairs(&merged), vec![(1, "b"), (5, "a"), (5, "b")]);
        assert!(policy.is_trimmed());
    }

    #[test]
    fn test_legacy_unique_keeps_first_encountered() {
        let o = opts(10, false, true);
        let mut policy = LegacyMerge::default();
        let mut merged = Vec::new();
        policy.merge(&mut merged, vec![el(2, "b"), el(4, "b")], false, &o);
        policy.merge(&mut merged, vec![el(2, "a"), el(3, "a")], false, &o);
        assert_eq!(pairs(&merged), vec![(2, "b"), (3, "a"), (4, "b")]);
    }

    #[test]
    fn test_legacy_untrimmed_tail_extends() {
        let o = opts(10, false, true);
        let mut policy = LegacyMerge::default();
        let mut merged = Vec::new();
        policy.merge(&mut merged, vec![el(1, "a")], false, &o);
        policy.merge(&mut merged, vec![el(1, "b"), el(5, "b")], false, &o);
        assert_eq!(pairs(&merged), vec![(1, "a"), (5, "b")]);
        assert_eq!(policy.status(&merged, &o), SMGetStatus::End);
    }
}
