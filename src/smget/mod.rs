//! Sorted multi-get
//!
//! A range query is fanned out to every shard holding one of the requested
//! keys. Each shard returns its own sorted, capped slice and the slices are
//! merged into one ordered result as they arrive.

pub mod element;
pub mod merge;
pub mod result;

pub use element::{BKey, BKeyRange, SMGetElement, SMGetMode, SMGetTrimKey, ShardSortResult};
pub use merge::{CurrentMerge, LegacyMerge, MergeOptions, MergePolicy, SMGetStatus};
pub use result::SMGetResult;

/// Largest `count` a single smget may request.
pub const MAX_SMGET_COUNT: usize = 1000;
