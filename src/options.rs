//! Tunable constants for tests and advanced callers.
//!
//! `Store::open` uses [`StoreOptions::default`], which reproduces the fixed
//! values spec.md documents (`ROLL_THRESHOLD`, the 500 ms merge cadence, an
//! LRU capacity of 20). `Store::open_with_options` exists purely so tests
//! can shrink the roll threshold and merge interval without changing the
//! on-disk format; it is not meant to be reached for through ordinary use.

use std::time::Duration;

use crate::log::ROLL_THRESHOLD;
use crate::lru::DEFAULT_CAPACITY;
use crate::merger::DEFAULT_MERGE_INTERVAL;

/// Tunable knobs for a `Store`. Construct with [`StoreOptions::default`] and
/// override only what a test needs via the builder methods.
#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    pub(crate) roll_threshold: u64,
    pub(crate) merge_interval: Duration,
    pub(crate) lru_capacity: usize,
}

impl Default for StoreOptions {
    fn default() -> StoreOptions {
        StoreOptions {
            roll_threshold: ROLL_THRESHOLD,
            merge_interval: DEFAULT_MERGE_INTERVAL,
            lru_capacity: DEFAULT_CAPACITY,
        }
    }
}

impl StoreOptions {
    /// Overrides the segment roll threshold, in bytes.
    pub fn roll_threshold(mut self, bytes: u64) -> StoreOptions {
        self.roll_threshold = bytes;
        self
    }

    /// Overrides the background merger's tick cadence.
    pub fn merge_interval(mut self, interval: Duration) -> StoreOptions {
        self.merge_interval = interval;
        self
    }

    /// Overrides the segment LRU's capacity.
    pub fn lru_capacity(mut self, capacity: usize) -> StoreOptions {
        self.lru_capacity = capacity;
        self
    }
}
