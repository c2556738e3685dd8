//! Entry aggregation
//!
//! A [`Counter`] consumes one file's entries in a single pass and keeps:
//!
//! ```text
//! ┌──────────────────────┬──────────────────────────────────────────┐
//! │ type counts / bytes  │ exact, one slot per DataType             │
//! │ largest entries      │ min-heap, largest_entries_capacity       │
//! │ prefixes             │ (type, prefix) totals, capped per type   │
//! │ length buckets       │ (type, length range) totals              │
//! └──────────────────────┴──────────────────────────────────────────┘
//! ```
//!
//! Only derived totals and the bounded top-N are retained, so memory does
//! not grow with the number of keys (prefix groups are bounded by
//! `prefix_tracking_limit`).

mod buckets;
mod largest;
mod prefix;

use std::collections::HashMap;

use crate::config::CounterConfig;
use crate::entry::{DataType, Entry};

pub use buckets::LengthBucket;
pub use prefix::PrefixAggregate;

use buckets::LengthBuckets;
use largest::LargestEntries;
use prefix::PrefixTable;

/// Running count and byte total
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Totals {
    pub count: u64,
    pub bytes: u64,
}

impl Totals {
    pub(crate) fn add(&mut self, bytes: u64) {
        self.count += 1;
        self.bytes += bytes;
    }
}

/// Single-pass statistics over one file's entries
///
/// One counter per file: feeding a second file into the same counter
/// merges both into one set of totals.
pub struct Counter {
    config: CounterConfig,
    type_counts: HashMap<DataType, u64>,
    type_bytes: HashMap<DataType, u64>,
    largest: LargestEntries,
    prefixes: PrefixTable,
    buckets: LengthBuckets,
    seen: u64,
    total_bytes: u64,
}

impl Counter {
    pub fn new(config: CounterConfig) -> Self {
        let mut bounds = config.length_bucket_bounds.clone();
        bounds.sort_unstable();
        bounds.dedup();

        Self {
            largest: LargestEntries::new(config.largest_entries_capacity),
            prefixes: PrefixTable::new(&config),
            buckets: LengthBuckets::new(bounds),
            type_counts: HashMap::new(),
            type_bytes: HashMap::new(),
            seen: 0,
            total_bytes: 0,
            config,
        }
    }

    /// Consume entries until the iterator ends; returns how many were read
    pub fn consume<I>(&mut self, entries: I) -> u64
    where
        I: IntoIterator<Item = Entry>,
    {
        let before = self.seen;
        for entry in entries {
            self.record(entry);
        }
        let consumed = self.seen - before;
        tracing::debug!(
            "Consumed {} entries ({} prefix groups tracked)",
            consumed,
            self.prefixes.tracked()
        );
        consumed
    }

    fn record(&mut self, entry: Entry) {
        *self.type_counts.entry(entry.data_type).or_insert(0) += 1;
        *self.type_bytes.entry(entry.data_type).or_insert(0) += entry.bytes;
        self.total_bytes += entry.bytes;

        self.prefixes.record(&entry);
        self.buckets.record(&entry);
        self.largest.offer(&entry, self.seen);
        self.seen += 1;
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Entries per type (types never seen are absent)
    pub fn type_counts(&self) -> &HashMap<DataType, u64> {
        &self.type_counts
    }

    /// Estimated bytes per type (types never seen are absent)
    pub fn type_bytes(&self) -> &HashMap<DataType, u64> {
        &self.type_bytes
    }

    pub fn total_entries(&self) -> u64 {
        self.seen
    }

    /// Sum of `bytes` over every consumed entry
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Up to `n` largest entries, descending by `bytes`, ties in arrival
    /// order. At most `largest_entries_capacity` are ever retained.
    pub fn largest_entries(&self, n: usize) -> Vec<Entry> {
        self.largest.top(n)
    }

    /// Reported prefix groups of every type; each type's run is
    /// descending by `total_bytes`
    pub fn largest_prefixes(&self) -> Vec<PrefixAggregate> {
        self.prefixes.report()
    }

    /// Reported prefix groups of one type, descending by `total_bytes`
    pub fn largest_prefixes_for(&self, data_type: DataType) -> Vec<PrefixAggregate> {
        self.prefixes.report_for(data_type)
    }

    /// Whether small prefix groups were discarded to stay under
    /// `prefix_tracking_limit` (reported totals may then be low)
    pub fn prefixes_pruned(&self) -> bool {
        self.prefixes.pruned()
    }

    /// Non-empty length buckets, by type then ascending range
    pub fn length_buckets(&self) -> Vec<LengthBucket> {
        self.buckets.report()
    }

    pub fn config(&self) -> &CounterConfig {
        &self.config
    }
}

impl Default for Counter {
    fn default() -> Self {
        Self::new(CounterConfig::default())
    }
}

impl std::fmt::Debug for Counter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Counter")
            .field("entries", &self.seen)
            .field("total_bytes", &self.total_bytes)
            .field("largest_retained", &self.largest.len())
            .field("prefix_groups", &self.prefixes.tracked())
            .finish()
    }
}
