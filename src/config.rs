//! Configuration for rdbstat
//!
//! Centralized configuration with sensible defaults.

use crate::decoder::MemoryModel;

// =============================================================================
// Decoder Configuration
// =============================================================================

/// Configuration for a single [`crate::Decoder`]
#[derive(Debug, Clone)]
pub struct DecoderConfig {
    // -------------------------------------------------------------------------
    // Hand-off
    // -------------------------------------------------------------------------
    /// Entries buffered between the parse thread and the consumer before
    /// the parser blocks
    pub channel_capacity: usize,

    // -------------------------------------------------------------------------
    // Integrity
    // -------------------------------------------------------------------------
    /// Verify the trailing CRC-64 when the file carries one
    pub verify_checksum: bool,

    // -------------------------------------------------------------------------
    // Limits
    // -------------------------------------------------------------------------
    /// Longest string (key, value, compact region) accepted, in bytes
    pub max_string_len: u64,

    /// Largest element count accepted for a collection
    pub max_collection_len: u64,

    // -------------------------------------------------------------------------
    // Estimation
    // -------------------------------------------------------------------------
    /// Overhead table used to price decoded values
    pub memory_model: MemoryModel,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            verify_checksum: true,
            max_string_len: 512 * 1024 * 1024, // 512 MB, the server's proto-max-bulk-len
            max_collection_len: 1 << 32,
            memory_model: MemoryModel::jemalloc_x86_64(),
        }
    }
}

impl DecoderConfig {
    /// Create a new config builder
    pub fn builder() -> DecoderConfigBuilder {
        DecoderConfigBuilder::default()
    }
}

/// Builder for DecoderConfig
#[derive(Default)]
pub struct DecoderConfigBuilder {
    config: DecoderConfig,
}

impl DecoderConfigBuilder {
    /// Set the hand-off queue capacity (minimum 1)
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity.max(1);
        self
    }

    /// Enable or disable checksum verification
    pub fn verify_checksum(mut self, verify: bool) -> Self {
        self.config.verify_checksum = verify;
        self
    }

    /// Set the maximum string length (in bytes)
    pub fn max_string_len(mut self, len: u64) -> Self {
        self.config.max_string_len = len;
        self
    }

    /// Set the maximum collection length (in elements)
    pub fn max_collection_len(mut self, len: u64) -> Self {
        self.config.max_collection_len = len;
        self
    }

    /// Set the memory estimation model
    pub fn memory_model(mut self, model: MemoryModel) -> Self {
        self.config.memory_model = model;
        self
    }

    pub fn build(self) -> DecoderConfig {
        self.config
    }
}

// =============================================================================
// Counter Configuration
// =============================================================================

/// Configuration for a [`crate::Counter`]
#[derive(Debug, Clone)]
pub struct CounterConfig {
    /// Entries retained for `largest_entries`
    pub largest_entries_capacity: usize,

    /// Byte that ends a key prefix
    pub prefix_delimiter: u8,

    /// Prefix aggregates reported per type before the exemption applies
    pub prefix_capacity: usize,

    /// Aggregates at least this large are reported past `prefix_capacity`
    pub prefix_exemption_bytes: u64,

    /// Distinct (type, prefix) pairs tracked before small ones are pruned
    pub prefix_tracking_limit: usize,

    /// Inclusive upper bounds of the length buckets, ascending; anything
    /// past the last bound lands in an open-ended bucket
    pub length_bucket_bounds: Vec<u64>,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            largest_entries_capacity: 500,
            prefix_delimiter: b':',
            prefix_capacity: 50,
            prefix_exemption_bytes: 1_000_000,
            prefix_tracking_limit: 1 << 20,
            length_bucket_bounds: vec![100, 1_000, 10_000, 100_000, 1_000_000],
        }
    }
}

impl CounterConfig {
    /// Create a new config builder
    pub fn builder() -> CounterConfigBuilder {
        CounterConfigBuilder::default()
    }
}

/// Builder for CounterConfig
#[derive(Default)]
pub struct CounterConfigBuilder {
    config: CounterConfig,
}

impl CounterConfigBuilder {
    /// Set how many of the largest entries are kept
    pub fn largest_entries_capacity(mut self, capacity: usize) -> Self {
        self.config.largest_entries_capacity = capacity;
        self
    }

    /// Set the key prefix delimiter
    pub fn prefix_delimiter(mut self, delimiter: u8) -> Self {
        self.config.prefix_delimiter = delimiter;
        self
    }

    /// Set the per-type prefix capacity
    pub fn prefix_capacity(mut self, capacity: usize) -> Self {
        self.config.prefix_capacity = capacity;
        self
    }

    /// Set the large-prefix exemption threshold (in bytes)
    pub fn prefix_exemption_bytes(mut self, bytes: u64) -> Self {
        self.config.prefix_exemption_bytes = bytes;
        self
    }

    /// Set how many distinct prefixes are tracked before pruning
    pub fn prefix_tracking_limit(mut self, limit: usize) -> Self {
        self.config.prefix_tracking_limit = limit;
        self
    }

    /// Set the length bucket bounds (sorted and deduplicated on build)
    pub fn length_bucket_bounds(mut self, bounds: impl Into<Vec<u64>>) -> Self {
        self.config.length_bucket_bounds = bounds.into();
        self
    }

    pub fn build(mut self) -> CounterConfig {
        self.config.length_bucket_bounds.sort_unstable();
        self.config.length_bucket_bounds.dedup();
        self.config
    }
}
