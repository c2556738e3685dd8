//! # rdbstat
//!
//! Offline memory and usage statistics for Redis RDB snapshot files:
//! - Streaming RDB decoder (format versions 1 through 12)
//! - Per-key memory estimates from a versioned overhead model
//! - Single-pass aggregation with bounded memory
//! - Bounded hand-off with cancellation between the two
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        RDB file                              │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                 Decoder (parse thread)                       │
//! │     header → opcode loop → value decoding → MemoryModel      │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │  bounded channel of Entry
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                      Counter                                 │
//! └──────┬──────────────┬────────────────┬──────────────┬───────┘
//!        │              │                │              │
//!        ▼              ▼                ▼              ▼
//!  ┌───────────┐ ┌─────────────┐ ┌─────────────┐ ┌─────────────┐
//!  │ per type  │ │   largest   │ │  prefixes   │ │   length    │
//!  │  totals   │ │   entries   │ │             │ │   buckets   │
//!  └───────────┘ └─────────────┘ └─────────────┘ └─────────────┘
//! ```
//!
//! ## Example
//! ```no_run
//! use rdbstat::{Counter, Decoder};
//!
//! let decoder = Decoder::open("dump.rdb")?;
//! let mut counter = Counter::default();
//! counter.consume(decoder.entries());
//! if let Some(err) = decoder.take_error() {
//!     eprintln!("partial result: {}", err);
//! }
//! for entry in counter.largest_entries(10) {
//!     println!("{} {}", entry.key_lossy(), entry.bytes);
//! }
//! # Ok::<(), rdbstat::RdbError>(())
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod entry;

pub mod decoder;
pub mod counter;
pub mod analysis;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{RdbError, Result};
pub use config::{CounterConfig, DecoderConfig};
pub use entry::{DataType, Encoding, Entry};
pub use decoder::{CancelToken, ChecksumStatus, DecodeSummary, Decoder, MemoryModel};
pub use counter::{Counter, LengthBucket, PrefixAggregate};
pub use analysis::{analyze, Analysis};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of rdbstat
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
