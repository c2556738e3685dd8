//! RDB decoding
//!
//! Parses a Redis RDB snapshot on a background thread and hands one
//! [`Entry`](crate::Entry) per key to the consumer through a bounded channel.
//!
//! ## File Format
//! ```text
//! ┌───────────┬─────────┬──────────────────────────────────────┬─────┬──────────┐
//! │ "REDIS"   │ version │ opcode stream                        │ EOF │ CRC-64   │
//! │ 5 bytes   │ 4 ASCII │ AUX / SELECTDB / RESIZEDB / expiry / │ 0xFF│ 8 bytes  │
//! │           │ digits  │ type byte + key + value ...          │     │ (v >= 5) │
//! └───────────┴─────────┴──────────────────────────────────────┴─────┴──────────┘
//! ```
//!
//! Lengths use the variable-width encoding:
//! ```text
//! 00xxxxxx                       6-bit length
//! 01xxxxxx xxxxxxxx              14-bit length
//! 10000000 [4 bytes BE]          32-bit length
//! 10000001 [8 bytes BE]          64-bit length
//! 11xxxxxx                       special string: int8/int16/int32/LZF
//! ```
//!
//! ## Threading
//! ```text
//!  parse thread                         consumer
//!  ┌─────────────┐   bounded channel   ┌───────────────┐
//!  │ RdbParser   │ ──── Entry ───────▶ │ Decoder       │
//!  │  RdbReader  │                     │  .entries()   │
//!  └─────────────┘                     └───────────────┘
//!         ▲              CancelToken            │
//!         └─────────────────────────────────────┘
//! ```

mod handle;
mod lzf;
mod memory;
mod parser;
mod reader;
mod region;
mod value;

pub use handle::{AuxField, CancelToken, ChecksumStatus, DecodeSummary, Decoder, Entries};
pub use memory::MemoryModel;

/// File magic
pub(crate) const MAGIC: &[u8; 5] = b"REDIS";

/// Newest format version understood
pub const MAX_VERSION: u32 = 12;

/// First version that ends with a CRC-64 trailer
pub(crate) const CHECKSUM_MIN_VERSION: u32 = 5;

/// Control opcodes, allocated downwards from 255
pub(crate) mod opcode {
    pub const SLOT_INFO: u8 = 244;
    pub const FUNCTION2: u8 = 245;
    pub const FUNCTION_PRE_GA: u8 = 246;
    pub const MODULE_AUX: u8 = 247;
    pub const IDLE: u8 = 248;
    pub const FREQ: u8 = 249;
    pub const AUX: u8 = 250;
    pub const RESIZEDB: u8 = 251;
    pub const EXPIRETIME_MS: u8 = 252;
    pub const EXPIRETIME: u8 = 253;
    pub const SELECTDB: u8 = 254;
    pub const EOF: u8 = 255;

    /// Unknown bytes at or above this are reported as opcodes, below it
    /// as value types
    pub const RESERVED_START: u8 = 240;
}

/// Value type bytes, allocated upwards from 0
pub(crate) mod value_type {
    pub const STRING: u8 = 0;
    pub const LIST: u8 = 1;
    pub const SET: u8 = 2;
    pub const ZSET: u8 = 3;
    pub const HASH: u8 = 4;
    pub const ZSET_2: u8 = 5;
    /// Pre-release module format, rejected
    pub const MODULE: u8 = 6;
    pub const MODULE_2: u8 = 7;
    pub const HASH_ZIPMAP: u8 = 9;
    pub const LIST_ZIPLIST: u8 = 10;
    pub const SET_INTSET: u8 = 11;
    pub const ZSET_ZIPLIST: u8 = 12;
    pub const HASH_ZIPLIST: u8 = 13;
    pub const LIST_QUICKLIST: u8 = 14;
    pub const STREAM_LISTPACKS: u8 = 15;
    pub const HASH_LISTPACK: u8 = 16;
    pub const ZSET_LISTPACK: u8 = 17;
    pub const LIST_QUICKLIST_2: u8 = 18;
    pub const STREAM_LISTPACKS_2: u8 = 19;
    pub const SET_LISTPACK: u8 = 20;
    pub const STREAM_LISTPACKS_3: u8 = 21;
    pub const HASH_METADATA_PRE_GA: u8 = 22;
    pub const HASH_LISTPACK_EX_PRE_GA: u8 = 23;
    pub const HASH_METADATA: u8 = 24;
    pub const HASH_LISTPACK_EX: u8 = 25;
}
