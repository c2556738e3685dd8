//! Error types for rdbstat
//!
//! Provides a unified error type for decoding and analysis.

use thiserror::Error;

/// Result type alias using RdbError
pub type Result<T> = std::result::Result<T, RdbError>;

/// Unified error type for rdbstat operations
#[derive(Debug, Error)]
pub enum RdbError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Header Errors
    // -------------------------------------------------------------------------
    #[error("Malformed RDB header: {reason}")]
    MalformedHeader { reason: String },

    #[error("Unsupported RDB version {version} (max supported: {max})")]
    UnsupportedVersion { version: u32, max: u32 },

    // -------------------------------------------------------------------------
    // Body Errors
    // -------------------------------------------------------------------------
    #[error("Unexpected end of stream at offset {offset}")]
    TruncatedStream { offset: u64 },

    #[error("Unknown opcode 0x{opcode:02x} at offset {offset}")]
    UnknownOpcode { opcode: u8, offset: u64 },

    #[error("Unknown value type {type_byte} at offset {offset}")]
    UnknownType { type_byte: u8, offset: u64 },

    #[error("Invalid LZF stream at offset {offset}: {reason}")]
    CompressionError { offset: u64, reason: String },

    #[error("Length {value} at offset {offset} exceeds limit {limit}")]
    IntegerOverflow { offset: u64, value: u64, limit: u64 },

    #[error("Malformed value at offset {offset}: {reason}")]
    MalformedValue { offset: u64, reason: String },

    // -------------------------------------------------------------------------
    // Integrity Errors (non-fatal, reported on the summary)
    // -------------------------------------------------------------------------
    #[error("Checksum mismatch: file says {expected:#018x}, computed {computed:#018x}")]
    ChecksumMismatch { expected: u64, computed: u64 },

    // -------------------------------------------------------------------------
    // Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("Decode cancelled before the end of the file")]
    Cancelled,

    #[error("Decoder thread panicked: {reason}")]
    Panicked { reason: String },
}

impl RdbError {
    /// True for errors that describe the input file rather than the environment
    pub fn is_format_error(&self) -> bool {
        !matches!(
            self,
            RdbError::Io(_) | RdbError::Cancelled | RdbError::Panicked { .. }
        )
    }
}
