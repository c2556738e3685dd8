//! Entry model
//!
//! The normalized record the decoder produces for every key in a dump.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Logical value kind, independent of the on-disk encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    String,
    List,
    Hash,
    Set,
    SortedSet,
    Stream,
    Module,
}

impl DataType {
    /// All logical types, in report order
    pub const ALL: [DataType; 7] = [
        DataType::String,
        DataType::List,
        DataType::Hash,
        DataType::Set,
        DataType::SortedSet,
        DataType::Stream,
        DataType::Module,
    ];

    /// Name as used by `TYPE` in a running server
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::String => "string",
            DataType::List => "list",
            DataType::Hash => "hash",
            DataType::Set => "set",
            DataType::SortedSet => "sortedset",
            DataType::Stream => "stream",
            DataType::Module => "module",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Structural encoding the value used on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// Raw or LZF-compressed string
    Raw,
    /// String stored as an integer literal
    Int,
    /// Legacy list of length-prefixed elements
    LinkedList,
    Ziplist,
    Listpack,
    Quicklist,
    Intset,
    Zipmap,
    Hashtable,
    Skiplist,
    /// Radix tree of listpacks
    Stream,
    /// Opaque module payload
    Module,
}

impl Encoding {
    /// Name as used by `OBJECT ENCODING` in a running server
    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Raw => "raw",
            Encoding::Int => "int",
            Encoding::LinkedList => "linkedlist",
            Encoding::Ziplist => "ziplist",
            Encoding::Listpack => "listpack",
            Encoding::Quicklist => "quicklist",
            Encoding::Intset => "intset",
            Encoding::Zipmap => "zipmap",
            Encoding::Hashtable => "hashtable",
            Encoding::Skiplist => "skiplist",
            Encoding::Stream => "stream",
            Encoding::Module => "module",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A single decoded key
///
/// Immutable once emitted. `bytes` is always populated; the smallest
/// possible value is the per-key overhead of the memory model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Key name (unique within its database only)
    pub key: Bytes,

    /// Logical type
    pub data_type: DataType,

    /// On-disk structural encoding
    pub encoding: Encoding,

    /// Estimated in-memory footprint, key and object overhead included
    pub bytes: u64,

    /// STRLEN for strings, element count for collections
    pub length: u64,

    /// Absolute expiry in unix milliseconds
    pub expire_at: Option<u64>,
}

impl Entry {
    /// Key as lossy UTF-8, for display
    pub fn key_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.key)
    }

    /// Whether the key carries a TTL
    pub fn has_expiry(&self) -> bool {
        self.expire_at.is_some()
    }
}
