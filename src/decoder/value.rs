//! Value decoding
//!
//! Walks one encoded value far enough to count its elements and price it
//! with the [`MemoryModel`], leaving the reader exactly past the value.
//! Hashtable/skiplist encodings are streamed element by element; compact
//! regions are read as one blob (they are small by construction) and handed
//! to the matching [`CompactRegion`] walker.

use std::io::Read;

use crate::entry::{DataType, Encoding};
use crate::error::{RdbError, Result};

use super::handle::CancelToken;
use super::memory::MemoryModel;
use super::reader::{RdbReader, StringShape};
use super::region::{CompactRegion, Intset, Listpack, RegionSpan, Ziplist, Zipmap};
use super::value_type;

/// Quicklist 2 node containers
const QUICKLIST_NODE_PLAIN: u64 = 1;
const QUICKLIST_NODE_PACKED: u64 = 2;

/// Module value opcodes
const MODULE_OPCODE_EOF: u64 = 0;
const MODULE_OPCODE_SINT: u64 = 1;
const MODULE_OPCODE_UINT: u64 = 2;
const MODULE_OPCODE_FLOAT: u64 = 3;
const MODULE_OPCODE_DOUBLE: u64 = 4;
const MODULE_OPCODE_STRING: u64 = 5;

/// Characters of the 9-letter module name packed into a module id
const MODULE_NAME_CHARSET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Stream ids are two big-endian u64s
const STREAM_ID_LEN: u64 = 16;

/// Value kinds selected by the type byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ValueKind {
    String,
    List,
    Set,
    SortedSet { binary_scores: bool },
    Hash,
    Module,
    HashZipmap,
    ListZiplist,
    SetIntset,
    SortedSetZiplist,
    HashZiplist,
    ListQuicklist,
    Stream { version: u8 },
    HashListpack,
    SortedSetListpack,
    ListQuicklist2,
    SetListpack,
    HashMetadata { pre_ga: bool },
    HashListpackEx { pre_ga: bool },
}

impl ValueKind {
    /// Map a type byte; `None` for unknown or unsupported types
    pub(crate) fn from_type_byte(byte: u8) -> Option<Self> {
        let kind = match byte {
            value_type::STRING => ValueKind::String,
            value_type::LIST => ValueKind::List,
            value_type::SET => ValueKind::Set,
            value_type::ZSET => ValueKind::SortedSet { binary_scores: false },
            value_type::HASH => ValueKind::Hash,
            value_type::ZSET_2 => ValueKind::SortedSet { binary_scores: true },
            value_type::MODULE_2 => ValueKind::Module,
            value_type::HASH_ZIPMAP => ValueKind::HashZipmap,
            value_type::LIST_ZIPLIST => ValueKind::ListZiplist,
            value_type::SET_INTSET => ValueKind::SetIntset,
            value_type::ZSET_ZIPLIST => ValueKind::SortedSetZiplist,
            value_type::HASH_ZIPLIST => ValueKind::HashZiplist,
            value_type::LIST_QUICKLIST => ValueKind::ListQuicklist,
            value_type::STREAM_LISTPACKS => ValueKind::Stream { version: 1 },
            value_type::HASH_LISTPACK => ValueKind::HashListpack,
            value_type::ZSET_LISTPACK => ValueKind::SortedSetListpack,
            value_type::LIST_QUICKLIST_2 => ValueKind::ListQuicklist2,
            value_type::STREAM_LISTPACKS_2 => ValueKind::Stream { version: 2 },
            value_type::SET_LISTPACK => ValueKind::SetListpack,
            value_type::STREAM_LISTPACKS_3 => ValueKind::Stream { version: 3 },
            value_type::HASH_METADATA_PRE_GA => ValueKind::HashMetadata { pre_ga: true },
            value_type::HASH_LISTPACK_EX_PRE_GA => ValueKind::HashListpackEx { pre_ga: true },
            value_type::HASH_METADATA => ValueKind::HashMetadata { pre_ga: false },
            value_type::HASH_LISTPACK_EX => ValueKind::HashListpackEx { pre_ga: false },
            _ => return None,
        };
        Some(kind)
    }

    /// Logical type this kind decodes to
    pub(crate) fn data_type(&self) -> DataType {
        match self {
            ValueKind::String => DataType::String,
            ValueKind::List
            | ValueKind::ListZiplist
            | ValueKind::ListQuicklist
            | ValueKind::ListQuicklist2 => DataType::List,
            ValueKind::Set | ValueKind::SetIntset | ValueKind::SetListpack => DataType::Set,
            ValueKind::SortedSet { .. }
            | ValueKind::SortedSetZiplist
            | ValueKind::SortedSetListpack => DataType::SortedSet,
            ValueKind::Hash
            | ValueKind::HashZipmap
            | ValueKind::HashZiplist
            | ValueKind::HashListpack
            | ValueKind::HashMetadata { .. }
            | ValueKind::HashListpackEx { .. } => DataType::Hash,
            ValueKind::Stream { .. } => DataType::Stream,
            ValueKind::Module => DataType::Module,
        }
    }
}

/// Size and shape of one decoded value (key overhead not included)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ValueStats {
    pub data_type: DataType,
    pub encoding: Encoding,
    pub length: u64,
    pub bytes: u64,
}

/// Decodes values off a reader, pricing them with a memory model
pub(crate) struct ValueDecoder<'a, R> {
    reader: &'a mut RdbReader<R>,
    model: &'a MemoryModel,
    cancel: &'a CancelToken,
}

impl<'a, R: Read> ValueDecoder<'a, R> {
    pub(crate) fn new(reader: &'a mut RdbReader<R>, model: &'a MemoryModel, cancel: &'a CancelToken) -> Self {
        Self { reader, model, cancel }
    }

    /// Decode one value of the given kind
    pub(crate) fn decode(&mut self, kind: ValueKind) -> Result<ValueStats> {
        let data_type = kind.data_type();
        let (encoding, length, bytes) = match kind {
            ValueKind::String => {
                let shape = self.reader.read_string_shape()?;
                let encoding = if shape.is_int { Encoding::Int } else { Encoding::Raw };
                (encoding, shape.len, self.string(shape))
            }
            ValueKind::List => self.linked_list()?,
            ValueKind::Set => self.hashtable_set()?,
            ValueKind::SortedSet { binary_scores } => self.skiplist(binary_scores)?,
            ValueKind::Hash => self.hashtable_hash(None)?,
            ValueKind::HashMetadata { pre_ga } => self.hashtable_hash(Some(pre_ga))?,
            ValueKind::Module => self.module()?,
            ValueKind::HashZipmap => self.region::<Zipmap>(Encoding::Zipmap, 1)?,
            ValueKind::ListZiplist => self.region::<Ziplist>(Encoding::Ziplist, 1)?,
            ValueKind::SetIntset => self.region::<Intset>(Encoding::Intset, 1)?,
            ValueKind::SortedSetZiplist | ValueKind::HashZiplist => {
                self.region::<Ziplist>(Encoding::Ziplist, 2)?
            }
            ValueKind::SetListpack => self.region::<Listpack>(Encoding::Listpack, 1)?,
            ValueKind::SortedSetListpack | ValueKind::HashListpack => {
                self.region::<Listpack>(Encoding::Listpack, 2)?
            }
            ValueKind::HashListpackEx { pre_ga } => {
                if !pre_ga {
                    self.reader.read_millis()?;
                }
                self.region::<Listpack>(Encoding::Listpack, 3)?
            }
            ValueKind::ListQuicklist => self.quicklist()?,
            ValueKind::ListQuicklist2 => self.quicklist2()?,
            ValueKind::Stream { version } => self.stream(version)?,
        };
        Ok(ValueStats {
            data_type,
            encoding,
            length,
            bytes,
        })
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn string(&self, shape: StringShape) -> u64 {
        self.model.string_value(shape.len, shape.is_int)
    }

    /// Read a blob and walk it as region `T`
    fn read_region<T: CompactRegion>(&mut self) -> Result<RegionSpan> {
        let offset = self.reader.offset();
        let blob = self.reader.read_string()?;
        T::span(&blob, offset)
    }

    /// A value stored as one compact region whose entries come in groups of
    /// `group` (1 for lists/sets, 2 for field-value pairs, 3 with TTLs)
    fn region<T: CompactRegion>(&mut self, encoding: Encoding, group: u64) -> Result<(Encoding, u64, u64)> {
        let offset = self.reader.offset();
        let span = self.read_region::<T>()?;
        if span.elements % group != 0 {
            return Err(RdbError::MalformedValue {
                offset,
                reason: format!(
                    "{} holds {} entries, expected a multiple of {}",
                    T::NAME,
                    span.elements,
                    group
                ),
            });
        }
        Ok((encoding, span.elements / group, self.model.alloc(span.bytes)))
    }

    // =========================================================================
    // Streamed encodings
    // =========================================================================

    fn linked_list(&mut self) -> Result<(Encoding, u64, u64)> {
        let len = self.reader.read_count()?;
        let mut bytes = self.model.linked_list();
        for _ in 0..len {
            self.cancel.check()?;
            let shape = self.reader.read_string_shape()?;
            bytes += self.model.linked_list_node() + self.model.robj() + self.string(shape);
        }
        Ok((Encoding::LinkedList, len, bytes))
    }

    fn hashtable_set(&mut self) -> Result<(Encoding, u64, u64)> {
        let len = self.reader.read_count()?;
        let mut bytes = self.model.hashtable(len);
        for _ in 0..len {
            self.cancel.check()?;
            let member = self.reader.read_string_shape()?;
            bytes += self.model.dict_entry() + self.string(member);
        }
        Ok((Encoding::Hashtable, len, bytes))
    }

    /// Plain hash, or with `metadata` set, a hash whose fields carry TTLs
    /// (`Some(true)` for the pre-release layout without a base expiry)
    fn hashtable_hash(&mut self, metadata: Option<bool>) -> Result<(Encoding, u64, u64)> {
        if metadata == Some(false) {
            // minimum expiry; per-field TTLs are stored relative to it
            self.reader.read_millis()?;
        }
        let len = self.reader.read_count()?;
        let mut bytes = self.model.hashtable(len);
        for _ in 0..len {
            self.cancel.check()?;
            let ttl = match metadata {
                None => 0,
                Some(true) => self.reader.read_millis()?,
                Some(false) => self.reader.read_length()?,
            };
            let field = self.reader.read_string_shape()?;
            let value = self.reader.read_string_shape()?;
            bytes += self.model.dict_entry() + self.string(field) + self.string(value);
            if ttl != 0 {
                bytes += self.model.field_expiry();
            }
        }
        Ok((Encoding::Hashtable, len, bytes))
    }

    fn skiplist(&mut self, binary_scores: bool) -> Result<(Encoding, u64, u64)> {
        let len = self.reader.read_count()?;
        let mut bytes = self.model.skiplist(len);
        for i in 0..len {
            self.cancel.check()?;
            let member = self.reader.read_string_shape()?;
            if binary_scores {
                self.reader.read_binary_double()?;
            } else {
                self.reader.skip_string_double()?;
            }
            bytes += self.model.skiplist_node(self.model.skiplist_level(i)) + self.string(member);
        }
        Ok((Encoding::Skiplist, len, bytes))
    }

    fn quicklist(&mut self) -> Result<(Encoding, u64, u64)> {
        let nodes = self.reader.read_count()?;
        let mut bytes = self.model.quicklist(nodes);
        let mut len = 0;
        for _ in 0..nodes {
            self.cancel.check()?;
            let span = self.read_region::<Ziplist>()?;
            len += span.elements;
            bytes += self.model.alloc(span.bytes);
        }
        Ok((Encoding::Quicklist, len, bytes))
    }

    fn quicklist2(&mut self) -> Result<(Encoding, u64, u64)> {
        let nodes = self.reader.read_count()?;
        let mut bytes = self.model.quicklist(nodes);
        let mut len = 0;
        for _ in 0..nodes {
            self.cancel.check()?;
            let offset = self.reader.offset();
            match self.reader.read_length()? {
                QUICKLIST_NODE_PLAIN => {
                    let shape = self.reader.read_string_shape()?;
                    len += 1;
                    bytes += self.model.alloc(shape.len);
                }
                QUICKLIST_NODE_PACKED => {
                    let span = self.read_region::<Listpack>()?;
                    len += span.elements;
                    bytes += self.model.alloc(span.bytes);
                }
                other => {
                    return Err(RdbError::MalformedValue {
                        offset,
                        reason: format!("unknown quicklist node container {}", other),
                    })
                }
            }
        }
        Ok((Encoding::Quicklist, len, bytes))
    }

    fn module(&mut self) -> Result<(Encoding, u64, u64)> {
        let module_id = self.reader.read_length()?;
        tracing::trace!("Module value from {}", module_name(module_id));
        let payload = self.module_payload()?;
        Ok((Encoding::Module, 0, self.model.alloc(payload)))
    }

    /// Consume a module-serialized body up to its EOF opcode, returning the
    /// number of payload bytes it carried
    pub(crate) fn module_payload(&mut self) -> Result<u64> {
        let mut payload = 0;
        loop {
            self.cancel.check()?;
            let offset = self.reader.offset();
            match self.reader.read_length()? {
                MODULE_OPCODE_EOF => return Ok(payload),
                MODULE_OPCODE_SINT | MODULE_OPCODE_UINT => {
                    self.reader.read_length()?;
                    payload += 8;
                }
                MODULE_OPCODE_FLOAT => {
                    self.reader.skip(4)?;
                    payload += 4;
                }
                MODULE_OPCODE_DOUBLE => {
                    self.reader.skip(8)?;
                    payload += 8;
                }
                MODULE_OPCODE_STRING => {
                    payload += self.reader.read_string_shape()?.len;
                }
                other => {
                    return Err(RdbError::MalformedValue {
                        offset,
                        reason: format!("unknown module opcode {}", other),
                    })
                }
            }
        }
    }

    fn stream(&mut self, version: u8) -> Result<(Encoding, u64, u64)> {
        let model = self.model;
        let mut bytes = model.stream();

        let nodes = self.reader.read_count()?;
        for _ in 0..nodes {
            self.cancel.check()?;
            let offset = self.reader.offset();
            let node_key = self.reader.read_string()?;
            if node_key.len() as u64 != STREAM_ID_LEN {
                return Err(RdbError::MalformedValue {
                    offset,
                    reason: format!("stream node key is {} bytes", node_key.len()),
                });
            }
            let span = self.read_region::<Listpack>()?;
            bytes += model.stream_node(span.bytes);
        }

        let length = self.reader.read_length()?;
        // last id
        self.reader.read_length()?;
        self.reader.read_length()?;
        if version >= 2 {
            // first id, max deleted id, entries added
            for _ in 0..5 {
                self.reader.read_length()?;
            }
        }

        let groups = self.reader.read_count()?;
        for _ in 0..groups {
            self.cancel.check()?;
            let name = self.reader.read_string_shape()?;
            self.reader.read_length()?;
            self.reader.read_length()?;
            if version >= 2 {
                // entries read
                self.reader.read_length()?;
            }

            let pending = self.reader.read_count()?;
            for _ in 0..pending {
                self.cancel.check()?;
                self.reader.skip(STREAM_ID_LEN)?;
                self.reader.read_millis()?;
                self.reader.read_length()?;
                bytes += model.stream_nack();
            }

            let consumers = self.reader.read_count()?;
            for _ in 0..consumers {
                self.cancel.check()?;
                let consumer = self.reader.read_string_shape()?;
                // seen time, then active time from version 3
                self.reader.read_millis()?;
                if version >= 3 {
                    self.reader.read_millis()?;
                }
                let owned = self.reader.read_count()?;
                for _ in 0..owned {
                    self.reader.skip(STREAM_ID_LEN)?;
                }
                bytes += model.stream_consumer(consumer.len) + owned * model.stream_consumer_nack();
            }

            bytes += model.stream_group(name.len);
        }

        Ok((Encoding::Stream, length, bytes))
    }
}

/// Decode the 9-character module name packed into the top 54 bits of an id
pub(crate) fn module_name(module_id: u64) -> String {
    (0..9)
        .map(|i| {
            let shift = 64 - 6 * (i + 1);
            MODULE_NAME_CHARSET[((module_id >> shift) & 63) as usize] as char
        })
        .collect()
}
