//! RDB fixture writer shared by the integration tests

#![allow(dead_code)]

use std::io::Write;
use std::path::PathBuf;

use crc::{Crc, CRC_64_REDIS};
use tempfile::TempDir;

const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_REDIS);

// =============================================================================
// Primitive Encoders
// =============================================================================

pub fn write_len(buf: &mut Vec<u8>, len: u64) {
    if len < 1 << 6 {
        buf.push(len as u8);
    } else if len < 1 << 14 {
        buf.push(0x40 | (len >> 8) as u8);
        buf.push(len as u8);
    } else if len <= u64::from(u32::MAX) {
        buf.push(0x80);
        buf.extend_from_slice(&(len as u32).to_be_bytes());
    } else {
        buf.push(0x81);
        buf.extend_from_slice(&len.to_be_bytes());
    }
}

pub fn write_string(buf: &mut Vec<u8>, bytes: &[u8]) {
    write_len(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

/// Integer-encoded string (int8/int16/int32 as needed)
pub fn write_int_string(buf: &mut Vec<u8>, value: i32) {
    if let Ok(v) = i8::try_from(value) {
        buf.push(0xc0);
        buf.push(v as u8);
    } else if let Ok(v) = i16::try_from(value) {
        buf.push(0xc1);
        buf.extend_from_slice(&v.to_le_bytes());
    } else {
        buf.push(0xc2);
        buf.extend_from_slice(&value.to_le_bytes());
    }
}

/// LZF-encoded string built from literal runs only
pub fn write_lzf_string(buf: &mut Vec<u8>, bytes: &[u8]) {
    let mut compressed = Vec::new();
    for chunk in bytes.chunks(32) {
        compressed.push((chunk.len() - 1) as u8);
        compressed.extend_from_slice(chunk);
    }
    buf.push(0xc3);
    write_len(buf, compressed.len() as u64);
    write_len(buf, bytes.len() as u64);
    buf.extend_from_slice(&compressed);
}

/// Ziplist of string entries (6-bit, 14-bit or 32-bit headers as needed)
pub fn ziplist(entries: &[&[u8]]) -> Vec<u8> {
    let mut body = Vec::new();
    let mut prev = 0usize;
    let mut tail = 10;
    for entry in entries {
        tail = 10 + body.len();
        let start = body.len();
        if prev < 254 {
            body.push(prev as u8);
        } else {
            body.push(0xfe);
            body.extend_from_slice(&(prev as u32).to_le_bytes());
        }
        let len = entry.len();
        if len < 1 << 6 {
            body.push(len as u8);
        } else if len < 1 << 14 {
            body.push(0x40 | (len >> 8) as u8);
            body.push(len as u8);
        } else {
            body.push(0x80);
            body.extend_from_slice(&(len as u32).to_be_bytes());
        }
        body.extend_from_slice(entry);
        prev = body.len() - start;
    }
    let total = 10 + body.len() + 1;
    let mut blob = Vec::new();
    blob.extend_from_slice(&(total as u32).to_le_bytes());
    blob.extend_from_slice(&(tail as u32).to_le_bytes());
    blob.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    blob.extend_from_slice(&body);
    blob.push(0xff);
    blob
}

/// Listpack back length: 7 bits per byte, most significant group first,
/// every byte after the first flagged with the high bit
pub fn encode_backlen(len: usize) -> Vec<u8> {
    let width = match len {
        l if l < 128 => 1,
        l if l < 16_383 => 2,
        l if l < 2_097_151 => 3,
        l if l < 268_435_455 => 4,
        _ => 5,
    };
    (0..width)
        .map(|i| {
            let group = ((len >> (7 * (width - 1 - i))) & 0x7f) as u8;
            if i == 0 {
                group
            } else {
                group | 0x80
            }
        })
        .collect()
}

/// Listpack of string entries (6-bit, 12-bit or 32-bit headers as needed)
pub fn listpack(entries: &[&[u8]]) -> Vec<u8> {
    let mut body = Vec::new();
    for entry in entries {
        let start = body.len();
        let len = entry.len();
        if len < 1 << 6 {
            body.push(0x80 | len as u8);
        } else if len < 1 << 12 {
            body.push(0xe0 | (len >> 8) as u8);
            body.push(len as u8);
        } else {
            body.push(0xf0);
            body.extend_from_slice(&(len as u32).to_le_bytes());
        }
        body.extend_from_slice(entry);
        let size = body.len() - start;
        body.extend_from_slice(&encode_backlen(size));
    }
    let total = 6 + body.len() + 1;
    let mut blob = Vec::new();
    blob.extend_from_slice(&(total as u32).to_le_bytes());
    blob.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    blob.extend_from_slice(&body);
    blob.push(0xff);
    blob
}

/// 16-bit intset of ascending members
pub fn intset(members: &[i16]) -> Vec<u8> {
    let mut blob = Vec::new();
    blob.extend_from_slice(&2u32.to_le_bytes());
    blob.extend_from_slice(&(members.len() as u32).to_le_bytes());
    for m in members {
        blob.extend_from_slice(&m.to_le_bytes());
    }
    blob
}

/// Zipmap of short field/value pairs, no free space
pub fn zipmap(pairs: &[(&[u8], &[u8])]) -> Vec<u8> {
    let mut blob = vec![pairs.len() as u8];
    for (field, value) in pairs {
        blob.push(field.len() as u8);
        blob.extend_from_slice(field);
        blob.push(value.len() as u8);
        blob.push(0);
        blob.extend_from_slice(value);
    }
    blob.push(0xff);
    blob
}

/// Module payload: one string, one unsigned integer, then EOF
pub fn write_module_payload(buf: &mut Vec<u8>, text: &str, number: u64) {
    write_len(buf, 5);
    write_string(buf, text.as_bytes());
    write_len(buf, 2);
    write_len(buf, number);
    write_len(buf, 0);
}

/// Consumer group of a stream fixture
pub struct StreamGroup<'a> {
    pub name: &'a str,
    /// Entries in the group PEL
    pub pending: usize,
    /// Consumer name and number of PEL entries it owns
    pub consumers: &'a [(&'a str, usize)],
}

/// Stream value layout for `RdbBuilder::stream`
pub struct StreamFixture<'a> {
    /// Listpacks layout version: 1, 2 or 3
    pub version: u8,
    /// One listpack node per slice
    pub nodes: &'a [&'a [&'a [u8]]],
    /// Declared number of stream entries
    pub length: u64,
    pub groups: &'a [StreamGroup<'a>],
}

// =============================================================================
// File Builder
// =============================================================================

/// Builds an RDB image opcode by opcode
pub struct RdbBuilder {
    buf: Vec<u8>,
    version: u32,
}

impl RdbBuilder {
    pub fn new(version: u32) -> Self {
        let mut buf = Vec::new();
        write!(buf, "REDIS{:04}", version).unwrap();
        Self { buf, version }
    }

    pub fn aux(mut self, key: &str, value: &str) -> Self {
        self.buf.push(0xfa);
        write_string(&mut self.buf, key.as_bytes());
        write_string(&mut self.buf, value.as_bytes());
        self
    }

    pub fn select_db(mut self, db: u64) -> Self {
        self.buf.push(0xfe);
        write_len(&mut self.buf, db);
        self
    }

    pub fn resize_db(mut self, db_size: u64, expires_size: u64) -> Self {
        self.buf.push(0xfb);
        write_len(&mut self.buf, db_size);
        write_len(&mut self.buf, expires_size);
        self
    }

    pub fn expire_ms(mut self, millis: u64) -> Self {
        self.buf.push(0xfc);
        self.buf.extend_from_slice(&millis.to_le_bytes());
        self
    }

    pub fn expire_secs(mut self, secs: u32) -> Self {
        self.buf.push(0xfd);
        self.buf.extend_from_slice(&secs.to_le_bytes());
        self
    }

    pub fn idle(mut self, seconds: u64) -> Self {
        self.buf.push(0xf8);
        write_len(&mut self.buf, seconds);
        self
    }

    pub fn freq(mut self, freq: u8) -> Self {
        self.buf.push(0xf9);
        self.buf.push(freq);
        self
    }

    pub fn function(mut self, code: &str) -> Self {
        self.buf.push(0xf5);
        write_string(&mut self.buf, code.as_bytes());
        self
    }

    /// Append bytes verbatim
    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    fn key(&mut self, type_byte: u8, key: &str) {
        self.buf.push(type_byte);
        write_string(&mut self.buf, key.as_bytes());
    }

    // -------------------------------------------------------------------------
    // Values
    // -------------------------------------------------------------------------

    pub fn string(mut self, key: &str, value: &str) -> Self {
        self.key(0, key);
        write_string(&mut self.buf, value.as_bytes());
        self
    }

    pub fn int_string(mut self, key: &str, value: i32) -> Self {
        self.key(0, key);
        write_int_string(&mut self.buf, value);
        self
    }

    pub fn lzf_string(mut self, key: &str, value: &[u8]) -> Self {
        self.key(0, key);
        write_lzf_string(&mut self.buf, value);
        self
    }

    pub fn list(mut self, key: &str, items: &[&str]) -> Self {
        self.key(1, key);
        write_len(&mut self.buf, items.len() as u64);
        for item in items {
            write_string(&mut self.buf, item.as_bytes());
        }
        self
    }

    pub fn set(mut self, key: &str, members: &[&str]) -> Self {
        self.key(2, key);
        write_len(&mut self.buf, members.len() as u64);
        for member in members {
            write_string(&mut self.buf, member.as_bytes());
        }
        self
    }

    pub fn zset2(mut self, key: &str, members: &[(&str, f64)]) -> Self {
        self.key(5, key);
        write_len(&mut self.buf, members.len() as u64);
        for (member, score) in members {
            write_string(&mut self.buf, member.as_bytes());
            self.buf.extend_from_slice(&score.to_le_bytes());
        }
        self
    }

    pub fn hash(mut self, key: &str, pairs: &[(&str, &str)]) -> Self {
        self.key(4, key);
        write_len(&mut self.buf, pairs.len() as u64);
        for (field, value) in pairs {
            write_string(&mut self.buf, field.as_bytes());
            write_string(&mut self.buf, value.as_bytes());
        }
        self
    }

    pub fn zipmap_hash(mut self, key: &str, pairs: &[(&[u8], &[u8])]) -> Self {
        self.key(9, key);
        write_string(&mut self.buf, &zipmap(pairs));
        self
    }

    pub fn ziplist_list(mut self, key: &str, items: &[&[u8]]) -> Self {
        self.key(10, key);
        write_string(&mut self.buf, &ziplist(items));
        self
    }

    pub fn intset(mut self, key: &str, members: &[i16]) -> Self {
        self.key(11, key);
        write_string(&mut self.buf, &intset(members));
        self
    }

    pub fn listpack_hash(mut self, key: &str, pairs: &[(&[u8], &[u8])]) -> Self {
        let flat: Vec<&[u8]> = pairs.iter().flat_map(|(f, v)| [*f, *v]).collect();
        self.key(16, key);
        write_string(&mut self.buf, &listpack(&flat));
        self
    }

    pub fn listpack_set(mut self, key: &str, members: &[&[u8]]) -> Self {
        self.key(20, key);
        write_string(&mut self.buf, &listpack(members));
        self
    }

    /// Quicklist 2 with one packed listpack node per slice
    pub fn quicklist2(mut self, key: &str, nodes: &[&[&[u8]]]) -> Self {
        self.key(18, key);
        write_len(&mut self.buf, nodes.len() as u64);
        for node in nodes {
            write_len(&mut self.buf, 2);
            write_string(&mut self.buf, &listpack(node));
        }
        self
    }

    /// Quicklist (version 1) with one ziplist node per slice
    pub fn quicklist(mut self, key: &str, nodes: &[&[&[u8]]]) -> Self {
        self.key(14, key);
        write_len(&mut self.buf, nodes.len() as u64);
        for node in nodes {
            write_string(&mut self.buf, &ziplist(node));
        }
        self
    }

    pub fn ziplist_hash(mut self, key: &str, pairs: &[(&[u8], &[u8])]) -> Self {
        let flat: Vec<&[u8]> = pairs.iter().flat_map(|(f, v)| [*f, *v]).collect();
        self.key(13, key);
        write_string(&mut self.buf, &ziplist(&flat));
        self
    }

    /// Sorted set as a ziplist of member/score pairs
    pub fn ziplist_zset(mut self, key: &str, members: &[(&[u8], &[u8])]) -> Self {
        let flat: Vec<&[u8]> = members.iter().flat_map(|(m, s)| [*m, *s]).collect();
        self.key(12, key);
        write_string(&mut self.buf, &ziplist(&flat));
        self
    }

    /// Sorted set as a listpack of member/score pairs
    pub fn listpack_zset(mut self, key: &str, members: &[(&[u8], &[u8])]) -> Self {
        let flat: Vec<&[u8]> = members.iter().flat_map(|(m, s)| [*m, *s]).collect();
        self.key(17, key);
        write_string(&mut self.buf, &listpack(&flat));
        self
    }

    /// Hash with per-field TTLs (ttl 0 means none), relative to `min_expire`
    pub fn hash_metadata(mut self, key: &str, min_expire: u64, fields: &[(u64, &str, &str)]) -> Self {
        self.key(24, key);
        self.buf.extend_from_slice(&min_expire.to_le_bytes());
        write_len(&mut self.buf, fields.len() as u64);
        for (ttl, field, value) in fields {
            write_len(&mut self.buf, *ttl);
            write_string(&mut self.buf, field.as_bytes());
            write_string(&mut self.buf, value.as_bytes());
        }
        self
    }

    /// Pre-release hash-with-TTLs layout: absolute millisecond TTL per field
    pub fn hash_metadata_pre_ga(mut self, key: &str, fields: &[(u64, &str, &str)]) -> Self {
        self.key(22, key);
        write_len(&mut self.buf, fields.len() as u64);
        for (ttl, field, value) in fields {
            self.buf.extend_from_slice(&ttl.to_le_bytes());
            write_string(&mut self.buf, field.as_bytes());
            write_string(&mut self.buf, value.as_bytes());
        }
        self
    }

    /// Listpack of field/value/ttl triplets behind a minimum expiry
    pub fn listpack_ex_hash(mut self, key: &str, min_expire: u64, triplets: &[(&[u8], &[u8], &[u8])]) -> Self {
        let flat: Vec<&[u8]> = triplets.iter().flat_map(|(f, v, t)| [*f, *v, *t]).collect();
        self.key(25, key);
        self.buf.extend_from_slice(&min_expire.to_le_bytes());
        write_string(&mut self.buf, &listpack(&flat));
        self
    }

    pub fn listpack_ex_hash_pre_ga(mut self, key: &str, triplets: &[(&[u8], &[u8], &[u8])]) -> Self {
        let flat: Vec<&[u8]> = triplets.iter().flat_map(|(f, v, t)| [*f, *v, *t]).collect();
        self.key(23, key);
        write_string(&mut self.buf, &listpack(&flat));
        self
    }

    /// Module aux record carrying one string and one unsigned integer
    pub fn module_aux(mut self, module_id: u64, text: &str, number: u64) -> Self {
        self.buf.push(0xf7);
        write_len(&mut self.buf, module_id);
        write_len(&mut self.buf, 2);
        write_len(&mut self.buf, 0);
        write_module_payload(&mut self.buf, text, number);
        self
    }

    /// Module value (type 7) carrying one string and one unsigned integer
    pub fn module_value(mut self, key: &str, module_id: u64, text: &str, number: u64) -> Self {
        self.key(7, key);
        write_len(&mut self.buf, module_id);
        write_module_payload(&mut self.buf, text, number);
        self
    }

    /// Stream in the given listpacks layout (type 15, 19 or 21)
    pub fn stream(mut self, key: &str, stream: &StreamFixture<'_>) -> Self {
        let type_byte = match stream.version {
            1 => 15,
            2 => 19,
            _ => 21,
        };
        self.key(type_byte, key);

        write_len(&mut self.buf, stream.nodes.len() as u64);
        for (i, node) in stream.nodes.iter().enumerate() {
            let mut id = [0u8; 16];
            id[..8].copy_from_slice(&(1_000 + i as u64).to_be_bytes());
            write_string(&mut self.buf, &id);
            write_string(&mut self.buf, &listpack(node));
        }

        write_len(&mut self.buf, stream.length);
        // last id
        write_len(&mut self.buf, 1_000 + stream.nodes.len() as u64);
        write_len(&mut self.buf, 0);
        if stream.version >= 2 {
            // first id, max deleted id, entries added
            for value in [1_000, 0, 0, 0, stream.length] {
                write_len(&mut self.buf, value);
            }
        }

        write_len(&mut self.buf, stream.groups.len() as u64);
        for group in stream.groups {
            write_string(&mut self.buf, group.name.as_bytes());
            write_len(&mut self.buf, 1_000);
            write_len(&mut self.buf, 0);
            if stream.version >= 2 {
                write_len(&mut self.buf, group.pending as u64);
            }

            write_len(&mut self.buf, group.pending as u64);
            for p in 0..group.pending {
                self.buf.extend_from_slice(&[p as u8; 16]);
                self.buf.extend_from_slice(&1_700_000_000_000u64.to_le_bytes());
                write_len(&mut self.buf, 1);
            }

            write_len(&mut self.buf, group.consumers.len() as u64);
            for (name, owned) in group.consumers {
                write_string(&mut self.buf, name.as_bytes());
                self.buf.extend_from_slice(&1_700_000_000_000u64.to_le_bytes());
                if stream.version >= 3 {
                    self.buf.extend_from_slice(&1_700_000_000_500u64.to_le_bytes());
                }
                write_len(&mut self.buf, *owned as u64);
                for o in 0..*owned {
                    self.buf.extend_from_slice(&[o as u8; 16]);
                }
            }
        }
        self
    }

    // -------------------------------------------------------------------------
    // Finishing
    // -------------------------------------------------------------------------

    /// EOF plus the correct trailer for the version
    pub fn finish(mut self) -> Vec<u8> {
        self.buf.push(0xff);
        if self.version >= 5 {
            let crc = CRC64.checksum(&self.buf);
            self.buf.extend_from_slice(&crc.to_le_bytes());
        }
        self.buf
    }

    /// EOF plus an arbitrary stored checksum
    pub fn finish_with_checksum(mut self, checksum: u64) -> Vec<u8> {
        self.buf.push(0xff);
        self.buf.extend_from_slice(&checksum.to_le_bytes());
        self.buf
    }

    /// Bytes written so far, without EOF
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Write `bytes` to `dump.rdb` inside a fresh temp dir
pub fn write_fixture(bytes: &[u8]) -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("dump.rdb");
    std::fs::write(&path, bytes).unwrap();
    (dir, path)
}
