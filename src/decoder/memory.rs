//! Memory estimation model
//!
//! Approximates what a decoded value would occupy inside a running 64-bit
//! server: allocator size classes, SDS headers, object headers, dict/skiplist
//! nodes and the container headers of each structural encoding.
//!
//! The figures are a documented approximation, not a replica of any one
//! allocator build. Every constant lives on [`MemoryModel`] so an alternative
//! table can be swapped in through [`crate::config::DecoderConfig`].

/// jemalloc small size classes for a 16-byte quantum with an 8-byte tiny class
const JEMALLOC_SMALL_CLASSES: &[u64] = &[
    8, 16, 32, 48, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384, 448, 512, 640, 768, 896,
    1024, 1280, 1536, 1792, 2048, 2560, 3072, 3584, 4096, 5120, 6144, 7168, 8192, 10240, 12288,
    14336,
];

/// Skiplist levels are capped at this height
const SKIPLIST_MAX_LEVEL: u64 = 32;

/// Overhead policy table used to turn decoded values into byte estimates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryModel {
    /// Identifier of this table, reported alongside estimates
    pub name: &'static str,

    /// sizeof(void *)
    pub pointer_size: u64,

    /// sizeof(long)
    pub long_size: u64,

    /// Allocator size classes, ascending. Sizes past the last class are
    /// rounded with jemalloc's four-classes-per-doubling spacing.
    pub size_classes: &'static [u64],
}

impl Default for MemoryModel {
    fn default() -> Self {
        Self::jemalloc_x86_64()
    }
}

impl MemoryModel {
    /// 64-bit server linked against jemalloc
    pub const fn jemalloc_x86_64() -> Self {
        Self {
            name: "jemalloc-x86_64-v1",
            pointer_size: 8,
            long_size: 8,
            size_classes: JEMALLOC_SMALL_CLASSES,
        }
    }

    // =========================================================================
    // Allocator
    // =========================================================================

    /// Bytes the allocator hands out for a request of `size`
    pub fn alloc(&self, size: u64) -> u64 {
        if size == 0 {
            return 0;
        }
        let idx = self.size_classes.partition_point(|&class| class < size);
        if let Some(&class) = self.size_classes.get(idx) {
            return class;
        }
        // (2^k, 2^(k+1)] is split into four classes of 2^(k-2) each
        let k = 63 - u64::from((size - 1).leading_zeros());
        let spacing = 1u64 << k.saturating_sub(2);
        size.div_ceil(spacing).saturating_mul(spacing)
    }

    // =========================================================================
    // Strings and object headers
    // =========================================================================

    /// Size of an SDS string holding `len` bytes
    pub fn sds(&self, len: u64) -> u64 {
        let header = match len {
            l if l < 1 << 5 => 1,
            l if l < 1 << 8 => 3,
            l if l < 1 << 16 => 5,
            l if l < 1 << 32 => 9,
            _ => 17,
        };
        self.alloc(len + header + 1)
    }

    /// Size of a string value; integer-like strings live inside the object
    /// pointer and cost nothing extra
    pub fn string_value(&self, len: u64, is_int: bool) -> u64 {
        if is_int {
            0
        } else {
            self.sds(len)
        }
    }

    /// redisObject header
    pub fn robj(&self) -> u64 {
        self.pointer_size + 8
    }

    /// dictEntry: key, value and next pointers
    pub fn dict_entry(&self) -> u64 {
        2 * self.pointer_size + 8
    }

    /// Cost every top-level key pays: its keyspace dict entry, the key SDS,
    /// the value object header and, with a TTL, an expires dict entry
    pub fn key(&self, key_len: u64, has_expiry: bool) -> u64 {
        let expiry = if has_expiry { self.dict_entry() + 8 } else { 0 };
        self.dict_entry() + self.sds(key_len) + self.robj() + expiry
    }

    // =========================================================================
    // Containers
    // =========================================================================

    /// dict with two tables, bucket array sized to the next power of two and
    /// charged at 1.5x for a possible rehash
    pub fn hashtable(&self, size: u64) -> u64 {
        let buckets = next_power(size).saturating_mul(self.pointer_size * 3 / 2);
        (4 + 7 * self.long_size + 4 * self.pointer_size).saturating_add(buckets)
    }

    /// adlist list header
    pub fn linked_list(&self) -> u64 {
        self.long_size + 5 * self.pointer_size
    }

    /// adlist node
    pub fn linked_list_node(&self) -> u64 {
        3 * self.pointer_size
    }

    /// quicklist header plus one quicklistNode per region
    pub fn quicklist(&self, nodes: u64) -> u64 {
        let header = 2 * self.pointer_size + self.long_size + 2 * 4;
        let node = 4 * self.pointer_size + self.long_size + 2 * 4;
        header.saturating_add(nodes.saturating_mul(node))
    }

    /// zset: dict + skiplist header + header node
    pub fn skiplist(&self, size: u64) -> u64 {
        (4 * self.pointer_size + 16).saturating_add(self.hashtable(size))
    }

    /// Skiplist node with `level` forward pointers plus its dict entry
    pub fn skiplist_node(&self, level: u64) -> u64 {
        self.dict_entry() + 2 * self.pointer_size + 8 + (self.pointer_size + 8) * level
    }

    /// Deterministic stand-in for the random level of the `index`th node.
    /// Follows the p = 1/4 distribution: every fourth node gains a level,
    /// every sixteenth another, and so on.
    pub fn skiplist_level(&self, index: u64) -> u64 {
        let mut n = index + 1;
        let mut level = 1;
        while n % 4 == 0 && level < SKIPLIST_MAX_LEVEL {
            n /= 4;
            level += 1;
        }
        level
    }

    /// Extra cost of a hash field that carries its own TTL
    pub fn field_expiry(&self) -> u64 {
        8
    }

    // =========================================================================
    // Streams
    // =========================================================================

    /// stream struct plus its radix tree header
    pub fn stream(&self) -> u64 {
        // rax*, length, last/first/max-deleted ids, entries_added, cgroups*
        self.alloc(self.pointer_size + 8 + 16 * 3 + 8 + self.pointer_size) + self.rax()
    }

    /// Radix tree header
    pub fn rax(&self) -> u64 {
        self.alloc(3 * 8)
    }

    /// Radix tree node keyed by a 128-bit stream id
    pub fn rax_node(&self) -> u64 {
        self.alloc(4 + 16 + self.pointer_size)
    }

    /// One listpack node of the stream tree
    pub fn stream_node(&self, listpack_len: u64) -> u64 {
        self.rax_node() + self.alloc(listpack_len)
    }

    /// Consumer group with its PEL and consumer trees
    pub fn stream_group(&self, name_len: u64) -> u64 {
        self.alloc(16 + 8 + 2 * self.pointer_size) + self.sds(name_len) + 2 * self.rax() + self.rax_node()
    }

    /// Pending-entry record in a group PEL
    pub fn stream_nack(&self) -> u64 {
        self.alloc(8 + 8 + self.pointer_size) + self.rax_node()
    }

    /// Consumer with its own PEL tree
    pub fn stream_consumer(&self, name_len: u64) -> u64 {
        self.alloc(8 + 8 + 2 * self.pointer_size) + self.sds(name_len) + self.rax() + self.rax_node()
    }

    /// Reference from a consumer PEL into the group PEL
    pub fn stream_consumer_nack(&self) -> u64 {
        self.rax_node()
    }
}

/// Smallest power of two strictly greater than `size`
fn next_power(size: u64) -> u64 {
    let mut power = 1u64;
    while power <= size {
        match power.checked_shl(1) {
            Some(next) if next != 0 => power = next,
            _ => break,
        }
    }
    power
}
