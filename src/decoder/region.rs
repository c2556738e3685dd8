//! Compact region walkers
//!
//! Small collections are stored as a single packed blob. Each walker checks
//! the blob's framing and counts its elements without building them.
//!
//! ## Ziplist
//! ```text
//! <zlbytes u32><zltail u32><zllen u16> <entry>... <0xff>
//! entry: <prevlen: 1 byte | 0xfe + u32> <encoding> <data>
//! ```
//!
//! ## Listpack
//! ```text
//! <total u32><count u16> <entry>... <0xff>
//! entry: <encoding> <data> <backlen: 1..5 bytes>
//! ```
//!
//! ## Intset
//! ```text
//! <width u32 (2|4|8)><count u32> <count * width bytes, sorted ascending>
//! ```
//!
//! ## Zipmap
//! ```text
//! <zmlen u8> (<len>key <len><free>value <free bytes>)... <0xff>
//! len: 1 byte < 254 | 254 + u32
//! ```

use crate::error::{RdbError, Result};

/// Element count and byte span of a walked region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegionSpan {
    /// Number of elements (ziplist/listpack entries, intset members,
    /// zipmap pairs)
    pub elements: u64,

    /// Bytes the region occupies
    pub bytes: u64,
}

/// One structural encoding of a compact region
pub(crate) trait CompactRegion {
    /// Name used in error messages
    const NAME: &'static str;

    /// Validate `blob` and count its elements
    fn walk(blob: &[u8]) -> std::result::Result<RegionSpan, String>;

    /// Walk and attach the blob's stream offset to any error
    fn span(blob: &[u8], offset: u64) -> Result<RegionSpan> {
        Self::walk(blob).map_err(|reason| RdbError::MalformedValue {
            offset,
            reason: format!("{}: {}", Self::NAME, reason),
        })
    }
}

/// Bounds-checked cursor over a blob
struct Cursor<'a> {
    blob: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(blob: &'a [u8]) -> Self {
        Self { blob, pos: 0 }
    }

    fn take(&mut self, n: usize) -> std::result::Result<&'a [u8], String> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.blob.len())
            .ok_or_else(|| format!("needs {} bytes at {}, region is {}", n, self.pos, self.blob.len()))?;
        let slice = &self.blob[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> std::result::Result<u8, String> {
        Ok(self.take(1)?[0])
    }

    fn peek(&self) -> std::result::Result<u8, String> {
        self.blob
            .get(self.pos)
            .copied()
            .ok_or_else(|| "missing end marker".to_string())
    }

    fn u16_le(&mut self) -> std::result::Result<u16, String> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32_le(&mut self) -> std::result::Result<u32, String> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u32_be(&mut self) -> std::result::Result<u32, String> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn at_end(&self) -> bool {
        self.pos == self.blob.len()
    }
}

const END_MARKER: u8 = 0xff;

// =============================================================================
// Ziplist
// =============================================================================

pub(crate) struct Ziplist;

/// zllen value meaning "count too large, walk to find out"
const ZIPLIST_UNKNOWN_LEN: u16 = u16::MAX;

impl CompactRegion for Ziplist {
    const NAME: &'static str = "ziplist";

    fn walk(blob: &[u8]) -> std::result::Result<RegionSpan, String> {
        let mut cur = Cursor::new(blob);
        let total = cur.u32_le()? as usize;
        let tail = cur.u32_le()? as usize;
        let declared = cur.u16_le()?;

        if total != blob.len() {
            return Err(format!("header says {} bytes, region is {}", total, blob.len()));
        }

        let mut elements = 0u64;
        let mut prev_size = 0usize;
        let mut last_start = None;
        while cur.peek()? != END_MARKER {
            let start = cur.pos;
            let prevlen = match cur.u8()? {
                0xfe => cur.u32_le()? as usize,
                small => small as usize,
            };
            if prevlen != prev_size {
                return Err(format!(
                    "entry at {} points back {} bytes, previous entry is {}",
                    start, prevlen, prev_size
                ));
            }
            let encoding = cur.u8()?;
            let data_len = match encoding >> 6 {
                0b00 => (encoding & 0x3f) as usize,
                0b01 => (((encoding & 0x3f) as usize) << 8) | cur.u8()? as usize,
                0b10 => cur.u32_be()? as usize,
                _ => match encoding {
                    0xc0 => 2,
                    0xd0 => 4,
                    0xe0 => 8,
                    0xf0 => 3,
                    0xfe => 1,
                    0xf1..=0xfd => 0,
                    other => return Err(format!("bad entry encoding 0x{:02x}", other)),
                },
            };
            cur.take(data_len)?;
            prev_size = cur.pos - start;
            last_start = Some(start);
            elements += 1;
        }
        cur.u8()?;
        if !cur.at_end() {
            return Err("trailing bytes after end marker".to_string());
        }
        if let Some(last) = last_start {
            if tail != last {
                return Err(format!("tail offset {} does not match last entry at {}", tail, last));
            }
        }
        if declared != ZIPLIST_UNKNOWN_LEN && u64::from(declared) != elements {
            return Err(format!("header counts {} entries, found {}", declared, elements));
        }

        Ok(RegionSpan {
            elements,
            bytes: blob.len() as u64,
        })
    }
}

// =============================================================================
// Listpack
// =============================================================================

pub(crate) struct Listpack;

/// Listpack count value meaning "count too large, walk to find out"
const LISTPACK_UNKNOWN_LEN: u16 = u16::MAX;

/// Width of the backlen field for an entry of `size` bytes
///
/// The writer moves to a wider field one short of each 7-bit boundary, so
/// an entry of exactly 16383 bytes already takes three bytes.
fn backlen_width(size: usize) -> usize {
    match size {
        s if s < 128 => 1,
        s if s < 16_383 => 2,
        s if s < 2_097_151 => 3,
        s if s < 268_435_455 => 4,
        _ => 5,
    }
}

/// Backlen stores 7 bits per byte, most significant group first
fn decode_backlen(bytes: &[u8]) -> usize {
    bytes
        .iter()
        .fold(0usize, |acc, &b| (acc << 7) | (b & 0x7f) as usize)
}

impl CompactRegion for Listpack {
    const NAME: &'static str = "listpack";

    fn walk(blob: &[u8]) -> std::result::Result<RegionSpan, String> {
        let mut cur = Cursor::new(blob);
        let total = cur.u32_le()? as usize;
        let declared = cur.u16_le()?;

        if total != blob.len() {
            return Err(format!("header says {} bytes, region is {}", total, blob.len()));
        }

        let mut elements = 0u64;
        while cur.peek()? != END_MARKER {
            let start = cur.pos;
            let encoding = cur.u8()?;
            let payload = match encoding {
                0x00..=0x7f => 0,
                0x80..=0xbf => (encoding & 0x3f) as usize,
                0xc0..=0xdf => 1,
                0xe0..=0xef => (((encoding & 0x0f) as usize) << 8) | cur.u8()? as usize,
                0xf0 => cur.u32_le()? as usize,
                0xf1 => 2,
                0xf2 => 3,
                0xf3 => 4,
                0xf4 => 8,
                other => return Err(format!("bad entry encoding 0x{:02x}", other)),
            };
            cur.take(payload)?;
            let size = cur.pos - start;
            let backlen = cur.take(backlen_width(size))?;
            if decode_backlen(backlen) != size {
                return Err(format!(
                    "entry at {} has back length {}, actual {}",
                    start,
                    decode_backlen(backlen),
                    size
                ));
            }
            elements += 1;
        }
        cur.u8()?;
        if !cur.at_end() {
            return Err("trailing bytes after end marker".to_string());
        }
        if declared != LISTPACK_UNKNOWN_LEN && u64::from(declared) != elements {
            return Err(format!("header counts {} entries, found {}", declared, elements));
        }

        Ok(RegionSpan {
            elements,
            bytes: blob.len() as u64,
        })
    }
}

// =============================================================================
// Intset
// =============================================================================

pub(crate) struct Intset;

impl CompactRegion for Intset {
    const NAME: &'static str = "intset";

    fn walk(blob: &[u8]) -> std::result::Result<RegionSpan, String> {
        let mut cur = Cursor::new(blob);
        let width = cur.u32_le()? as usize;
        let count = cur.u32_le()? as usize;

        if !matches!(width, 2 | 4 | 8) {
            return Err(format!("invalid member width {}", width));
        }
        let expected = count
            .checked_mul(width)
            .and_then(|body| body.checked_add(8))
            .ok_or_else(|| format!("count {} overflows", count))?;
        if expected != blob.len() {
            return Err(format!(
                "{} members of {} bytes need {} bytes, region is {}",
                count,
                width,
                expected,
                blob.len()
            ));
        }

        let mut previous: Option<i64> = None;
        for _ in 0..count {
            let raw = cur.take(width)?;
            let value = match width {
                2 => i64::from(i16::from_le_bytes([raw[0], raw[1]])),
                4 => i64::from(i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])),
                _ => i64::from_le_bytes([raw[0], raw[1], raw[2], raw[3], raw[4], raw[5], raw[6], raw[7]]),
            };
            if previous.is_some_and(|p| p >= value) {
                return Err(format!("members not strictly ascending at {}", value));
            }
            previous = Some(value);
        }

        Ok(RegionSpan {
            elements: count as u64,
            bytes: blob.len() as u64,
        })
    }
}

// =============================================================================
// Zipmap
// =============================================================================

pub(crate) struct Zipmap;

impl Zipmap {
    fn len(cur: &mut Cursor<'_>) -> std::result::Result<Option<usize>, String> {
        match cur.u8()? {
            END_MARKER => Ok(None),
            254 => Ok(Some(cur.u32_le()? as usize)),
            small => Ok(Some(small as usize)),
        }
    }
}

impl CompactRegion for Zipmap {
    const NAME: &'static str = "zipmap";

    fn walk(blob: &[u8]) -> std::result::Result<RegionSpan, String> {
        let mut cur = Cursor::new(blob);
        let declared = cur.u8()?;

        let mut pairs = 0u64;
        while let Some(key_len) = Self::len(&mut cur)? {
            cur.take(key_len)?;
            let value_len = Self::len(&mut cur)?.ok_or("key without value")?;
            let free = cur.u8()? as usize;
            cur.take(value_len + free)?;
            pairs += 1;
        }
        if !cur.at_end() {
            return Err("trailing bytes after end marker".to_string());
        }
        // zmlen saturates at 254
        if declared < 254 && u64::from(declared) != pairs {
            return Err(format!("header counts {} pairs, found {}", declared, pairs));
        }

        Ok(RegionSpan {
            elements: pairs,
            bytes: blob.len() as u64,
        })
    }
}
