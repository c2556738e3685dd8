//! RDB byte reader
//!
//! Forward-only cursor over the dump that keeps a running CRC-64 of every
//! byte it hands out and understands the format's primitive encodings.
//!
//! ## Length Encoding
//! ```text
//! 00xxxxxx                      6-bit length
//! 01xxxxxx xxxxxxxx             14-bit length (big endian)
//! 10000000 [4 bytes]            32-bit length (big endian)
//! 10000001 [8 bytes]            64-bit length (big endian)
//! 11xxxxxx                      special string encoding:
//!                                 0 int8, 1 int16, 2 int32 (little endian)
//!                                 3 LZF: <clen><len><clen bytes>
//! ```

use std::io::{ErrorKind, Read};

use crc::{Crc, Digest, CRC_64_REDIS};

use crate::error::{RdbError, Result};

use super::lzf;

/// CRC-64 used for the trailing checksum (Jones polynomial, reflected)
pub(crate) static CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_REDIS);

/// Strings at most this long are inspected for integer encoding
const MAX_INT_STRING_LEN: u64 = 20;

/// Chunk size used when skipping over payloads
const SKIP_CHUNK: usize = 8 * 1024;

const ENC_INT8: u8 = 0;
const ENC_INT16: u8 = 1;
const ENC_INT32: u8 = 2;
const ENC_LZF: u8 = 3;

/// Upper bounds applied to lengths read from the stream
#[derive(Debug, Clone, Copy)]
pub(crate) struct Limits {
    pub max_string_len: u64,
    pub max_collection_len: u64,
}

/// Decoded length prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LengthField {
    Len(u64),
    Int8,
    Int16,
    Int32,
    Lzf,
}

/// What the estimator needs to know about a string without keeping it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StringShape {
    pub len: u64,
    pub is_int: bool,
}

/// Checksumming reader over an RDB stream
pub(crate) struct RdbReader<R> {
    inner: R,
    digest: Digest<'static, u64>,
    offset: u64,
    limits: Limits,
}

impl<R: Read> RdbReader<R> {
    pub(crate) fn new(inner: R, limits: Limits) -> Self {
        Self {
            inner,
            digest: CRC64.digest(),
            offset: 0,
            limits,
        }
    }

    /// Bytes consumed so far
    pub(crate) fn offset(&self) -> u64 {
        self.offset
    }

    /// CRC-64 of everything consumed so far
    pub(crate) fn checksum(&self) -> u64 {
        self.digest.clone().finalize()
    }

    // =========================================================================
    // Raw bytes
    // =========================================================================

    pub(crate) fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.read_unhashed(buf)?;
        self.digest.update(buf);
        Ok(())
    }

    /// Read without feeding the checksum (used for the trailer itself)
    pub(crate) fn read_unhashed(&mut self, buf: &mut [u8]) -> Result<()> {
        match self.inner.read_exact(buf) {
            Ok(()) => {
                self.offset += buf.len() as u64;
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(RdbError::TruncatedStream {
                offset: self.offset,
            }),
            Err(e) => Err(RdbError::Io(e)),
        }
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    pub(crate) fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Read `len` bytes, growing the buffer as data arrives so a lying
    /// length prefix cannot force a large up-front allocation
    pub(crate) fn read_vec(&mut self, len: u64) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(len.min(SKIP_CHUNK as u64) as usize);
        let read = (&mut self.inner).take(len).read_to_end(&mut buf)?;
        self.offset += read as u64;
        if (read as u64) < len {
            return Err(RdbError::TruncatedStream { offset: self.offset });
        }
        self.digest.update(&buf);
        Ok(buf)
    }

    /// Consume `len` bytes without keeping them
    pub(crate) fn skip(&mut self, mut len: u64) -> Result<()> {
        let mut chunk = [0u8; SKIP_CHUNK];
        while len > 0 {
            let step = len.min(SKIP_CHUNK as u64) as usize;
            self.read_exact(&mut chunk[..step])?;
            len -= step as u64;
        }
        Ok(())
    }

    // =========================================================================
    // Fixed-width values
    // =========================================================================

    /// Millisecond timestamp, 8 bytes little endian
    pub(crate) fn read_millis(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    /// Second timestamp, 4 bytes little endian
    pub(crate) fn read_seconds(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    /// IEEE 754 double, 8 bytes little endian
    pub(crate) fn read_binary_double(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.read_array()?))
    }

    /// Legacy textual double: one length byte, 253/254/255 for nan/+inf/-inf
    pub(crate) fn skip_string_double(&mut self) -> Result<()> {
        match self.read_u8()? {
            253..=255 => Ok(()),
            len => self.skip(u64::from(len)),
        }
    }

    // =========================================================================
    // Length encoding
    // =========================================================================

    pub(crate) fn read_length_field(&mut self) -> Result<LengthField> {
        let first = self.read_u8()?;
        let field = match first >> 6 {
            0b00 => LengthField::Len(u64::from(first & 0x3f)),
            0b01 => {
                let next = self.read_u8()?;
                LengthField::Len((u64::from(first & 0x3f) << 8) | u64::from(next))
            }
            0b10 => match first {
                0x80 => LengthField::Len(u64::from(u32::from_be_bytes(self.read_array()?))),
                0x81 => LengthField::Len(u64::from_be_bytes(self.read_array()?)),
                _ => {
                    return Err(RdbError::MalformedValue {
                        offset: self.offset - 1,
                        reason: format!("invalid length prefix 0x{:02x}", first),
                    })
                }
            },
            _ => match first & 0x3f {
                ENC_INT8 => LengthField::Int8,
                ENC_INT16 => LengthField::Int16,
                ENC_INT32 => LengthField::Int32,
                ENC_LZF => LengthField::Lzf,
                other => {
                    return Err(RdbError::MalformedValue {
                        offset: self.offset - 1,
                        reason: format!("unknown string encoding {}", other),
                    })
                }
            },
        };
        Ok(field)
    }

    /// A plain length; special string encodings are not allowed here
    pub(crate) fn read_length(&mut self) -> Result<u64> {
        let start = self.offset;
        match self.read_length_field()? {
            LengthField::Len(len) => Ok(len),
            other => Err(RdbError::MalformedValue {
                offset: start,
                reason: format!("expected a length, found {:?} string encoding", other),
            }),
        }
    }

    /// An element count, bounded by `max_collection_len`
    pub(crate) fn read_count(&mut self) -> Result<u64> {
        let start = self.offset;
        let count = self.read_length()?;
        self.check_limit(start, count, self.limits.max_collection_len)?;
        Ok(count)
    }

    fn check_limit(&self, offset: u64, value: u64, limit: u64) -> Result<()> {
        if value > limit {
            return Err(RdbError::IntegerOverflow { offset, value, limit });
        }
        Ok(())
    }

    // =========================================================================
    // Strings
    // =========================================================================

    /// Read a string object in full (raw, integer or LZF)
    pub(crate) fn read_string(&mut self) -> Result<Vec<u8>> {
        let start = self.offset;
        match self.read_length_field()? {
            LengthField::Len(len) => {
                self.check_limit(start, len, self.limits.max_string_len)?;
                self.read_vec(len)
            }
            LengthField::Int8 => Ok((self.read_u8()? as i8).to_string().into_bytes()),
            LengthField::Int16 => Ok(i16::from_le_bytes(self.read_array()?).to_string().into_bytes()),
            LengthField::Int32 => Ok(i32::from_le_bytes(self.read_array()?).to_string().into_bytes()),
            LengthField::Lzf => self.read_lzf(start),
        }
    }

    /// Consume a string object, keeping only its length and whether the
    /// server would hold it as an integer. Long raw strings are streamed.
    pub(crate) fn read_string_shape(&mut self) -> Result<StringShape> {
        let start = self.offset;
        match self.read_length_field()? {
            LengthField::Len(len) => {
                self.check_limit(start, len, self.limits.max_string_len)?;
                if len > MAX_INT_STRING_LEN {
                    self.skip(len)?;
                    return Ok(StringShape { len, is_int: false });
                }
                let bytes = self.read_vec(len)?;
                Ok(StringShape {
                    len,
                    is_int: parse_canonical_int(&bytes).is_some(),
                })
            }
            LengthField::Int8 => Ok(int_shape(i64::from(self.read_u8()? as i8))),
            LengthField::Int16 => Ok(int_shape(i64::from(i16::from_le_bytes(self.read_array()?)))),
            LengthField::Int32 => Ok(int_shape(i64::from(i32::from_le_bytes(self.read_array()?)))),
            LengthField::Lzf => {
                let bytes = self.read_lzf(start)?;
                Ok(StringShape {
                    len: bytes.len() as u64,
                    is_int: parse_canonical_int(&bytes).is_some(),
                })
            }
        }
    }

    fn read_lzf(&mut self, start: u64) -> Result<Vec<u8>> {
        let compressed_len = self.read_length()?;
        let len = self.read_length()?;
        self.check_limit(start, compressed_len, self.limits.max_string_len)?;
        self.check_limit(start, len, self.limits.max_string_len)?;
        let compressed = self.read_vec(compressed_len)?;
        lzf::decompress(&compressed, len as usize)
            .map_err(|reason| RdbError::CompressionError { offset: start, reason })
    }
}

fn int_shape(value: i64) -> StringShape {
    StringShape {
        len: value.to_string().len() as u64,
        is_int: true,
    }
}

/// Parse a string the way the server decides to store it as an integer:
/// decimal, no sign prefix other than '-', no leading zeros, fits in i64
pub(crate) fn parse_canonical_int(bytes: &[u8]) -> Option<i64> {
    if bytes.is_empty() || bytes.len() as u64 > MAX_INT_STRING_LEN {
        return None;
    }
    let text = std::str::from_utf8(bytes).ok()?;
    let value: i64 = text.parse().ok()?;
    (value.to_string() == text).then_some(value)
}
