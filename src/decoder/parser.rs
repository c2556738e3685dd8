//! RDB opcode stream parser
//!
//! Drives an [`RdbReader`] through the header and the opcode loop, turning
//! every keyed value into an [`Entry`] and collecting file-level facts
//! into a [`DecodeSummary`].
//!
//! ## Opcodes
//! ```text
//! 0xFA AUX            string key, string value
//! 0xFB RESIZEDB       length db_size, length expires_size
//! 0xFC EXPIRETIME_MS  8 bytes LE millis   (applies to the next key)
//! 0xFD EXPIRETIME     4 bytes LE seconds  (applies to the next key)
//! 0xFE SELECTDB       length db
//! 0xFF EOF            then 8 bytes LE CRC-64 (v >= 5)
//! 0xF8 IDLE / 0xF9 FREQ / 0xF4 SLOT_INFO / 0xF5 FUNCTION2 / 0xF7 MODULE_AUX
//!                     consumed and ignored
//! other               value type byte, string key, value
//! ```

use std::io::Read;

use bytes::Bytes;

use crate::config::DecoderConfig;
use crate::entry::Entry;
use crate::error::{RdbError, Result};

use super::handle::{AuxField, CancelToken, ChecksumStatus, DecodeSummary};
use super::memory::MemoryModel;
use super::reader::{parse_canonical_int, Limits, RdbReader};
use super::value::{module_name, ValueDecoder, ValueKind};
use super::{opcode, value_type, CHECKSUM_MIN_VERSION, MAGIC, MAX_VERSION};

/// The only `when_opcode` a module aux record may carry
const MODULE_AUX_WHEN_OPCODE: u64 = 2;

/// Header facts published before the first entry
#[derive(Debug, Clone, Copy)]
pub(crate) struct HeaderInfo {
    pub version: u32,
    /// From the `ctime` aux field
    pub creation_time: Option<u64>,
}

/// Receives parse output
pub(crate) trait ParseSink {
    /// Called once, after the header and any leading AUX fields
    fn header(&mut self, header: HeaderInfo);

    /// Deliver one entry; an error stops the parse
    fn entry(&mut self, entry: Entry) -> Result<()>;
}

/// Single-pass parser over one RDB stream
pub(crate) struct RdbParser<R> {
    reader: RdbReader<R>,
    model: MemoryModel,
    cancel: CancelToken,
    verify_checksum: bool,
    summary: DecodeSummary,
    ctime: Option<u64>,
    header_sent: bool,
    pending_expiry: Option<u64>,
}

impl<R: Read> RdbParser<R> {
    pub(crate) fn new(
        source: R,
        config: &DecoderConfig,
        cancel: CancelToken,
        fallback_creation_time: u64,
    ) -> Self {
        let limits = Limits {
            max_string_len: config.max_string_len,
            max_collection_len: config.max_collection_len,
        };
        Self {
            reader: RdbReader::new(source, limits),
            model: config.memory_model,
            cancel,
            verify_checksum: config.verify_checksum,
            summary: DecodeSummary::new(fallback_creation_time, config.memory_model.name),
            ctime: None,
            header_sent: false,
            pending_expiry: None,
        }
    }

    /// Summary of what has been parsed so far
    pub(crate) fn summary(&self) -> DecodeSummary {
        let mut summary = self.summary.clone();
        if let Some(ctime) = self.ctime {
            summary.creation_time = ctime;
        }
        summary.estimated_memory = summary.entry_memory.saturating_add(summary.database_overhead);
        summary
    }

    /// Parse to EOF, handing entries to `sink`
    pub(crate) fn run(&mut self, sink: &mut impl ParseSink) -> Result<()> {
        self.read_header()?;

        loop {
            self.cancel.check()?;
            let offset = self.reader.offset();
            let op = self.reader.read_u8()?;

            if op != opcode::AUX {
                self.publish_header(sink);
            }

            match op {
                opcode::AUX => self.read_aux()?,
                opcode::SELECTDB => {
                    let db = self.reader.read_length()?;
                    tracing::debug!("Selecting database {}", db);
                    self.summary.databases.push(db);
                }
                opcode::RESIZEDB => {
                    let db_size = self.reader.read_count()?;
                    let expires_size = self.reader.read_count()?;
                    tracing::debug!("Resize hint: {} keys, {} expires", db_size, expires_size);
                    let mut overhead = self.model.hashtable(db_size);
                    if expires_size > 0 {
                        overhead = overhead.saturating_add(self.model.hashtable(expires_size));
                    }
                    self.summary.database_overhead = self.summary.database_overhead.saturating_add(overhead);
                }
                opcode::EXPIRETIME_MS => {
                    // zero means the key does not expire
                    let millis = self.reader.read_millis()?;
                    self.pending_expiry = (millis != 0).then_some(millis);
                }
                opcode::EXPIRETIME => {
                    let seconds = self.reader.read_seconds()?;
                    self.pending_expiry = (seconds != 0).then(|| u64::from(seconds) * 1000);
                }
                opcode::IDLE => {
                    self.reader.read_length()?;
                }
                opcode::FREQ => {
                    self.reader.read_u8()?;
                }
                opcode::SLOT_INFO => {
                    // slot id, slot size, expires slot size
                    for _ in 0..3 {
                        self.reader.read_length()?;
                    }
                }
                opcode::FUNCTION2 => {
                    self.reader.read_string_shape()?;
                }
                opcode::MODULE_AUX => self.read_module_aux(offset)?,
                opcode::EOF => {
                    self.read_trailer()?;
                    return Ok(());
                }
                opcode::FUNCTION_PRE_GA => {
                    return Err(RdbError::UnknownOpcode { opcode: op, offset });
                }
                type_byte => self.read_entry(type_byte, offset, sink)?,
            }
        }
    }

    // =========================================================================
    // Header
    // =========================================================================

    fn read_header(&mut self) -> Result<()> {
        let header: [u8; 9] = match self.reader.read_array() {
            Ok(header) => header,
            Err(RdbError::TruncatedStream { .. }) => {
                return Err(RdbError::MalformedHeader {
                    reason: "file is shorter than the header".to_string(),
                })
            }
            Err(e) => return Err(e),
        };

        if &header[..5] != MAGIC {
            return Err(RdbError::MalformedHeader {
                reason: format!("bad magic {:?}", String::from_utf8_lossy(&header[..5])),
            });
        }

        let digits = &header[5..];
        if !digits.iter().all(u8::is_ascii_digit) {
            return Err(RdbError::MalformedHeader {
                reason: format!("version {:?} is not numeric", String::from_utf8_lossy(digits)),
            });
        }
        let version = digits
            .iter()
            .fold(0u32, |acc, d| acc * 10 + u32::from(d - b'0'));

        if version == 0 || version > MAX_VERSION {
            return Err(RdbError::UnsupportedVersion {
                version,
                max: MAX_VERSION,
            });
        }

        tracing::debug!("RDB version {}", version);
        self.summary.rdb_version = version;
        Ok(())
    }

    fn publish_header(&mut self, sink: &mut impl ParseSink) {
        if self.header_sent {
            return;
        }
        self.header_sent = true;
        sink.header(HeaderInfo {
            version: self.summary.rdb_version,
            creation_time: self.ctime,
        });
    }

    fn read_aux(&mut self) -> Result<()> {
        let key = self.reader.read_string()?;
        let value = self.reader.read_string()?;

        if key == b"ctime" {
            match parse_canonical_int(&value) {
                Some(ctime) if ctime >= 0 => self.ctime = Some(ctime as u64),
                _ => tracing::warn!(
                    "Ignoring unparsable ctime {:?}",
                    String::from_utf8_lossy(&value)
                ),
            }
        }

        let field = AuxField {
            key: String::from_utf8_lossy(&key).into_owned(),
            value: String::from_utf8_lossy(&value).into_owned(),
        };
        tracing::trace!("Aux {} = {}", field.key, field.value);
        self.summary.aux.push(field);
        Ok(())
    }

    fn read_module_aux(&mut self, offset: u64) -> Result<()> {
        let module_id = self.reader.read_length()?;
        let when_opcode = self.reader.read_length()?;
        if when_opcode != MODULE_AUX_WHEN_OPCODE {
            return Err(RdbError::MalformedValue {
                offset,
                reason: format!("module aux when-opcode {}", when_opcode),
            });
        }
        self.reader.read_length()?;

        let payload = ValueDecoder::new(&mut self.reader, &self.model, &self.cancel).module_payload()?;
        tracing::debug!(
            "Skipped {} bytes of aux data for module {}",
            payload,
            module_name(module_id)
        );
        Ok(())
    }

    // =========================================================================
    // Entries
    // =========================================================================

    fn read_entry(&mut self, type_byte: u8, offset: u64, sink: &mut impl ParseSink) -> Result<()> {
        let kind = match ValueKind::from_type_byte(type_byte) {
            Some(kind) => kind,
            None if type_byte >= opcode::RESERVED_START => {
                return Err(RdbError::UnknownOpcode {
                    opcode: type_byte,
                    offset,
                })
            }
            None => {
                if type_byte == value_type::MODULE {
                    tracing::warn!("Pre-release module value at offset {}", offset);
                }
                return Err(RdbError::UnknownType { type_byte, offset });
            }
        };

        let key = Bytes::from(self.reader.read_string()?);
        let expire_at = self.pending_expiry.take();
        let stats = ValueDecoder::new(&mut self.reader, &self.model, &self.cancel).decode(kind)?;

        let bytes = self.model.key(key.len() as u64, expire_at.is_some()).saturating_add(stats.bytes);

        tracing::trace!(
            "Entry {:?} {} {} len={} bytes={}",
            String::from_utf8_lossy(&key),
            stats.data_type,
            stats.encoding,
            stats.length,
            bytes
        );

        sink.entry(Entry {
            key,
            data_type: stats.data_type,
            encoding: stats.encoding,
            bytes,
            length: stats.length,
            expire_at,
        })?;

        // only delivered entries count toward the summary
        self.summary.entries += 1;
        self.summary.entry_memory = self.summary.entry_memory.saturating_add(bytes);
        Ok(())
    }

    // =========================================================================
    // Trailer
    // =========================================================================

    fn read_trailer(&mut self) -> Result<()> {
        if self.summary.rdb_version < CHECKSUM_MIN_VERSION {
            self.summary.checksum = ChecksumStatus::Absent;
            return Ok(());
        }

        let computed = self.reader.checksum();
        let mut trailer = [0u8; 8];
        self.reader.read_unhashed(&mut trailer)?;
        let expected = u64::from_le_bytes(trailer);

        self.summary.checksum = if !self.verify_checksum {
            ChecksumStatus::Skipped
        } else if expected == 0 {
            ChecksumStatus::Disabled
        } else if expected == computed {
            ChecksumStatus::Verified
        } else {
            tracing::warn!(
                "Checksum mismatch: file says {:#018x}, computed {:#018x}",
                expected,
                computed
            );
            ChecksumStatus::Mismatch { expected, computed }
        };
        Ok(())
    }
}
