//! Decoder handle
//!
//! Owns the parse thread and the receiving end of its channel.
//!
//! ## Lifecycle
//! ```text
//! open ──▶ parsing ──▶ summary stored ──▶ channel closed ──▶ file released ──▶ closed
//!             │                                                              ▲
//!             └── cancel / error ────────────────────────────────────────────┘
//! ```
//!
//! - Entries are delivered in file order with a bounded queue between the
//!   two sides, so the parser never runs more than `channel_capacity`
//!   entries ahead of the consumer
//! - Cancellation is observed by the parser at every opcode and collection
//!   element, and by the sender while it waits for queue space
//! - Dropping the handle cancels and joins the parse thread

use std::fs::File;
use std::any::Any;
use std::io::{BufReader, Read};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, UNIX_EPOCH};

use crossbeam::channel::{self, Receiver, SendTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;

use crate::config::DecoderConfig;
use crate::entry::Entry;
use crate::error::{RdbError, Result};

use super::parser::{HeaderInfo, ParseSink, RdbParser};

/// How long a blocked send waits before re-checking for cancellation
const SEND_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Read buffer in front of the file
const FILE_BUFFER_SIZE: usize = 64 * 1024;

// =============================================================================
// Cancellation
// =============================================================================

/// Shared cancellation flag
///
/// Cloning yields a handle to the same flag, so a token can be moved to
/// another thread and used to stop a decode in progress.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation (idempotent)
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// `Err(Cancelled)` once cancellation was requested
    pub(crate) fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(RdbError::Cancelled);
        }
        Ok(())
    }
}

// =============================================================================
// Summary
// =============================================================================

/// Outcome of trailer verification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "status")]
pub enum ChecksumStatus {
    /// Decoding stopped before the trailer
    Unchecked,
    /// Format version predates checksums
    Absent,
    /// Writer stored a zero checksum (rdbchecksum no)
    Disabled,
    /// Verification turned off in the config
    Skipped,
    Verified,
    Mismatch { expected: u64, computed: u64 },
}

/// One AUX field from the file header area
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuxField {
    pub key: String,
    pub value: String,
}

/// Everything learned about a file besides its entries
#[derive(Debug, Clone, Serialize)]
pub struct DecodeSummary {
    /// Format version from the header
    pub rdb_version: u32,

    /// Unix seconds: `ctime` aux field, else file mtime, else 0
    pub creation_time: u64,

    /// `entry_memory + database_overhead`
    pub estimated_memory: u64,

    /// Sum of `Entry::bytes` over every emitted entry
    pub entry_memory: u64,

    /// Keyspace and expires dictionaries sized from RESIZEDB hints
    pub database_overhead: u64,

    /// Entries emitted
    pub entries: u64,

    /// Database numbers selected, in file order
    pub databases: Vec<u64>,

    /// AUX fields, in file order
    pub aux: Vec<AuxField>,

    pub checksum: ChecksumStatus,

    /// Name of the memory model used for estimates
    pub memory_model: &'static str,
}

impl DecodeSummary {
    pub(crate) fn new(creation_time: u64, memory_model: &'static str) -> Self {
        Self {
            rdb_version: 0,
            creation_time,
            estimated_memory: 0,
            entry_memory: 0,
            database_overhead: 0,
            entries: 0,
            databases: Vec::new(),
            aux: Vec::new(),
            checksum: ChecksumStatus::Unchecked,
            memory_model,
        }
    }

    /// Look up an AUX field by key
    pub fn aux_value(&self, key: &str) -> Option<&str> {
        self.aux
            .iter()
            .find(|field| field.key == key)
            .map(|field| field.value.as_str())
    }

    /// The checksum mismatch as an error, if there was one
    pub fn checksum_error(&self) -> Option<RdbError> {
        match self.checksum {
            ChecksumStatus::Mismatch { expected, computed } => {
                Some(RdbError::ChecksumMismatch { expected, computed })
            }
            _ => None,
        }
    }
}

// =============================================================================
// Shared State
// =============================================================================

#[derive(Default)]
struct State {
    header: Option<HeaderInfo>,
    summary: Option<DecodeSummary>,
    error: Option<RdbError>,
    closed: bool,
}

/// State shared between the handle and the parse thread
///
/// - `state`: header, outcome and close flag; waited on through `changed`
/// - `entry_memory`/`entries`: running totals (lock-free)
#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    changed: Condvar,
    entry_memory: AtomicU64,
    entries: AtomicU64,
}

impl Shared {
    fn update(&self, f: impl FnOnce(&mut State)) {
        let mut state = self.state.lock();
        f(&mut state);
        self.changed.notify_all();
    }
}

/// Parse-thread side of the channel
struct ChannelSink {
    sender: Sender<Entry>,
    shared: Arc<Shared>,
    cancel: CancelToken,
}

impl ParseSink for ChannelSink {
    fn header(&mut self, header: HeaderInfo) {
        tracing::debug!("Header ready: version {}", header.version);
        self.shared.update(|state| state.header = Some(header));
    }

    fn entry(&mut self, entry: Entry) -> Result<()> {
        let bytes = entry.bytes;
        let mut pending = entry;
        loop {
            self.cancel.check()?;
            match self.sender.send_timeout(pending, SEND_POLL_INTERVAL) {
                Ok(()) => break,
                Err(SendTimeoutError::Timeout(entry)) => pending = entry,
                Err(SendTimeoutError::Disconnected(_)) => {
                    // receiver is gone; nobody will read further
                    self.cancel.cancel();
                    return Err(RdbError::Cancelled);
                }
            }
        }
        self.shared.entry_memory.fetch_add(bytes, Ordering::Relaxed);
        self.shared.entries.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

// =============================================================================
// Decoder
// =============================================================================

/// Streaming decoder over one RDB file
///
/// ## Example
/// ```no_run
/// use rdbstat::Decoder;
///
/// let decoder = Decoder::open("dump.rdb")?;
/// for entry in decoder.entries() {
///     println!("{} {} {}", entry.key_lossy(), entry.data_type, entry.bytes);
/// }
/// let summary = decoder.finish()?;
/// println!("estimated memory: {}", summary.estimated_memory);
/// # Ok::<(), rdbstat::RdbError>(())
/// ```
pub struct Decoder {
    receiver: Receiver<Entry>,
    shared: Arc<Shared>,
    cancel: CancelToken,
    worker: Option<JoinHandle<()>>,
    fallback_creation_time: u64,
}

impl Decoder {
    /// Open a file with the default configuration
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(path, DecoderConfig::default())
    }

    /// Open a file and start decoding it in the background
    pub fn open_with_config(path: impl AsRef<Path>, config: DecoderConfig) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let modified = file
            .metadata()
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .map(|since| since.as_secs())
            .unwrap_or(0);

        tracing::debug!("Opened {} (mtime {})", path.display(), modified);
        Self::spawn(BufReader::with_capacity(FILE_BUFFER_SIZE, file), config, modified)
    }

    /// Decode from any byte source (creation time falls back to 0)
    pub fn from_reader<R: Read + Send + 'static>(reader: R, config: DecoderConfig) -> Result<Self> {
        Self::spawn(reader, config, 0)
    }

    fn spawn<R: Read + Send + 'static>(
        source: R,
        config: DecoderConfig,
        fallback_creation_time: u64,
    ) -> Result<Self> {
        let (sender, receiver) = channel::bounded(config.channel_capacity.max(1));
        let shared = Arc::new(Shared::default());
        let cancel = CancelToken::new();

        let sink = ChannelSink {
            sender,
            shared: Arc::clone(&shared),
            cancel: cancel.clone(),
        };
        let parser = RdbParser::new(source, &config, cancel.clone(), fallback_creation_time);

        let worker = thread::Builder::new()
            .name("rdb-decoder".to_string())
            .spawn(move || run_parser(parser, sink))?;

        Ok(Self {
            receiver,
            shared,
            cancel,
            worker: Some(worker),
            fallback_creation_time,
        })
    }

    // =========================================================================
    // Consumption
    // =========================================================================

    /// Iterate entries in file order
    ///
    /// Ends when the file is exhausted, decoding fails, or the decode is
    /// cancelled. Check [`Decoder::take_error`] afterwards to tell these
    /// apart. Entries are delivered once, so a second iterator continues
    /// where the first stopped.
    pub fn entries(&self) -> Entries<'_> {
        Entries { decoder: self }
    }

    /// Stop decoding; the entry iterator ends and the file is released
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this decode from another thread
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    // =========================================================================
    // Results
    // =========================================================================

    /// Creation time in unix seconds
    ///
    /// Blocks until the header has been read (or decoding has ended).
    pub fn creation_time(&self) -> u64 {
        let mut state = self.shared.state.lock();
        loop {
            if let Some(summary) = &state.summary {
                return summary.creation_time;
            }
            if let Some(header) = &state.header {
                return header.creation_time.unwrap_or(self.fallback_creation_time);
            }
            if state.closed {
                return self.fallback_creation_time;
            }
            self.shared.changed.wait(&mut state);
        }
    }

    /// Estimated memory of everything decoded
    ///
    /// Final only once the entry sequence has been consumed to the end;
    /// before that it is the running total of emitted entries.
    pub fn estimated_memory(&self) -> u64 {
        match &self.shared.state.lock().summary {
            Some(summary) => summary.estimated_memory,
            None => self.shared.entry_memory.load(Ordering::Relaxed),
        }
    }

    /// Keyspace dictionary overhead (0 until decoding completes)
    pub fn database_overhead(&self) -> u64 {
        self.shared
            .state
            .lock()
            .summary
            .as_ref()
            .map(|summary| summary.database_overhead)
            .unwrap_or(0)
    }

    /// Entries emitted so far
    pub fn entries_emitted(&self) -> u64 {
        self.shared.entries.load(Ordering::Relaxed)
    }

    /// Summary, once the parse thread has stopped
    pub fn summary(&self) -> Option<DecodeSummary> {
        self.shared.state.lock().summary.clone()
    }

    /// The error that ended decoding early, if any (taken once)
    pub fn take_error(&self) -> Option<RdbError> {
        self.shared.state.lock().error.take()
    }

    /// Whether the parse thread has stopped and released its input
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Wait up to `timeout` for the input to be released
    pub fn wait_closed(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while !state.closed {
            if self.shared.changed.wait_until(&mut state, deadline).timed_out() {
                return state.closed;
            }
        }
        true
    }

    /// Stop the parse thread and return the summary
    ///
    /// Cancels first if decoding is still in progress, so calling this
    /// without draining `entries()` yields `Err(Cancelled)`.
    pub fn finish(mut self) -> Result<DecodeSummary> {
        if self.shared.state.lock().summary.is_none() {
            self.cancel.cancel();
        }
        self.join();

        let mut state = self.shared.state.lock();
        if let Some(err) = state.error.take() {
            return Err(err);
        }
        state.summary.take().ok_or(RdbError::Cancelled)
    }

    fn join(&mut self) {
        if let Some(worker) = self.worker.take() {
            if let Err(payload) = worker.join() {
                tracing::error!("Decoder thread panicked");
                self.shared.update(|state| {
                    if !state.closed {
                        state.error = Some(RdbError::Panicked {
                            reason: panic_reason(&*payload),
                        });
                        state.closed = true;
                    }
                });
            }
        }
    }
}

impl Drop for Decoder {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.join();
    }
}

impl std::fmt::Debug for Decoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decoder")
            .field("entries_emitted", &self.entries_emitted())
            .field("cancelled", &self.cancel.is_cancelled())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Parse-thread body
///
/// The summary is stored before the channel closes, so a consumer whose
/// iterator has ended always sees it; the input is dropped before
/// `closed` is raised. A panic while parsing is stored as an error like
/// any other failure.
fn run_parser<R: Read>(mut parser: RdbParser<R>, mut sink: ChannelSink) {
    let result = panic::catch_unwind(AssertUnwindSafe(|| parser.run(&mut sink)))
        .unwrap_or_else(|payload| {
            Err(RdbError::Panicked {
                reason: panic_reason(&*payload),
            })
        });
    let summary = parser.summary();
    drop(parser);

    match &result {
        Ok(()) => tracing::info!(
            "Decoded {} entries, estimated memory {} bytes",
            summary.entries,
            summary.estimated_memory
        ),
        Err(RdbError::Cancelled) => {
            tracing::debug!("Decode cancelled after {} entries", summary.entries)
        }
        Err(e) => tracing::error!("Decode failed after {} entries: {}", summary.entries, e),
    }

    let shared = Arc::clone(&sink.shared);
    shared.update(|state| {
        state.summary = Some(summary);
        state.error = result.err();
    });
    drop(sink);
    shared.update(|state| state.closed = true);
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic".to_string())
}

// =============================================================================
// Iterator
// =============================================================================

/// Entries of a [`Decoder`], in file order
pub struct Entries<'a> {
    decoder: &'a Decoder,
}

impl Iterator for Entries<'_> {
    type Item = Entry;

    fn next(&mut self) -> Option<Entry> {
        if self.decoder.cancel.is_cancelled() {
            return None;
        }
        self.decoder.receiver.recv().ok()
    }
}
