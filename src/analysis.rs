//! One-file analysis
//!
//! Pairs a [`Decoder`] with a [`Counter`] and keeps whatever was counted
//! even when decoding stops early.

use std::path::Path;

use crate::config::{CounterConfig, DecoderConfig};
use crate::counter::Counter;
use crate::decoder::{DecodeSummary, Decoder};
use crate::error::{RdbError, Result};

/// Statistics for one file
#[derive(Debug)]
pub struct Analysis {
    /// Everything consumed before the entry sequence ended
    pub counter: Counter,

    /// File-level facts (partial when `error` is set)
    pub summary: Option<DecodeSummary>,

    /// Why decoding stopped early, if it did
    pub error: Option<RdbError>,
}

impl Analysis {
    /// Decoded to EOF without error
    pub fn is_complete(&self) -> bool {
        self.error.is_none() && self.summary.is_some()
    }
}

/// Decode and count one file
///
/// Only failing to open the file is an `Err`; decode failures are
/// returned on the [`Analysis`] with the partial statistics.
pub fn analyze(
    path: impl AsRef<Path>,
    decoder_config: DecoderConfig,
    counter_config: CounterConfig,
) -> Result<Analysis> {
    let path = path.as_ref();
    tracing::info!("Analyzing {}", path.display());
    let decoder = Decoder::open_with_config(path, decoder_config)?;
    Ok(analyze_decoder(decoder, counter_config))
}

/// Drain an already-open decoder into a fresh counter
pub fn analyze_decoder(decoder: Decoder, counter_config: CounterConfig) -> Analysis {
    let mut counter = Counter::new(counter_config);
    counter.consume(decoder.entries());

    let error = decoder.take_error();
    let summary = decoder.summary();
    if let Some(e) = &error {
        tracing::warn!(
            "Decode ended early after {} entries: {}",
            counter.total_entries(),
            e
        );
    }

    Analysis {
        counter,
        summary,
        error,
    }
}
