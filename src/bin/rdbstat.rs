//! rdbstat Binary
//!
//! Prints a plain-text memory summary for each RDB file given.

use clap::Parser;
use rdbstat::{analyze, Analysis, CounterConfig, DataType, DecoderConfig};
use tracing_subscriber::{fmt, EnvFilter};

/// rdbstat
#[derive(Parser, Debug)]
#[command(name = "rdbstat")]
#[command(about = "Offline memory statistics for Redis RDB files")]
#[command(version)]
struct Args {
    /// RDB files to analyze
    #[arg(required = true)]
    files: Vec<String>,

    /// Key prefix delimiter
    #[arg(short, long, default_value = ":")]
    delimiter: char,

    /// Number of largest keys to print
    #[arg(short, long, default_value = "10")]
    top: usize,

    /// Entries buffered between decoder and counter
    #[arg(short, long, default_value = "1024")]
    queue: usize,

    /// Skip CRC-64 verification
    #[arg(long)]
    no_checksum: bool,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,rdbstat=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if !args.delimiter.is_ascii() {
        tracing::error!("Delimiter must be a single ASCII character");
        std::process::exit(2);
    }

    tracing::debug!("rdbstat v{}", rdbstat::VERSION);

    let decoder_config = DecoderConfig::builder()
        .channel_capacity(args.queue)
        .verify_checksum(!args.no_checksum)
        .build();
    let counter_config = CounterConfig::builder()
        .prefix_delimiter(args.delimiter as u8)
        .largest_entries_capacity(args.top.max(1))
        .build();

    let mut failures = 0;
    for file in &args.files {
        match analyze(file, decoder_config.clone(), counter_config.clone()) {
            Ok(analysis) => {
                match &analysis.error {
                    Some(e) if e.is_format_error() => {
                        failures += 1;
                        tracing::warn!("{} is corrupt or unsupported, statistics are partial: {}", file, e);
                    }
                    Some(e) => {
                        failures += 1;
                        tracing::warn!("Decoding {} stopped early: {}", file, e);
                    }
                    None => {}
                }
                print_report(file, &analysis, args.top);
            }
            Err(e) => {
                failures += 1;
                tracing::error!("Failed to open {}: {}", file, e);
            }
        }
    }

    if failures > 0 {
        std::process::exit(1);
    }
}

fn print_report(file: &str, analysis: &Analysis, top: usize) {
    let counter = &analysis.counter;

    println!("== {}", file);
    if let Some(summary) = &analysis.summary {
        println!("rdb version:      {}", summary.rdb_version);
        println!("created:          {}", summary.creation_time);
        println!("estimated memory: {}", summary.estimated_memory);
        println!("  keys:           {}", summary.entry_memory);
        println!("  dictionaries:   {}", summary.database_overhead);
        println!("checksum:         {:?}", summary.checksum);
    }
    if let Some(e) = &analysis.error {
        println!("error:            {}", e);
    }
    println!("entries:          {}", counter.total_entries());

    println!();
    println!("{:<10} {:>12} {:>16}", "type", "count", "bytes");
    for data_type in DataType::ALL {
        let count = counter.type_counts().get(&data_type).copied().unwrap_or(0);
        if count == 0 {
            continue;
        }
        let bytes = counter.type_bytes().get(&data_type).copied().unwrap_or(0);
        println!("{:<10} {:>12} {:>16}", data_type, count, bytes);
    }

    println!();
    println!("largest keys:");
    for entry in counter.largest_entries(top) {
        println!(
            "  {:>12}  {:<9} {:<10} {}",
            entry.bytes,
            entry.data_type,
            entry.encoding,
            entry.key_lossy()
        );
    }

    println!();
    println!("largest prefixes:");
    let mut prefixes = counter.largest_prefixes();
    prefixes.sort_by(|a, b| b.total_bytes.cmp(&a.total_bytes));
    for prefix in prefixes.into_iter().take(top) {
        println!(
            "  {:>12}  {:<9} {:>8} keys  {}",
            prefix.total_bytes,
            prefix.data_type,
            prefix.count,
            prefix.prefix_lossy()
        );
    }
    if counter.prefixes_pruned() {
        println!("  (prefix totals approximate: tracking limit reached)");
    }

    println!();
    println!("length buckets:");
    for bucket in counter.length_buckets() {
        println!(
            "  {:<9} {:<16} {:>10} {:>16}",
            bucket.data_type, bucket.label, bucket.count, bucket.total_bytes
        );
    }
    println!();
}
