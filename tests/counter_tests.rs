//! Tests for Counter
//!
//! These tests verify:
//! - Exact per-type counts and byte totals
//! - Largest-entry ordering, ties and prefix stability
//! - Prefix grouping and the capacity/exemption rule
//! - Length bucket assignment

use bytes::Bytes;
use rdbstat::{Counter, CounterConfig, DataType, Encoding, Entry};

// =============================================================================
// Helper Functions
// =============================================================================

fn entry(key: &str, data_type: DataType, bytes: u64) -> Entry {
    Entry {
        key: Bytes::copy_from_slice(key.as_bytes()),
        data_type,
        encoding: Encoding::Raw,
        bytes,
        length: 1,
        expire_at: None,
    }
}

fn with_length(mut e: Entry, length: u64) -> Entry {
    e.length = length;
    e
}

/// Deterministic pseudo-random sizes
fn sample_entries(n: u64) -> Vec<Entry> {
    let types = DataType::ALL;
    (0..n)
        .map(|i| {
            let bytes = (i.wrapping_mul(2_654_435_761) % 997) + 1;
            let data_type = types[(i % types.len() as u64) as usize];
            entry(&format!("group{}:{}", i % 13, i), data_type, bytes)
        })
        .collect()
}

fn keys(entries: &[Entry]) -> Vec<String> {
    entries.iter().map(|e| e.key_lossy().into_owned()).collect()
}

// =============================================================================
// Type Totals Tests
// =============================================================================

#[test]
fn test_type_totals_sum_to_input() {
    let entries = sample_entries(1000);
    let expected_bytes: u64 = entries.iter().map(|e| e.bytes).sum();

    let mut counter = Counter::default();
    let consumed = counter.consume(entries);

    assert_eq!(consumed, 1000);
    assert_eq!(counter.type_counts().values().sum::<u64>(), 1000);
    assert_eq!(counter.type_bytes().values().sum::<u64>(), expected_bytes);
    assert_eq!(counter.total_entries(), 1000);
    assert_eq!(counter.total_bytes(), expected_bytes);
}

#[test]
fn test_unseen_types_absent() {
    let mut counter = Counter::default();
    counter.consume(vec![entry("a", DataType::Set, 5)]);
    assert_eq!(counter.type_counts().get(&DataType::Set), Some(&1));
    assert_eq!(counter.type_counts().get(&DataType::Hash), None);
}

#[test]
fn test_empty_input() {
    let mut counter = Counter::default();
    assert_eq!(counter.consume(Vec::new()), 0);
    assert!(counter.largest_entries(10).is_empty());
    assert!(counter.largest_prefixes().is_empty());
    assert!(counter.length_buckets().is_empty());
}

// =============================================================================
// Largest Entries Tests
// =============================================================================

#[test]
fn test_largest_entries_sorted_and_bounded() {
    let entries = sample_entries(2000);
    let max = entries.iter().map(|e| e.bytes).max().unwrap();

    let mut counter = Counter::default();
    counter.consume(entries);

    let top = counter.largest_entries(25);
    assert_eq!(top.len(), 25);
    assert_eq!(top[0].bytes, max);
    assert!(top.windows(2).all(|w| w[0].bytes >= w[1].bytes));
}

#[test]
fn test_largest_entries_length_is_min_of_n_and_total() {
    let mut counter = Counter::default();
    counter.consume(sample_entries(7));
    assert_eq!(counter.largest_entries(100).len(), 7);
    assert_eq!(counter.largest_entries(3).len(), 3);
    assert!(counter.largest_entries(0).is_empty());
}

#[test]
fn test_largest_entries_prefix_property() {
    let mut counter = Counter::default();
    counter.consume(sample_entries(3000));

    let small = counter.largest_entries(10);
    let large = counter.largest_entries(50);
    assert_eq!(&large[..10], &small[..]);
}

#[test]
fn test_largest_entries_ties_first_seen_wins() {
    let config = CounterConfig::builder().largest_entries_capacity(2).build();
    let mut counter = Counter::new(config);
    counter.consume(vec![
        entry("a", DataType::String, 10),
        entry("b", DataType::String, 10),
        entry("c", DataType::String, 10),
        entry("d", DataType::String, 5),
    ]);
    assert_eq!(keys(&counter.largest_entries(2)), vec!["a", "b"]);
}

#[test]
fn test_strictly_larger_replaces_minimum() {
    let config = CounterConfig::builder().largest_entries_capacity(2).build();
    let mut counter = Counter::new(config);
    counter.consume(vec![
        entry("a", DataType::String, 10),
        entry("b", DataType::String, 20),
        entry("c", DataType::String, 11),
    ]);
    assert_eq!(keys(&counter.largest_entries(2)), vec!["b", "c"]);
}

// =============================================================================
// Prefix Tests
// =============================================================================

#[test]
fn test_prefix_grouping() {
    let mut counter = Counter::default();
    counter.consume(vec![
        entry("user:1", DataType::Hash, 100),
        entry("user:2", DataType::Hash, 150),
        entry("order:1", DataType::Hash, 80),
    ]);

    let prefixes = counter.largest_prefixes();
    let user = prefixes.iter().find(|p| p.prefix_lossy() == "user").unwrap();
    let order = prefixes.iter().find(|p| p.prefix_lossy() == "order").unwrap();
    assert_eq!((user.count, user.total_bytes), (2, 250));
    assert_eq!((order.count, order.total_bytes), (1, 80));
    assert_eq!(prefixes[0].prefix_lossy(), "user");
}

#[test]
fn test_key_without_delimiter_is_own_prefix() {
    let mut counter = Counter::default();
    counter.consume(vec![entry("standalone", DataType::String, 9)]);
    let prefixes = counter.largest_prefixes();
    assert_eq!(prefixes.len(), 1);
    assert_eq!(prefixes[0].prefix_lossy(), "standalone");
}

#[test]
fn test_custom_delimiter() {
    let config = CounterConfig::builder().prefix_delimiter(b'/').build();
    let mut counter = Counter::new(config);
    counter.consume(vec![
        entry("a/b:c", DataType::String, 1),
        entry("a/d", DataType::String, 1),
    ]);
    let prefixes = counter.largest_prefixes();
    assert_eq!(prefixes.len(), 1);
    assert_eq!(prefixes[0].prefix_lossy(), "a");
    assert_eq!(prefixes[0].count, 2);
}

#[test]
fn test_prefix_counts_are_exact() {
    let entries = sample_entries(5000);
    let mut counter = Counter::default();
    counter.consume(entries.clone());

    for aggregate in counter.largest_prefixes() {
        let matching: Vec<&Entry> = entries
            .iter()
            .filter(|e| {
                e.data_type == aggregate.data_type
                    && e.key.split(|&b| b == b':').next() == Some(&aggregate.prefix[..])
            })
            .collect();
        assert_eq!(aggregate.count, matching.len() as u64);
        assert_eq!(aggregate.total_bytes, matching.iter().map(|e| e.bytes).sum::<u64>());
    }
    assert!(!counter.prefixes_pruned());
}

#[test]
fn test_prefix_capacity_and_exemption() {
    let config = CounterConfig::builder()
        .prefix_capacity(2)
        .prefix_exemption_bytes(1_000_000)
        .build();
    let mut counter = Counter::new(config);
    counter.consume(vec![
        entry("a:1", DataType::String, 500),
        entry("b:1", DataType::String, 400),
        entry("c:1", DataType::String, 300),
        entry("huge:1", DataType::String, 600_000),
        entry("huge:2", DataType::String, 600_000),
        entry("d:1", DataType::Hash, 1),
    ]);

    let strings = counter.largest_prefixes_for(DataType::String);
    let names: Vec<_> = strings.iter().map(|p| p.prefix_lossy().into_owned()).collect();
    // huge and a fill the capacity; b and c are under the exemption
    assert_eq!(names, vec!["huge", "a"]);

    let config = CounterConfig::builder()
        .prefix_capacity(1)
        .prefix_exemption_bytes(400)
        .build();
    let mut counter = Counter::new(config);
    counter.consume(vec![
        entry("a:1", DataType::String, 500),
        entry("b:1", DataType::String, 400),
        entry("c:1", DataType::String, 300),
    ]);
    let names: Vec<_> = counter
        .largest_prefixes_for(DataType::String)
        .iter()
        .map(|p| p.prefix_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["a", "b"]);
}

#[test]
fn test_prefixes_grouped_per_type_descending() {
    let mut counter = Counter::default();
    counter.consume(sample_entries(500));
    let prefixes = counter.largest_prefixes();

    for data_type in DataType::ALL {
        let run: Vec<u64> = prefixes
            .iter()
            .filter(|p| p.data_type == data_type)
            .map(|p| p.total_bytes)
            .collect();
        assert!(run.windows(2).all(|w| w[0] >= w[1]));
    }
}

#[test]
fn test_tracking_limit_prunes() {
    let config = CounterConfig::builder()
        .prefix_capacity(3)
        .prefix_tracking_limit(10)
        .build();
    let mut counter = Counter::new(config);
    let entries: Vec<Entry> = (0..100)
        .map(|i| entry(&format!("p{}:x", i), DataType::String, i + 1))
        .collect();
    counter.consume(entries);

    assert!(counter.prefixes_pruned());
    assert!(counter.largest_prefixes().len() <= 3);
    // type totals are unaffected by pruning
    assert_eq!(counter.total_entries(), 100);
}

// =============================================================================
// Length Bucket Tests
// =============================================================================

#[test]
fn test_length_buckets_default_bounds() {
    let mut counter = Counter::default();
    counter.consume(vec![
        with_length(entry("a", DataType::List, 10), 5),
        with_length(entry("b", DataType::List, 20), 100),
        with_length(entry("c", DataType::List, 40), 5000),
        with_length(entry("d", DataType::List, 80), 2_000_000),
        with_length(entry("e", DataType::String, 7), 3),
    ]);

    let buckets = counter.length_buckets();
    let lists: Vec<(String, u64, u64)> = buckets
        .iter()
        .filter(|b| b.data_type == DataType::List)
        .map(|b| (b.label.clone(), b.count, b.total_bytes))
        .collect();
    assert_eq!(
        lists,
        vec![
            ("0-100".to_string(), 2, 30),
            ("1001-10000".to_string(), 1, 40),
            (">1000000".to_string(), 1, 80),
        ]
    );

    let total: u64 = buckets.iter().map(|b| b.count).sum();
    assert_eq!(total, 5);
}

#[test]
fn test_custom_bucket_bounds_are_sorted() {
    let config = CounterConfig::builder().length_bucket_bounds(vec![50, 10, 50]).build();
    assert_eq!(config.length_bucket_bounds, vec![10, 50]);

    let mut counter = Counter::new(config);
    counter.consume(vec![with_length(entry("a", DataType::Set, 1), 20)]);
    assert_eq!(counter.length_buckets()[0].label, "11-50");
}
