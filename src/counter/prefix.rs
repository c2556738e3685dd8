//! Key prefix aggregation
//!
//! Keys are grouped per type by the bytes before the first delimiter (the
//! whole key when there is none). Totals are exact while the number of
//! distinct groups stays under the tracking limit; past it, every type is
//! cut down to the groups it would report and the table is flagged as
//! pruned.
//!
//! ## Reporting
//! ```text
//! per type, descending by total_bytes:
//!   rank < capacity                 reported
//!   total_bytes >= exemption_bytes  reported regardless of rank
//!   otherwise                       dropped
//! ```

use std::collections::HashMap;

use bytes::Bytes;
use serde::Serialize;

use crate::config::CounterConfig;
use crate::entry::{DataType, Entry};

use super::Totals;

/// Totals for one (type, prefix) group
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrefixAggregate {
    pub data_type: DataType,
    #[serde(serialize_with = "serialize_lossy")]
    pub prefix: Bytes,
    pub count: u64,
    pub total_bytes: u64,
}

impl PrefixAggregate {
    /// Prefix as lossy UTF-8
    pub fn prefix_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.prefix)
    }
}

fn serialize_lossy<S: serde::Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(bytes))
}

/// Bytes before the first `delimiter`, or the whole key
pub(crate) fn key_prefix(key: &[u8], delimiter: u8) -> &[u8] {
    match key.iter().position(|&b| b == delimiter) {
        Some(idx) => &key[..idx],
        None => key,
    }
}

pub(crate) struct PrefixTable {
    delimiter: u8,
    capacity: usize,
    exemption_bytes: u64,
    tracking_limit: usize,
    groups: HashMap<DataType, HashMap<Bytes, Totals>>,
    tracked: usize,
    pruned: bool,
}

impl PrefixTable {
    pub(crate) fn new(config: &CounterConfig) -> Self {
        Self {
            delimiter: config.prefix_delimiter,
            capacity: config.prefix_capacity,
            exemption_bytes: config.prefix_exemption_bytes,
            tracking_limit: config.prefix_tracking_limit.max(1),
            groups: HashMap::new(),
            tracked: 0,
            pruned: false,
        }
    }

    pub(crate) fn record(&mut self, entry: &Entry) {
        let prefix = key_prefix(&entry.key, self.delimiter);
        let groups = self.groups.entry(entry.data_type).or_default();
        match groups.get_mut(prefix) {
            Some(totals) => totals.add(entry.bytes),
            None => {
                let mut totals = Totals::default();
                totals.add(entry.bytes);
                groups.insert(Bytes::copy_from_slice(prefix), totals);
                self.tracked += 1;
                if self.tracked > self.tracking_limit {
                    self.prune();
                }
            }
        }
    }

    /// Drop every group that would not be reported
    fn prune(&mut self) {
        let before = self.tracked;
        let mut tracked = 0;
        for (data_type, groups) in self.groups.iter_mut() {
            let keep: HashMap<Bytes, Totals> = retained(groups, self.capacity, self.exemption_bytes)
                .into_iter()
                .map(|(prefix, totals)| (prefix.clone(), *totals))
                .collect();
            tracing::trace!("Pruned {} prefixes to {}", data_type, keep.len());
            tracked += keep.len();
            *groups = keep;
        }
        self.tracked = tracked;
        if !self.pruned {
            tracing::warn!(
                "Prefix tracking limit {} reached; pruned {} groups to {}, totals are now approximate",
                self.tracking_limit,
                before,
                tracked
            );
        }
        self.pruned = true;
    }

    pub(crate) fn report_for(&self, data_type: DataType) -> Vec<PrefixAggregate> {
        let Some(groups) = self.groups.get(&data_type) else {
            return Vec::new();
        };
        retained(groups, self.capacity, self.exemption_bytes)
            .into_iter()
            .map(|(prefix, totals)| PrefixAggregate {
                data_type,
                prefix: prefix.clone(),
                count: totals.count,
                total_bytes: totals.bytes,
            })
            .collect()
    }

    pub(crate) fn report(&self) -> Vec<PrefixAggregate> {
        DataType::ALL
            .iter()
            .flat_map(|&data_type| self.report_for(data_type))
            .collect()
    }

    pub(crate) fn tracked(&self) -> usize {
        self.tracked
    }

    pub(crate) fn pruned(&self) -> bool {
        self.pruned
    }
}

/// Groups of one type that survive the capacity rule, largest first
/// (ties by prefix, for a stable order)
fn retained(
    groups: &HashMap<Bytes, Totals>,
    capacity: usize,
    exemption_bytes: u64,
) -> Vec<(&Bytes, &Totals)> {
    let mut sorted: Vec<(&Bytes, &Totals)> = groups.iter().collect();
    sorted.sort_by(|a, b| b.1.bytes.cmp(&a.1.bytes).then_with(|| a.0.cmp(b.0)));
    sorted
        .into_iter()
        .enumerate()
        .filter(|(rank, (_, totals))| *rank < capacity || totals.bytes >= exemption_bytes)
        .map(|(_, group)| group)
        .collect()
}
