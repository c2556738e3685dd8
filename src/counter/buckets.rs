//! Length histogram per type
//!
//! `Entry::length` (STRLEN or element count) is placed into fixed buckets
//! whose inclusive upper bounds come from the config:
//! ```text
//! bounds [100, 1000]  =>  0-100 | 101-1000 | >1000
//! ```

use std::collections::HashMap;

use serde::Serialize;

use crate::entry::{DataType, Entry};

use super::Totals;

/// One (type, length range) bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LengthBucket {
    pub data_type: DataType,
    /// Range label such as `101-1000` or `>1000000`
    pub label: String,
    /// Smallest length in the bucket
    pub min_length: u64,
    /// Largest length in the bucket, `None` for the open-ended last one
    pub max_length: Option<u64>,
    pub count: u64,
    pub total_bytes: u64,
}

pub(crate) struct LengthBuckets {
    bounds: Vec<u64>,
    totals: HashMap<DataType, Vec<Totals>>,
}

impl LengthBuckets {
    /// `bounds` must be sorted ascending without duplicates
    pub(crate) fn new(bounds: Vec<u64>) -> Self {
        Self {
            bounds,
            totals: HashMap::new(),
        }
    }

    fn index(&self, length: u64) -> usize {
        self.bounds.partition_point(|&bound| bound < length)
    }

    pub(crate) fn record(&mut self, entry: &Entry) {
        let index = self.index(entry.length);
        let slots = self.bounds.len() + 1;
        let totals = self
            .totals
            .entry(entry.data_type)
            .or_insert_with(|| vec![Totals::default(); slots]);
        totals[index].add(entry.bytes);
    }

    fn range(&self, index: usize) -> (u64, Option<u64>, String) {
        let min = match index {
            0 => 0,
            i => self.bounds[i - 1] + 1,
        };
        let max = self.bounds.get(index).copied();
        let label = match (max, self.bounds.last()) {
            (Some(max), _) => format!("{}-{}", min, max),
            (None, Some(last)) => format!(">{}", last),
            (None, None) => "all".to_string(),
        };
        (min, max, label)
    }

    /// Non-empty buckets, by type then ascending range
    pub(crate) fn report(&self) -> Vec<LengthBucket> {
        let mut out = Vec::new();
        for data_type in DataType::ALL {
            let Some(totals) = self.totals.get(&data_type) else {
                continue;
            };
            for (index, totals) in totals.iter().enumerate() {
                if totals.count == 0 {
                    continue;
                }
                let (min_length, max_length, label) = self.range(index);
                out.push(LengthBucket {
                    data_type,
                    label,
                    min_length,
                    max_length,
                    count: totals.count,
                    total_bytes: totals.bytes,
                });
            }
        }
        out
    }
}
