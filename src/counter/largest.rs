//! Bounded top-N of entries by size
//!
//! A min-heap of fixed capacity: the smallest retained entry sits at the
//! top and is evicted only by a strictly larger newcomer. Equal sizes rank
//! by arrival, earlier first, so ties keep the entry seen first.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use crate::entry::Entry;

/// An entry with its arrival sequence number
#[derive(Debug)]
struct Ranked {
    entry: Entry,
    seq: u64,
}

impl Ranked {
    fn cmp_rank(&self, other: &Self) -> Ordering {
        self.entry
            .bytes
            .cmp(&other.entry.bytes)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp_rank(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_rank(other)
    }
}

pub(crate) struct LargestEntries {
    capacity: usize,
    heap: BinaryHeap<Reverse<Ranked>>,
}

impl LargestEntries {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            heap: BinaryHeap::with_capacity(capacity.min(4096)),
        }
    }

    /// Offer an entry; `seq` must increase with every call
    pub(crate) fn offer(&mut self, entry: &Entry, seq: u64) {
        if self.capacity == 0 {
            return;
        }
        if self.heap.len() < self.capacity {
            self.heap.push(Reverse(Ranked {
                entry: entry.clone(),
                seq,
            }));
            return;
        }
        let replaces_min = match self.heap.peek() {
            Some(Reverse(min)) => entry.bytes > min.entry.bytes,
            None => false,
        };
        if replaces_min {
            self.heap.pop();
            self.heap.push(Reverse(Ranked {
                entry: entry.clone(),
                seq,
            }));
        }
    }

    /// Up to `n` retained entries, largest first
    pub(crate) fn top(&self, n: usize) -> Vec<Entry> {
        let mut ranked: Vec<&Ranked> = self.heap.iter().map(|Reverse(r)| r).collect();
        ranked.sort_by(|a, b| b.cmp_rank(a));
        ranked.into_iter().take(n).map(|r| r.entry.clone()).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }
}
