//! Per-pixel fragment sorting used by resolve passes.
//!
//! All algorithms order by [`FragmentRecord::total_cmp`], so they only differ in cost.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use crate::oit::record::FragmentRecord;

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SortAlgorithm {
    Insertion,
    #[default]
    Shell,
    Heap,
    PriorityQueue,
}

impl SortAlgorithm {
    pub const ALL: [Self; 4] = [Self::Insertion, Self::Shell, Self::Heap, Self::PriorityQueue];

    pub fn name(self) -> &'static str {
        match self {
            Self::Insertion => "insertion",
            Self::Shell => "shell",
            Self::Heap => "heap",
            Self::PriorityQueue => "priority_queue",
        }
    }
}

/// Sort nearest first.
pub fn sort_records(algorithm: SortAlgorithm, records: &mut [FragmentRecord]) {
    match algorithm {
        SortAlgorithm::Insertion => insertion_sort(records),
        SortAlgorithm::Shell => shell_sort(records),
        SortAlgorithm::Heap => heap_sort(records),
        SortAlgorithm::PriorityQueue => priority_queue_sort(records),
    }
}

fn less(a: &FragmentRecord, b: &FragmentRecord) -> bool {
    a.total_cmp(b) == Ordering::Less
}

fn insertion_sort(v: &mut [FragmentRecord]) {
    for i in 1..v.len() {
        let mut j = i;
        while j > 0 && less(&v[j], &v[j - 1]) {
            v.swap(j, j - 1);
            j -= 1;
        }
    }
}

// Ciura's gap sequence.
const SHELL_GAPS: [usize; 8] = [701, 301, 132, 57, 23, 10, 4, 1];

fn shell_sort(v: &mut [FragmentRecord]) {
    for gap in SHELL_GAPS {
        if gap >= v.len() {
            continue;
        }
        for i in gap..v.len() {
            let tmp = v[i];
            let mut j = i;
            while j >= gap && less(&tmp, &v[j - gap]) {
                v[j] = v[j - gap];
                j -= gap;
            }
            v[j] = tmp;
        }
    }
}

fn heap_sort(v: &mut [FragmentRecord]) {
    let n = v.len();
    for start in (0..n / 2).rev() {
        sift_down(v, start, n);
    }
    for end in (1..n).rev() {
        v.swap(0, end);
        sift_down(v, 0, end);
    }
}

fn sift_down(v: &mut [FragmentRecord], mut root: usize, end: usize) {
    loop {
        let mut child = 2 * root + 1;
        if child >= end {
            return;
        }
        if child + 1 < end && less(&v[child], &v[child + 1]) {
            child += 1;
        }
        if !less(&v[root], &v[child]) {
            return;
        }
        v.swap(root, child);
        root = child;
    }
}

struct ByTotalOrder(FragmentRecord);

impl PartialEq for ByTotalOrder {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == Ordering::Equal
    }
}

impl Eq for ByTotalOrder {}

impl PartialOrd for ByTotalOrder {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ByTotalOrder {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

fn priority_queue_sort(v: &mut [FragmentRecord]) {
    let mut queue: BinaryHeap<Reverse<ByTotalOrder>> =
        v.iter().map(|r| Reverse(ByTotalOrder(*r))).collect();
    for slot in v.iter_mut() {
        match queue.pop() {
            Some(Reverse(ByTotalOrder(r))) => *slot = r,
            None => break,
        }
    }
}

/// Index of the farthest record, the eviction candidate of bounded buffers.
pub(crate) fn farthest_index(records: &[FragmentRecord]) -> Option<usize> {
    records
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
}

#[cfg(test)]
#[path = "../../tests/unit/oit/sort.rs"]
mod tests;
