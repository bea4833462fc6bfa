use std::{cmp::Ordering, collections::BinaryHeap};

use crate::job::SchedulableJob;

/// A min-heap over `K` that breaks ties by insertion order.
pub(super) struct StableHeap<K> {
    heap: BinaryHeap<Entry<K>>,
    counter: u64,
}

impl<K: Ord> Default for StableHeap<K> {
    fn default() -> Self {
        Self {
            heap: BinaryHeap::new(),
            counter: 0,
        }
    }
}

impl<K: Ord> StableHeap<K> {
    pub(super) fn push(&mut self, key: K, job: SchedulableJob) {
        self.heap.push(Entry {
            key,
            sequence: self.counter,
            job,
        });
        self.counter += 1;
    }

    pub(super) fn pop(&mut self) -> Option<SchedulableJob> {
        self.heap.pop().map(|entry| entry.job)
    }

    pub(super) fn peek(&self) -> Option<&SchedulableJob> {
        self.heap.peek().map(|entry| &entry.job)
    }

    pub(super) fn len(&self) -> usize {
        self.heap.len()
    }
}

struct Entry<K> {
    key: K,
    sequence: u64,
    job: SchedulableJob,
}

impl<K: Ord> Ord for Entry<K> {
    // Reversed so that `BinaryHeap` (a max-heap) pops the smallest key first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .key
            .cmp(&self.key)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl<K: Ord> PartialOrd for Entry<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: Ord> PartialEq for Entry<K> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<K: Ord> Eq for Entry<K> {}
