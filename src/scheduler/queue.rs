//! Priority queue of candidate operations.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::ops::OperationKind;
use crate::topology::tuple::Tuple;

/// One queued candidate. Higher priority pops first; equal priorities pop in
/// insertion order.
#[derive(Clone, Copy, Debug)]
pub(crate) struct QueueEntry {
    pub priority: f64,
    pub sequence: u64,
    pub kind: OperationKind,
    pub tuple: Tuple,
    /// Failed footprint claims so far.
    pub attempts: usize,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .total_cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

#[derive(Debug, Default)]
pub(crate) struct CandidateQueue {
    heap: BinaryHeap<QueueEntry>,
    next_sequence: u64,
}

impl CandidateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: OperationKind, tuple: Tuple, priority: f64) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(QueueEntry {
            priority,
            sequence,
            kind,
            tuple,
            attempts: 0,
        });
    }

    pub fn pop(&mut self) -> Option<QueueEntry> {
        self.heap.pop()
    }
}
