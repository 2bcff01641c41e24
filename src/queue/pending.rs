//! Pending

use crate::task::Priority;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use tokio::time::Instant;
use tracing::debug;

/// Heap entry ordering pending task ids
#[derive(Debug, Clone)]
struct PendingEntry {
    task_id: String,
    priority: Priority,
    /// Sequence number for FIFO ordering within same priority
    sequence: u64,
    /// Not eligible before this instant (retry backoff)
    ready_at: Option<Instant>,
}

impl PendingEntry {
    fn is_ready(&self, now: Instant) -> bool {
        self.ready_at.map_or(true, |at| at <= now)
    }
}

impl PartialEq for PendingEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl Eq for PendingEntry {}

impl PartialOrd for PendingEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first, then lower sequence (BinaryHeap is a max-heap)
        match self.priority.cmp(&other.priority) {
            Ordering::Equal => other.sequence.cmp(&self.sequence),
            other => other,
        }
    }
}

/// Admission order of pending tasks: priority desc, then submission asc
#[derive(Debug, Default)]
pub(crate) struct PendingQueue {
    heap: BinaryHeap<PendingEntry>,
    sequence_counter: u64,
}

impl PendingQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Enqueue a task id, optionally held back until `ready_at`
    pub(crate) fn push(&mut self, task_id: String, priority: Priority, ready_at: Option<Instant>) {
        let sequence = self.sequence_counter;
        self.sequence_counter += 1;

        debug!(
            "Task {} queued with priority {:?} (sequence: {})",
            task_id, priority, sequence
        );
        self.heap.push(PendingEntry {
            task_id,
            priority,
            sequence,
            ready_at,
        });
    }

    /// Remove and return the best entry that is eligible at `now`
    pub(crate) fn pop_ready(&mut self, now: Instant) -> Option<String> {
        let mut held_back = Vec::new();
        let mut result = None;

        while let Some(entry) = self.heap.pop() {
            if entry.is_ready(now) {
                result = Some(entry.task_id);
                break;
            }
            held_back.push(entry);
        }

        self.heap.extend(held_back);
        result
    }

    /// Drop a task id from the queue
    pub(crate) fn remove(&mut self, task_id: &str) -> bool {
        let before = self.heap.len();
        self.heap.retain(|entry| entry.task_id != task_id);
        self.heap.len() != before
    }

    /// Earliest instant at which a held-back entry becomes eligible
    pub(crate) fn next_ready_at(&self, now: Instant) -> Option<Instant> {
        self.heap
            .iter()
            .filter_map(|entry| entry.ready_at)
            .filter(|at| *at > now)
            .min()
    }

    /// Task ids in admission order, ignoring backoff
    pub(crate) fn ordered_ids(&self) -> Vec<String> {
        let mut entries: Vec<&PendingEntry> = self.heap.iter().collect();
        entries.sort_by(|a, b| b.cmp(a));
        entries.into_iter().map(|e| e.task_id.clone()).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }
}
