//! In-memory pending-task queue ordered by priority score.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use serde::{Deserialize, Serialize};

use crate::core::SchedulerError;
use crate::util::types::{Category, TaskId};

/// Queue entry: the fields ordering depends on plus what admission needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedTask {
    /// Task identifier.
    pub id: TaskId,
    /// Priority score.
    pub priority: u8,
    /// Submission time.
    pub submitted_at_ms: u128,
    /// Submission order.
    pub sequence: u64,
    /// Category.
    pub category: Category,
    /// Estimated cost.
    pub estimated_cost: u64,
}

/// Abstraction for pending-task queue backends.
pub trait TaskQueue: Send {
    /// Enqueue an entry if space permits.
    fn enqueue(&mut self, entry: QueuedTask) -> Result<(), SchedulerError>;
    /// Put back an entry taken by [`dequeue`](Self::dequeue). Never refused
    /// for depth, since the entry already held a place.
    fn requeue(&mut self, entry: QueuedTask);
    /// Pop the highest-priority entry.
    fn dequeue(&mut self) -> Option<QueuedTask>;
    /// Drop an entry by id. Returns whether it was present.
    fn remove(&mut self, id: &TaskId) -> bool;
    /// Entries in dequeue order.
    fn snapshot(&self) -> Vec<QueuedTask>;
    /// Maximum depth allowed for this queue.
    fn max_depth(&self) -> usize;
    /// Current depth.
    fn len(&self) -> usize;
    /// Whether the queue is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Heap wrapper: higher score first, then earlier submission, then lower sequence.
#[derive(Debug, PartialEq, Eq)]
struct Ranked(QueuedTask);

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .priority
            .cmp(&other.0.priority)
            // earlier wins, reversed for the max-heap
            .then_with(|| other.0.submitted_at_ms.cmp(&self.0.submitted_at_ms))
            .then_with(|| other.0.sequence.cmp(&self.0.sequence))
    }
}

/// In-memory queue using a binary heap.
///
/// Removal by id is lazy: removed ids are remembered and skipped on dequeue.
pub struct InMemoryQueue {
    max_depth: usize,
    heap: BinaryHeap<Ranked>,
    removed: HashSet<TaskId>,
}

impl InMemoryQueue {
    /// Create a new in-memory queue with a maximum depth.
    #[must_use]
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth,
            heap: BinaryHeap::with_capacity(max_depth.min(1024)),
            removed: HashSet::new(),
        }
    }

    fn compact(&mut self) {
        if self.removed.is_empty() {
            return;
        }
        let removed = std::mem::take(&mut self.removed);
        self.heap.retain(|r| !removed.contains(&r.0.id));
    }
}

impl TaskQueue for InMemoryQueue {
    fn enqueue(&mut self, entry: QueuedTask) -> Result<(), SchedulerError> {
        if self.len() >= self.max_depth {
            return Err(SchedulerError::QueueFull("max queue depth reached".into()));
        }
        if self.removed.contains(&entry.id) {
            self.compact();
        }
        self.heap.push(Ranked(entry));
        Ok(())
    }

    fn requeue(&mut self, entry: QueuedTask) {
        if self.removed.contains(&entry.id) {
            self.compact();
        }
        self.heap.push(Ranked(entry));
    }

    fn dequeue(&mut self) -> Option<QueuedTask> {
        while let Some(Ranked(entry)) = self.heap.pop() {
            if self.removed.remove(&entry.id) {
                continue;
            }
            return Some(entry);
        }
        None
    }

    fn remove(&mut self, id: &TaskId) -> bool {
        let present = self.heap.iter().any(|r| &r.0.id == id) && !self.removed.contains(id);
        if present {
            self.removed.insert(*id);
            if self.removed.len() > 64 {
                self.compact();
            }
        }
        present
    }

    fn snapshot(&self) -> Vec<QueuedTask> {
        let mut ranked: Vec<&Ranked> = self
            .heap
            .iter()
            .filter(|r| !self.removed.contains(&r.0.id))
            .collect();
        ranked.sort_by(|a, b| b.cmp(a));
        ranked.into_iter().map(|r| r.0.clone()).collect()
    }

    fn max_depth(&self) -> usize {
        self.max_depth
    }

    fn len(&self) -> usize {
        self.heap.len() - self.removed.len()
    }
}
