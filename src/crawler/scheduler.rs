//! Scheduler for managing the crawl frontier
//!
//! This module handles:
//! - Priority queue management for WorkItems
//! - FIFO order among WorkItems of equal priority
//! - Global concurrency limiting via a semaphore

use crate::model::{Priority, WorkItem};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// A WorkItem waiting in the frontier
#[derive(Debug, Clone)]
struct QueuedItem {
    priority: Priority,

    /// Insertion sequence number, breaks priority ties
    seq: u64,

    item: WorkItem,
}

// Higher priority first, then lower sequence number (earlier insertion)
impl Ord for QueuedItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueuedItem {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedItem {}

/// A dequeued WorkItem together with its concurrency permit
pub struct ScheduledFetch {
    pub item: WorkItem,

    /// Sequence number the item was queued under
    pub seq: u64,

    /// Held for as long as the fetch is outstanding
    pub permit: OwnedSemaphorePermit,
}

/// Scheduler manages the frontier queue and the concurrency limit
pub struct Scheduler {
    /// Global semaphore for limiting concurrent fetches
    semaphore: Arc<Semaphore>,

    /// Frontier priority queue (higher priorities are dequeued first)
    frontier: BinaryHeap<QueuedItem>,

    next_seq: u64,
}

impl Scheduler {
    /// Creates a new scheduler
    ///
    /// # Arguments
    ///
    /// * `max_concurrent` - Maximum number of outstanding fetches
    /// * `initial_frontier` - WorkItems to start with, in FIFO order
    pub fn new(max_concurrent: usize, initial_frontier: Vec<WorkItem>) -> Self {
        let mut scheduler = Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            frontier: BinaryHeap::with_capacity(initial_frontier.len()),
            next_seq: 0,
        };
        for item in initial_frontier {
            scheduler.push(item);
        }
        scheduler
    }

    /// Adds a WorkItem to the frontier
    pub fn push(&mut self, item: WorkItem) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.frontier.push(QueuedItem {
            priority: item.priority,
            seq,
            item,
        });
    }

    /// Dequeues the next WorkItem if a concurrency permit is free
    ///
    /// # Returns
    ///
    /// * `Some(ScheduledFetch)` - The highest-priority item and its permit
    /// * `None` - The frontier is empty or every permit is taken
    pub fn try_next(&mut self) -> Option<ScheduledFetch> {
        if self.frontier.is_empty() {
            return None;
        }
        let permit = Arc::clone(&self.semaphore).try_acquire_owned().ok()?;
        let queued = self.frontier.pop()?;

        tracing::trace!(
            stage = %queued.item.stage,
            priority = %queued.priority,
            target = %queued.item.target,
            "Dequeued work item"
        );

        Some(ScheduledFetch {
            item: queued.item,
            seq: queued.seq,
            permit,
        })
    }

    /// Returns the number of WorkItems in the frontier
    pub fn len(&self) -> usize {
        self.frontier.len()
    }

    /// Returns whether the frontier is empty
    pub fn is_empty(&self) -> bool {
        self.frontier.is_empty()
    }

    /// Number of fetches that may still start right now
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Frontier contents in dequeue order (for checkpointing)
    ///
    /// Re-queuing the snapshot in this order into a new scheduler reproduces
    /// the same dequeue order.
    pub fn snapshot(&self) -> Vec<WorkItem> {
        let mut queued: Vec<&QueuedItem> = self.frontier.iter().collect();
        queued.sort_by(|a, b| b.cmp(a));
        queued.into_iter().map(|q| q.item.clone()).collect()
    }
}
