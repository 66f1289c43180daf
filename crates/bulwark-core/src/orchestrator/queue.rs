//! Bounded per-endpoint priority queue.
//!
//! Ordering is strictly priority first, then FIFO by enqueue sequence within a priority tier.
//! A full queue rejects new entries immediately and hands the item back to the caller.
//! Entries past their deadline are never returned by [`RequestQueue::pop_next`]; they are
//! handed to the caller separately so their completion can be resolved.

use crate::types::Priority;
use serde::Serialize;
use std::{cmp::Ordering, collections::BinaryHeap, sync::Arc, time::Duration};
use tokio::time::Instant;

/// One queued item with its scheduling metadata.
#[derive(Debug)]
pub struct QueueEntry<T> {
    pub priority: Priority,
    pub enqueued_at: Instant,
    pub deadline: Instant,
    pub item: T,
    sequence: u64,
}

impl<T> QueueEntry<T> {
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    #[must_use]
    pub fn waited(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.enqueued_at)
    }
}

impl<T> PartialEq for QueueEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl<T> Eq for QueueEntry<T> {}

impl<T> PartialOrd for QueueEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for QueueEntry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority.cmp(&other.priority).then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Queue state attached to backpressure rejections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueSnapshot {
    pub endpoint: Arc<str>,
    pub depth: usize,
    pub capacity: usize,
    pub oldest_wait_ms: u64,
    pub highest_priority: Option<Priority>,
}

/// Lifetime counters of one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounters {
    pub enqueued: u64,
    pub dispatched: u64,
    pub expired: u64,
    pub rejected: u64,
}

/// Bounded priority queue.
#[derive(Debug)]
pub struct RequestQueue<T> {
    heap: BinaryHeap<QueueEntry<T>>,
    capacity: usize,
    next_sequence: u64,
    counters: QueueCounters,
}

impl<T> RequestQueue<T> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(capacity.min(1024)),
            capacity,
            next_sequence: 0,
            counters: QueueCounters::default(),
        }
    }

    /// Adds an item, returning the new depth.
    ///
    /// # Errors
    ///
    /// Returns the item unchanged when the queue is at capacity.
    pub fn enqueue(
        &mut self,
        priority: Priority,
        deadline: Instant,
        item: T,
    ) -> Result<usize, T> {
        if self.heap.len() >= self.capacity {
            self.counters.rejected += 1;
            return Err(item);
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.counters.enqueued += 1;
        self.heap.push(QueueEntry { priority, enqueued_at: Instant::now(), deadline, item, sequence });
        Ok(self.heap.len())
    }

    /// Pops the highest-priority live entry.
    ///
    /// Expired entries found on the way are moved into `expired` and never returned.
    pub fn pop_next(&mut self, now: Instant, expired: &mut Vec<QueueEntry<T>>) -> Option<QueueEntry<T>> {
        while let Some(entry) = self.heap.pop() {
            if entry.is_expired(now) {
                self.counters.expired += 1;
                expired.push(entry);
                continue;
            }
            self.counters.dispatched += 1;
            return Some(entry);
        }
        None
    }

    /// Returns the entry [`RequestQueue::pop_next`] would return, without removing it.
    ///
    /// Expired entries at the head are moved into `expired`. Callers acquire whatever the
    /// entry needs first and pop only once dispatch is certain, so nothing is ever put back.
    pub fn peek_live(&mut self, now: Instant, expired: &mut Vec<QueueEntry<T>>) -> Option<&QueueEntry<T>> {
        while self.heap.peek().is_some_and(|entry| entry.is_expired(now)) {
            if let Some(entry) = self.heap.pop() {
                self.counters.expired += 1;
                expired.push(entry);
            }
        }
        self.heap.peek()
    }

    /// Removes every expired entry.
    pub fn purge_expired(&mut self, now: Instant) -> Vec<QueueEntry<T>> {
        if !self.heap.iter().any(|entry| entry.is_expired(now)) {
            return Vec::new();
        }
        let (expired, kept): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.heap).into_iter().partition(|entry| entry.is_expired(now));
        self.heap = BinaryHeap::from(kept);
        self.counters.expired += expired.len() as u64;
        expired
    }

    /// Removes every entry regardless of deadline.
    pub fn drain_all(&mut self) -> Vec<QueueEntry<T>> {
        std::mem::take(&mut self.heap).into_vec()
    }

    #[must_use]
    pub fn peek(&self) -> Option<&QueueEntry<T>> {
        self.heap.peek()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.heap.len() >= self.capacity
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn remaining_capacity(&self) -> usize {
        self.capacity.saturating_sub(self.heap.len())
    }

    #[must_use]
    pub fn counters(&self) -> QueueCounters {
        self.counters
    }

    #[must_use]
    pub fn snapshot(&self, endpoint: Arc<str>, now: Instant) -> QueueSnapshot {
        let oldest_wait = self.heap.iter().map(|entry| entry.waited(now)).max().unwrap_or_default();
        QueueSnapshot {
            endpoint,
            depth: self.heap.len(),
            capacity: self.capacity,
            oldest_wait_ms: u64::try_from(oldest_wait.as_millis()).unwrap_or(u64::MAX),
            highest_priority: self.heap.peek().map(|entry| entry.priority),
        }
    }
}
