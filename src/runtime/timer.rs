//! Timer heap for deadline management.
//!
//! A small min-heap of `(deadline, handle)` pairs, generic over whatever
//! the caller uses to identify the thing that should fire. The Timer
//! terminal (spec §4.9) keys this by an [`crate::util::ArenaIndex`]; the
//! Anomaly fabric (spec §4.11) keys it by an anomaly's arena index to
//! schedule its own expiration.

use crate::types::Time;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::hash::Hash;

#[derive(Debug, Clone, Eq, PartialEq)]
struct TimerEntry<K> {
    deadline: Time,
    key: K,
    generation: u64,
}

impl<K: Eq> Ord for TimerEntry<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest deadline first).
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.generation.cmp(&self.generation))
    }
}

impl<K: Eq> PartialOrd for TimerEntry<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A min-heap of timers ordered by deadline, keyed by `K`.
#[derive(Debug)]
pub struct TimerHeap<K> {
    heap: BinaryHeap<TimerEntry<K>>,
    next_generation: u64,
}

impl<K> Default for TimerHeap<K> {
    fn default() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_generation: 0,
        }
    }
}

impl<K: Eq + Hash + Clone> TimerHeap<K> {
    /// Creates a new empty timer heap.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of timers in the heap.
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Returns true if the heap is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Schedules `key` to fire at `deadline`.
    pub fn insert(&mut self, key: K, deadline: Time) {
        let generation = self.next_generation;
        self.next_generation += 1;
        self.heap.push(TimerEntry {
            deadline,
            key,
            generation,
        });
    }

    /// Returns the earliest deadline, if any.
    #[must_use]
    pub fn peek_deadline(&self) -> Option<Time> {
        self.heap.peek().map(|e| e.deadline)
    }

    /// Removes every scheduled timer for `key` without firing it. Used by
    /// `cancel`-style operations (Timer terminal `cancel`, signal-set
    /// `cancel_await_signal`).
    pub fn remove(&mut self, key: &K) {
        if !self.heap.iter().any(|e| &e.key == key) {
            return;
        }
        let remaining: Vec<_> = self
            .heap
            .drain()
            .filter(|e| &e.key != key)
            .collect();
        self.heap = remaining.into_iter().collect();
    }

    /// Pops all keys whose deadline is `<= now`.
    pub fn pop_expired(&mut self, now: Time) -> Vec<K> {
        let mut expired = Vec::new();
        while let Some(entry) = self.heap.peek() {
            if entry.deadline <= now {
                if let Some(entry) = self.heap.pop() {
                    expired.push(entry.key);
                } else {
                    break;
                }
            } else {
                break;
            }
        }
        expired
    }

    /// Clears all timers.
    pub fn clear(&mut self) {
        self.heap.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_heap_has_no_deadline() {
        let heap: TimerHeap<u32> = TimerHeap::new();
        assert!(heap.is_empty());
        assert_eq!(heap.peek_deadline(), None);
    }

    #[test]
    fn insert_orders_by_deadline() {
        let mut heap = TimerHeap::new();
        heap.insert(1u32, Time::from_millis(200));
        heap.insert(2u32, Time::from_millis(100));
        heap.insert(3u32, Time::from_millis(150));

        assert_eq!(heap.peek_deadline(), Some(Time::from_millis(100)));
    }

    #[test]
    fn pop_expired_returns_all_due_keys() {
        let mut heap = TimerHeap::new();
        heap.insert(1u32, Time::from_millis(100));
        heap.insert(2u32, Time::from_millis(200));
        heap.insert(3u32, Time::from_millis(50));

        let expired = heap.pop_expired(Time::from_millis(125));
        assert_eq!(expired.len(), 2);
        assert!(expired.contains(&1));
        assert!(expired.contains(&3));
        assert_eq!(heap.peek_deadline(), Some(Time::from_millis(200)));
    }

    #[test]
    fn remove_drops_pending_timer_without_firing() {
        let mut heap = TimerHeap::new();
        heap.insert(1u32, Time::from_millis(100));
        heap.insert(2u32, Time::from_millis(200));

        heap.remove(&1u32);

        assert_eq!(heap.len(), 1);
        let expired = heap.pop_expired(Time::from_millis(300));
        assert_eq!(expired, vec![2u32]);
    }
}
