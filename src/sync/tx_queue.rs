//! Bounded per-connection transmit queue with blocking and non-blocking
//! push, backing the *Back-pressure* property of spec §8: a `publish`
//! with `retry=false` against a full queue fails `TxQueueFull` without
//! enqueuing; with `retry=true` it blocks until space frees up or the
//! queue is closed (the connection died).
//!
//! Grounded on the two-phase wait/acquire shape of this codebase's
//! `Semaphore`, but blocking rather than future-based: the TCP transport
//! drives its writer side from a dedicated OS thread, not an async
//! runtime, so there is no executor to yield back to.

use crate::error::{Error, ErrorKind};
use crate::observability::Gauge;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

struct State<T> {
    items: VecDeque<T>,
    capacity: usize,
    closed: bool,
}

/// A bounded FIFO queue of outbound messages.
pub struct TxQueue<T> {
    state: Mutex<State<T>>,
    not_full: Condvar,
    not_empty: Condvar,
    depth: Gauge,
}

impl<T> TxQueue<T> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State {
                items: VecDeque::new(),
                capacity,
                closed: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            depth: Gauge::new(),
        }
    }

    /// Current and peak queue depth, for the per-connection metrics snapshot.
    #[must_use]
    pub fn depth(&self) -> i64 {
        self.depth.value()
    }

    #[must_use]
    pub fn peak_depth(&self) -> i64 {
        self.depth.peak()
    }

    /// Changes the queue's capacity. Does not evict already-queued items
    /// if the new capacity is smaller than the current depth.
    pub fn set_capacity(&self, capacity: usize) {
        self.state.lock().expect("tx_queue lock poisoned").capacity = capacity;
        self.not_full.notify_all();
    }

    /// Pushes without waiting. Fails `TxQueueFull` if the queue is at
    /// capacity, or `OperationNotRunning` if the connection has died.
    pub fn try_push(&self, item: T) -> Result<(), Error> {
        let mut state = self.state.lock().expect("tx_queue lock poisoned");
        if state.closed {
            return Err(Error::new(ErrorKind::OperationNotRunning));
        }
        if state.items.len() >= state.capacity {
            return Err(Error::new(ErrorKind::TxQueueFull));
        }
        state.items.push_back(item);
        self.depth.set(state.items.len() as i64);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Pushes, blocking the calling thread until space is available.
    /// Fails `OperationNotRunning` if the queue closes while waiting.
    pub fn push_blocking(&self, item: T) -> Result<(), Error> {
        let mut state = self.state.lock().expect("tx_queue lock poisoned");
        loop {
            if state.closed {
                return Err(Error::new(ErrorKind::OperationNotRunning));
            }
            if state.items.len() < state.capacity {
                state.items.push_back(item);
                self.depth.set(state.items.len() as i64);
                self.not_empty.notify_one();
                return Ok(());
            }
            state = self
                .not_full
                .wait(state)
                .expect("tx_queue lock poisoned");
        }
    }

    /// Pops the next item, blocking until one is available or the queue closes.
    pub fn pop_blocking(&self) -> Option<T> {
        let mut state = self.state.lock().expect("tx_queue lock poisoned");
        loop {
            if let Some(item) = state.items.pop_front() {
                self.depth.set(state.items.len() as i64);
                self.not_full.notify_one();
                return Some(item);
            }
            if state.closed {
                return None;
            }
            state = self
                .not_empty
                .wait(state)
                .expect("tx_queue lock poisoned");
        }
    }

    /// Closes the queue, waking every blocked pusher and popper.
    pub fn close(&self) {
        let mut state = self.state.lock().expect("tx_queue lock poisoned");
        state.closed = true;
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().expect("tx_queue lock poisoned").closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn try_push_fails_when_full() {
        let q = TxQueue::new(1);
        q.try_push(1).unwrap();
        let err = q.try_push(2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TxQueueFull);
    }

    #[test]
    fn try_push_fails_after_close() {
        let q: TxQueue<i32> = TxQueue::new(4);
        q.close();
        let err = q.try_push(1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OperationNotRunning);
    }

    #[test]
    fn pop_blocking_returns_none_after_close_when_empty() {
        let q: TxQueue<i32> = TxQueue::new(4);
        q.close();
        assert_eq!(q.pop_blocking(), None);
    }

    #[test]
    fn push_blocking_unblocks_on_pop() {
        let q = Arc::new(TxQueue::new(1));
        q.try_push(1).unwrap();

        let q2 = Arc::clone(&q);
        let handle = thread::spawn(move || q2.push_blocking(2));

        // Give the blocked pusher a moment to register as waiting, then
        // free a slot.
        thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(q.pop_blocking(), Some(1));
        handle.join().unwrap().unwrap();
        assert_eq!(q.pop_blocking(), Some(2));
    }

    #[test]
    fn depth_tracks_peak() {
        let q = TxQueue::new(4);
        q.try_push(1).unwrap();
        q.try_push(2).unwrap();
        assert_eq!(q.depth(), 2);
        assert_eq!(q.peak_depth(), 2);
        q.pop_blocking();
        assert_eq!(q.depth(), 1);
        assert_eq!(q.peak_depth(), 2);
    }
}
