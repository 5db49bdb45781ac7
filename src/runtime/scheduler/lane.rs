//! Per-terminal serialization lane.
//!
//! Handlers registered on the same terminal must never run concurrently
//! with each other, but handlers on different terminals may run on
//! different worker threads at the same time. A `Lane` is the mechanism:
//! jobs posted to it run one at a time, in FIFO order, while the
//! scheduler as a whole keeps stealing and running jobs from every other
//! lane in parallel.

use super::Job;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Default)]
pub struct Lane {
    queue: Mutex<VecDeque<Job>>,
    busy: AtomicBool,
}

impl Lane {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues `job`. Returns `true` if the caller is responsible for
    /// kicking off execution (the lane was idle).
    pub fn enqueue(&self, job: Job) -> bool {
        let mut queue = self.queue.lock();
        queue.push_back(job);
        !self.busy.swap(true, Ordering::AcqRel)
    }

    /// Pops the next job, or marks the lane idle if none remain.
    pub fn advance(&self) -> Option<Job> {
        let mut queue = self.queue.lock();
        match queue.pop_front() {
            Some(job) => Some(job),
            None => {
                self.busy.store(false, Ordering::Release);
                None
            }
        }
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn first_enqueue_claims_ownership() {
        let lane = Lane::new();
        assert!(lane.enqueue(Box::new(|| {})));
        assert!(!lane.enqueue(Box::new(|| {})));
    }

    #[test]
    fn advance_drains_in_fifo_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let lane = Lane::new();
        for i in 0..3 {
            let order = Arc::clone(&order);
            lane.enqueue(Box::new(move || order.lock().push(i)));
        }
        while let Some(job) = lane.advance() {
            job();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2]);
        assert!(!lane.is_busy());
    }

    #[test]
    fn empty_advance_clears_busy() {
        let lane = Lane::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let c2 = Arc::clone(&counter);
        lane.enqueue(Box::new(move || {
            c2.fetch_add(1, Ordering::Relaxed);
        }));
        let job = lane.advance().unwrap();
        job();
        assert!(lane.advance().is_none());
        assert!(!lane.is_busy());
        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }
}
