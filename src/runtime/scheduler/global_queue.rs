//! Global injection queue.
//!
//! Entry point for work that has no preferred worker thread: newly
//! posted jobs, and jobs woken up from outside the worker pool (a
//! completed TCP read, a fired timer).

use crossbeam_queue::SegQueue;

use super::Job;

/// A thread-safe unbounded queue of scheduler jobs.
#[derive(Default)]
pub struct GlobalQueue {
    inner: SegQueue<Job>,
}

impl GlobalQueue {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: SegQueue::new(),
        }
    }

    pub fn push(&self, job: Job) {
        self.inner.push(job);
    }

    pub fn pop(&self) -> Option<Job> {
        self.inner.pop()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
