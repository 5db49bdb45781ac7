//! The handler-dispatching scheduler at the root of every Yogi program.
//!
//! A caller obtains a `Scheduler`, attaches endpoints and terminals to it,
//! and registers `await_*`/`receive_*` handlers; the scheduler fires those
//! handlers on worker threads as the underlying state changes. This is a
//! classic reactor dispatcher, not `async`/`await`: handlers are plain
//! `FnOnce` closures posted to a lane, matching the callback contract
//! spec.md describes (`await_X(handler)`, never `.await`).
//!
//! Work-stealing mirrors this codebase's own scheduler: a global
//! injection queue ([`global_queue`]) feeds newly posted or externally
//! woken work, worker-local deques ([`stealing`]) keep warm locality for
//! chained continuations, and per-terminal [`lane::Lane`]s guarantee the
//! *per-terminal handler serialization; cross-terminal concurrency*
//! invariant from spec §2.

pub mod global_queue;
pub mod lane;
pub mod stealing;

use crossbeam_deque::Worker as DequeWorker;
use global_queue::GlobalQueue;
use lane::Lane;
use parking_lot::Mutex;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar};
use std::thread::JoinHandle;
use std::time::Duration;

/// A unit of scheduler work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Identifies a per-terminal serialization lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LaneId(u64);

thread_local! {
    static LOCAL_QUEUE: RefCell<Option<DequeWorker<Job>>> = const { RefCell::new(None) };
}

struct Shared {
    global: GlobalQueue,
    lanes: Mutex<HashMap<u64, Arc<Lane>>>,
    next_lane: AtomicU64,
    stealers: Mutex<Vec<crossbeam_deque::Stealer<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    generation: AtomicUsize,
    stop_requested: AtomicBool,
    running: AtomicBool,
    wake: Condvar,
    wake_mutex: Mutex<()>,
    running_cv: Condvar,
    running_mutex: Mutex<()>,
}

/// A handle to the scheduler. Cheaply cloneable; every clone shares the
/// same queues and worker pool.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                global: GlobalQueue::new(),
                lanes: Mutex::new(HashMap::new()),
                next_lane: AtomicU64::new(1),
                stealers: Mutex::new(Vec::new()),
                workers: Mutex::new(Vec::new()),
                generation: AtomicUsize::new(0),
                stop_requested: AtomicBool::new(false),
                running: AtomicBool::new(false),
                wake: Condvar::new(),
                wake_mutex: Mutex::new(()),
                running_cv: Condvar::new(),
                running_mutex: Mutex::new(()),
            }),
        }
    }

    /// Allocates a fresh serialization lane (one per terminal).
    #[must_use]
    pub fn new_lane(&self) -> LaneId {
        let id = self.shared.next_lane.fetch_add(1, Ordering::Relaxed);
        self.shared.lanes.lock().insert(id, Arc::new(Lane::new()));
        LaneId(id)
    }

    pub fn drop_lane(&self, lane: LaneId) {
        self.shared.lanes.lock().remove(&lane.0);
    }

    /// Posts a job with no ordering constraint relative to other jobs.
    pub fn post(&self, job: impl FnOnce() + Send + 'static) {
        self.submit_raw(Box::new(job));
    }

    /// Posts a job that must run strictly after every other job
    /// previously posted to the same lane, and never concurrently with
    /// them.
    pub fn post_on_lane(&self, lane: LaneId, job: impl FnOnce() + Send + 'static) {
        let lane_arc = match self.shared.lanes.lock().get(&lane.0).cloned() {
            Some(l) => l,
            None => return, // terminal (and its lane) already destroyed
        };
        if lane_arc.enqueue(Box::new(job)) {
            self.drive_lane(lane_arc);
        }
    }

    fn drive_lane(&self, lane: Arc<Lane>) {
        if let Some(job) = lane.advance() {
            let sched = self.clone();
            let lane2 = Arc::clone(&lane);
            self.submit_raw(Box::new(move || {
                job();
                sched.drive_lane(lane2);
            }));
        }
    }

    fn submit_raw(&self, job: Job) {
        let pushed_local = LOCAL_QUEUE.with(|cell| {
            if let Some(worker) = cell.borrow().as_ref() {
                worker.push(job);
                true
            } else {
                false
            }
        });
        if !pushed_local {
            self.shared.global.push(job);
        }
        let _guard = self.shared.wake_mutex.lock();
        self.shared.wake.notify_all();
    }

    fn try_take_one(&self) -> Option<Job> {
        if let Some(job) = LOCAL_QUEUE.with(|cell| cell.borrow().as_ref().and_then(DequeWorker::pop)) {
            return Some(job);
        }
        if let Some(job) = self.shared.global.pop() {
            return Some(job);
        }
        let stealers = self.shared.stealers.lock();
        stealing::steal_job(&stealers)
    }

    /// Runs at most one pending job on the calling thread, without
    /// blocking. Returns `true` if a job ran.
    pub fn poll_one(&self) -> bool {
        match self.try_take_one() {
            Some(job) => {
                job();
                true
            }
            None => false,
        }
    }

    /// Runs every job currently queued, without blocking for more.
    /// Returns the number of jobs executed.
    pub fn poll(&self) -> usize {
        let mut count = 0;
        while self.poll_one() {
            count += 1;
        }
        count
    }

    /// Blocks the calling thread, running jobs until one executes.
    /// Returns `false` if the scheduler was stopped first.
    pub fn run_one(&self) -> bool {
        loop {
            if self.shared.stop_requested.load(Ordering::Acquire) {
                return false;
            }
            if self.poll_one() {
                return true;
            }
            let mut guard = self.shared.wake_mutex.lock();
            let _ = self
                .shared
                .wake
                .wait_for(&mut guard, Duration::from_millis(20));
        }
    }

    /// Blocks the calling thread, running every job it can take until the
    /// queue drains (`try_take_one` yields `None`) or `timeout` elapses,
    /// whichever comes first.
    pub fn run(&self, timeout: Duration) {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            match self.try_take_one() {
                Some(job) => job(),
                None => return,
            }
            if std::time::Instant::now() >= deadline {
                return;
            }
        }
    }

    /// Starts (or resizes) a background worker pool that drives the
    /// scheduler without occupying the calling thread.
    pub fn run_in_background(&self, thread_pool_size: usize) {
        self.set_thread_pool_size(thread_pool_size);
        self.shared.stop_requested.store(false, Ordering::Release);
        self.shared.running.store(true, Ordering::Release);
        let _guard = self.shared.running_mutex.lock();
        self.shared.running_cv.notify_all();
    }

    /// Replaces the background worker pool with one of the given size.
    /// `0` stops all background workers (equivalent to `stop()` for the
    /// background pool; `run`/`poll` on the calling thread still work).
    pub fn set_thread_pool_size(&self, size: usize) {
        let generation = self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let old_workers: Vec<JoinHandle<()>> = {
            let mut workers = self.shared.workers.lock();
            std::mem::take(&mut *workers)
        };
        {
            let _guard = self.shared.wake_mutex.lock();
            self.shared.wake.notify_all();
        }
        for handle in old_workers {
            let _ = handle.join();
        }
        self.shared.stealers.lock().clear();

        let mut new_workers = Vec::with_capacity(size);
        let mut new_stealers = Vec::with_capacity(size);
        for _ in 0..size {
            let deque = DequeWorker::new_fifo();
            new_stealers.push(deque.stealer());
            let sched = self.clone();
            new_workers.push(std::thread::spawn(move || {
                LOCAL_QUEUE.with(|cell| *cell.borrow_mut() = Some(deque));
                sched.worker_loop(generation);
            }));
        }
        *self.shared.stealers.lock() = new_stealers;
        *self.shared.workers.lock() = new_workers;
    }

    fn worker_loop(&self, generation: usize) {
        loop {
            if self.shared.stop_requested.load(Ordering::Acquire) {
                return;
            }
            if self.shared.generation.load(Ordering::Acquire) != generation {
                return;
            }
            if let Some(job) = self.try_take_one() {
                job();
                continue;
            }
            let mut guard = self.shared.wake_mutex.lock();
            let _ = self
                .shared
                .wake
                .wait_for(&mut guard, Duration::from_millis(20));
        }
    }

    /// Requests that `run`/`run_one`/the background pool stop. Already
    /// running jobs finish; no new job starts after this call observes
    /// the stop on each worker's next loop iteration.
    pub fn stop(&self) {
        self.shared.stop_requested.store(true, Ordering::Release);
        self.shared.running.store(false, Ordering::Release);
        let _guard = self.shared.wake_mutex.lock();
        self.shared.wake.notify_all();
        let _guard2 = self.shared.running_mutex.lock();
        self.shared.running_cv.notify_all();
    }

    /// Blocks until `run_in_background` has been called.
    pub fn wait_for_running(&self) {
        let mut guard = self.shared.running_mutex.lock();
        while !self.shared.running.load(Ordering::Acquire) {
            self.shared.running_cv.wait(&mut guard);
        }
    }

    /// Blocks until `stop()` has been called.
    pub fn wait_for_stopped(&self) {
        let mut guard = self.shared.running_mutex.lock();
        while self.shared.running.load(Ordering::Acquire) {
            self.shared.running_cv.wait(&mut guard);
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }
}
