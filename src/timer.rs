//! Single-shot deadline source integrated with the scheduler (spec §4.9).
//!
//! A [`Timer`] holds at most one pending expiry. `start_async` is a
//! rearm: any previous pending handler is immediately canceled and a
//! fresh deadline is armed. Unlike [`crate::runtime::timer::TimerHeap`]
//! (a min-heap keyed by an arbitrary `K`, used where many independent
//! deadlines share one driving thread — the Anomaly fabric's expiry
//! scheduler), a single `Timer` owns one dedicated sleeping thread per
//! armed deadline, the same shape `connection::tcp`'s heartbeat thread
//! uses; a generation counter invalidates a stale sleep the way
//! `TimerHeap`'s tie-break generation does.

use crate::error::Error;
use crate::runtime::scheduler::Scheduler;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

type Handler = Box<dyn FnOnce(Result<(), Error>) + Send>;

struct Inner {
    generation: u64,
    pending: Option<Handler>,
}

/// A single-shot deadline. See module docs.
pub struct Timer {
    scheduler: Scheduler,
    inner: Mutex<Inner>,
}

impl Timer {
    /// The distinguished infinity: a [`Self::start_async`] call with this
    /// duration arms the timer (canceling any previous pending handler)
    /// but never fires on its own — only an explicit [`Self::cancel`]
    /// resolves it.
    pub const INFINITE: Duration = Duration::MAX;

    #[must_use]
    pub fn new(scheduler: Scheduler) -> Arc<Self> {
        Arc::new(Self {
            scheduler,
            inner: Mutex::new(Inner {
                generation: 0,
                pending: None,
            }),
        })
    }

    /// Cancels any previous pending expiry (delivering it `Canceled`) and
    /// schedules `handler` to fire with `Ok(())` after `duration`, unless
    /// `duration` is [`Self::INFINITE`].
    pub fn start_async(
        self: &Arc<Self>,
        duration: Duration,
        handler: impl FnOnce(Result<(), Error>) + Send + 'static,
    ) {
        let generation = {
            let mut inner = self.inner.lock();
            inner.generation = inner.generation.wrapping_add(1);
            let generation = inner.generation;
            if let Some(prev) = inner.pending.take() {
                self.scheduler.post(move || prev(Err(Error::canceled())));
            }
            inner.pending = Some(Box::new(handler));
            generation
        };
        if duration == Self::INFINITE {
            return;
        }
        let this = Arc::clone(self);
        std::thread::spawn(move || {
            std::thread::sleep(duration);
            this.fire(generation);
        });
    }

    /// Cancels the pending expiry, delivering `Canceled` to its handler.
    /// Returns `false` if the timer had already expired or was never
    /// armed.
    pub fn cancel(&self) -> bool {
        let handler = {
            let mut inner = self.inner.lock();
            inner.generation = inner.generation.wrapping_add(1);
            inner.pending.take()
        };
        match handler {
            Some(h) => {
                self.scheduler.post(move || h(Err(Error::canceled())));
                true
            }
            None => false,
        }
    }

    fn fire(&self, generation: u64) {
        let handler = {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                return;
            }
            inner.pending.take()
        };
        if let Some(h) = handler {
            self.scheduler.post(move || h(Ok(())));
        }
    }
}
