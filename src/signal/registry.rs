//! Signal sets and process-wide dispatch (spec §4.8).
//!
//! A [`SignalSet`] subscribes to a mask of [`Signal`] flags. `raise_signal`
//! (on [`SignalRegistry`]) delivers to every subscribed, still-alive set;
//! once every dispatched set has either delivered the signal to a waiting
//! handler or been destroyed, the raiser's `cleanup` runs exactly once.
//!
//! A set buffers at most one pending signal per flag: a second raise of an
//! already-pending flag is dropped (its cleanup still fires, since the
//! set never gets a chance to deliver it). Only one `await_signal` may be
//! outstanding per set at a time; a second call fails `Busy`, mirroring
//! the single-pending-waiter contract `runtime::timer` enforces.

use crate::error::{Error, ErrorKind};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use super::flags::Signal;

/// Opaque identity of a [`SignalSet`] within a [`SignalRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignalSetId(u64);

type Handler<T> = Box<dyn FnOnce(Result<(Signal, T), Error>) + Send>;
type Completion = Box<dyn FnOnce() + Send>;

struct Pending<T> {
    flag: Signal,
    sigarg: T,
    completion: Completion,
}

struct SetState<T> {
    pending: Vec<Pending<T>>,
    waiting: Option<Handler<T>>,
}

struct SetInner<T> {
    id: SignalSetId,
    subscribed: Signal,
    destroyed: AtomicBool,
    state: Mutex<SetState<T>>,
}

/// A process-wide registry of [`SignalSet`]s subscribed to [`Signal`]
/// flags, and the dispatcher for [`SignalRegistry::raise_signal`].
///
/// `T` is the user-defined "sigarg" payload carried with a raise; the
/// crate never interprets it.
pub struct SignalRegistry<T> {
    sets: Mutex<Vec<Weak<SetInner<T>>>>,
    next_id: AtomicU64,
}

impl<T> Default for SignalRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> SignalRegistry<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sets: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Creates a new set subscribed to `mask` and registers it.
    pub fn create_set(&self, mask: Signal) -> SignalSet<T> {
        let id = SignalSetId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let inner = Arc::new(SetInner {
            id,
            subscribed: mask,
            destroyed: AtomicBool::new(false),
            state: Mutex::new(SetState {
                pending: Vec::new(),
                waiting: None,
            }),
        });
        self.sets.lock().push(Arc::downgrade(&inner));
        SignalSet { inner }
    }

    /// Dispatches `signal` to every live, subscribed set. Once every
    /// dispatched set has delivered or been destroyed, `cleanup(sigarg)`
    /// runs exactly once.
    pub fn raise_signal(
        &self,
        signal: Signal,
        sigarg: T,
        cleanup: impl FnOnce(T) + Send + 'static,
    ) {
        let targets: Vec<Arc<SetInner<T>>> = {
            let mut sets = self.sets.lock();
            sets.retain(|w| w.strong_count() > 0);
            sets.iter()
                .filter_map(Weak::upgrade)
                .filter(|s| s.subscribed.intersects(signal))
                .collect()
        };

        if targets.is_empty() {
            cleanup(sigarg);
            return;
        }

        let remaining = Arc::new(AtomicUsize::new(targets.len()));
        let cleanup_slot: Arc<Mutex<Option<Box<dyn FnOnce(T) + Send>>>> =
            Arc::new(Mutex::new(Some(Box::new(cleanup))));
        let last_arg: Arc<Mutex<Option<T>>> = Arc::new(Mutex::new(Some(sigarg.clone())));

        for set in targets {
            let flag = set.subscribed.intersection(signal);
            let remaining = Arc::clone(&remaining);
            let cleanup_slot = Arc::clone(&cleanup_slot);
            let last_arg = Arc::clone(&last_arg);
            let arg_for_set = sigarg.clone();
            deliver(
                &set,
                flag,
                arg_for_set,
                Box::new(move || {
                    if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                        if let Some(f) = cleanup_slot.lock().take() {
                            let arg = last_arg.lock().take().expect("cleanup arg consumed twice");
                            f(arg);
                        }
                    }
                }),
            );
        }
    }
}

fn deliver<T>(set: &Arc<SetInner<T>>, flag: Signal, sigarg: T, completion: Completion) {
    if set.destroyed.load(Ordering::Acquire) {
        completion();
        return;
    }
    let mut state = set.state.lock();
    if let Some(handler) = state.waiting.take() {
        drop(state);
        handler(Ok((flag, sigarg)));
        completion();
        return;
    }
    if state.pending.iter().any(|p| p.flag == flag) {
        drop(state);
        // Already one pending signal for this flag; this one is dropped,
        // but the raiser's cleanup must still observe our completion.
        completion();
        return;
    }
    state.pending.push(Pending {
        flag,
        sigarg,
        completion,
    });
}

/// A single subscriber to a mask of [`Signal`] flags.
pub struct SignalSet<T> {
    inner: Arc<SetInner<T>>,
}

impl<T: Send + 'static> SignalSet<T> {
    #[must_use]
    pub fn id(&self) -> SignalSetId {
        self.inner.id
    }

    #[must_use]
    pub fn subscribed(&self) -> Signal {
        self.inner.subscribed
    }

    /// Delivers the oldest pending signal to `handler`, or registers it
    /// to run on the next [`SignalRegistry::raise_signal`] that targets
    /// this set. Fails `Busy` if an await is already outstanding.
    pub fn await_signal(
        &self,
        handler: impl FnOnce(Result<(Signal, T), Error>) + Send + 'static,
    ) -> Result<(), Error> {
        let mut state = self.inner.state.lock();
        if state.waiting.is_some() {
            return Err(Error::new(ErrorKind::Busy));
        }
        if !state.pending.is_empty() {
            let pending = state.pending.remove(0);
            drop(state);
            handler(Ok((pending.flag, pending.sigarg)));
            (pending.completion)();
            return Ok(());
        }
        state.waiting = Some(Box::new(handler));
        Ok(())
    }

    /// Delivers `Canceled` to the pending `await_signal` handler, if any.
    /// Returns `false` if none was pending.
    pub fn cancel_await_signal(&self) -> bool {
        let handler = {
            let mut state = self.inner.state.lock();
            state.waiting.take()
        };
        match handler {
            Some(h) => {
                h(Err(Error::canceled()));
                true
            }
            None => false,
        }
    }

    /// Marks this set destroyed: any future raise targeting it completes
    /// immediately, and any pending entries/handler are drained.
    pub fn destroy(&self) {
        self.inner.destroyed.store(true, Ordering::Release);
        let (pending, waiting) = {
            let mut state = self.inner.state.lock();
            (std::mem::take(&mut state.pending), state.waiting.take())
        };
        for p in pending {
            (p.completion)();
        }
        if let Some(h) = waiting {
            h(Err(Error::canceled()));
        }
    }
}
