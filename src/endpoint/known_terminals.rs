//! A `Node`'s aggregated view of every terminal known through any of its
//! attached connections (spec §4.2).
//!
//! `get_known_terminals()` reads a discovery-order snapshot;
//! `await_known_terminals_change(handler)` registers a single pending
//! handler fired on the next addition or removal, same `Busy`/`Canceled`
//! contract as every other `await_*` in this crate.

use crate::error::{Error, ErrorKind};
use crate::terminal::TerminalKey;
use crate::util::OrderedMap;
use parking_lot::Mutex;
use std::sync::Arc;

/// One entry in the aggregated catalog: a terminal key and how many
/// attached connections currently report it (so a connection dropping a
/// terminal two peers both announced doesn't spuriously remove it).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownTerminal {
    pub key: TerminalKey,
    pub refcount: usize,
}

/// Whether a known-terminals change was an addition or a removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KnownTerminalsChange {
    Added(TerminalKey),
    Removed(TerminalKey),
}

type ChangeHandler = Box<dyn FnOnce(Result<KnownTerminalsChange, Error>) + Send>;

struct Inner {
    entries: OrderedMap<TerminalKey, usize>,
    waiting: Option<ChangeHandler>,
}

/// The `Node`-owned aggregation itself.
pub struct KnownTerminals {
    inner: Mutex<Inner>,
}

impl KnownTerminals {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                entries: OrderedMap::new(),
                waiting: None,
            }),
        })
    }

    /// Records a newly announced remote terminal, incrementing its
    /// refcount if already known. Fires a pending `await` handler with
    /// `Added` only on the transition from absent to present.
    pub fn note_added(&self, key: TerminalKey) {
        let mut inner = self.inner.lock();
        let is_new = !inner.entries.contains_key(&key);
        if let Some(count) = inner.entries.get_mut(&key) {
            *count += 1;
        } else {
            inner.entries.insert(key.clone(), 1);
        }
        if is_new {
            if let Some(handler) = inner.waiting.take() {
                handler(Ok(KnownTerminalsChange::Added(key)));
            }
        }
    }

    /// Records a remote terminal going away, decrementing its refcount.
    /// Fires a pending `await` handler with `Removed` only when the
    /// refcount reaches zero.
    pub fn note_removed(&self, key: &TerminalKey) {
        let mut inner = self.inner.lock();
        let Some(count) = inner.entries.get_mut(key) else {
            return;
        };
        *count -= 1;
        if *count == 0 {
            inner.entries.remove(key);
            if let Some(handler) = inner.waiting.take() {
                handler(Ok(KnownTerminalsChange::Removed(key.clone())));
            }
        }
    }

    /// A discovery-order snapshot of every currently known remote
    /// terminal.
    #[must_use]
    pub fn snapshot(&self) -> Vec<KnownTerminal> {
        self.inner
            .lock()
            .entries
            .iter()
            .map(|(key, &refcount)| KnownTerminal {
                key: key.clone(),
                refcount,
            })
            .collect()
    }

    /// Registers the next-change handler. Fails `Busy` if one is already
    /// outstanding.
    pub fn await_change(
        &self,
        handler: impl FnOnce(Result<KnownTerminalsChange, Error>) + Send + 'static,
    ) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        if inner.waiting.is_some() {
            return Err(Error::new(ErrorKind::Busy));
        }
        inner.waiting = Some(Box::new(handler));
        Ok(())
    }

    /// Cancels the pending change handler, if any.
    pub fn cancel_await_change(&self) -> bool {
        let handler = self.inner.lock().waiting.take();
        match handler {
            Some(h) => {
                h(Err(Error::canceled()));
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Path, Signature, TerminalVariant};
    use std::sync::Mutex as StdMutex;

    fn key(path: &str) -> TerminalKey {
        TerminalKey::new(Path::new(path).unwrap(), TerminalVariant::PublishSubscribe, Signature::new(1))
    }

    #[test]
    fn added_then_removed_round_trips_snapshot() {
        let known = KnownTerminals::new();
        known.note_added(key("/a"));
        assert_eq!(known.snapshot().len(), 1);
        known.note_removed(&key("/a"));
        assert!(known.snapshot().is_empty());
    }

    #[test]
    fn shared_by_two_connections_survives_one_removal() {
        let known = KnownTerminals::new();
        known.note_added(key("/a"));
        known.note_added(key("/a"));
        known.note_removed(&key("/a"));
        assert_eq!(known.snapshot().len(), 1);
        known.note_removed(&key("/a"));
        assert!(known.snapshot().is_empty());
    }

    #[test]
    fn await_change_fires_on_addition() {
        let known = KnownTerminals::new();
        let got = Arc::new(StdMutex::new(None));
        let got2 = Arc::clone(&got);
        known.await_change(move |res| *got2.lock().unwrap() = Some(res.unwrap())).unwrap();
        known.note_added(key("/a"));
        assert_eq!(got.lock().unwrap().take(), Some(KnownTerminalsChange::Added(key("/a"))));
    }

    #[test]
    fn second_await_while_pending_fails_busy() {
        let known = KnownTerminals::new();
        known.await_change(|_| {}).unwrap();
        let err = known.await_change(|_| {}).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Busy);
    }

    #[test]
    fn cancel_delivers_canceled() {
        let known = KnownTerminals::new();
        let got = Arc::new(StdMutex::new(None));
        let got2 = Arc::clone(&got);
        known.await_change(move |res| *got2.lock().unwrap() = Some(res.err().map(|e| e.kind()))).unwrap();
        assert!(known.cancel_await_change());
        assert_eq!(got.lock().unwrap().take(), Some(Some(ErrorKind::Canceled)));
    }
}
