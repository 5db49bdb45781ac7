//! Per-endpoint terminal arena: attach/detach and the matching lookups
//! that drive binding and subscription state (spec §4.3).
//!
//! An endpoint owns one registry. Every terminal it creates lives here
//! under a [`TerminalId`]; a connection's discovery layer asks
//! [`TerminalRegistry::find_matches`] for the local terminals a remote
//! `(path, variant, signature)` announcement should bind to.

use crate::error::{Error, ErrorKind};
use crate::terminal::binding::TerminalBinding;
use crate::terminal::pubsub::PubSubTerminal;
use crate::terminal::scatter::OperationTerminal;
use crate::terminal::{TerminalId, TerminalKey};
use crate::types::{Path, Signature, TerminalVariant};
use crate::util::Arena;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// The behavior a terminal record wraps: the one-way publish core shared
/// by the pub/sub family and `Master`/`Slave`, or the scatter/gather
/// operation core shared by `ScatterGather` and `Service`/`Client`.
/// `DeafMute` carries neither and is represented by neither variant.
#[derive(Clone)]
pub enum TerminalCore {
    PubSub(Arc<PubSubTerminal>),
    Operation(Arc<OperationTerminal>),
    DeafMute,
}

/// One live terminal attached to an endpoint.
#[derive(Clone)]
pub struct TerminalRecord {
    pub path: Path,
    pub variant: TerminalVariant,
    pub signature: Signature,
    pub core: TerminalCore,
    /// `Some` only for a primitive variant with an explicit binding;
    /// convenience variants bind implicitly and leave this `None`.
    pub binding: Option<Arc<TerminalBinding>>,
}

impl TerminalRecord {
    #[must_use]
    fn key(&self) -> TerminalKey {
        TerminalKey::new(self.path.clone(), self.variant, self.signature)
    }
}

struct Inner {
    arena: Arena<TerminalRecord>,
    by_key: HashMap<TerminalKey, TerminalId>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            arena: Arena::new(),
            by_key: HashMap::new(),
        }
    }
}

/// The arena of terminals attached to one [`crate::endpoint`].
#[derive(Default)]
pub struct TerminalRegistry {
    inner: Mutex<Inner>,
}

impl TerminalRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a terminal. Fails `DuplicateTerminal` if one with the
    /// same `(path, variant, signature)` is already attached.
    pub fn insert(&self, record: TerminalRecord) -> Result<TerminalId, Error> {
        let key = record.key();
        let mut inner = self.inner.lock();
        if inner.by_key.contains_key(&key) {
            return Err(Error::new(ErrorKind::DuplicateTerminal));
        }
        let id = inner.arena.insert(record);
        inner.by_key.insert(key, id);
        Ok(id)
    }

    /// Detaches a terminal. Returns `None` if `id` is stale (already
    /// removed, or issued by a different registry).
    pub fn remove(&self, id: TerminalId) -> Option<TerminalRecord> {
        let mut inner = self.inner.lock();
        let record = inner.arena.remove(id)?;
        let key = record.key();
        inner.by_key.remove(&key);
        Some(record)
    }

    #[must_use]
    pub fn get(&self, id: TerminalId) -> Option<TerminalRecord> {
        self.inner.lock().arena.get(id).cloned()
    }

    #[must_use]
    pub fn contains(&self, id: TerminalId) -> bool {
        self.inner.lock().arena.contains(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().arena.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every local terminal at `remote`'s path whose variant and
    /// signature satisfy [`TerminalKey::matches_variant`] against it —
    /// a primitive's same-variant peer, or a convenience variant's
    /// counterpart (spec §4.3).
    #[must_use]
    pub fn find_matches(&self, remote: &TerminalKey) -> Vec<(TerminalId, TerminalRecord)> {
        let inner = self.inner.lock();
        inner
            .arena
            .iter()
            .filter(|(_, rec)| rec.path == remote.path && remote.matches_variant(rec.variant, rec.signature))
            .map(|(id, rec)| (id, rec.clone()))
            .collect()
    }

    /// A snapshot of every attached terminal's key, in no particular
    /// order. Used by a `Node`'s known-terminals discovery feed, which
    /// tracks order itself via [`crate::util::OrderedMap`].
    #[must_use]
    pub fn snapshot_keys(&self) -> Vec<TerminalKey> {
        self.inner
            .lock()
            .arena
            .iter()
            .map(|(_, rec)| rec.key())
            .collect()
    }

    /// Like [`Self::snapshot_keys`] but paired with each terminal's id, as
    /// needed by a connection announcing its catalog to a peer endpoint.
    #[must_use]
    pub fn snapshot_entries(&self) -> Vec<(TerminalId, TerminalKey)> {
        self.inner
            .lock()
            .arena
            .iter()
            .map(|(id, rec)| (id, rec.key()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::scheduler::Scheduler;

    fn record(path: &str, variant: TerminalVariant, sig: u32) -> TerminalRecord {
        TerminalRecord {
            path: Path::new(path).unwrap(),
            variant,
            signature: Signature::new(sig),
            core: TerminalCore::DeafMute,
            binding: None,
        }
    }

    #[test]
    fn insert_then_get() {
        let reg = TerminalRegistry::new();
        let id = reg.insert(record("/a", TerminalVariant::DeafMute, 1)).unwrap();
        assert!(reg.contains(id));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn duplicate_path_variant_signature_fails() {
        let reg = TerminalRegistry::new();
        reg.insert(record("/a", TerminalVariant::PublishSubscribe, 1)).unwrap();
        let err = reg
            .insert(record("/a", TerminalVariant::PublishSubscribe, 1))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateTerminal);
    }

    #[test]
    fn same_path_different_signature_is_not_a_duplicate() {
        let reg = TerminalRegistry::new();
        reg.insert(record("/a", TerminalVariant::PublishSubscribe, 1)).unwrap();
        assert!(reg.insert(record("/a", TerminalVariant::PublishSubscribe, 2)).is_ok());
    }

    #[test]
    fn remove_invalidates_id_and_key() {
        let reg = TerminalRegistry::new();
        let id = reg.insert(record("/a", TerminalVariant::DeafMute, 1)).unwrap();
        assert!(reg.remove(id).is_some());
        assert!(reg.get(id).is_none());
        assert!(reg.insert(record("/a", TerminalVariant::DeafMute, 1)).is_ok());
    }

    #[test]
    fn find_matches_pairs_primitives_by_same_variant() {
        let reg = TerminalRegistry::new();
        reg.insert(record("/a", TerminalVariant::PublishSubscribe, 7)).unwrap();
        let remote = TerminalKey::new(Path::new("/a").unwrap(), TerminalVariant::PublishSubscribe, Signature::new(7));
        assert_eq!(reg.find_matches(&remote).len(), 1);
    }

    #[test]
    fn find_matches_pairs_convenience_variants_by_counterpart() {
        let reg = TerminalRegistry::new();
        reg.insert(record("/a", TerminalVariant::Consumer, 7)).unwrap();
        let remote = TerminalKey::new(Path::new("/a").unwrap(), TerminalVariant::Producer, Signature::new(7));
        assert_eq!(reg.find_matches(&remote).len(), 1);
    }

    #[test]
    fn find_matches_rejects_signature_mismatch() {
        let reg = TerminalRegistry::new();
        reg.insert(record("/a", TerminalVariant::PublishSubscribe, 7)).unwrap();
        let remote = TerminalKey::new(Path::new("/a").unwrap(), TerminalVariant::PublishSubscribe, Signature::new(8));
        assert!(reg.find_matches(&remote).is_empty());
    }

    #[test]
    fn pubsub_core_round_trips() {
        let reg = TerminalRegistry::new();
        let sched = Scheduler::new();
        let core = TerminalCore::PubSub(PubSubTerminal::new(sched, true, false, false, 4));
        let id = reg
            .insert(TerminalRecord {
                path: Path::new("/pub").unwrap(),
                variant: TerminalVariant::Producer,
                signature: Signature::new(1),
                core,
                binding: None,
            })
            .unwrap();
        let fetched = reg.get(id).unwrap();
        assert!(matches!(fetched.core, TerminalCore::PubSub(_)));
    }
}
