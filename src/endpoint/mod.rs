//! Endpoints: the owner of a terminal registry and the connections
//! attached to it (spec §4.2).
//!
//! [`Leaf`] is the single-peer endpoint a process typically owns one of
//! per remote process it talks to. [`Node`] multiplexes any number of
//! connections and additionally aggregates the union of every attached
//! connection's terminal catalog into a queryable, change-notified
//! [`known_terminals::KnownTerminals`] view (spec §4.2's "multi-peer"
//! endpoint).
//!
//! Matching (spec §4.3) happens here rather than in [`crate::terminal`]:
//! a [`ConnectionPeer`] is this module's abstraction over "a connection
//! that can announce its catalog and forward messages for a matched
//! terminal", implemented once for in-process
//! [`crate::connection::local::LocalConnection`] and once for
//! socket-backed [`crate::connection::tcp::TcpConnection`].

pub mod known_terminals;

use crate::error::{Error, ErrorKind};
use crate::runtime::scheduler::Scheduler;
use crate::terminal::pubsub::PeerSink;
use crate::terminal::scatter::ScatterPeer;
use crate::terminal::{TerminalCore, TerminalId, TerminalKey, TerminalRecord, TerminalRegistry};
use crate::types::{Path, Signature, TerminalVariant};
use known_terminals::KnownTerminals;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// A connection attached to an endpoint, from the endpoint's point of
/// view: something that can report its remote catalog, be told about
/// local catalog changes, and manufacture forwarding sinks for a
/// matched pair of terminals.
pub trait ConnectionPeer: Send + Sync {
    fn connection_id(&self) -> u64;

    /// The remote terminals currently known through this connection, as
    /// of this call (local connections: a live snapshot of the peer
    /// endpoint's registry; TCP connections: the last discovery catalog
    /// received).
    fn remote_catalog(&self) -> Vec<(TerminalId, TerminalKey)>;

    /// Informs the connection that a local terminal `id` was attached or
    /// detached, so it can announce it to the peer (local connections
    /// push straight into the peer endpoint; TCP connections frame and
    /// write a discovery record).
    fn announce_local(&self, added: bool, id: TerminalId, key: &TerminalKey);

    /// Builds a publish-family forwarding sink addressed at the given
    /// remote terminal.
    fn make_pub_sink(&self, remote_id: TerminalId) -> Arc<dyn PeerSink>;

    /// Builds a scatter/request forwarding peer addressed at the given
    /// remote terminal.
    fn make_scatter_peer(&self, remote_id: TerminalId) -> Arc<dyn ScatterPeer>;
}

/// The sink handed to a local terminal's core when it matched a remote
/// terminal, kept so the exact same `Arc` can be passed back to
/// `on_peer_unmatched` once that remote terminal goes away.
enum MatchedLink {
    PubSub(Arc<dyn PeerSink>),
    Scatter(Arc<dyn ScatterPeer>),
}

/// Shared state behind [`Leaf`] and [`Node`].
pub struct EndpointCore {
    scheduler: Scheduler,
    location: Path,
    registry: TerminalRegistry,
    connections: Mutex<Vec<Arc<dyn ConnectionPeer>>>,
    /// Keyed by `(connection_id, remote_terminal_id)`, listing every
    /// local terminal matched against it so a later removal can unmatch
    /// precisely, without re-deriving the original sink.
    matched_links: Mutex<HashMap<(u64, TerminalId), Vec<(TerminalId, MatchedLink)>>>,
    /// Set only for a [`Node`]: every remote terminal discovered or lost
    /// through any attached connection, *after* the initial
    /// `attach_connection` pass, is folded into this aggregation too, so
    /// `Node::known_terminals()` stays live for the connection's whole
    /// lifetime rather than only reflecting its catalog at attach time.
    known_sink: Mutex<Option<Arc<KnownTerminals>>>,
}

impl EndpointCore {
    fn new(scheduler: Scheduler, location: Path) -> Arc<Self> {
        Arc::new(Self {
            scheduler,
            location,
            registry: TerminalRegistry::new(),
            connections: Mutex::new(Vec::new()),
            matched_links: Mutex::new(HashMap::new()),
            known_sink: Mutex::new(None),
        })
    }

    /// Installs the [`KnownTerminals`] aggregation a [`Node`] wraps this
    /// core with, so that every remote terminal discovered or lost
    /// *after* the initial `attach_connection` pass keeps it live too.
    pub(crate) fn set_known_sink(&self, sink: Arc<KnownTerminals>) {
        *self.known_sink.lock() = Some(sink);
    }

    #[must_use]
    pub fn location(&self) -> &Path {
        &self.location
    }

    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    #[must_use]
    pub fn registry(&self) -> &TerminalRegistry {
        &self.registry
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Creates and attaches a terminal at `relative_path`, wiring it
    /// against every already-attached connection's current catalog and
    /// announcing it to them.
    pub fn create_terminal(
        &self,
        relative_path: &str,
        variant: TerminalVariant,
        signature: Signature,
        queue_capacity: usize,
    ) -> Result<TerminalId, Error> {
        let path = self.location.join(relative_path);
        self.create_terminal_at(path, variant, signature, queue_capacity)
    }

    /// Like [`Self::create_terminal`] but takes the terminal's full path
    /// directly instead of joining it onto this endpoint's location.
    /// Used by [`crate::process::operational::ProcessDependency`] to
    /// attach a terminal matching a *foreign* process's published
    /// `Process/Operational` path rather than one under this process's
    /// own location.
    pub fn create_terminal_at(
        &self,
        path: Path,
        variant: TerminalVariant,
        signature: Signature,
        queue_capacity: usize,
    ) -> Result<TerminalId, Error> {
        let core = build_core(variant, self.scheduler.clone(), queue_capacity);
        let binding = if variant.is_primitive() {
            Some(crate::terminal::binding::TerminalBinding::new(path.clone()))
        } else {
            None
        };
        let record = TerminalRecord {
            path: path.clone(),
            variant,
            signature,
            core,
            binding,
        };
        let id = self.registry.insert(record)?;
        let key = TerminalKey::new(path, variant, signature);

        for conn in self.connections.lock().iter() {
            for (remote_id, remote_key) in conn.remote_catalog() {
                self.wire_if_matching(id, &key, conn, remote_id, &remote_key);
            }
            conn.announce_local(true, id, &key);
        }
        Ok(id)
    }

    /// Destroys a terminal, announcing its removal to every connection.
    pub fn destroy_terminal(&self, id: TerminalId) -> Result<(), Error> {
        let record = self
            .registry
            .remove(id)
            .ok_or_else(|| Error::new(ErrorKind::InvalidHandle))?;
        let key = TerminalKey::new(record.path, record.variant, record.signature);
        for conn in self.connections.lock().iter() {
            conn.announce_local(false, id, &key);
        }
        self.matched_links.lock().retain(|_, links| {
            links.retain(|(local_id, _)| *local_id != id);
            !links.is_empty()
        });
        Ok(())
    }

    #[must_use]
    pub fn get_terminal(&self, id: TerminalId) -> Option<TerminalRecord> {
        self.registry.get(id)
    }

    /// Attaches a connection: runs the initial two-way matching pass
    /// against the connection's current remote catalog and every
    /// locally attached terminal, then announces the local catalog to
    /// it.
    pub fn attach_connection(&self, conn: Arc<dyn ConnectionPeer>) {
        for (id, key) in self.registry.snapshot_entries() {
            conn.announce_local(true, id, &key);
        }
        for (remote_id, remote_key) in conn.remote_catalog() {
            for (local_id, local_record) in self.registry.find_matches(&remote_key) {
                let local_key = TerminalKey::new(local_record.path, local_record.variant, local_record.signature);
                self.wire_if_matching(local_id, &local_key, &conn, remote_id, &remote_key);
            }
        }
        self.connections.lock().push(conn);
    }

    /// Detaches a connection by ID, unmatching every peer link it was
    /// carrying.
    pub fn detach_connection(&self, connection_id: u64) {
        let departing = {
            let mut conns = self.connections.lock();
            let idx = conns.iter().position(|c| c.connection_id() == connection_id);
            idx.map(|i| conns.remove(i))
        };
        if let Some(conn) = departing {
            if let Some(known) = self.known_sink.lock().as_ref() {
                for (_, key) in conn.remote_catalog() {
                    known.note_removed(&key);
                }
            }
        }
        let stale: Vec<_> = self
            .matched_links
            .lock()
            .keys()
            .filter(|(cid, _)| *cid == connection_id)
            .copied()
            .collect();
        for key in stale {
            self.unmatch_links(key);
        }
    }

    /// Called by a connection when it learns of a newly matching remote
    /// terminal (TCP discovery frame, or a fresh local-connection
    /// attach pass).
    pub fn on_remote_terminal_added(
        &self,
        conn: &Arc<dyn ConnectionPeer>,
        remote_id: TerminalId,
        remote_key: &TerminalKey,
    ) {
        if let Some(known) = self.known_sink.lock().as_ref() {
            known.note_added(remote_key.clone());
        }
        for (local_id, local_record) in self.registry.find_matches(remote_key) {
            let local_key = TerminalKey::new(local_record.path, local_record.variant, local_record.signature);
            self.wire_if_matching(local_id, &local_key, conn, remote_id, remote_key);
        }
    }

    /// Called by a connection when a remote terminal it previously
    /// announced is gone, unmatching every local terminal that had
    /// bound to it.
    pub fn on_remote_terminal_removed(&self, connection_id: u64, remote_id: TerminalId, remote_key: &TerminalKey) {
        if let Some(known) = self.known_sink.lock().as_ref() {
            known.note_removed(remote_key);
        }
        self.unmatch_links((connection_id, remote_id));
    }

    fn unmatch_links(&self, key: (u64, TerminalId)) {
        let Some(links) = self.matched_links.lock().remove(&key) else {
            return;
        };
        for (local_id, link) in links {
            let Some(record) = self.registry.get(local_id) else {
                continue;
            };
            match (record.core, link) {
                (TerminalCore::PubSub(ps), MatchedLink::PubSub(sink)) => ps.on_peer_unmatched(&sink),
                (TerminalCore::Operation(op), MatchedLink::Scatter(peer)) => op.on_peer_unmatched(&peer),
                _ => {}
            }
        }
    }

    fn wire_if_matching(
        &self,
        local_id: TerminalId,
        local_key: &TerminalKey,
        conn: &Arc<dyn ConnectionPeer>,
        remote_id: TerminalId,
        remote_key: &TerminalKey,
    ) {
        if !remote_key.matches_variant(local_key.variant, local_key.signature) {
            return;
        }
        let Some(record) = self.registry.get(local_id) else {
            return;
        };
        let link = match record.core {
            TerminalCore::PubSub(ps) => {
                let sink = conn.make_pub_sink(remote_id);
                ps.on_peer_matched(Arc::clone(&sink));
                MatchedLink::PubSub(sink)
            }
            TerminalCore::Operation(op) => {
                let peer = conn.make_scatter_peer(remote_id);
                op.on_peer_matched(Arc::clone(&peer));
                MatchedLink::Scatter(peer)
            }
            TerminalCore::DeafMute => return,
        };
        self.matched_links
            .lock()
            .entry((conn.connection_id(), remote_id))
            .or_default()
            .push((local_id, link));
    }
}

/// Builds the right [`TerminalCore`] for a newly created terminal,
/// deriving publish/receive/cache/initiate/respond capability from the
/// variant's classification (spec §3).
#[must_use]
pub fn build_core(variant: TerminalVariant, scheduler: Scheduler, queue_capacity: usize) -> TerminalCore {
    use crate::terminal::pubsub::PubSubTerminal;
    use crate::terminal::scatter::OperationTerminal;
    match variant {
        TerminalVariant::DeafMute => TerminalCore::DeafMute,
        TerminalVariant::PublishSubscribe => {
            TerminalCore::PubSub(PubSubTerminal::new(scheduler, true, true, false, queue_capacity))
        }
        TerminalVariant::CachedPublishSubscribe => {
            TerminalCore::PubSub(PubSubTerminal::new(scheduler, true, true, true, queue_capacity))
        }
        TerminalVariant::Producer => {
            TerminalCore::PubSub(PubSubTerminal::new(scheduler, true, false, false, queue_capacity))
        }
        TerminalVariant::Consumer => {
            TerminalCore::PubSub(PubSubTerminal::new(scheduler, false, true, false, queue_capacity))
        }
        TerminalVariant::CachedProducer => {
            TerminalCore::PubSub(PubSubTerminal::new(scheduler, true, false, true, queue_capacity))
        }
        TerminalVariant::CachedConsumer => {
            TerminalCore::PubSub(PubSubTerminal::new(scheduler, false, true, true, queue_capacity))
        }
        TerminalVariant::Master | TerminalVariant::Slave => {
            TerminalCore::PubSub(PubSubTerminal::new(scheduler, true, true, false, queue_capacity))
        }
        TerminalVariant::CachedMaster | TerminalVariant::CachedSlave => {
            TerminalCore::PubSub(PubSubTerminal::new(scheduler, true, true, true, queue_capacity))
        }
        TerminalVariant::ScatterGather => {
            TerminalCore::Operation(OperationTerminal::new(scheduler, true, true))
        }
        TerminalVariant::Service => TerminalCore::Operation(OperationTerminal::new(scheduler, false, true)),
        TerminalVariant::Client => TerminalCore::Operation(OperationTerminal::new(scheduler, true, false)),
    }
}

/// A single-peer endpoint: the common case of one process-to-process
/// link, carried over exactly one connection at a time.
#[derive(Clone)]
pub struct Leaf {
    core: Arc<EndpointCore>,
}

impl Leaf {
    #[must_use]
    pub fn new(scheduler: Scheduler, location: Path) -> Self {
        Self {
            core: EndpointCore::new(scheduler, location),
        }
    }

    #[must_use]
    pub fn core(&self) -> &Arc<EndpointCore> {
        &self.core
    }

    pub fn create_terminal(
        &self,
        relative_path: &str,
        variant: TerminalVariant,
        signature: Signature,
        queue_capacity: usize,
    ) -> Result<TerminalId, Error> {
        self.core.create_terminal(relative_path, variant, signature, queue_capacity)
    }

    pub fn destroy_terminal(&self, id: TerminalId) -> Result<(), Error> {
        self.core.destroy_terminal(id)
    }

    /// Attaches the connection that will carry this leaf's traffic.
    /// Fails `Busy` if one is already attached (a `Leaf` talks to
    /// exactly one peer; use [`Node`] to multiplex several).
    pub fn attach_connection(&self, conn: Arc<dyn ConnectionPeer>) -> Result<(), Error> {
        if self.core.connection_count() != 0 {
            return Err(Error::busy());
        }
        self.core.attach_connection(conn);
        Ok(())
    }

    pub fn detach_connection(&self, connection_id: u64) {
        self.core.detach_connection(connection_id);
    }
}

/// A multi-peer endpoint: any number of connections attached
/// concurrently, with their catalogs aggregated into
/// [`KnownTerminals`] (spec §4.2).
#[derive(Clone)]
pub struct Node {
    core: Arc<EndpointCore>,
    known: Arc<KnownTerminals>,
}

impl Node {
    #[must_use]
    pub fn new(scheduler: Scheduler, location: Path) -> Self {
        let core = EndpointCore::new(scheduler, location);
        let known = KnownTerminals::new();
        core.set_known_sink(Arc::clone(&known));
        Self { core, known }
    }

    #[must_use]
    pub fn core(&self) -> &Arc<EndpointCore> {
        &self.core
    }

    #[must_use]
    pub fn known_terminals(&self) -> &Arc<KnownTerminals> {
        &self.known
    }

    pub fn create_terminal(
        &self,
        relative_path: &str,
        variant: TerminalVariant,
        signature: Signature,
        queue_capacity: usize,
    ) -> Result<TerminalId, Error> {
        self.core.create_terminal(relative_path, variant, signature, queue_capacity)
    }

    pub fn destroy_terminal(&self, id: TerminalId) -> Result<(), Error> {
        self.core.destroy_terminal(id)
    }

    /// Attaches a connection, folding its current catalog into the
    /// aggregated known-terminals view before running the matching pass.
    pub fn attach_connection(&self, conn: Arc<dyn ConnectionPeer>) {
        for (_, key) in conn.remote_catalog() {
            self.known.note_added(key);
        }
        self.core.attach_connection(conn);
    }

    pub fn detach_connection(&self, connection_id: u64) {
        self.core.detach_connection(connection_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Signature;

    struct Noop;
    impl ConnectionPeer for Noop {
        fn connection_id(&self) -> u64 {
            1
        }
        fn remote_catalog(&self) -> Vec<(TerminalId, TerminalKey)> {
            Vec::new()
        }
        fn announce_local(&self, _added: bool, _id: TerminalId, _key: &TerminalKey) {}
        fn make_pub_sink(&self, _remote_id: TerminalId) -> Arc<dyn PeerSink> {
            unimplemented!()
        }
        fn make_scatter_peer(&self, _remote_id: TerminalId) -> Arc<dyn ScatterPeer> {
            unimplemented!()
        }
    }

    #[test]
    fn leaf_create_terminal_attaches_to_registry() {
        let leaf = Leaf::new(Scheduler::new(), Path::new("/a").unwrap());
        let id = leaf
            .create_terminal("pub", TerminalVariant::PublishSubscribe, Signature::new(1), 4)
            .unwrap();
        assert!(leaf.core().registry().contains(id));
    }

    #[test]
    fn leaf_rejects_second_connection() {
        let leaf = Leaf::new(Scheduler::new(), Path::new("/a").unwrap());
        leaf.attach_connection(Arc::new(Noop)).unwrap();
        let err = leaf.attach_connection(Arc::new(Noop)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Busy);
    }

    #[test]
    fn node_known_terminals_tracks_terminals_created_after_attach() {
        use crate::connection::local::LocalConnection;

        let sched = Scheduler::new();
        let node = Node::new(sched.clone(), Path::new("/a").unwrap());
        let leaf = Leaf::new(sched, Path::new("/b").unwrap());
        let _conn = LocalConnection::new(Arc::clone(node.core()), Arc::clone(leaf.core()));
        assert!(node.known_terminals().snapshot().is_empty());

        let id = leaf
            .create_terminal("topic", TerminalVariant::PublishSubscribe, Signature::new(1), 4)
            .unwrap();
        assert_eq!(node.known_terminals().snapshot().len(), 1);

        leaf.destroy_terminal(id).unwrap();
        assert!(node.known_terminals().snapshot().is_empty());
    }

    #[test]
    fn node_known_terminals_drains_on_connection_detach() {
        use crate::connection::local::LocalConnection;

        let sched = Scheduler::new();
        let node = Node::new(sched.clone(), Path::new("/a").unwrap());
        let leaf = Leaf::new(sched, Path::new("/b").unwrap());
        leaf.create_terminal("topic", TerminalVariant::PublishSubscribe, Signature::new(1), 4)
            .unwrap();
        let conn = LocalConnection::new(Arc::clone(node.core()), Arc::clone(leaf.core()));
        assert_eq!(node.known_terminals().snapshot().len(), 1);

        conn.destroy();
        assert!(node.known_terminals().snapshot().is_empty());
    }

    #[test]
    fn node_accepts_many_connections() {
        let node = Node::new(Scheduler::new(), Path::new("/a").unwrap());
        node.attach_connection(Arc::new(Noop));
        node.attach_connection(Arc::new(Noop));
        assert_eq!(node.core().connection_count(), 2);
    }
}
