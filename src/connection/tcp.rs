//! The socket-backed connection state machine (spec §4.7, §6):
//! `Idle -> Handshaking -> Alive -> Dead`.
//!
//! A [`TcpConnection`] starts `Idle` the moment [`TcpClient::connect`] or
//! [`TcpServer::accept`] hands one back: a live TCP socket with no Yogi
//! semantics yet. [`TcpConnection::assign`] performs the handshake against
//! a chosen endpoint, spawns the reader/writer/heartbeat threads, and
//! transitions to `Alive`. From there the connection behaves exactly like
//! [`crate::connection::local::LocalConnection`] through the
//! [`crate::endpoint::ConnectionPeer`] seam, except catalog announcements
//! and message delivery cross a [`Frame`] boundary instead of a function
//! call.

use crate::config::ConnectionTarget;
use crate::endpoint::{ConnectionPeer, EndpointCore};
use crate::error::{Error, ErrorKind};
use crate::terminal::operation::GatherFlags;
use crate::terminal::pubsub::PeerSink;
use crate::terminal::scatter::{GatherSink, ScatterPeer};
use crate::terminal::{TerminalCore, TerminalId, TerminalKey};
use crate::types::{Message, OperationId, Path};
use crate::wire::frame::DiscoveryRecord;
use crate::wire::{Frame, FrameKind, Handshake, HandshakeAck, TerminalRef};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::BufReader;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Where a [`TcpConnection`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// A live socket, handshake not yet attempted.
    Idle,
    Handshaking,
    Alive,
    Dead,
}

type DeathHandler = Box<dyn FnOnce(Result<(), Error>) + Send>;

struct Shared {
    id: u64,
    state: Mutex<ConnectionState>,
    writer_tx: Mutex<Option<Sender<Frame>>>,
    endpoint: OnceLock<Arc<EndpointCore>>,
    self_view: OnceLock<Arc<dyn ConnectionPeer>>,
    /// Our own local terminals' wire refs, so an inbound `Publish`/
    /// `Scatter` frame's `terminal_ref` resolves back to a
    /// [`TerminalId`].
    local_refs: Mutex<HashMap<u32, TerminalId>>,
    /// Remote terminals this connection has announced to us, keyed by the
    /// synthetic [`TerminalId`] minted from their wire ref.
    remote_catalog: Mutex<HashMap<TerminalId, (u32, TerminalKey)>>,
    pending_scatters: Mutex<HashMap<u64, (OperationId, Arc<dyn GatherSink>)>>,
    next_wire_op: AtomicU64,
    death: Mutex<Option<DeathHandler>>,
    shutdown: AtomicBool,
}

/// One socket-backed connection to a remote process.
pub struct TcpConnection {
    shared: Arc<Shared>,
    stream: TcpStream,
}

impl TcpConnection {
    fn new_idle(stream: TcpStream) -> Arc<Self> {
        Arc::new(Self {
            shared: Arc::new(Shared {
                id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
                state: Mutex::new(ConnectionState::Idle),
                writer_tx: Mutex::new(None),
                endpoint: OnceLock::new(),
                self_view: OnceLock::new(),
                local_refs: Mutex::new(HashMap::new()),
                remote_catalog: Mutex::new(HashMap::new()),
                pending_scatters: Mutex::new(HashMap::new()),
                next_wire_op: AtomicU64::new(1),
                death: Mutex::new(None),
                shutdown: AtomicBool::new(false),
            }),
            stream,
        })
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }

    /// Performs the handshake against `handshake` and, on success, wires
    /// this connection into `endpoint` and spawns its background threads.
    /// Fails `AlreadyAssigned` if this is not the first call. `timeout`
    /// bounds the handshake round-trip only; `None` waits indefinitely.
    pub fn assign(
        self: &Arc<Self>,
        endpoint: Arc<EndpointCore>,
        handshake: Handshake,
        timeout: Option<Duration>,
    ) -> Result<(), Error> {
        {
            let mut state = self.shared.state.lock();
            if *state != ConnectionState::Idle {
                return Err(Error::new(ErrorKind::AlreadyAssigned));
            }
            *state = ConnectionState::Handshaking;
        }

        self.stream.set_read_timeout(timeout).map_err(Error::from)?;
        let mut writer = self.stream.try_clone().map_err(Error::from)?;
        handshake.encode(&mut writer).map_err(Error::from)?;
        HandshakeAck::Accepted.encode(&mut writer).map_err(Error::from)?;

        let mut reader = BufReader::new(self.stream.try_clone().map_err(Error::from)?);
        let peer_handshake = Handshake::decode(&mut reader)?;
        handshake.verify_network(&peer_handshake)?;
        HandshakeAck::decode(&mut reader)?.into_result()?;
        self.stream.set_read_timeout(None).map_err(Error::from)?;

        let (tx, rx) = mpsc::channel::<Frame>();
        *self.shared.writer_tx.lock() = Some(tx);
        self.shared
            .endpoint
            .set(Arc::clone(&endpoint))
            .unwrap_or_else(|_| unreachable!("assign is single-use"));
        let self_view: Arc<dyn ConnectionPeer> = Arc::clone(self) as Arc<dyn ConnectionPeer>;
        self.shared
            .self_view
            .set(Arc::clone(&self_view))
            .unwrap_or_else(|_| unreachable!("assign is single-use"));

        spawn_writer(writer, rx);
        spawn_heartbeat(Arc::clone(&self.shared));
        spawn_reader(Arc::clone(self), reader);

        *self.shared.state.lock() = ConnectionState::Alive;
        endpoint.attach_connection(self_view);
        Ok(())
    }

    /// Registers a handler fired once when the connection transitions to
    /// `Dead`, with the error that caused it (`Ok(())` on a clean
    /// [`Self::destroy`]). Fails `Busy` if one is already pending.
    pub fn await_death(&self, handler: impl FnOnce(Result<(), Error>) + Send + 'static) -> Result<(), Error> {
        let mut death = self.shared.death.lock();
        if death.is_some() {
            return Err(Error::busy());
        }
        *death = Some(Box::new(handler));
        Ok(())
    }

    pub fn cancel_await_death(&self) -> bool {
        let handler = self.shared.death.lock().take();
        match handler {
            Some(h) => {
                h(Err(Error::canceled()));
                true
            }
            None => false,
        }
    }

    /// Tears the connection down: shuts the socket both ways (unblocking
    /// the reader thread), detaches from the endpoint, and fires the
    /// pending death handler with `Ok(())`.
    pub fn destroy(&self) {
        mark_dead(&self.shared, Ok(()));
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
        if let (Some(ep), Some(view)) = (self.shared.endpoint.get(), self.shared.self_view.get()) {
            ep.detach_connection(view.connection_id());
        }
    }
}

fn mark_dead(shared: &Arc<Shared>, reason: Result<(), Error>) {
    if shared.shutdown.swap(true, Ordering::AcqRel) {
        return;
    }
    *shared.state.lock() = ConnectionState::Dead;
    *shared.writer_tx.lock() = None;
    if let Some(handler) = shared.death.lock().take() {
        handler(reason);
    }
}

fn spawn_writer(mut writer: TcpStream, rx: mpsc::Receiver<Frame>) {
    std::thread::spawn(move || {
        while let Ok(frame) = rx.recv() {
            if frame.encode(&mut writer).is_err() {
                break;
            }
        }
    });
}

fn spawn_heartbeat(shared: Arc<Shared>) {
    std::thread::spawn(move || loop {
        std::thread::sleep(Duration::from_secs(5));
        if shared.shutdown.load(Ordering::Acquire) {
            return;
        }
        let Some(tx) = shared.writer_tx.lock().clone() else {
            return;
        };
        if tx.send(Frame::new(FrameKind::Heartbeat)).is_err() {
            return;
        }
    });
}

fn spawn_reader(conn: Arc<TcpConnection>, mut reader: BufReader<TcpStream>) {
    std::thread::spawn(move || loop {
        match Frame::decode(&mut reader) {
            Ok(frame) => dispatch_frame(&conn, frame),
            Err(e) => {
                mark_dead(&conn.shared, Err(e));
                return;
            }
        }
    });
}

fn dispatch_frame(conn: &Arc<TcpConnection>, frame: Frame) {
    let Some(endpoint) = conn.shared.endpoint.get() else {
        return;
    };
    match frame.kind {
        FrameKind::TerminalAdd(rec) => {
            let Some(self_view) = conn.shared.self_view.get() else {
                return;
            };
            let key = discovery_key(&rec);
            let remote_id = TerminalId::new(rec.terminal_ref.0, 0);
            conn.shared
                .remote_catalog
                .lock()
                .insert(remote_id, (rec.terminal_ref.0, key.clone()));
            endpoint.on_remote_terminal_added(self_view, remote_id, &key);
        }
        FrameKind::TerminalRemove(rec) => {
            let remote_id = TerminalId::new(rec.terminal_ref.0, 0);
            let key = discovery_key(&rec);
            conn.shared.remote_catalog.lock().remove(&remote_id);
            endpoint.on_remote_terminal_removed(conn.shared.id, remote_id, &key);
        }
        FrameKind::CatalogEnd | FrameKind::Heartbeat => {}
        FrameKind::Publish {
            terminal_ref,
            cached,
            message,
        } => {
            let local_id = conn.shared.local_refs.lock().get(&terminal_ref.0).copied();
            if let Some(record) = local_id.and_then(|id| endpoint.get_terminal(id)) {
                if let TerminalCore::PubSub(ps) = record.core {
                    ps.on_message(message, cached);
                }
            }
        }
        FrameKind::Scatter {
            terminal_ref,
            operation_id,
            message,
        } => {
            let local_id = conn.shared.local_refs.lock().get(&terminal_ref.0).copied();
            let Some(op_id) = OperationId::from_wire(operation_id) else {
                return;
            };
            if let Some(record) = local_id.and_then(|id| endpoint.get_terminal(id)) {
                if let TerminalCore::Operation(op) = record.core {
                    let reply_to: Arc<dyn GatherSink> = Arc::new(TcpGatherReply {
                        shared: Arc::clone(&conn.shared),
                        terminal_ref,
                        wire_op: operation_id,
                    });
                    op.on_scatter_received(op_id, message, reply_to);
                }
            }
        }
        FrameKind::GatherResponse {
            operation_id,
            flags,
            message,
            ..
        } => {
            let entry = conn.shared.pending_scatters.lock().remove(&operation_id);
            if let Some((op_id, sink)) = entry {
                sink.deliver_gather(
                    op_id,
                    Ok(crate::terminal::operation::ScatterGatherOutcome {
                        message,
                        flags: GatherFlags::from_bits(flags),
                    }),
                );
            }
        }
    }
}

fn discovery_key(rec: &DiscoveryRecord) -> TerminalKey {
    TerminalKey::new(
        Path::new(rec.name.clone()).unwrap_or_else(|_| Path::root()),
        rec.variant,
        rec.signature,
    )
}

impl ConnectionPeer for TcpConnection {
    fn connection_id(&self) -> u64 {
        self.shared.id
    }

    fn remote_catalog(&self) -> Vec<(TerminalId, TerminalKey)> {
        self.shared
            .remote_catalog
            .lock()
            .iter()
            .map(|(id, (_, key))| (*id, key.clone()))
            .collect()
    }

    fn announce_local(&self, added: bool, id: TerminalId, key: &TerminalKey) {
        let Some(tx) = self.shared.writer_tx.lock().clone() else {
            return;
        };
        let wire_ref = id.index();
        if added {
            self.shared.local_refs.lock().insert(wire_ref, id);
        } else {
            self.shared.local_refs.lock().remove(&wire_ref);
        }
        let rec = DiscoveryRecord {
            terminal_ref: TerminalRef(wire_ref),
            variant: key.variant,
            signature: key.signature,
            name: key.path.as_str().to_string(),
        };
        let kind = if added {
            FrameKind::TerminalAdd(rec)
        } else {
            FrameKind::TerminalRemove(rec)
        };
        let _ = tx.send(Frame::new(kind));
    }

    fn make_pub_sink(&self, remote_id: TerminalId) -> Arc<dyn PeerSink> {
        let wire_ref = self
            .shared
            .remote_catalog
            .lock()
            .get(&remote_id)
            .map_or(remote_id.index(), |(r, _)| *r);
        Arc::new(TcpPubSink {
            shared: Arc::clone(&self.shared),
            wire_ref,
        })
    }

    fn make_scatter_peer(&self, remote_id: TerminalId) -> Arc<dyn ScatterPeer> {
        let wire_ref = self
            .shared
            .remote_catalog
            .lock()
            .get(&remote_id)
            .map_or(remote_id.index(), |(r, _)| *r);
        Arc::new(TcpScatterPeerImpl {
            shared: Arc::clone(&self.shared),
            wire_ref,
        })
    }
}

struct TcpPubSink {
    shared: Arc<Shared>,
    wire_ref: u32,
}

impl PeerSink for TcpPubSink {
    fn deliver(&self, msg: Message, cached: bool) {
        if let Some(tx) = self.shared.writer_tx.lock().clone() {
            let _ = tx.send(Frame::new(FrameKind::Publish {
                terminal_ref: TerminalRef(self.wire_ref),
                cached,
                message: msg,
            }));
        }
    }
}

struct TcpScatterPeerImpl {
    shared: Arc<Shared>,
    wire_ref: u32,
}

impl ScatterPeer for TcpScatterPeerImpl {
    fn deliver_scatter(&self, operation_id: OperationId, message: Message, reply_to: Arc<dyn GatherSink>) {
        let Some(tx) = self.shared.writer_tx.lock().clone() else {
            return;
        };
        let wire_op = self.shared.next_wire_op.fetch_add(1, Ordering::Relaxed);
        self.shared
            .pending_scatters
            .lock()
            .insert(wire_op, (operation_id, reply_to));
        let _ = tx.send(Frame::new(FrameKind::Scatter {
            terminal_ref: TerminalRef(self.wire_ref),
            operation_id: wire_op,
            message,
        }));
    }
}

/// Reports a responder's decision back across the wire as a
/// `GatherResponse` frame, echoing the wire operation id the initiating
/// peer minted for this exchange.
struct TcpGatherReply {
    shared: Arc<Shared>,
    terminal_ref: TerminalRef,
    wire_op: u64,
}

impl GatherSink for TcpGatherReply {
    fn deliver_gather(&self, _operation_id: OperationId, outcome: Result<crate::terminal::operation::ScatterGatherOutcome, Error>) {
        let Some(tx) = self.shared.writer_tx.lock().clone() else {
            return;
        };
        let (flags, message) = match outcome {
            Ok(o) => (o.flags.bits(), o.message),
            Err(_) => (GatherFlags::FINISHED.union(GatherFlags::DEAF).bits(), None),
        };
        let _ = tx.send(Frame::new(FrameKind::GatherResponse {
            terminal_ref: self.terminal_ref,
            operation_id: self.wire_op,
            flags,
            message,
        }));
    }
}

/// Connects out to a remote [`TcpServer`], producing an `Idle` connection
/// ready for [`TcpConnection::assign`].
pub struct TcpClient;

impl TcpClient {
    pub fn connect(target: &ConnectionTarget) -> Result<Arc<TcpConnection>, Error> {
        let stream = TcpStream::connect(target.resolve()?)
            .map_err(|e| Error::new(ErrorKind::Connect).with_context(e.to_string()))?;
        Ok(TcpConnection::new_idle(stream))
    }
}

/// Listens for inbound connections, producing `Idle` connections ready
/// for [`TcpConnection::assign`].
pub struct TcpServer {
    listener: TcpListener,
}

impl TcpServer {
    pub fn bind(addr: SocketAddr) -> Result<Self, Error> {
        let listener = TcpListener::bind(addr)
            .map_err(|e| Error::new(ErrorKind::BindSocket).with_context(e.to_string()))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| Error::new(ErrorKind::Listen).with_context(e.to_string()))?;
        Ok(Self { listener })
    }

    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }

    /// Blocks the calling thread until a connection arrives or
    /// `cancel.store(true)`.
    pub fn accept(&self, cancel: &Arc<AtomicBool>) -> Result<Arc<TcpConnection>, Error> {
        loop {
            if cancel.load(Ordering::Acquire) {
                return Err(Error::canceled());
            }
            match self.listener.accept() {
                Ok((stream, _addr)) => {
                    stream
                        .set_nonblocking(false)
                        .map_err(|e| Error::new(ErrorKind::Accept).with_context(e.to_string()))?;
                    return Ok(TcpConnection::new_idle(stream));
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(50));
                }
                Err(e) => return Err(Error::new(ErrorKind::Accept).with_context(e.to_string())),
            }
        }
    }

    /// Spawns a background thread that calls [`Self::accept`] once and
    /// reports the result to `handler`. The returned flag, when set,
    /// cancels the pending accept.
    pub fn accept_async(
        self: Arc<Self>,
        handler: impl FnOnce(Result<Arc<TcpConnection>, Error>) + Send + 'static,
    ) -> Arc<AtomicBool> {
        let cancel = Arc::new(AtomicBool::new(false));
        let cancel2 = Arc::clone(&cancel);
        std::thread::spawn(move || {
            let result = self.accept(&cancel2);
            handler(result);
        });
        cancel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Leaf;
    use crate::runtime::scheduler::Scheduler;
    use crate::types::{Encoding, Signature, TerminalVariant};
    use std::sync::Mutex as StdMutex;

    fn loopback_pair() -> (Arc<TcpConnection>, Arc<TcpConnection>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server_side = std::thread::spawn(move || listener.accept().unwrap().0);
        let client_stream = TcpStream::connect(addr).unwrap();
        let server_stream = server_side.join().unwrap();
        (TcpConnection::new_idle(client_stream), TcpConnection::new_idle(server_stream))
    }

    #[test]
    fn assign_both_sides_reaches_alive() {
        let (client, server) = loopback_pair();
        let sched = Scheduler::new();
        let a = Leaf::new(sched.clone(), Path::new("/a").unwrap());
        let b = Leaf::new(sched.clone(), Path::new("/b").unwrap());

        let server2 = Arc::clone(&server);
        let b_core = Arc::clone(b.core());
        let server_thread = std::thread::spawn(move || {
            server2.assign(b_core, Handshake::new("/b"), Some(Duration::from_secs(2)))
        });
        client
            .assign(Arc::clone(a.core()), Handshake::new("/a"), Some(Duration::from_secs(2)))
            .unwrap();
        server_thread.join().unwrap().unwrap();

        assert_eq!(client.state(), ConnectionState::Alive);
        assert_eq!(server.state(), ConnectionState::Alive);
    }

    #[test]
    fn publish_crosses_the_wire() {
        let (client, server) = loopback_pair();
        let sched = Scheduler::new();
        let a = Leaf::new(sched.clone(), Path::new("/a").unwrap());
        let b = Leaf::new(sched.clone(), Path::new("/b").unwrap());

        let pub_id = a
            .create_terminal("topic", TerminalVariant::Producer, Signature::new(1), 4)
            .unwrap();
        let server2 = Arc::clone(&server);
        let b_core = Arc::clone(b.core());
        let server_thread = std::thread::spawn(move || {
            server2.assign(b_core, Handshake::new("/b"), Some(Duration::from_secs(2)))
        });
        client
            .assign(Arc::clone(a.core()), Handshake::new("/a"), Some(Duration::from_secs(2)))
            .unwrap();
        server_thread.join().unwrap().unwrap();

        let sub_id = b
            .create_terminal("topic", TerminalVariant::Consumer, Signature::new(1), 4)
            .unwrap();

        let got = Arc::new(StdMutex::new(None));
        let got2 = Arc::clone(&got);
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        loop {
            let b_record = b.core().get_terminal(sub_id).unwrap();
            let TerminalCore::PubSub(sub_core) = b_record.core else { panic!() };
            if sub_core.binding_state() == crate::types::BindingState::Established {
                sub_core
                    .receive_message(move |res| *got2.lock().unwrap() = Some(res.unwrap().0.payload().to_vec()))
                    .unwrap();
                break;
            }
            if std::time::Instant::now() > deadline {
                panic!("binding never established");
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        let a_record = a.core().get_terminal(pub_id).unwrap();
        let TerminalCore::PubSub(pub_core) = a_record.core else { panic!() };
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        loop {
            if pub_core.publish(Message::new(Signature::new(1), Encoding::Raw, vec![7, 8])).is_ok() {
                break;
            }
            if std::time::Instant::now() > deadline {
                panic!("publisher never bound");
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while got.lock().unwrap().is_none() && std::time::Instant::now() < deadline {
            sched.poll();
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(got.lock().unwrap().take(), Some(vec![7, 8]));

        client.destroy();
        server.destroy();
    }
}
