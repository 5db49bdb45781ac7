//! The in-process connection shortcut (spec §4.7): two endpoints wired
//! directly together with no handshake, no socket, and no framing —
//! matching and message delivery are plain function calls through the
//! [`crate::endpoint::ConnectionPeer`] seam.
//!
//! Unlike a [`crate::connection::tcp::TcpConnection`] a local connection
//! has no `Idle`/`Handshaking` phase: it is alive the instant
//! [`LocalConnection::new`] returns, and stays alive until
//! [`LocalConnection::destroy`] tears down both sides' matches.

use crate::endpoint::{ConnectionPeer, EndpointCore};
use crate::error::Error;
use crate::terminal::pubsub::PeerSink;
use crate::terminal::scatter::{GatherSink, ScatterPeer};
use crate::terminal::{TerminalCore, TerminalId, TerminalKey};
use crate::types::{Message, OperationId};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

struct Shared {
    id: u64,
    left: Arc<EndpointCore>,
    right: Arc<EndpointCore>,
    left_view: OnceLock<Arc<dyn ConnectionPeer>>,
    right_view: OnceLock<Arc<dyn ConnectionPeer>>,
    death: Mutex<Option<Box<dyn FnOnce(Result<(), Error>) + Send>>>,
}

struct LocalPeerHandle {
    shared: Arc<Shared>,
    this_is_left: bool,
}

impl LocalPeerHandle {
    fn this(&self) -> &Arc<EndpointCore> {
        if self.this_is_left {
            &self.shared.left
        } else {
            &self.shared.right
        }
    }

    fn other(&self) -> &Arc<EndpointCore> {
        if self.this_is_left {
            &self.shared.right
        } else {
            &self.shared.left
        }
    }

    fn other_view(&self) -> Arc<dyn ConnectionPeer> {
        let cell = if self.this_is_left {
            &self.shared.right_view
        } else {
            &self.shared.left_view
        };
        Arc::clone(cell.get().expect("sibling view set before any connection traffic"))
    }
}

impl ConnectionPeer for LocalPeerHandle {
    fn connection_id(&self) -> u64 {
        self.shared.id
    }

    fn remote_catalog(&self) -> Vec<(TerminalId, TerminalKey)> {
        self.other().registry().snapshot_entries()
    }

    fn announce_local(&self, added: bool, id: TerminalId, key: &TerminalKey) {
        let other_view = self.other_view();
        if added {
            self.other().on_remote_terminal_added(&other_view, id, key);
        } else {
            self.other()
                .on_remote_terminal_removed(other_view.connection_id(), id, key);
        }
    }

    fn make_pub_sink(&self, remote_id: TerminalId) -> Arc<dyn PeerSink> {
        Arc::new(LocalPubSink {
            target: Arc::clone(self.other()),
            remote_id,
        })
    }

    fn make_scatter_peer(&self, remote_id: TerminalId) -> Arc<dyn ScatterPeer> {
        Arc::new(LocalScatterPeer {
            target: Arc::clone(self.other()),
            remote_id,
        })
    }
}

struct LocalPubSink {
    target: Arc<EndpointCore>,
    remote_id: TerminalId,
}

impl PeerSink for LocalPubSink {
    fn deliver(&self, msg: Message, cached: bool) {
        if let Some(record) = self.target.get_terminal(self.remote_id) {
            if let TerminalCore::PubSub(ps) = record.core {
                ps.on_message(msg, cached);
            }
        }
    }
}

struct LocalScatterPeer {
    target: Arc<EndpointCore>,
    remote_id: TerminalId,
}

impl ScatterPeer for LocalScatterPeer {
    fn deliver_scatter(&self, operation_id: OperationId, message: Message, reply_to: Arc<dyn GatherSink>) {
        if let Some(record) = self.target.get_terminal(self.remote_id) {
            if let TerminalCore::Operation(op) = record.core {
                op.on_scatter_received(operation_id, message, reply_to);
            }
        }
    }
}

/// A live, handshake-free connection directly linking two endpoints in
/// the same process.
pub struct LocalConnection {
    shared: Arc<Shared>,
}

impl LocalConnection {
    /// Wires `left` and `right` together: each side's current terminal
    /// catalog is matched against the other's, and every future
    /// creation/destruction on either side propagates immediately.
    #[must_use]
    pub fn new(left: Arc<EndpointCore>, right: Arc<EndpointCore>) -> Arc<Self> {
        let shared = Arc::new(Shared {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            left,
            right,
            left_view: OnceLock::new(),
            right_view: OnceLock::new(),
            death: Mutex::new(None),
        });
        let left_view: Arc<dyn ConnectionPeer> = Arc::new(LocalPeerHandle {
            shared: Arc::clone(&shared),
            this_is_left: true,
        });
        let right_view: Arc<dyn ConnectionPeer> = Arc::new(LocalPeerHandle {
            shared: Arc::clone(&shared),
            this_is_left: false,
        });
        shared
            .left_view
            .set(Arc::clone(&left_view))
            .unwrap_or_else(|_| unreachable!());
        shared
            .right_view
            .set(Arc::clone(&right_view))
            .unwrap_or_else(|_| unreachable!());

        shared.left.attach_connection(left_view);
        shared.right.attach_connection(right_view);
        Arc::new(Self { shared })
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Registers a handler fired when the connection is destroyed.
    /// Local connections never fail or time out; the only way to
    /// trigger this is [`Self::destroy`].
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

    /// Tears down both sides' matches and fires the pending
    /// `await_death` handler, if any, with `Ok(())`.
    pub fn destroy(&self) {
        self.shared.left.detach_connection(self.shared.id);
        self.shared.right.detach_connection(self.shared.id);
        if let Some(handler) = self.shared.death.lock().take() {
            handler(Ok(()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Leaf;
    use crate::runtime::scheduler::Scheduler;
    use crate::types::{Encoding, Path, Signature, TerminalVariant};
    use std::sync::Mutex as StdMutex;

    #[test]
    fn connecting_matches_preexisting_terminals() {
        let sched = Scheduler::new();
        let a = Leaf::new(sched.clone(), Path::new("/a").unwrap());
        let b = Leaf::new(sched.clone(), Path::new("/b").unwrap());
        let pub_id = a
            .create_terminal("topic", TerminalVariant::Producer, Signature::new(1), 4)
            .unwrap();
        let sub_id = b
            .create_terminal("topic", TerminalVariant::Consumer, Signature::new(1), 4)
            .unwrap();
        let _conn = LocalConnection::new(Arc::clone(a.core()), Arc::clone(b.core()));

        let got = Arc::new(StdMutex::new(None));
        let got2 = Arc::clone(&got);
        let b_record = b.core().get_terminal(sub_id).unwrap();
        let TerminalCore::PubSub(sub_core) = b_record.core else { panic!() };
        sub_core
            .receive_message(move |res| *got2.lock().unwrap() = Some(res.unwrap().0.payload().to_vec()))
            .unwrap();

        let a_record = a.core().get_terminal(pub_id).unwrap();
        let TerminalCore::PubSub(pub_core) = a_record.core else { panic!() };
        pub_core
            .publish(Message::new(Signature::new(1), Encoding::Raw, vec![5, 6, 7]))
            .unwrap();
        sched.poll();

        assert_eq!(got.lock().unwrap().take(), Some(vec![5, 6, 7]));
    }

    #[test]
    fn creating_terminal_after_connecting_still_matches() {
        let sched = Scheduler::new();
        let a = Leaf::new(sched.clone(), Path::new("/a").unwrap());
        let b = Leaf::new(sched.clone(), Path::new("/b").unwrap());
        let _conn = LocalConnection::new(Arc::clone(a.core()), Arc::clone(b.core()));

        let sub_id = b
            .create_terminal("topic", TerminalVariant::Consumer, Signature::new(1), 4)
            .unwrap();
        let pub_id = a
            .create_terminal("topic", TerminalVariant::Producer, Signature::new(1), 4)
            .unwrap();

        let b_record = b.core().get_terminal(sub_id).unwrap();
        let TerminalCore::PubSub(sub_core) = b_record.core else { panic!() };
        assert_eq!(sub_core.binding_state(), crate::types::BindingState::Established);

        let a_record = a.core().get_terminal(pub_id).unwrap();
        let TerminalCore::PubSub(pub_core) = a_record.core else { panic!() };
        assert_eq!(pub_core.binding_state(), crate::types::BindingState::Established);
    }

    #[test]
    fn destroy_unmatches_both_sides() {
        let sched = Scheduler::new();
        let a = Leaf::new(sched.clone(), Path::new("/a").unwrap());
        let b = Leaf::new(sched.clone(), Path::new("/b").unwrap());
        let pub_id = a
            .create_terminal("topic", TerminalVariant::Producer, Signature::new(1), 4)
            .unwrap();
        let _sub_id = b
            .create_terminal("topic", TerminalVariant::Consumer, Signature::new(1), 4)
            .unwrap();
        let conn = LocalConnection::new(Arc::clone(a.core()), Arc::clone(b.core()));

        let a_record = a.core().get_terminal(pub_id).unwrap();
        let TerminalCore::PubSub(pub_core) = a_record.core else { panic!() };
        assert_eq!(pub_core.binding_state(), crate::types::BindingState::Established);

        conn.destroy();
        assert_eq!(pub_core.binding_state(), crate::types::BindingState::Released);
    }

    #[test]
    fn await_death_fires_on_destroy() {
        let sched = Scheduler::new();
        let a = Leaf::new(sched.clone(), Path::new("/a").unwrap());
        let b = Leaf::new(sched.clone(), Path::new("/b").unwrap());
        let conn = LocalConnection::new(Arc::clone(a.core()), Arc::clone(b.core()));

        let got = Arc::new(StdMutex::new(false));
        let got2 = Arc::clone(&got);
        conn.await_death(move |res| {
            res.unwrap();
            *got2.lock().unwrap() = true;
        })
        .unwrap();
        conn.destroy();
        assert!(*got.lock().unwrap());
    }
}
