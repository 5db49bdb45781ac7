//! One-way publish family and the `Master`/`Slave` bidirectional pair
//! (spec §4.4, §4.6).
//!
//! `PublishSubscribe`/`Producer`/`Consumer` and their cached counterparts
//! are all instances of the same shape: a terminal that may publish, may
//! receive, optionally caches one payload per direction it carries. A
//! plain `Consumer` is receive-only (`can_publish = false`); a `Producer`
//! is publish-only; a `PublishSubscribe` terminal does both (a primitive
//! may publish and also bind elsewhere to receive). `Master`/`Slave`
//! reuse this core unchanged: both sides publish *and* receive, just
//! with the opposite schema conventionally assigned to each direction —
//! the wire payload is opaque either way, so the core does not need a
//! separate bidirectional type.

use crate::error::{Error, ErrorKind};
use crate::runtime::scheduler::{LaneId, Scheduler};
use crate::sync::TxQueue;
use crate::types::{BindingState, Message, SubscriptionState};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// A listener notified with the current `(binding, subscription)` state
/// pair whenever either changes. The seam [`observer::BindingObserver`]/
/// [`observer::SubscriptionObserver`]/the operational fabric's
/// `Dependency` use to watch a terminal without owning it.
///
/// [`observer::BindingObserver`]: crate::observer::BindingObserver
/// [`observer::SubscriptionObserver`]: crate::observer::SubscriptionObserver
pub type StateListener = Box<dyn Fn(BindingState, SubscriptionState) + Send + Sync>;

/// Opaque identity of a registered [`StateListener`], for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateListenerId(u64);

/// Destination for a published message. Local connections implement this
/// by calling straight into the peer's [`PubSubTerminal::on_message`];
/// TCP connections implement it by framing and writing to the socket.
pub trait PeerSink: Send + Sync {
    fn deliver(&self, msg: Message, cached: bool);
}

struct PeerLink {
    tx: Arc<TxQueue<Message>>,
    sink: Arc<dyn PeerSink>,
}

type ReceiveHandler = Box<dyn FnOnce(Result<(Message, bool), Error>) + Send>;

struct Inbox {
    pending: VecDeque<(Message, bool)>,
    waiting: Option<ReceiveHandler>,
}

/// Shared core behind every one-way publish-family terminal and behind
/// each side of a `Master`/`Slave` pair.
pub struct PubSubTerminal {
    can_publish: bool,
    can_receive: bool,
    cached: bool,
    scheduler: Scheduler,
    lane: LaneId,
    cache_out: Mutex<Option<Message>>,
    cache_in: Mutex<Option<Message>>,
    inbox: Mutex<Inbox>,
    peers: Mutex<Vec<PeerLink>>,
    bound_receiver_count: AtomicUsize,
    binding_state: Mutex<BindingState>,
    subscription_state: Mutex<SubscriptionState>,
    queue_capacity: usize,
    listeners: Mutex<Vec<(StateListenerId, StateListener)>>,
    next_listener_id: AtomicU64,
}

impl PubSubTerminal {
    #[must_use]
    pub fn new(
        scheduler: Scheduler,
        can_publish: bool,
        can_receive: bool,
        cached: bool,
        queue_capacity: usize,
    ) -> Arc<Self> {
        let lane = scheduler.new_lane();
        Arc::new(Self {
            can_publish,
            can_receive,
            cached,
            scheduler,
            lane,
            cache_out: Mutex::new(None),
            cache_in: Mutex::new(None),
            inbox: Mutex::new(Inbox {
                pending: VecDeque::new(),
                waiting: None,
            }),
            peers: Mutex::new(Vec::new()),
            bound_receiver_count: AtomicUsize::new(0),
            binding_state: Mutex::new(BindingState::Released),
            subscription_state: Mutex::new(SubscriptionState::Unsubscribed),
            queue_capacity,
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
        })
    }

    #[must_use]
    pub fn binding_state(&self) -> BindingState {
        *self.binding_state.lock()
    }

    #[must_use]
    pub fn subscription_state(&self) -> SubscriptionState {
        *self.subscription_state.lock()
    }

    /// Registers a listener fired with the current state pair immediately,
    /// and again on every subsequent binding/subscription transition.
    pub fn add_state_listener(
        &self,
        listener: impl Fn(BindingState, SubscriptionState) + Send + Sync + 'static,
    ) -> StateListenerId {
        let id = StateListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        listener(self.binding_state(), self.subscription_state());
        self.listeners.lock().push((id, Box::new(listener)));
        id
    }

    pub fn remove_state_listener(&self, id: StateListenerId) {
        self.listeners.lock().retain(|(existing, _)| *existing != id);
    }

    fn notify_listeners(&self) {
        let (binding, subscription) = (self.binding_state(), self.subscription_state());
        for (_, listener) in self.listeners.lock().iter() {
            listener(binding, subscription);
        }
    }

    /// Called by the matching layer when a new matching peer becomes
    /// reachable. Registers it as a publish target and, if this terminal
    /// is cached and holds a payload, sends it once, tagged `cached`.
    pub fn on_peer_matched(&self, sink: Arc<dyn PeerSink>) {
        *self.binding_state.lock() = BindingState::Established;
        if self.can_publish {
            self.bound_receiver_count.fetch_add(1, Ordering::AcqRel);
            *self.subscription_state.lock() = SubscriptionState::Subscribed;
        }
        if self.can_receive {
            *self.subscription_state.lock() = SubscriptionState::Subscribed;
        }
        let cached_payload = if self.cached {
            self.cache_out.lock().clone()
        } else {
            None
        };
        self.peers.lock().push(PeerLink {
            tx: Arc::new(TxQueue::new(self.queue_capacity)),
            sink: Arc::clone(&sink),
        });
        if let Some(msg) = cached_payload {
            sink.deliver(msg, true);
        }
        self.notify_listeners();
    }

    /// Called by the matching layer when a previously matched peer is no
    /// longer reachable (connection lost, remote terminal destroyed).
    pub fn on_peer_unmatched(&self, sink: &Arc<dyn PeerSink>) {
        let now_empty = {
            let mut peers = self.peers.lock();
            peers.retain(|p| !Arc::ptr_eq(&p.sink, sink));
            if self.can_publish && !peers.is_empty() {
                self.bound_receiver_count
                    .fetch_sub(1, Ordering::AcqRel);
            }
            peers.is_empty()
        };
        if now_empty {
            *self.binding_state.lock() = BindingState::Released;
            *self.subscription_state.lock() = SubscriptionState::Unsubscribed;
        }
        self.notify_listeners();
    }

    /// Delivers a received message, tagged `cached` on a freshly
    /// established binding's first replay. Updates the inbound cache for
    /// cached variants.
    pub fn on_message(&self, msg: Message, cached: bool) {
        if self.cached {
            *self.cache_in.lock() = Some(msg.clone());
        }
        let handler = {
            let mut inbox = self.inbox.lock();
            if let Some(h) = inbox.waiting.take() {
                Some(h)
            } else {
                inbox.pending.push_back((msg.clone(), cached));
                None
            }
        };
        if let Some(h) = handler {
            self.scheduler.post_on_lane(self.lane, move || h(Ok((msg, cached))));
        }
    }

    /// Publishes unconditionally; fails `NotBound`/`TxQueueFull`.
    pub fn publish(&self, msg: Message) -> Result<(), Error> {
        self.do_publish(msg, false).map(|_| ())
    }

    /// Publishes without raising: returns `Ok(false)` instead of
    /// `NotBound`/`TxQueueFull` when delivery could not proceed.
    pub fn try_publish(&self, msg: Message) -> Result<bool, Error> {
        self.do_publish(msg, true)
    }

    /// Publishes with `retry = true` semantics: a full peer queue
    /// suspends delivery to that peer (on a dedicated thread) until
    /// space frees or the peer link is torn down, instead of failing
    /// immediately.
    pub fn publish_retry(&self, msg: Message) -> Result<(), Error> {
        if !self.can_publish {
            return Err(Error::wrong_object_type());
        }
        let links: Vec<(Arc<TxQueue<Message>>, Arc<dyn PeerSink>)> = {
            let guard = self.peers.lock();
            if guard.is_empty() {
                return Err(Error::new(ErrorKind::NotBound));
            }
            guard.iter().map(|p| (Arc::clone(&p.tx), Arc::clone(&p.sink))).collect()
        };
        if self.cached {
            *self.cache_out.lock() = Some(msg.clone());
        }
        for (tx, sink) in links {
            let msg = msg.clone();
            std::thread::spawn(move || {
                if tx.push_blocking(msg).is_ok() {
                    if let Some(m) = tx.pop_blocking() {
                        sink.deliver(m, false);
                    }
                }
            });
        }
        Ok(())
    }

    fn do_publish(&self, msg: Message, soft: bool) -> Result<bool, Error> {
        if !self.can_publish {
            return Err(Error::wrong_object_type());
        }
        let links: Vec<(Arc<TxQueue<Message>>, Arc<dyn PeerSink>)> = {
            let guard = self.peers.lock();
            if guard.is_empty() {
                if soft {
                    if self.cached {
                        *self.cache_out.lock() = Some(msg);
                    }
                    return Ok(false);
                }
                return Err(Error::new(ErrorKind::NotBound));
            }
            guard.iter().map(|p| (Arc::clone(&p.tx), Arc::clone(&p.sink))).collect()
        };
        for (tx, sink) in &links {
            match tx.try_push(msg.clone()) {
                Ok(()) => {
                    // Local delivery drains the queue inline; a TCP link's
                    // sink instead hands this off to the socket writer.
                    if let Some(m) = tx.pop_blocking() {
                        sink.deliver(m, false);
                    }
                }
                Err(e) if soft && e.kind() == ErrorKind::TxQueueFull => return Ok(false),
                Err(e) => return Err(e),
            }
        }
        if self.cached {
            *self.cache_out.lock() = Some(msg);
        }
        Ok(true)
    }

    /// Registers the next-message handler. Fails `Busy` if one is
    /// already outstanding.
    pub fn receive_message(
        &self,
        handler: impl FnOnce(Result<(Message, bool), Error>) + Send + 'static,
    ) -> Result<(), Error> {
        if !self.can_receive {
            return Err(Error::wrong_object_type());
        }
        let ready = {
            let mut inbox = self.inbox.lock();
            if inbox.waiting.is_some() {
                return Err(Error::new(ErrorKind::Busy));
            }
            inbox.pending.pop_front()
        };
        if let Some((msg, cached)) = ready {
            self.scheduler
                .post_on_lane(self.lane, move || handler(Ok((msg, cached))));
        } else {
            self.inbox.lock().waiting = Some(Box::new(handler));
        }
        Ok(())
    }

    /// Cancels the pending `receive_message` handler, if any.
    pub fn cancel_receive_message(&self) -> bool {
        let handler = self.inbox.lock().waiting.take();
        match handler {
            Some(h) => {
                self.scheduler
                    .post_on_lane(self.lane, move || h(Err(Error::canceled())));
                true
            }
            None => false,
        }
    }

    pub fn get_cached_message(&self) -> Result<Message, Error> {
        if !self.cached {
            return Err(Error::wrong_object_type());
        }
        self.cache_in
            .lock()
            .clone()
            .or_else(|| self.cache_out.lock().clone())
            .ok_or_else(|| Error::new(ErrorKind::NoCachedMessage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Encoding, Signature};
    use std::sync::Mutex as StdMutex;

    struct DirectSink(Arc<PubSubTerminal>);

    impl PeerSink for DirectSink {
        fn deliver(&self, msg: Message, cached: bool) {
            self.0.on_message(msg, cached);
        }
    }

    fn msg(bytes: &[u8]) -> Message {
        Message::new(Signature::new(0x0000_d007), Encoding::Raw, bytes.to_vec())
    }

    #[test]
    fn publish_without_binding_fails_not_bound() {
        let sched = Scheduler::new();
        let publisher = PubSubTerminal::new(sched, true, false, false, 4);
        let err = publisher.publish(msg(&[1])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotBound);
    }

    #[test]
    fn try_publish_without_binding_returns_false() {
        let sched = Scheduler::new();
        let publisher = PubSubTerminal::new(sched, true, false, false, 4);
        assert_eq!(publisher.try_publish(msg(&[1])).unwrap(), false);
    }

    #[test]
    fn bound_publish_reaches_receiver() {
        let sched = Scheduler::new();
        let publisher = PubSubTerminal::new(sched.clone(), true, false, false, 4);
        let receiver = PubSubTerminal::new(sched.clone(), false, true, false, 4);

        publisher.on_peer_matched(Arc::new(DirectSink(Arc::clone(&receiver))));

        let got = Arc::new(StdMutex::new(None));
        let got2 = Arc::clone(&got);
        receiver
            .receive_message(move |res| *got2.lock().unwrap() = Some(res.unwrap()))
            .unwrap();

        publisher.publish(msg(&[1, 2, 3])).unwrap();
        sched.poll();

        let (message, cached) = got.lock().unwrap().take().unwrap();
        assert_eq!(message.payload(), &[1, 2, 3]);
        assert!(!cached);
    }

    #[test]
    fn cached_variant_replays_on_new_binding_then_live() {
        let sched = Scheduler::new();
        let publisher = PubSubTerminal::new(sched.clone(), true, false, true, 4);
        publisher.publish(msg(&[9])).unwrap_or(()); // no peers yet; publish fails, but try_publish below seeds cache
        let _ = publisher.try_publish(msg(&[9]));

        let receiver = PubSubTerminal::new(sched.clone(), false, true, true, 4);
        publisher.on_peer_matched(Arc::new(DirectSink(Arc::clone(&receiver))));
        sched.poll();

        assert_eq!(receiver.get_cached_message().unwrap().payload(), &[9]);

        let got = Arc::new(StdMutex::new(None));
        let got2 = Arc::clone(&got);
        receiver
            .receive_message(move |res| *got2.lock().unwrap() = Some(res.unwrap().1))
            .unwrap();
        sched.poll();
        assert_eq!(got.lock().unwrap().take(), Some(true));

        let got3 = Arc::new(StdMutex::new(None));
        let got4 = Arc::clone(&got3);
        receiver
            .receive_message(move |res| *got4.lock().unwrap() = Some(res.unwrap().1))
            .unwrap();
        publisher.publish(msg(&[10])).unwrap();
        sched.poll();
        assert_eq!(got3.lock().unwrap().take(), Some(false));
    }

    #[test]
    fn state_listener_observes_matched_then_unmatched() {
        let sched = Scheduler::new();
        let publisher = PubSubTerminal::new(sched.clone(), true, false, false, 4);
        let receiver = PubSubTerminal::new(sched.clone(), false, true, false, 4);

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        let id = publisher.add_state_listener(move |binding, subscription| {
            seen2.lock().unwrap().push((binding, subscription));
        });
        assert_eq!(
            seen.lock().unwrap().as_slice(),
            &[(BindingState::Released, SubscriptionState::Unsubscribed)]
        );

        let sink: Arc<dyn PeerSink> = Arc::new(DirectSink(Arc::clone(&receiver)));
        publisher.on_peer_matched(Arc::clone(&sink));
        assert_eq!(
            seen.lock().unwrap().last().copied(),
            Some((BindingState::Established, SubscriptionState::Unsubscribed))
        );

        publisher.on_peer_unmatched(&sink);
        assert_eq!(
            seen.lock().unwrap().last().copied(),
            Some((BindingState::Released, SubscriptionState::Unsubscribed))
        );

        publisher.remove_state_listener(id);
        publisher.on_peer_matched(sink);
        assert_eq!(seen.lock().unwrap().len(), 3);
    }

    #[test]
    fn cancel_receive_message_delivers_canceled() {
        let sched = Scheduler::new();
        let receiver = PubSubTerminal::new(sched.clone(), false, true, false, 4);
        let got = Arc::new(StdMutex::new(None));
        let got2 = Arc::clone(&got);
        receiver
            .receive_message(move |res| *got2.lock().unwrap() = Some(res.err().map(|e| e.kind())))
            .unwrap();
        assert!(receiver.cancel_receive_message());
        sched.poll();
        assert_eq!(got.lock().unwrap().take(), Some(Some(ErrorKind::Canceled)));
        assert!(!receiver.cancel_receive_message());
    }

    #[test]
    fn unmatching_last_peer_releases_binding() {
        let sched = Scheduler::new();
        let publisher = PubSubTerminal::new(sched.clone(), true, false, false, 4);
        let receiver = PubSubTerminal::new(sched.clone(), false, true, false, 4);
        let sink: Arc<dyn PeerSink> = Arc::new(DirectSink(Arc::clone(&receiver)));
        publisher.on_peer_matched(Arc::clone(&sink));
        assert_eq!(publisher.binding_state(), BindingState::Established);
        publisher.on_peer_unmatched(&sink);
        assert_eq!(publisher.binding_state(), BindingState::Released);
    }
}
