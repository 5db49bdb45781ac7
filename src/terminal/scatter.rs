//! The responder/initiator matching core shared by `ScatterGather` and
//! `Service`/`Client` (spec §4.5), sitting alongside [`super::pubsub`] as
//! the other half of the terminal kernel.
//!
//! Unlike the pub/sub family, a scattered/request message is never
//! queued: if no `receive_scattered_message`/`receive_request` handler
//! is currently registered when one arrives, the responder immediately
//! replies with the `Deaf` flag (spec §4.5's "responder acknowledged but
//! had no bound handler"). This is also why `ScatteredMessage` enforces
//! its exactly-once `respond`/`ignore` contract with a drop-time
//! auto-`ignore`: there is no second chance to deliver it later.

use super::operation::{
    ContinuationDecision, GatherFlags, OperationTable, ResponderDecision, ScatterGatherOutcome,
    ScatteredMessage,
};
use crate::error::{Error, ErrorKind};
use crate::runtime::scheduler::{LaneId, Scheduler};
use crate::types::{BindingState, Message, OperationId, SubscriptionState};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A listener notified with the current `(binding, subscription)` state
/// pair whenever either changes; see [`super::pubsub::StateListener`] for
/// the identical mechanism on the pub/sub side.
pub type StateListener = Box<dyn Fn(BindingState, SubscriptionState) + Send + Sync>;

/// Opaque identity of a registered [`StateListener`], for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateListenerId(u64);

/// A destination a scatter/request can be fanned out to: either another
/// in-process [`OperationTerminal`] or a connection's remote-terminal
/// proxy.
pub trait ScatterPeer: Send + Sync {
    fn deliver_scatter(&self, operation_id: OperationId, message: Message, reply_to: Arc<dyn GatherSink>);
}

/// Where a responder's decision is reported back to: the initiator's own
/// [`OperationTable`] (local) or a connection's outbound `GatherResponse`
/// frame writer (remote).
pub trait GatherSink: Send + Sync {
    fn deliver_gather(&self, operation_id: OperationId, outcome: Result<ScatterGatherOutcome, Error>);
}

type ScatterHandler = Box<dyn FnOnce(Result<ScatteredMessage, Error>) + Send>;

struct ResponderState {
    waiting: Option<ScatterHandler>,
}

/// Shared core behind `ScatterGather` (symmetric, both sides may
/// initiate and respond) and each side of a `Service`/`Client` pair
/// (asymmetric: `Client` only initiates, `Service` only responds).
pub struct OperationTerminal {
    can_initiate: bool,
    can_respond: bool,
    scheduler: Scheduler,
    lane: LaneId,
    table: Arc<OperationTable>,
    peers: Mutex<Vec<Arc<dyn ScatterPeer>>>,
    responder: Mutex<ResponderState>,
    binding_state: Mutex<BindingState>,
    subscription_state: Mutex<SubscriptionState>,
    listeners: Mutex<Vec<(StateListenerId, StateListener)>>,
    next_listener_id: AtomicU64,
}

impl OperationTerminal {
    #[must_use]
    pub fn new(scheduler: Scheduler, can_initiate: bool, can_respond: bool) -> Arc<Self> {
        let lane = scheduler.new_lane();
        Arc::new(Self {
            can_initiate,
            can_respond,
            scheduler,
            lane,
            table: Arc::new(OperationTable::new()),
            peers: Mutex::new(Vec::new()),
            responder: Mutex::new(ResponderState { waiting: None }),
            binding_state: Mutex::new(BindingState::Released),
            subscription_state: Mutex::new(SubscriptionState::Unsubscribed),
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

    pub fn on_peer_matched(&self, peer: Arc<dyn ScatterPeer>) {
        *self.binding_state.lock() = BindingState::Established;
        *self.subscription_state.lock() = SubscriptionState::Subscribed;
        self.peers.lock().push(peer);
        self.notify_listeners();
    }

    pub fn on_peer_unmatched(&self, peer: &Arc<dyn ScatterPeer>) {
        let mut peers = self.peers.lock();
        peers.retain(|p| !Arc::ptr_eq(p, peer));
        if peers.is_empty() {
            *self.binding_state.lock() = BindingState::Released;
            *self.subscription_state.lock() = SubscriptionState::Unsubscribed;
        }
        drop(peers);
        self.notify_listeners();
    }

    /// Initiates a scatter/request. Fails `NotBound` with no reachable
    /// peer. Returns the allocated [`OperationId`] and installs
    /// `handler` to receive every gather response (spec §4.5 steps 1-3).
    pub fn scatter_gather(
        &self,
        message: Message,
        mut handler: impl FnMut(Result<ScatterGatherOutcome, Error>) -> ContinuationDecision + Send + 'static,
    ) -> Result<OperationId, Error> {
        if !self.can_initiate {
            return Err(Error::wrong_object_type());
        }
        let peers = self.peers.lock().clone();
        if peers.is_empty() {
            return Err(Error::new(ErrorKind::NotBound));
        }
        let scheduler = self.scheduler.clone();
        let lane = self.lane;
        let id = self.table.start(peers.len(), move |res| {
            handler(res)
        });
        let sink: Arc<dyn GatherSink> = Arc::new(LocalGatherSink {
            table: Arc::clone(&self.table),
            scheduler: scheduler.clone(),
            lane,
        });
        for peer in peers {
            peer.deliver_scatter(id, message.clone(), Arc::clone(&sink));
        }
        Ok(id)
    }

    /// Cancels an outstanding initiated operation.
    pub fn cancel_scatter_gather(&self, id: OperationId) -> bool {
        self.table.cancel(id)
    }

    /// Called by a peer link when a scatter/request message arrives
    /// addressed to this terminal. Delivers to the waiting handler, or
    /// immediately replies `Deaf` if none is registered.
    pub fn on_scatter_received(
        &self,
        operation_id: OperationId,
        message: Message,
        reply_to: Arc<dyn GatherSink>,
    ) {
        let handler = {
            let mut state = self.responder.lock();
            state.waiting.take()
        };
        let Some(handler) = handler else {
            reply_to.deliver_gather(
                operation_id,
                Ok(ScatterGatherOutcome {
                    message: None,
                    flags: GatherFlags::FINISHED.union(GatherFlags::DEAF),
                }),
            );
            return;
        };
        let scattered = ScatteredMessage::new(operation_id, message, move |decision| {
            let (flags, out) = match decision {
                ResponderDecision::Respond(m) => (GatherFlags::FINISHED, Some(m)),
                ResponderDecision::Ignore => {
                    (GatherFlags::FINISHED.union(GatherFlags::IGNORED), None)
                }
            };
            reply_to.deliver_gather(operation_id, Ok(ScatterGatherOutcome { message: out, flags }));
        });
        self.scheduler
            .post_on_lane(self.lane, move || handler(Ok(scattered)));
    }

    /// Registers the next-scattered-message handler. Fails `Busy` if one
    /// is already outstanding, `WrongObjectType` if this side can't
    /// respond (a bare `Client`).
    pub fn receive_scattered_message(
        &self,
        handler: impl FnOnce(Result<ScatteredMessage, Error>) + Send + 'static,
    ) -> Result<(), Error> {
        if !self.can_respond {
            return Err(Error::wrong_object_type());
        }
        let mut state = self.responder.lock();
        if state.waiting.is_some() {
            return Err(Error::new(ErrorKind::Busy));
        }
        state.waiting = Some(Box::new(handler));
        Ok(())
    }

    /// Cancels the pending `receive_scattered_message` handler, if any.
    pub fn cancel_receive_scattered_message(&self) -> bool {
        let handler = self.responder.lock().waiting.take();
        match handler {
            Some(h) => {
                self.scheduler
                    .post_on_lane(self.lane, move || h(Err(Error::canceled())));
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn outstanding_operation_count(&self) -> usize {
        self.table.outstanding_count()
    }
}

struct LocalGatherSink {
    table: Arc<OperationTable>,
    scheduler: Scheduler,
    lane: LaneId,
}

impl GatherSink for LocalGatherSink {
    fn deliver_gather(&self, operation_id: OperationId, outcome: Result<ScatterGatherOutcome, Error>) {
        let table = Arc::clone(&self.table);
        self.scheduler
            .post_on_lane(self.lane, move || table.on_response(operation_id, outcome));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Encoding, Signature};
    use std::sync::Mutex as StdMutex;

    struct DirectPeer(Arc<OperationTerminal>);

    impl ScatterPeer for DirectPeer {
        fn deliver_scatter(&self, op_id: OperationId, msg: Message, reply_to: Arc<dyn GatherSink>) {
            self.0.on_scatter_received(op_id, msg, reply_to);
        }
    }

    fn msg(bytes: &[u8]) -> Message {
        Message::new(Signature::new(1), Encoding::Raw, bytes.to_vec())
    }

    #[test]
    fn scatter_without_binding_fails_not_bound() {
        let sched = Scheduler::new();
        let initiator = OperationTerminal::new(sched, true, false);
        let err = initiator.scatter_gather(msg(&[1]), |_| ContinuationDecision::Stop).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotBound);
    }

    #[test]
    fn responder_ignore_completes_initiator_with_ignored_flag() {
        let sched = Scheduler::new();
        let initiator = OperationTerminal::new(sched.clone(), true, false);
        let responder = OperationTerminal::new(sched.clone(), false, true);
        initiator.on_peer_matched(Arc::new(DirectPeer(Arc::clone(&responder))));

        responder
            .receive_scattered_message(|res| {
                res.unwrap().ignore().unwrap();
            })
            .unwrap();

        let got = Arc::new(StdMutex::new(None));
        let got2 = Arc::clone(&got);
        initiator
            .scatter_gather(msg(&[1, 2, 3]), move |res| {
                *got2.lock().unwrap() = Some(res.unwrap().flags);
                ContinuationDecision::Stop
            })
            .unwrap();
        sched.poll();

        let flags = got.lock().unwrap().take().unwrap();
        assert!(flags.contains(GatherFlags::IGNORED));
    }

    #[test]
    fn responder_respond_delivers_payload_to_initiator() {
        let sched = Scheduler::new();
        let client = OperationTerminal::new(sched.clone(), true, false);
        let service = OperationTerminal::new(sched.clone(), false, true);
        client.on_peer_matched(Arc::new(DirectPeer(Arc::clone(&service))));

        service
            .receive_scattered_message(|res| {
                res.unwrap().respond(msg(&[9, 9])).unwrap();
            })
            .unwrap();

        let got = Arc::new(StdMutex::new(None));
        let got2 = Arc::clone(&got);
        client
            .scatter_gather(msg(&[1]), move |res| {
                let outcome = res.unwrap();
                *got2.lock().unwrap() = outcome.message.map(|m| m.into_payload());
                ContinuationDecision::Stop
            })
            .unwrap();
        sched.poll();

        assert_eq!(got.lock().unwrap().take(), Some(vec![9, 9]));
    }

    #[test]
    fn no_handler_registered_yields_deaf_flag() {
        let sched = Scheduler::new();
        let initiator = OperationTerminal::new(sched.clone(), true, false);
        let responder = OperationTerminal::new(sched.clone(), false, true);
        initiator.on_peer_matched(Arc::new(DirectPeer(Arc::clone(&responder))));

        let got = Arc::new(StdMutex::new(None));
        let got2 = Arc::clone(&got);
        initiator
            .scatter_gather(msg(&[1]), move |res| {
                *got2.lock().unwrap() = Some(res.unwrap().flags);
                ContinuationDecision::Stop
            })
            .unwrap();
        sched.poll();

        assert!(got.lock().unwrap().unwrap().contains(GatherFlags::DEAF));
    }

    #[test]
    fn cancel_scatter_gather_delivers_canceled() {
        let sched = Scheduler::new();
        let initiator = OperationTerminal::new(sched.clone(), true, false);
        let responder = OperationTerminal::new(sched.clone(), false, true);
        initiator.on_peer_matched(Arc::new(DirectPeer(Arc::clone(&responder))));

        let got = Arc::new(StdMutex::new(None));
        let got2 = Arc::clone(&got);
        let id = initiator
            .scatter_gather(msg(&[1]), move |res| {
                *got2.lock().unwrap() = Some(res.err().map(|e| e.kind()));
                ContinuationDecision::Continue
            })
            .unwrap();
        assert!(initiator.cancel_scatter_gather(id));
        assert_eq!(got.lock().unwrap().take(), Some(Some(ErrorKind::Canceled)));
    }

    #[test]
    fn state_listener_observes_matched_then_unmatched() {
        let sched = Scheduler::new();
        let initiator = OperationTerminal::new(sched.clone(), true, false);
        let responder = OperationTerminal::new(sched.clone(), false, true);

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        let id = initiator.add_state_listener(move |binding, subscription| {
            seen2.lock().unwrap().push((binding, subscription));
        });
        assert_eq!(
            seen.lock().unwrap().as_slice(),
            &[(BindingState::Released, SubscriptionState::Unsubscribed)]
        );

        let peer: Arc<dyn ScatterPeer> = Arc::new(DirectPeer(Arc::clone(&responder)));
        initiator.on_peer_matched(Arc::clone(&peer));
        assert_eq!(
            seen.lock().unwrap().last().copied(),
            Some((BindingState::Established, SubscriptionState::Subscribed))
        );

        initiator.on_peer_unmatched(&peer);
        assert_eq!(
            seen.lock().unwrap().last().copied(),
            Some((BindingState::Released, SubscriptionState::Unsubscribed))
        );

        initiator.remove_state_listener(id);
        initiator.on_peer_matched(peer);
        assert_eq!(seen.lock().unwrap().len(), 3);
    }
}
