//! Auto-reposting observers for binding/subscription/message/operational
//! events (spec §4.13).
//!
//! Every observer in this module shares one contract: `add(callback) ->
//! CallbackId`, `remove(id)`, `start()`, `stop()`, `destroy()`. `start`
//! snapshots the current state and fires every registered callback with
//! it, then keeps firing on each subsequent change until `stop`.
//! `destroy` guarantees no callback fires after it returns.
//!
//! [`BindingObserver`] and [`SubscriptionObserver`] watch the
//! `(BindingState, SubscriptionState)` pair [`crate::terminal::pubsub::PubSubTerminal`]
//! and [`crate::terminal::scatter::OperationTerminal`] already expose via
//! their own state-listener mechanism; [`StateSource`] is the seam that
//! lets both terminal cores be watched uniformly without the observer
//! needing to know which one it has. [`MessageObserver`] instead taps
//! the message-delivery path directly, since there is no "state" to poll
//! there, only a stream of deliveries.

use crate::error::Error;
use crate::terminal::pubsub::PubSubTerminal;
use crate::terminal::scatter::OperationTerminal;
use crate::terminal::ScatteredMessage;
use crate::types::{BindingState, Message, SubscriptionState};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Opaque identity of a registered callback, for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

/// A token identifying the single state-listener an observer has
/// registered with its [`StateSource`] while running, so `stop` can
/// remove exactly that one.
pub enum ListenerToken {
    PubSub(crate::terminal::pubsub::StateListenerId),
    Operation(crate::terminal::scatter::StateListenerId),
}

/// The observed-object seam [`BindingObserver`]/[`SubscriptionObserver`]
/// use so they don't need to know whether they're watching a pub/sub
/// terminal or an operation terminal.
pub trait StateSource: Send + Sync {
    fn current_state(&self) -> (BindingState, SubscriptionState);
    fn add_state_listener(
        &self,
        listener: Box<dyn Fn(BindingState, SubscriptionState) + Send + Sync>,
    ) -> ListenerToken;
    fn remove_state_listener(&self, token: ListenerToken);
}

impl StateSource for Arc<PubSubTerminal> {
    fn current_state(&self) -> (BindingState, SubscriptionState) {
        (self.binding_state(), self.subscription_state())
    }
    fn add_state_listener(
        &self,
        listener: Box<dyn Fn(BindingState, SubscriptionState) + Send + Sync>,
    ) -> ListenerToken {
        ListenerToken::PubSub(PubSubTerminal::add_state_listener(self, listener))
    }
    fn remove_state_listener(&self, token: ListenerToken) {
        if let ListenerToken::PubSub(id) = token {
            PubSubTerminal::remove_state_listener(self, id);
        }
    }
}

impl StateSource for Arc<OperationTerminal> {
    fn current_state(&self) -> (BindingState, SubscriptionState) {
        (self.binding_state(), self.subscription_state())
    }
    fn add_state_listener(
        &self,
        listener: Box<dyn Fn(BindingState, SubscriptionState) + Send + Sync>,
    ) -> ListenerToken {
        ListenerToken::Operation(OperationTerminal::add_state_listener(self, listener))
    }
    fn remove_state_listener(&self, token: ListenerToken) {
        if let ListenerToken::Operation(id) = token {
            OperationTerminal::remove_state_listener(self, id);
        }
    }
}

/// Shared machinery behind [`BindingObserver`] and [`SubscriptionObserver`]:
/// a callback list keyed on one projection of the `(binding,
/// subscription)` pair, re-armed against a [`StateSource`] between
/// `start` and `stop`.
struct StateObserverCore<V> {
    source: Arc<dyn StateSource>,
    project: fn(BindingState, SubscriptionState) -> V,
    callbacks: Mutex<Vec<(CallbackId, Box<dyn FnMut(V) + Send>)>>,
    next_id: AtomicU64,
    running: AtomicBool,
    token: Mutex<Option<ListenerToken>>,
    last: Mutex<Option<V>>,
}

impl<V: Copy + PartialEq + Send + Sync + 'static> StateObserverCore<V> {
    fn new(source: Arc<dyn StateSource>, project: fn(BindingState, SubscriptionState) -> V) -> Arc<Self> {
        Arc::new(Self {
            source,
            project,
            callbacks: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            running: AtomicBool::new(false),
            token: Mutex::new(None),
            last: Mutex::new(None),
        })
    }

    fn add(&self, callback: impl FnMut(V) + Send + 'static) -> CallbackId {
        let id = CallbackId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.callbacks.lock().push((id, Box::new(callback)));
        id
    }

    fn remove(&self, id: CallbackId) {
        self.callbacks.lock().retain(|(existing, _)| *existing != id);
    }

    fn fire_all(&self, value: V) {
        for (_, cb) in self.callbacks.lock().iter_mut() {
            cb(value);
        }
    }

    fn start(self: &Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);
        let (binding, subscription) = self.source.current_state();
        let initial = (self.project)(binding, subscription);
        *self.last.lock() = Some(initial);
        self.fire_all(initial);

        let this = Arc::clone(self);
        let listener = move |b: BindingState, s: SubscriptionState| {
            if !this.running.load(Ordering::SeqCst) {
                return;
            }
            let value = (this.project)(b, s);
            let changed = {
                let mut last = this.last.lock();
                let changed = *last != Some(value);
                *last = Some(value);
                changed
            };
            if changed {
                this.fire_all(value);
            }
        };
        let token = self.source.add_state_listener(Box::new(listener));
        *self.token.lock() = Some(token);
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(token) = self.token.lock().take() {
            self.source.remove_state_listener(token);
        }
    }

    fn destroy(&self) {
        self.stop();
        self.callbacks.lock().clear();
    }
}

/// Watches a terminal's [`BindingState`] (spec §4.13).
pub struct BindingObserver(Arc<StateObserverCore<BindingState>>);

impl BindingObserver {
    #[must_use]
    pub fn new(source: Arc<dyn StateSource>) -> Self {
        Self(StateObserverCore::new(source, |b, _| b))
    }

    pub fn add(&self, callback: impl FnMut(BindingState) + Send + 'static) -> CallbackId {
        self.0.add(callback)
    }

    pub fn remove(&self, id: CallbackId) {
        self.0.remove(id);
    }

    pub fn start(&self) {
        self.0.start();
    }

    pub fn stop(&self) {
        self.0.stop();
    }

    pub fn destroy(&self) {
        self.0.destroy();
    }
}

/// Watches a terminal's [`SubscriptionState`] (spec §4.13).
pub struct SubscriptionObserver(Arc<StateObserverCore<SubscriptionState>>);

impl SubscriptionObserver {
    #[must_use]
    pub fn new(source: Arc<dyn StateSource>) -> Self {
        Self(StateObserverCore::new(source, |_, s| s))
    }

    pub fn add(&self, callback: impl FnMut(SubscriptionState) + Send + 'static) -> CallbackId {
        self.0.add(callback)
    }

    pub fn remove(&self, id: CallbackId) {
        self.0.remove(id);
    }

    pub fn start(&self) {
        self.0.start();
    }

    pub fn stop(&self) {
        self.0.stop();
    }

    pub fn destroy(&self) {
        self.0.destroy();
    }
}

/// Watches the process-wide operational boolean published by
/// [`crate::process::operational::OperationalFabric`] (spec §4.10, §4.13).
pub struct OperationalObserver {
    callbacks: Mutex<Vec<(CallbackId, Box<dyn FnMut(bool) + Send>)>>,
    next_id: AtomicU64,
    running: AtomicBool,
    token: Mutex<Option<crate::process::operational::OperationalListenerId>>,
    fabric: Arc<crate::process::operational::OperationalFabric>,
}

impl OperationalObserver {
    #[must_use]
    pub fn new(fabric: Arc<crate::process::operational::OperationalFabric>) -> Arc<Self> {
        Arc::new(Self {
            callbacks: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            running: AtomicBool::new(false),
            token: Mutex::new(None),
            fabric,
        })
    }

    pub fn add(&self, callback: impl FnMut(bool) + Send + 'static) -> CallbackId {
        let id = CallbackId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.callbacks.lock().push((id, Box::new(callback)));
        id
    }

    pub fn remove(&self, id: CallbackId) {
        self.callbacks.lock().retain(|(existing, _)| *existing != id);
    }

    fn fire_all(&self, value: bool) {
        for (_, cb) in self.callbacks.lock().iter_mut() {
            cb(value);
        }
    }

    pub fn start(self: &Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);
        self.fire_all(self.fabric.is_operational());
        let this = Arc::clone(self);
        let token = self.fabric.add_listener(move |value| {
            if this.running.load(Ordering::SeqCst) {
                this.fire_all(value);
            }
        });
        *self.token.lock() = Some(token);
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(token) = self.token.lock().take() {
            self.fabric.remove_listener(token);
        }
    }

    pub fn destroy(&self) {
        self.stop();
        self.callbacks.lock().clear();
    }
}

/// The object a [`MessageObserver`] taps directly for deliveries: either
/// the one-way publish family (many callbacks) or the scatter/request
/// family (single handler), per spec §4.13's "two modes" note.
enum MessageSource {
    PubSub(Arc<PubSubTerminal>),
    Operation(Arc<OperationTerminal>),
}

/// Auto-reposting observer over a terminal's inbound messages (spec
/// §4.13). In publish mode, every registered callback is invoked on each
/// delivery (`add`/`remove`); in scatter/request mode there is at most
/// one handler (`set`/`clear`), and an arriving scattered message is
/// auto-`ignore`d if no handler is set, matching the terminal's own
/// `Deaf`-flag behavior for an unarmed responder.
pub struct MessageObserver {
    source: MessageSource,
    callbacks: Mutex<Vec<(CallbackId, Box<dyn FnMut(Message, bool) + Send>)>>,
    single: Mutex<Option<Box<dyn FnMut(ScatteredMessage) + Send>>>,
    next_id: AtomicU64,
    running: AtomicBool,
}

impl MessageObserver {
    #[must_use]
    pub fn for_pubsub(source: Arc<PubSubTerminal>) -> Arc<Self> {
        Arc::new(Self {
            source: MessageSource::PubSub(source),
            callbacks: Mutex::new(Vec::new()),
            single: Mutex::new(None),
            next_id: AtomicU64::new(1),
            running: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn for_operation(source: Arc<OperationTerminal>) -> Arc<Self> {
        Arc::new(Self {
            source: MessageSource::Operation(source),
            callbacks: Mutex::new(Vec::new()),
            single: Mutex::new(None),
            next_id: AtomicU64::new(1),
            running: AtomicBool::new(false),
        })
    }

    /// Registers a callback fired on every inbound message. `WrongObjectType`
    /// if this observer is in scatter/request mode.
    pub fn add(&self, callback: impl FnMut(Message, bool) + Send + 'static) -> Result<CallbackId, Error> {
        if matches!(self.source, MessageSource::Operation(_)) {
            return Err(Error::wrong_object_type());
        }
        let id = CallbackId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.callbacks.lock().push((id, Box::new(callback)));
        Ok(id)
    }

    pub fn remove(&self, id: CallbackId) {
        self.callbacks.lock().retain(|(existing, _)| *existing != id);
    }

    /// Installs the single scattered-message handler. `WrongObjectType`
    /// if this observer is in publish mode.
    pub fn set(&self, handler: impl FnMut(ScatteredMessage) + Send + 'static) -> Result<(), Error> {
        if matches!(self.source, MessageSource::PubSub(_)) {
            return Err(Error::wrong_object_type());
        }
        *self.single.lock() = Some(Box::new(handler));
        Ok(())
    }

    pub fn clear(&self) {
        *self.single.lock() = None;
    }

    pub fn start(self: &Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);
        match &self.source {
            MessageSource::PubSub(terminal) => Self::arm_pubsub(Arc::clone(self), Arc::clone(terminal)),
            MessageSource::Operation(terminal) => Self::arm_operation(Arc::clone(self), Arc::clone(terminal)),
        }
    }

    fn arm_pubsub(this: Arc<Self>, terminal: Arc<PubSubTerminal>) {
        let _ = terminal.clone().receive_message(move |res| {
            if !this.running.load(Ordering::SeqCst) {
                return;
            }
            if let Ok((msg, cached)) = res {
                for (_, cb) in this.callbacks.lock().iter_mut() {
                    cb(msg.clone(), cached);
                }
                Self::arm_pubsub(Arc::clone(&this), Arc::clone(&terminal));
            }
        });
    }

    fn arm_operation(this: Arc<Self>, terminal: Arc<OperationTerminal>) {
        let _ = terminal.clone().receive_scattered_message(move |res| {
            if !this.running.load(Ordering::SeqCst) {
                return;
            }
            if let Ok(scattered) = res {
                let handled = this.single.lock().as_mut().map(|h| h(scattered));
                if handled.is_none() {
                    // No handler installed: auto-ignore, matching the
                    // `Deaf` behavior a bare terminal exhibits on its own.
                }
                Self::arm_operation(Arc::clone(&this), Arc::clone(&terminal));
            }
        });
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn destroy(&self) {
        self.stop();
        self.callbacks.lock().clear();
        *self.single.lock() = None;
    }
}
