//! Operational conditions and the `Process/Operational` fabric (spec
//! §4.10).
//!
//! [`OperationalFabric`] publishes the AND of every registered
//! [`OperationalCondition`] to a cached-producer terminal at
//! `<location>/Process/Operational`. [`ManualOperationalCondition`] is
//! flipped directly by user code; [`Dependency`] derives its condition
//! from a vector of terminal/binding state sources, reusing
//! [`crate::observer::StateSource`] rather than re-deriving a second
//! binding-watch mechanism; [`ProcessDependency`] additionally ANDs in a
//! foreign process's own published operational boolean.

use crate::endpoint::EndpointCore;
use crate::error::Error;
use crate::observer::{ListenerToken, StateSource};
use crate::terminal::pubsub::PubSubTerminal;
use crate::terminal::{TerminalCore, TerminalId};
use crate::types::{BindingState, Encoding, Message, Path, Signature, SubscriptionState, Time, TerminalVariant};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use super::{OPERATIONAL_SIGNATURE, DEFAULT_QUEUE_CAPACITY};

/// Opaque identity of a registered [`OperationalFabric::add_listener`]
/// callback, for removal.
pub type OperationalListenerId = u64;

/// A named boolean condition the process's operational state ANDs
/// together (spec §4.10).
pub trait OperationalCondition: Send + Sync {
    fn name(&self) -> &str;
    fn is_met(&self) -> bool;
    /// Installs the callback this condition must invoke whenever its
    /// `is_met()` value may have changed, so
    /// [`OperationalFabric::add_condition`]'s caller-side fabric can
    /// re-evaluate the AND without polling.
    fn set_on_change(&self, on_change: Arc<dyn Fn() + Send + Sync>);
}

/// A condition manually flipped by user code via [`Self::set`]/[`Self::clear`].
pub struct ManualOperationalCondition {
    name: String,
    met: AtomicBool,
    on_change: Mutex<Option<Arc<dyn Fn() + Send + Sync>>>,
}

impl ManualOperationalCondition {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            met: AtomicBool::new(false),
            on_change: Mutex::new(None),
        })
    }

    pub fn set(&self) {
        self.met.store(true, Ordering::SeqCst);
        self.notify();
    }

    pub fn clear(&self) {
        self.met.store(false, Ordering::SeqCst);
        self.notify();
    }

    fn notify(&self) {
        if let Some(f) = self.on_change.lock().clone() {
            f();
        }
    }
}

impl OperationalCondition for ManualOperationalCondition {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_met(&self) -> bool {
        self.met.load(Ordering::SeqCst)
    }

    fn set_on_change(&self, on_change: Arc<dyn Fn() + Send + Sync>) {
        *self.on_change.lock() = Some(on_change);
    }
}

/// Which half of a [`StateSource`]'s `(binding, subscription)` pair a
/// [`DependencyInput`] watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DependencyTarget {
    Binding,
    Subscription,
}

/// One input to a [`Dependency`]: a terminal or binding's state source,
/// and which half of it (binding or subscription) must reach its
/// established value.
pub struct DependencyInput {
    source: Arc<dyn StateSource>,
    target: DependencyTarget,
}

impl DependencyInput {
    /// Watches `source`'s binding state.
    #[must_use]
    pub fn on_binding(source: Arc<dyn StateSource>) -> Self {
        Self {
            source,
            target: DependencyTarget::Binding,
        }
    }

    /// Watches `source`'s subscription state.
    #[must_use]
    pub fn on_subscription(source: Arc<dyn StateSource>) -> Self {
        Self {
            source,
            target: DependencyTarget::Subscription,
        }
    }

    fn currently_met(&self) -> bool {
        let (binding, subscription) = self.source.current_state();
        match self.target {
            DependencyTarget::Binding => binding == BindingState::Established,
            DependencyTarget::Subscription => subscription == SubscriptionState::Subscribed,
        }
    }
}

/// A condition derived from a vector of terminal/binding state sources
/// (spec §4.10): met only once every input has *ever* reached its
/// established value *and* currently holds it.
pub struct Dependency {
    name: String,
    inputs: Vec<DependencyInput>,
    ever_met: Vec<AtomicBool>,
    on_change: Mutex<Option<Arc<dyn Fn() + Send + Sync>>>,
    tokens: Mutex<Vec<ListenerToken>>,
}

impl Dependency {
    #[must_use]
    pub fn new(name: impl Into<String>, inputs: Vec<DependencyInput>) -> Arc<Self> {
        let ever_met = inputs.iter().map(|i| AtomicBool::new(i.currently_met())).collect();
        let dep = Arc::new(Self {
            name: name.into(),
            inputs,
            ever_met,
            on_change: Mutex::new(None),
            tokens: Mutex::new(Vec::new()),
        });
        dep.arm();
        dep
    }

    fn arm(self: &Arc<Self>) {
        let mut tokens = Vec::with_capacity(self.inputs.len());
        for (idx, input) in self.inputs.iter().enumerate() {
            let this = Arc::clone(self);
            let target = input.target;
            let token = input.source.add_state_listener(Box::new(move |binding, subscription| {
                let met = match target {
                    DependencyTarget::Binding => binding == BindingState::Established,
                    DependencyTarget::Subscription => subscription == SubscriptionState::Subscribed,
                };
                if met {
                    this.ever_met[idx].store(true, Ordering::SeqCst);
                }
                this.notify();
            }));
            tokens.push(token);
        }
        *self.tokens.lock() = tokens;
    }

    fn notify(&self) {
        if let Some(f) = self.on_change.lock().clone() {
            f();
        }
    }
}

impl OperationalCondition for Dependency {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_met(&self) -> bool {
        self.inputs
            .iter()
            .enumerate()
            .all(|(idx, input)| self.ever_met[idx].load(Ordering::SeqCst) && input.currently_met())
    }

    fn set_on_change(&self, on_change: Arc<dyn Fn() + Send + Sync>) {
        *self.on_change.lock() = Some(on_change);
    }
}

/// A [`Dependency`] additionally gated on the cached operational boolean
/// published at `<foreign_location>/Process/Operational` (spec §4.10).
pub struct ProcessDependency {
    name: String,
    dependency: Arc<Dependency>,
    remote_met: AtomicBool,
    on_change: Mutex<Option<Arc<dyn Fn() + Send + Sync>>>,
}

impl ProcessDependency {
    /// `foreign_location` is the full path of the remote process whose
    /// published operational state this depends on (e.g. `/other/proc`);
    /// a terminal is attached at `<foreign_location>/Process/Operational`
    /// to track it.
    pub fn new(
        endpoint: &Arc<EndpointCore>,
        name: impl Into<String>,
        foreign_location: &Path,
        inputs: Vec<DependencyInput>,
    ) -> Result<Arc<Self>, Error> {
        let name = name.into();
        let dependency = Dependency::new(name.clone(), inputs);
        let target_path = foreign_location.join("Process/Operational");
        let id = endpoint.create_terminal_at(
            target_path,
            TerminalVariant::CachedConsumer,
            OPERATIONAL_SIGNATURE,
            DEFAULT_QUEUE_CAPACITY,
        )?;
        let record = endpoint.get_terminal(id).expect("terminal just created");
        let TerminalCore::PubSub(terminal) = record.core else {
            unreachable!("CachedConsumer terminals always build a PubSub core")
        };

        let pd = Arc::new(Self {
            name,
            dependency: Arc::clone(&dependency),
            remote_met: AtomicBool::new(false),
            on_change: Mutex::new(None),
        });
        let notify_target = Arc::clone(&pd);
        dependency.set_on_change(Arc::new(move || notify_target.notify()));
        Self::arm_remote(Arc::clone(&pd), terminal);
        Ok(pd)
    }

    fn arm_remote(this: Arc<Self>, terminal: Arc<PubSubTerminal>) {
        let _ = terminal.clone().receive_message(move |res| {
            let Ok((msg, _cached)) = res else {
                return;
            };
            let met = msg.payload().first().copied() == Some(1);
            this.remote_met.store(met, Ordering::SeqCst);
            this.notify();
            Self::arm_remote(Arc::clone(&this), terminal);
        });
    }

    fn notify(&self) {
        if let Some(f) = self.on_change.lock().clone() {
            f();
        }
    }
}

impl OperationalCondition for ProcessDependency {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_met(&self) -> bool {
        self.dependency.is_met() && self.remote_met.load(Ordering::SeqCst)
    }

    fn set_on_change(&self, on_change: Arc<dyn Fn() + Send + Sync>) {
        *self.on_change.lock() = Some(on_change);
    }
}

/// Publishes the process-wide operational boolean: the AND of every
/// registered [`OperationalCondition`] (spec §4.10). Lives at
/// `<location>/Process/Operational` as a cached producer; an empty
/// condition set is vacuously operational (`true`).
pub struct OperationalFabric {
    terminal_id: TerminalId,
    terminal: Arc<PubSubTerminal>,
    conditions: Mutex<Vec<Arc<dyn OperationalCondition>>>,
    current: AtomicBool,
    listeners: Mutex<Vec<(OperationalListenerId, Box<dyn Fn(bool) + Send + Sync>)>>,
    next_listener: AtomicU64,
}

impl OperationalFabric {
    pub(crate) fn new(endpoint: &Arc<EndpointCore>) -> Result<Arc<Self>, Error> {
        let id = endpoint.create_terminal(
            "Process/Operational",
            TerminalVariant::CachedProducer,
            OPERATIONAL_SIGNATURE,
            DEFAULT_QUEUE_CAPACITY,
        )?;
        let record = endpoint.get_terminal(id).expect("terminal just created");
        let TerminalCore::PubSub(terminal) = record.core else {
            unreachable!("CachedProducer terminals always build a PubSub core")
        };
        let fabric = Arc::new(Self {
            terminal_id: id,
            terminal,
            conditions: Mutex::new(Vec::new()),
            current: AtomicBool::new(true),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
        });
        fabric.publish_current();
        Ok(fabric)
    }

    #[must_use]
    pub fn terminal_id(&self) -> TerminalId {
        self.terminal_id
    }

    /// Registers a condition, wiring its change notifications back into
    /// this fabric's re-evaluation, and re-evaluates immediately.
    pub fn add_condition(self: &Arc<Self>, condition: Arc<dyn OperationalCondition>) {
        let this = Arc::clone(self);
        condition.set_on_change(Arc::new(move || this.reevaluate()));
        self.conditions.lock().push(condition);
        self.reevaluate();
    }

    pub fn remove_condition(&self, name: &str) {
        self.conditions.lock().retain(|c| c.name() != name);
        self.reevaluate();
    }

    fn reevaluate(&self) {
        let met = self.conditions.lock().iter().all(|c| c.is_met());
        let changed = self.current.swap(met, Ordering::SeqCst) != met;
        if changed {
            self.publish_current();
            for (_, listener) in self.listeners.lock().iter() {
                listener(met);
            }
        }
    }

    fn publish_current(&self) {
        let met = self.current.load(Ordering::SeqCst);
        let payload = vec![u8::from(met)];
        let msg = Message::new(OPERATIONAL_SIGNATURE, Encoding::Raw, payload).with_timestamp(Time::now());
        let _ = self.terminal.try_publish(msg);
    }

    #[must_use]
    pub fn is_operational(&self) -> bool {
        self.current.load(Ordering::SeqCst)
    }

    pub(crate) fn add_listener(&self, listener: impl Fn(bool) + Send + Sync + 'static) -> OperationalListenerId {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, Box::new(listener)));
        id
    }

    pub(crate) fn remove_listener(&self, id: OperationalListenerId) {
        self.listeners.lock().retain(|(existing, _)| *existing != id);
    }
}
