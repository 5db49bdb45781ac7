//! The terminal kernel: the fourteen variants, their matching, and their
//! send/receive queues (spec §3, §4.3-§4.6).
//!
//! A [`Terminal`] is a handle into an owning [`crate::endpoint::Endpoint`]'s
//! [`registry::TerminalRegistry`]; the registry is the arena, terminals
//! reference their slot by [`crate::util::ArenaIndex`] rather than by
//! pointer so that an endpoint can destroy a terminal out from under a
//! handle a caller still holds (later calls fail `InvalidHandle`).
//!
//! [`pubsub`] implements the one-way publish family (`PublishSubscribe`,
//! `CachedPublishSubscribe`, `Producer`/`Consumer`,
//! `CachedProducer`/`CachedConsumer`) and the bidirectional
//! `Master`/`Slave` pair as two coupled one-way cores. [`operation`]
//! implements `ScatterGather` and `Service`/`Client` on a shared
//! [`operation::OperationTable`].

pub mod binding;
pub mod operation;
pub mod pubsub;
pub mod registry;
pub mod scatter;

pub use binding::TerminalBinding;
pub use operation::{
    GatherFlags, OperationTable, ReceivedOperation, ScatterGatherOutcome, ScatteredMessage,
};
pub use pubsub::{PubSubTerminal, StateListener, StateListenerId};
pub use registry::{TerminalCore, TerminalRecord, TerminalRegistry};
pub use scatter::{GatherSink, OperationTerminal, ScatterPeer};

use crate::types::{BindingState, Path, Signature, SubscriptionState, TerminalVariant};
use crate::util::ArenaIndex;

/// The `(path, variant, signature)` triple that identifies a terminal for
/// matching purposes (spec §4.3: "two terminals match iff their full
/// paths are equal and signatures are equal").
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TerminalKey {
    pub path: Path,
    pub variant: TerminalVariant,
    pub signature: Signature,
}

impl TerminalKey {
    #[must_use]
    pub fn new(path: Path, variant: TerminalVariant, signature: Signature) -> Self {
        Self {
            path,
            variant,
            signature,
        }
    }

    /// Whether `self` (a remote catalog entry) matches a local terminal
    /// of `local_variant` at the same registry slot. Primitives match
    /// same-variant/same-signature peers directly; convenience variants
    /// match their paired counterpart.
    #[must_use]
    pub fn matches_variant(&self, local_variant: TerminalVariant, local_signature: Signature) -> bool {
        if local_signature != self.signature {
            return false;
        }
        if local_variant.is_primitive() {
            self.variant == local_variant
        } else {
            Some(self.variant) == local_variant.counterpart()
        }
    }
}

/// A slot identity within one endpoint's [`registry::TerminalRegistry`].
pub type TerminalId = ArenaIndex;

/// Combined state snapshot a caller can poll without a pending await.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TerminalState {
    pub binding: BindingState,
    pub subscription: SubscriptionState,
}
