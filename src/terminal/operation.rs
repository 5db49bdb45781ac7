//! `ScatterGather` and `Service`/`Client` operations (spec §4.5).
//!
//! Both variants share one [`OperationTable`] shape on the initiating
//! side: allocate an [`OperationId`], fan a message out to every target,
//! and track per-responder completion until the registered callback
//! returns [`ContinuationDecision::Stop`], every expected responder has
//! replied or ignored, the operation is cancelled, or every responder
//! becomes unreachable. The receiving side's exactly-once `respond`/
//! `ignore` contract lives in [`ReceivedOperations`].

use crate::error::{Error, ErrorKind};
use crate::runtime::scheduler::{LaneId, Scheduler};
use crate::types::{Message, OperationId, OperationIdGenerator};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

/// What an initiator's gather callback returns to keep listening for
/// more responses or to end the operation early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinuationDecision {
    Continue,
    Stop,
}

/// Per-response flags carried on an inbound gather message (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GatherFlags(u8);

impl GatherFlags {
    pub const FINISHED: Self = Self(1 << 0);
    pub const IGNORED: Self = Self(1 << 1);
    pub const DEAF: Self = Self(1 << 2);
    pub const BINDING_DESTROYED: Self = Self(1 << 3);
    pub const CONNECTION_LOST: Self = Self(1 << 4);

    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// The wire-carried byte (spec §6's `GatherResponse.flags`).
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }
}

impl fmt::Debug for ScatterGatherOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScatterGatherOutcome")
            .field("flags", &self.flags)
            .field("has_message", &self.message.is_some())
            .finish()
    }
}

/// A single gather response delivered to the initiator's callback.
pub struct ScatterGatherOutcome {
    pub message: Option<Message>,
    pub flags: GatherFlags,
}

type GatherHandler =
    Box<dyn FnMut(Result<ScatterGatherOutcome, Error>) -> ContinuationDecision + Send>;

struct Outstanding {
    expected: usize,
    completed: usize,
    handler: Option<GatherHandler>,
}

/// Initiator-side table of outstanding scatter/gather or request/response
/// operations for one terminal. IDs are monotonic and unique for the
/// lifetime of the outstanding operation (spec's *Operation-ID
/// uniqueness* property).
#[derive(Default)]
pub struct OperationTable {
    ids: OperationIdGenerator,
    outstanding: Mutex<HashMap<OperationId, Outstanding>>,
}

impl OperationTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates an operation ID and registers `handler` to receive every
    /// gather response until completion.
    pub fn start(
        &self,
        expected_responders: usize,
        handler: impl FnMut(Result<ScatterGatherOutcome, Error>) -> ContinuationDecision + Send + 'static,
    ) -> OperationId {
        let id = self.ids.next();
        self.outstanding.lock().insert(
            id,
            Outstanding {
                expected: expected_responders,
                completed: 0,
                handler: Some(Box::new(handler)),
            },
        );
        id
    }

    /// Delivers one gather response. Late responses for an operation that
    /// already completed (or was never started) are silently dropped.
    pub fn on_response(&self, id: OperationId, outcome: Result<ScatterGatherOutcome, Error>) {
        let mut table = self.outstanding.lock();
        let Some(entry) = table.get_mut(&id) else {
            return;
        };
        let finished = match &outcome {
            Ok(o) => o.flags.contains(GatherFlags::FINISHED),
            Err(_) => true,
        };
        let mut handler = entry.handler.take().expect("handler taken twice for one operation");
        drop(table);
        let decision = handler(outcome);
        let mut table = self.outstanding.lock();
        let Some(entry) = table.get_mut(&id) else {
            return;
        };
        if finished {
            entry.completed += 1;
        }
        if decision == ContinuationDecision::Stop || entry.completed >= entry.expected {
            table.remove(&id);
        } else {
            entry.handler = Some(handler);
        }
    }

    /// Cancels an outstanding operation, delivering `Canceled` to its
    /// handler exactly once. Returns `false` if nothing was outstanding.
    pub fn cancel(&self, id: OperationId) -> bool {
        let entry = self.outstanding.lock().remove(&id);
        match entry {
            Some(mut entry) => {
                if let Some(mut handler) = entry.handler.take() {
                    handler(Err(Error::canceled()));
                }
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn outstanding_count(&self) -> usize {
        self.outstanding.lock().len()
    }
}

/// A responder's decision about one scattered/request message, forwarded
/// to whatever turns it into a [`GatherFlags`] outcome for the initiator.
pub enum ResponderDecision {
    Respond(Message),
    Ignore,
}

type RespondHandler = Box<dyn FnOnce(ResponderDecision) + Send>;

/// A scattered/request message delivered to a responder, with an
/// exactly-once `respond`/`ignore` contract (spec §4.5).
pub struct ScatteredMessage {
    operation_id: OperationId,
    payload: Message,
    responded: std::sync::Arc<std::sync::atomic::AtomicBool>,
    reply: Option<RespondHandler>,
}

impl ScatteredMessage {
    pub(crate) fn new(
        operation_id: OperationId,
        payload: Message,
        reply: impl FnOnce(ResponderDecision) + Send + 'static,
    ) -> Self {
        Self {
            operation_id,
            payload,
            responded: std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false)),
            reply: Some(Box::new(reply)),
        }
    }

    #[must_use]
    pub const fn operation_id(&self) -> OperationId {
        self.operation_id
    }

    #[must_use]
    pub fn payload(&self) -> &Message {
        &self.payload
    }

    /// Responds with `payload`. Fails `InvalidOperationId` if `respond`
    /// or `ignore` has already been called for this message.
    pub fn respond(mut self, payload: Message) -> Result<(), Error> {
        self.take_reply()?(ResponderDecision::Respond(payload));
        Ok(())
    }

    /// Declines to respond. Fails `InvalidOperationId` on a second call.
    pub fn ignore(mut self) -> Result<(), Error> {
        self.take_reply()?(ResponderDecision::Ignore);
        Ok(())
    }

    fn take_reply(&mut self) -> Result<RespondHandler, Error> {
        if self
            .responded
            .swap(true, std::sync::atomic::Ordering::AcqRel)
        {
            return Err(Error::new(ErrorKind::InvalidOperationId)
                .with_context("respond/ignore already called for this operation"));
        }
        Ok(self.reply.take().expect("reply consumed without responded flag"))
    }
}

impl Drop for ScatteredMessage {
    fn drop(&mut self) {
        // Auto-ignore on destruction without a call, per spec §4.5's "a
        // leak; implementations may auto-ignore on destruction".
        if !self.responded.swap(true, std::sync::atomic::Ordering::AcqRel) {
            if let Some(reply) = self.reply.take() {
                reply(ResponderDecision::Ignore);
            }
        }
    }
}

/// Receiving-side bookkeeping: tracks which outstanding requests have not
/// yet been responded to, mainly so a terminal can auto-ignore every
/// still-pending one when it is destroyed.
#[derive(Default)]
pub struct ReceivedOperation {
    pub operation_id: OperationId,
}
