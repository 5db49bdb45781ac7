//! Core wire-level value types shared across the whole crate.
//!
//! - [`signature`]: 32-bit payload-schema tag.
//! - [`path`]: POSIX-like hierarchical terminal path.
//! - [`time`]: monotonic timestamp.
//! - [`operation_id`]: per-terminal scatter/gather and request/response IDs.
//! - [`message`]: the wire-visible message record.

pub mod message;
pub mod operation_id;
pub mod path;
pub mod signature;
pub mod time;
pub mod variant;

pub use message::{Encoding, Message};
pub use operation_id::{OperationId, OperationIdGenerator};
pub use path::Path;
pub use signature::Signature;
pub use time::Time;
pub use variant::{Binding, BindingState, PublishDirection, SubscriptionState, TerminalVariant};
