//! Process-wide signal distribution (spec §4.8).
//!
//! Distinct from the Log/Operational/Anomaly fabrics: a `SignalSet` is a
//! local subscriber to a user-defined flag enum, and `raise_signal`
//! dispatches to every subscribed set process-wide, not just those on one
//! endpoint. Grounded on this codebase's `signal::kind` module for the
//! flag type (already present as [`flags::Signal`]) and on its
//! `sync::semaphore` for the single-pending-waiter registration idiom
//! `SignalSet::await_signal` reuses.

pub mod flags;
pub mod registry;

pub use flags::Signal;
pub use registry::{SignalSet, SignalSetId};
