//! Logging and diagnostics.
//!
//! Internal `tracing` events (gated behind the `tracing-integration`
//! feature, mirroring how the rest of this codebase treats `tracing` as
//! optional) are for a developer running the process under `RUST_LOG`.
//! [`fabric_layer`] bridges those events into the separate, wire-visible
//! Log distribution fabric described in spec §4.12.

pub mod fabric_layer;
pub mod level;
pub mod metrics;
pub mod verbosity;

pub use fabric_layer::{FabricLayer, LogSink};
pub use level::Severity;
pub use metrics::{Counter, Gauge};
pub use verbosity::Verbosity;
