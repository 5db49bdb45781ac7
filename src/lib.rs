//! Yogi: decoupled messaging and RPC middleware for distributed processes.
//!
//! A process embeds a local [`endpoint::Leaf`] or [`endpoint::Node`],
//! attaches named [`terminal`]s to it, and exchanges typed messages with
//! matching terminals on other endpoints once the endpoints are joined by
//! a [`connection`] (in-process or TCP). On top of that messaging kernel
//! sit an operational-state/anomaly/dependency model, a log/verbosity
//! distribution fabric, and a small immutable [`config::ProcessConfig`]
//! boundary — all published through terminals like everything else.
//!
//! Handlers are plain `FnOnce`/`FnMut` closures posted to a
//! [`runtime::scheduler::Scheduler`] worker, never `async`/`await`: every
//! suspending call is an explicit `await_*`/`receive_*`/`start_async`
//! paired with a matching `cancel_*` that delivers `Canceled` exactly
//! once to a still-pending handler.

pub mod config;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod observability;
pub mod observer;
pub mod process;
pub mod runtime;
pub mod signal;
pub mod sync;
pub mod terminal;
pub mod timer;
pub mod types;
pub mod util;
pub mod wire;

pub use config::{ConnectionTarget, Identification, ProcessConfig};
pub use connection::{AutoConnectingTcpClient, ConnectionState, LocalConnection, TcpClient, TcpConnection, TcpServer};
pub use endpoint::{Leaf, Node};
pub use error::{Error, ErrorFamily, ErrorKind, Result};
pub use process::Process;
pub use runtime::scheduler::Scheduler;
pub use timer::Timer;
pub use types::{
    Binding, BindingState, Encoding, Message, OperationId, Path, PublishDirection, Signature,
    SubscriptionState, TerminalVariant, Time,
};
