//! Transport between two endpoints (spec §4.7): the in-process shortcut
//! and the socket-backed state machine, plus the supervisor that keeps a
//! TCP connection to a configured peer alive.
//!
//! Both [`local::LocalConnection`] and [`tcp::TcpConnection`] implement
//! [`crate::endpoint::ConnectionPeer`], so [`crate::endpoint::EndpointCore`]
//! never needs to know which transport it is talking to.

pub mod auto;
pub mod local;
pub mod tcp;

pub use auto::AutoConnectingTcpClient;
pub use local::LocalConnection;
pub use tcp::{ConnectionState, TcpClient, TcpConnection, TcpServer};
