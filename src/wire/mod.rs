//! Wire-level framing for non-local connections (spec §6).
//!
//! A frame carries: a 32-bit magic prefix (handshake only), a 16-bit
//! version triple (handshake only), a tag byte identifying the frame
//! kind, an optional operation ID (varint), an optional terminal
//! reference (the numeric local ID negotiated during discovery), a
//! 32-bit payload length, and the payload bytes. Everything after the
//! handshake is [`Frame`]s; the handshake itself is [`Handshake`].

pub mod frame;
pub mod handshake;
pub mod varint;

pub use frame::{Frame, FrameKind, TerminalRef};
pub use handshake::{Handshake, HandshakeAck};
