//! The wire-visible message record.

use super::{Signature, Time};

/// How the opaque payload bytes are encoded.
///
/// The core never parses `Message::payload`; the tag is advisory metadata
/// carried alongside it so a receiver's application layer can pick a
/// decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Protobuf, with the concrete message type implied by the signature.
    Protobuf,
    /// MessagePack.
    MsgPack,
    /// Uninterpreted bytes.
    Raw,
}

/// A message exchanged between matching terminals.
#[derive(Debug, Clone)]
pub struct Message {
    signature: Signature,
    encoding: Encoding,
    payload: Vec<u8>,
    timestamp: Option<Time>,
}

impl Message {
    #[must_use]
    pub fn new(signature: Signature, encoding: Encoding, payload: Vec<u8>) -> Self {
        Self {
            signature,
            encoding,
            payload,
            timestamp: None,
        }
    }

    /// Stamps the message with the given send time, returning it.
    ///
    /// Every message sent through a [`crate::terminal`] is stamped at send
    /// time with the sender's clock; this supplies that stamp explicitly
    /// for tests and replay.
    #[must_use]
    pub fn with_timestamp(mut self, time: Time) -> Self {
        self.timestamp = Some(time);
        self
    }

    #[must_use]
    pub const fn signature(&self) -> Signature {
        self.signature
    }

    #[must_use]
    pub const fn encoding(&self) -> Encoding {
        self.encoding
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    #[must_use]
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    #[must_use]
    pub const fn timestamp(&self) -> Option<Time> {
        self.timestamp
    }
}
