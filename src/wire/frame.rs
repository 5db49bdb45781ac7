//! Frame kinds exchanged after a successful handshake (spec §6).
//!
//! Terminal discovery frames (`TerminalAdd`/`TerminalRemove`) stream the
//! initial catalogue and its incremental deltas; `Publish` carries
//! one-way and master/slave traffic; `Scatter`/`GatherResponse` carry
//! scatter/gather and request/response traffic; `Heartbeat` resets the
//! idle/liveness deadline of §4.7's `Alive` state.

use super::varint;
use crate::error::{Error, ErrorKind};
use crate::types::{Encoding, Message, Signature, TerminalVariant, Time};
use std::io::{self, Read, Write};

/// The numeric local terminal ID negotiated during discovery — the wire
/// counterpart of an [`crate::terminal::TerminalId`], since an
/// `ArenaIndex` itself is never sent over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TerminalRef(pub u32);

/// One entry of a terminal-discovery catalogue or delta (spec §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryRecord {
    pub terminal_ref: TerminalRef,
    pub variant: TerminalVariant,
    pub signature: Signature,
    pub name: String,
}

/// Per-response flags carried on a `GatherResponse` frame, mirroring
/// [`crate::terminal::operation::GatherFlags`]'s bit layout on the wire.
pub type WireGatherFlags = u8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameKind {
    TerminalAdd(DiscoveryRecord),
    TerminalRemove(DiscoveryRecord),
    /// Sentinel ending the initial catalogue stream.
    CatalogEnd,
    Publish {
        terminal_ref: TerminalRef,
        cached: bool,
        message: Message,
    },
    Scatter {
        terminal_ref: TerminalRef,
        operation_id: u64,
        message: Message,
    },
    GatherResponse {
        terminal_ref: TerminalRef,
        operation_id: u64,
        flags: WireGatherFlags,
        message: Option<Message>,
    },
    Heartbeat,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
}

impl Frame {
    #[must_use]
    pub fn new(kind: FrameKind) -> Self {
        Self { kind }
    }

    const TAG_TERMINAL_ADD: u8 = 0;
    const TAG_TERMINAL_REMOVE: u8 = 1;
    const TAG_CATALOG_END: u8 = 2;
    const TAG_PUBLISH: u8 = 3;
    const TAG_SCATTER: u8 = 4;
    const TAG_GATHER_RESPONSE: u8 = 5;
    const TAG_HEARTBEAT: u8 = 6;

    pub fn encode(&self, w: &mut impl Write) -> io::Result<()> {
        match &self.kind {
            FrameKind::TerminalAdd(rec) => {
                w.write_all(&[Self::TAG_TERMINAL_ADD])?;
                encode_discovery_record(w, rec)?;
            }
            FrameKind::TerminalRemove(rec) => {
                w.write_all(&[Self::TAG_TERMINAL_REMOVE])?;
                encode_discovery_record(w, rec)?;
            }
            FrameKind::CatalogEnd => {
                w.write_all(&[Self::TAG_CATALOG_END])?;
            }
            FrameKind::Publish {
                terminal_ref,
                cached,
                message,
            } => {
                w.write_all(&[Self::TAG_PUBLISH, u8::from(*cached)])?;
                w.write_all(&terminal_ref.0.to_be_bytes())?;
                encode_message(w, message)?;
            }
            FrameKind::Scatter {
                terminal_ref,
                operation_id,
                message,
            } => {
                w.write_all(&[Self::TAG_SCATTER])?;
                w.write_all(&terminal_ref.0.to_be_bytes())?;
                varint::write_u64(w, *operation_id)?;
                encode_message(w, message)?;
            }
            FrameKind::GatherResponse {
                terminal_ref,
                operation_id,
                flags,
                message,
            } => {
                w.write_all(&[Self::TAG_GATHER_RESPONSE, *flags])?;
                w.write_all(&terminal_ref.0.to_be_bytes())?;
                varint::write_u64(w, *operation_id)?;
                w.write_all(&[u8::from(message.is_some())])?;
                if let Some(m) = message {
                    encode_message(w, m)?;
                }
            }
            FrameKind::Heartbeat => {
                w.write_all(&[Self::TAG_HEARTBEAT])?;
            }
        }
        Ok(())
    }

    pub fn decode(r: &mut impl Read) -> Result<Self, Error> {
        let mut tag = [0u8; 1];
        r.read_exact(&mut tag)
            .map_err(|e| Error::new(ErrorKind::DeserializeMsg).with_context(e.to_string()))?;
        let kind = match tag[0] {
            Self::TAG_TERMINAL_ADD => FrameKind::TerminalAdd(decode_discovery_record(r)?),
            Self::TAG_TERMINAL_REMOVE => FrameKind::TerminalRemove(decode_discovery_record(r)?),
            Self::TAG_CATALOG_END => FrameKind::CatalogEnd,
            Self::TAG_PUBLISH => {
                let mut cached = [0u8; 1];
                read_exact(r, &mut cached)?;
                let terminal_ref = TerminalRef(read_u32(r)?);
                let message = decode_message(r)?;
                FrameKind::Publish {
                    terminal_ref,
                    cached: cached[0] != 0,
                    message,
                }
            }
            Self::TAG_SCATTER => {
                let terminal_ref = TerminalRef(read_u32(r)?);
                let operation_id = varint::read_u64(r)?;
                let message = decode_message(r)?;
                FrameKind::Scatter {
                    terminal_ref,
                    operation_id,
                    message,
                }
            }
            Self::TAG_GATHER_RESPONSE => {
                let mut flags = [0u8; 1];
                read_exact(r, &mut flags)?;
                let terminal_ref = TerminalRef(read_u32(r)?);
                let operation_id = varint::read_u64(r)?;
                let mut has_message = [0u8; 1];
                read_exact(r, &mut has_message)?;
                let message = if has_message[0] != 0 {
                    Some(decode_message(r)?)
                } else {
                    None
                };
                FrameKind::GatherResponse {
                    terminal_ref,
                    operation_id,
                    flags: flags[0],
                    message,
                }
            }
            Self::TAG_HEARTBEAT => FrameKind::Heartbeat,
            other => {
                return Err(Error::new(ErrorKind::DeserializeMsg)
                    .with_context(format!("unknown frame tag {other}")))
            }
        };
        Ok(Self { kind })
    }
}

fn read_exact(r: &mut impl Read, buf: &mut [u8]) -> Result<(), Error> {
    r.read_exact(buf)
        .map_err(|e| Error::new(ErrorKind::DeserializeMsg).with_context(e.to_string()))
}

fn read_u32(r: &mut impl Read) -> Result<u32, Error> {
    let mut buf = [0u8; 4];
    read_exact(r, &mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

fn encode_discovery_record(w: &mut impl Write, rec: &DiscoveryRecord) -> io::Result<()> {
    w.write_all(&rec.terminal_ref.0.to_be_bytes())?;
    w.write_all(&[rec.variant.wire_tag()])?;
    w.write_all(&rec.signature.value().to_be_bytes())?;
    w.write_all(rec.name.as_bytes())?;
    w.write_all(&[0u8])
}

fn decode_discovery_record(r: &mut impl Read) -> Result<DiscoveryRecord, Error> {
    let terminal_ref = TerminalRef(read_u32(r)?);
    let mut variant_tag = [0u8; 1];
    read_exact(r, &mut variant_tag)?;
    let variant = TerminalVariant::from_wire_tag(variant_tag[0]).ok_or_else(|| {
        Error::new(ErrorKind::DeserializeMsg)
            .with_context(format!("unknown terminal variant tag {}", variant_tag[0]))
    })?;
    let mut sig_buf = [0u8; 4];
    read_exact(r, &mut sig_buf)?;
    let signature = Signature::new(u32::from_be_bytes(sig_buf));
    let mut name_bytes = Vec::new();
    loop {
        let mut byte = [0u8; 1];
        read_exact(r, &mut byte)?;
        if byte[0] == 0 {
            break;
        }
        name_bytes.push(byte[0]);
    }
    let name = String::from_utf8(name_bytes)
        .map_err(|e| Error::new(ErrorKind::DeserializeMsg).with_context(e.to_string()))?;
    Ok(DiscoveryRecord {
        terminal_ref,
        variant,
        signature,
        name,
    })
}

fn encoding_tag(encoding: Encoding) -> u8 {
    match encoding {
        Encoding::Protobuf => 0,
        Encoding::MsgPack => 1,
        Encoding::Raw => 2,
    }
}

fn encoding_from_tag(tag: u8) -> Result<Encoding, Error> {
    match tag {
        0 => Ok(Encoding::Protobuf),
        1 => Ok(Encoding::MsgPack),
        2 => Ok(Encoding::Raw),
        other => Err(Error::new(ErrorKind::DeserializeMsg)
            .with_context(format!("unknown encoding tag {other}"))),
    }
}

fn encode_message(w: &mut impl Write, msg: &Message) -> io::Result<()> {
    w.write_all(&msg.signature().value().to_be_bytes())?;
    w.write_all(&[encoding_tag(msg.encoding())])?;
    match msg.timestamp() {
        Some(t) => {
            w.write_all(&[1u8])?;
            w.write_all(&t.as_nanos().to_be_bytes())?;
        }
        None => w.write_all(&[0u8])?,
    }
    let len = u32::try_from(msg.payload().len()).unwrap_or(u32::MAX);
    w.write_all(&len.to_be_bytes())?;
    w.write_all(msg.payload())
}

fn decode_message(r: &mut impl Read) -> Result<Message, Error> {
    let mut sig_buf = [0u8; 4];
    read_exact(r, &mut sig_buf)?;
    let signature = Signature::new(u32::from_be_bytes(sig_buf));
    let mut tag_buf = [0u8; 1];
    read_exact(r, &mut tag_buf)?;
    let encoding = encoding_from_tag(tag_buf[0])?;
    let mut has_ts = [0u8; 1];
    read_exact(r, &mut has_ts)?;
    let timestamp = if has_ts[0] != 0 {
        let mut ts_buf = [0u8; 8];
        read_exact(r, &mut ts_buf)?;
        Some(Time::from_nanos(u64::from_be_bytes(ts_buf)))
    } else {
        None
    };
    let len = read_u32(r)? as usize;
    let mut payload = vec![0u8; len];
    read_exact(r, &mut payload)?;
    let mut message = Message::new(signature, encoding, payload);
    if let Some(t) = timestamp {
        message = message.with_timestamp(t);
    }
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn msg() -> Message {
        Message::new(Signature::new(0x0000_d007), Encoding::Raw, vec![1, 2, 3])
            .with_timestamp(Time::from_secs(1))
    }

    fn round_trip(frame: Frame) -> Frame {
        let mut buf = Vec::new();
        frame.encode(&mut buf).unwrap();
        let mut cursor = Cursor::new(buf);
        Frame::decode(&mut cursor).unwrap()
    }

    #[test]
    fn publish_frame_round_trips() {
        let frame = Frame::new(FrameKind::Publish {
            terminal_ref: TerminalRef(42),
            cached: true,
            message: msg(),
        });
        assert_eq!(round_trip(frame.clone()), frame);
    }

    #[test]
    fn discovery_record_round_trips_with_unicode_name() {
        let rec = DiscoveryRecord {
            terminal_ref: TerminalRef(1),
            variant: TerminalVariant::CachedMaster,
            signature: Signature::new(7),
            name: "déjà-vu".to_string(),
        };
        let frame = Frame::new(FrameKind::TerminalAdd(rec));
        assert_eq!(round_trip(frame.clone()), frame);
    }

    #[test]
    fn gather_response_without_message_round_trips() {
        let frame = Frame::new(FrameKind::GatherResponse {
            terminal_ref: TerminalRef(3),
            operation_id: 9999,
            flags: 0b0000_0011,
            message: None,
        });
        assert_eq!(round_trip(frame.clone()), frame);
    }

    #[test]
    fn catalog_end_and_heartbeat_round_trip() {
        assert_eq!(round_trip(Frame::new(FrameKind::CatalogEnd)), Frame::new(FrameKind::CatalogEnd));
        assert_eq!(round_trip(Frame::new(FrameKind::Heartbeat)), Frame::new(FrameKind::Heartbeat));
    }

    #[test]
    fn unknown_tag_fails_deserialize() {
        let mut cursor = Cursor::new(vec![200u8]);
        let err = Frame::decode(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeserializeMsg);
    }
}
