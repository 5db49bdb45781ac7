//! The handshake exchanged before a non-local connection transitions
//! from `Handshaking` to `Alive` (spec §4.7, §6).
//!
//! Both sides send a [`Handshake`] carrying the magic prefix, library
//! version, and branch identification; both then send a [`HandshakeAck`]
//! confirming acceptance or reporting a mismatch. A peer that rejects
//! the magic or version fails with `InvalidMagicPrefix`/
//! `IncompatibleVersion` before an ack is even read.

use crate::error::{Error, ErrorKind};
use std::io::{self, Read, Write};

/// Magic prefix every handshake frame must begin with.
pub const MAGIC_PREFIX: u32 = 0x594f_4749; // "YOGI"

/// This crate's wire-protocol version triple. Two endpoints are
/// compatible iff their `major` matches exactly (semver-style: a major
/// bump is a breaking wire change).
pub const PROTOCOL_VERSION: (u16, u16, u16) = (1, 0, 0);

/// The outbound half of a handshake: what this endpoint presents to its
/// peer (spec §9 supplement: branch name/description/network-name).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub version: (u16, u16, u16),
    pub identification: Option<String>,
    pub branch_name: Option<String>,
    pub branch_description: Option<String>,
    pub network_name: Option<String>,
    pub network_password_hash: Option<u64>,
    pub advertised_path: String,
}

impl Handshake {
    #[must_use]
    pub fn new(advertised_path: impl Into<String>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            identification: None,
            branch_name: None,
            branch_description: None,
            network_name: None,
            network_password_hash: None,
            advertised_path: advertised_path.into(),
        }
    }

    #[must_use]
    pub fn with_identification(mut self, id: impl Into<String>) -> Self {
        self.identification = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_branch_name(mut self, name: impl Into<String>) -> Self {
        self.branch_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_network(mut self, name: impl Into<String>, password: Option<&str>) -> Self {
        self.network_name = Some(name.into());
        self.network_password_hash = password.map(hash_password);
        self
    }

    pub fn encode(&self, w: &mut impl Write) -> io::Result<()> {
        w.write_all(&MAGIC_PREFIX.to_be_bytes())?;
        w.write_all(&self.version.0.to_be_bytes())?;
        w.write_all(&self.version.1.to_be_bytes())?;
        w.write_all(&self.version.2.to_be_bytes())?;
        write_opt_string(w, self.identification.as_deref())?;
        write_opt_string(w, self.branch_name.as_deref())?;
        write_opt_string(w, self.branch_description.as_deref())?;
        write_opt_string(w, self.network_name.as_deref())?;
        match self.network_password_hash {
            Some(h) => {
                w.write_all(&[1u8])?;
                w.write_all(&h.to_be_bytes())?;
            }
            None => w.write_all(&[0u8])?,
        }
        write_opt_string(w, Some(&self.advertised_path))
    }

    pub fn decode(r: &mut impl Read) -> Result<Self, Error> {
        let mut magic_buf = [0u8; 4];
        read_exact(r, &mut magic_buf)?;
        let magic = u32::from_be_bytes(magic_buf);
        if magic != MAGIC_PREFIX {
            return Err(Error::new(ErrorKind::InvalidMagicPrefix));
        }
        let major = read_u16(r)?;
        let minor = read_u16(r)?;
        let patch = read_u16(r)?;
        if major != PROTOCOL_VERSION.0 {
            return Err(Error::new(ErrorKind::IncompatibleVersion).with_context(format!(
                "peer version {major}.{minor}.{patch} incompatible with {}.{}.{}",
                PROTOCOL_VERSION.0, PROTOCOL_VERSION.1, PROTOCOL_VERSION.2
            )));
        }
        let identification = read_opt_string(r)?;
        let branch_name = read_opt_string(r)?;
        let branch_description = read_opt_string(r)?;
        let network_name = read_opt_string(r)?;
        let mut has_pw = [0u8; 1];
        read_exact(r, &mut has_pw)?;
        let network_password_hash = if has_pw[0] != 0 {
            let mut buf = [0u8; 8];
            read_exact(r, &mut buf)?;
            Some(u64::from_be_bytes(buf))
        } else {
            None
        };
        let advertised_path = read_opt_string(r)?.unwrap_or_default();
        Ok(Self {
            version: (major, minor, patch),
            identification,
            branch_name,
            branch_description,
            network_name,
            network_password_hash,
            advertised_path,
        })
    }

    /// Verifies `other`'s network credentials against ours, if either
    /// side declared a network name.
    pub fn verify_network(&self, other: &Self) -> Result<(), Error> {
        match (&self.network_name, &other.network_name) {
            (Some(mine), Some(theirs)) if mine != theirs => {
                Err(Error::new(ErrorKind::NetNameMismatch))
            }
            (Some(_), _) | (_, Some(_))
                if self.network_password_hash != other.network_password_hash =>
            {
                Err(Error::new(ErrorKind::PasswordMismatch))
            }
            _ => Ok(()),
        }
    }
}

/// Response a receiving side sends back after validating a peer's
/// [`Handshake`] against its own locally-attached branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeAck {
    Accepted,
    DuplicateBranchName,
    DuplicateBranchPath,
}

impl HandshakeAck {
    pub fn encode(self, w: &mut impl Write) -> io::Result<()> {
        let tag = match self {
            Self::Accepted => 0u8,
            Self::DuplicateBranchName => 1,
            Self::DuplicateBranchPath => 2,
        };
        w.write_all(&[tag])
    }

    pub fn decode(r: &mut impl Read) -> Result<Self, Error> {
        let mut tag = [0u8; 1];
        read_exact(r, &mut tag)?;
        match tag[0] {
            0 => Ok(Self::Accepted),
            1 => Ok(Self::DuplicateBranchName),
            2 => Ok(Self::DuplicateBranchPath),
            other => Err(Error::new(ErrorKind::DeserializeMsg)
                .with_context(format!("unknown handshake ack tag {other}"))),
        }
    }

    pub fn into_result(self) -> Result<(), Error> {
        match self {
            Self::Accepted => Ok(()),
            Self::DuplicateBranchName => Err(Error::new(ErrorKind::DuplicateBranchName)),
            Self::DuplicateBranchPath => Err(Error::new(ErrorKind::DuplicateBranchPath)),
        }
    }
}

fn hash_password(password: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    password.hash(&mut hasher);
    hasher.finish()
}

fn read_exact(r: &mut impl Read, buf: &mut [u8]) -> Result<(), Error> {
    r.read_exact(buf)
        .map_err(|e| Error::new(ErrorKind::DeserializeMsg).with_context(e.to_string()))
}

fn read_u16(r: &mut impl Read) -> Result<u16, Error> {
    let mut buf = [0u8; 2];
    read_exact(r, &mut buf)?;
    Ok(u16::from_be_bytes(buf))
}

fn write_opt_string(w: &mut impl Write, s: Option<&str>) -> io::Result<()> {
    match s {
        Some(s) => {
            let bytes = s.as_bytes();
            let len = u32::try_from(bytes.len()).unwrap_or(u32::MAX);
            w.write_all(&[1u8])?;
            w.write_all(&len.to_be_bytes())?;
            w.write_all(bytes)
        }
        None => w.write_all(&[0u8]),
    }
}

fn read_opt_string(r: &mut impl Read) -> Result<Option<String>, Error> {
    let mut present = [0u8; 1];
    read_exact(r, &mut present)?;
    if present[0] == 0 {
        return Ok(None);
    }
    let mut len_buf = [0u8; 4];
    read_exact(r, &mut len_buf)?;
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    read_exact(r, &mut buf)?;
    String::from_utf8(buf)
        .map(Some)
        .map_err(|e| Error::new(ErrorKind::DeserializeMsg).with_context(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trips_full_handshake() {
        let hs = Handshake::new("/leaf")
            .with_identification("test-process")
            .with_branch_name("branch-a")
            .with_network("net", Some("secret"));
        let mut buf = Vec::new();
        hs.encode(&mut buf).unwrap();
        let mut cursor = Cursor::new(buf);
        let back = Handshake::decode(&mut cursor).unwrap();
        assert_eq!(hs, back);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut cursor = Cursor::new(vec![0u8; 4]);
        let err = Handshake::decode(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidMagicPrefix);
    }

    #[test]
    fn rejects_incompatible_major_version() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&MAGIC_PREFIX.to_be_bytes());
        buf.extend_from_slice(&99u16.to_be_bytes());
        buf.extend_from_slice(&0u16.to_be_bytes());
        buf.extend_from_slice(&0u16.to_be_bytes());
        let mut cursor = Cursor::new(buf);
        let err = Handshake::decode(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IncompatibleVersion);
    }

    #[test]
    fn network_mismatch_detected() {
        let a = Handshake::new("/a").with_network("net1", Some("pw"));
        let b = Handshake::new("/b").with_network("net2", Some("pw"));
        assert_eq!(a.verify_network(&b).unwrap_err().kind(), ErrorKind::NetNameMismatch);
    }

    #[test]
    fn password_mismatch_detected() {
        let a = Handshake::new("/a").with_network("net", Some("pw1"));
        let b = Handshake::new("/b").with_network("net", Some("pw2"));
        assert_eq!(a.verify_network(&b).unwrap_err().kind(), ErrorKind::PasswordMismatch);
    }

    #[test]
    fn matching_network_credentials_pass() {
        let a = Handshake::new("/a").with_network("net", Some("pw"));
        let b = Handshake::new("/b").with_network("net", Some("pw"));
        assert!(a.verify_network(&b).is_ok());
    }

    #[test]
    fn ack_round_trips() {
        for ack in [
            HandshakeAck::Accepted,
            HandshakeAck::DuplicateBranchName,
            HandshakeAck::DuplicateBranchPath,
        ] {
            let mut buf = Vec::new();
            ack.encode(&mut buf).unwrap();
            let mut cursor = Cursor::new(buf);
            assert_eq!(HandshakeAck::decode(&mut cursor).unwrap(), ack);
        }
    }
}
