//! The process configuration boundary (spec §4.14).
//!
//! The core consumes an immutable, already-parsed [`ProcessConfig`].
//! Command-line parsing, environment variables, and JSON file loading are
//! explicitly out of scope (spec §1): a caller may use `serde_json` to
//! deserialize one of these directly (the derive below is enough), but
//! the contract the core promises is just this record.

use crate::error::{Error, ErrorKind};
use crate::types::Path;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// `host:port` connection target for the reference TCP client/server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionTarget {
    pub host: String,
    pub port: u16,
}

impl ConnectionTarget {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parses a `"host:port"` string.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let (host, port) = raw.rsplit_once(':').ok_or_else(|| {
            Error::new(ErrorKind::InvalidParam)
                .with_context(format!("{raw:?} is not a valid \"host:port\" target"))
        })?;
        let port: u16 = port.parse().map_err(|_| {
            Error::new(ErrorKind::InvalidParam)
                .with_context(format!("{port:?} is not a valid port number"))
        })?;
        if host.is_empty() {
            return Err(Error::new(ErrorKind::InvalidParam).with_context("empty host"));
        }
        Ok(Self::new(host, port))
    }

    /// Resolves to a concrete socket address. Fails `OpenSocket` on DNS
    /// failure (a transient I/O error per spec §7).
    pub fn resolve(&self) -> Result<SocketAddr, Error> {
        use std::net::ToSocketAddrs;
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| Error::new(ErrorKind::OpenSocket).with_context(e.to_string()))?
            .next()
            .ok_or_else(|| {
                Error::new(ErrorKind::OpenSocket)
                    .with_context(format!("no address resolved for {}:{}", self.host, self.port))
            })
    }
}

impl std::fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// The identification a branch presents during the wire handshake
/// (spec §9 supplement: branch name/description/network-name fields
/// behind `DuplicateBranchName`/`DuplicateBranchPath`/`NetNameMismatch`/
/// `PasswordMismatch`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identification {
    pub name: Option<String>,
    pub description: Option<String>,
    pub network_name: Option<String>,
    pub network_password: Option<String>,
    pub advertised_path: Option<String>,
}

/// Immutable per-process configuration record (spec §4.14, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// Location path; terminal paths starting with `/` resolve relative
    /// to this.
    pub location: String,
    /// Optional target to auto-connect to via TCP.
    pub connection_target: Option<ConnectionTarget>,
    /// Connection handshake/liveness timeout, in seconds. `None` means
    /// the distinguished infinity (spec §4.9).
    pub connection_timeout_secs: Option<f64>,
    /// Free-form identification string exchanged during handshake.
    pub connection_identification: Option<String>,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            location: "/".to_string(),
            connection_target: None,
            connection_timeout_secs: None,
            connection_identification: None,
        }
    }
}

impl ProcessConfig {
    #[must_use]
    pub fn location_path(&self) -> Path {
        Path::new(self.location.clone()).unwrap_or_else(|_| Path::root())
    }

    #[must_use]
    pub fn connection_timeout(&self) -> Option<Duration> {
        self.connection_timeout_secs.map(Duration::from_secs_f64)
    }
}
