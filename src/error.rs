//! The crate-wide error type.
//!
//! Every fallible entry point returns [`Result<T>`]. `Error` wraps an
//! [`ErrorKind`] drawn from the wire-level failure taxonomy, an optional
//! static context string, and an optional boxed source error (socket I/O,
//! serde). The split mirrors the `AuthErrorKind`/`AuthError` pair used
//! elsewhere in this codebase for domain-specific error families: a plain
//! enum of kinds, a struct carrying kind + context, manual `Display`, and
//! `From` glue at module boundaries.

use std::fmt;

/// The kind of failure that occurred.
///
/// Named directly after the wire-level failure codes so that a frame's
/// failure byte round-trips through `ErrorKind` without translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    Unknown,
    ObjectStillUsed,
    BadAlloc,
    InvalidParam,
    InvalidHandle,
    WrongObjectType,
    Canceled,
    Busy,
    Timeout,
    TimerExpired,
    BufferTooSmall,
    OpenSocket,
    BindSocket,
    Listen,
    SetSockOpt,
    Accept,
    Connect,
    Rw,
    InvalidMagicPrefix,
    IncompatibleVersion,
    DeserializeMsg,
    LoopbackConnection,
    PasswordMismatch,
    NetNameMismatch,
    DuplicateBranchName,
    DuplicateBranchPath,
    PayloadTooLarge,
    TxQueueFull,
    InvalidOperationId,
    OperationNotRunning,
    /// `publish` against a primitive/producer terminal with no bound
    /// receiver reachable (spec §4.4).
    NotBound,
    /// `get_cached_message` on a cached terminal that has never cached a
    /// payload (spec §4.4).
    NoCachedMessage,
    /// A second call to `assign` on an already-assigned connection
    /// (spec §4.7).
    AlreadyAssigned,
    /// A connection's idle/heartbeat or handshake deadline elapsed.
    ConnectionLost,
    /// A second terminal with identical `(path, variant, signature)`
    /// attached to the same endpoint (spec §4.3).
    DuplicateTerminal,
    /// A second `Process` constructed in the same address space (spec §5:
    /// a process is a singleton).
    ProcessAlreadyExists,
}

impl ErrorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown error",
            Self::ObjectStillUsed => "object still in use",
            Self::BadAlloc => "allocation failed",
            Self::InvalidParam => "invalid parameter",
            Self::InvalidHandle => "invalid handle",
            Self::WrongObjectType => "operation not supported by this object type",
            Self::Canceled => "operation canceled",
            Self::Busy => "another operation of this kind is already pending",
            Self::Timeout => "operation timed out",
            Self::TimerExpired => "timer expired",
            Self::BufferTooSmall => "buffer too small",
            Self::OpenSocket => "failed to open socket",
            Self::BindSocket => "failed to bind socket",
            Self::Listen => "failed to listen on socket",
            Self::SetSockOpt => "failed to set socket option",
            Self::Accept => "failed to accept connection",
            Self::Connect => "failed to connect",
            Self::Rw => "read/write error",
            Self::InvalidMagicPrefix => "invalid magic prefix",
            Self::IncompatibleVersion => "incompatible version",
            Self::DeserializeMsg => "failed to deserialize message",
            Self::LoopbackConnection => "connection would loop back to the same endpoint",
            Self::PasswordMismatch => "password mismatch",
            Self::NetNameMismatch => "network name mismatch",
            Self::DuplicateBranchName => "duplicate branch name",
            Self::DuplicateBranchPath => "duplicate branch path",
            Self::PayloadTooLarge => "payload too large",
            Self::TxQueueFull => "transmit queue full",
            Self::InvalidOperationId => "invalid operation id",
            Self::OperationNotRunning => "operation not running",
            Self::NotBound => "terminal has no reachable bound peer",
            Self::NoCachedMessage => "no cached message available",
            Self::AlreadyAssigned => "connection already assigned to an endpoint",
            Self::ConnectionLost => "connection lost",
            Self::DuplicateTerminal => "a terminal with this path, variant and signature already exists",
            Self::ProcessAlreadyExists => "a process has already been constructed in this address space",
        }
    }

    /// Which of the three failure families (spec §7) this kind belongs to.
    #[must_use]
    pub const fn family(self) -> ErrorFamily {
        match self {
            Self::InvalidParam
            | Self::InvalidHandle
            | Self::WrongObjectType
            | Self::DuplicateBranchName
            | Self::DuplicateBranchPath
            | Self::ObjectStillUsed
            | Self::Unknown
            | Self::BadAlloc
            | Self::BufferTooSmall
            | Self::InvalidMagicPrefix
            | Self::IncompatibleVersion
            | Self::DeserializeMsg
            | Self::LoopbackConnection
            | Self::PasswordMismatch
            | Self::NetNameMismatch
            | Self::PayloadTooLarge
            | Self::TxQueueFull
            | Self::InvalidOperationId
            | Self::NotBound
            | Self::NoCachedMessage
            | Self::AlreadyAssigned
            | Self::DuplicateTerminal
            | Self::ProcessAlreadyExists => ErrorFamily::Programmer,

            Self::Timeout | Self::Rw | Self::Accept | Self::Connect | Self::OpenSocket
            | Self::BindSocket | Self::Listen | Self::SetSockOpt | Self::ConnectionLost => {
                ErrorFamily::TransientIo
            }

            Self::Canceled | Self::TimerExpired | Self::OperationNotRunning | Self::Busy => {
                ErrorFamily::Cancellation
            }
        }
    }
}

/// Which of the three failure families an [`ErrorKind`] belongs to.
///
/// Background subsystems (the auto-connecting TCP client, the anomaly
/// expirer) use this to decide whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorFamily {
    /// Surfaced immediately; never retried.
    Programmer,
    /// Retried by background subsystems after a fixed back-off.
    TransientIo,
    /// Not exceptional; delivered through the normal handler contract.
    Cancellation,
}

/// The crate-wide error type.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    context: Option<String>,
}

impl Error {
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
        }
    }

    #[must_use]
    pub fn with_context(mut self, ctx: impl Into<String>) -> Self {
        self.context = Some(ctx.into());
        self
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[must_use]
    pub const fn family(&self) -> ErrorFamily {
        self.kind.family()
    }

    #[must_use]
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    #[must_use]
    pub const fn canceled() -> Self {
        Self::new(ErrorKind::Canceled)
    }

    #[must_use]
    pub const fn busy() -> Self {
        Self::new(ErrorKind::Busy)
    }

    #[must_use]
    pub const fn wrong_object_type() -> Self {
        Self::new(ErrorKind::WrongObjectType)
    }

    #[must_use]
    pub const fn invalid_param() -> Self {
        Self::new(ErrorKind::InvalidParam)
    }

    #[must_use]
    pub const fn invalid_handle() -> Self {
        Self::new(ErrorKind::InvalidHandle)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind.as_str())?;
        if let Some(ctx) = &self.context {
            write!(f, ": {ctx}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::new(ErrorKind::Rw).with_context(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::new(ErrorKind::DeserializeMsg).with_context(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Self::new(ErrorKind::DeserializeMsg).with_context(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(e: rmp_serde::decode::Error) -> Self {
        Self::new(ErrorKind::DeserializeMsg).with_context(e.to_string())
    }
}

/// The crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
