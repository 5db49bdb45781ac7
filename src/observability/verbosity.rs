//! Component log verbosity, as propagated by the Log distribution fabric's
//! cached master/slave terminal pairs (spec §4.12).
//!
//! A per-component verbosity gates which severities that component emits;
//! a process-wide "Max Verbosity" additionally clamps every component.
//! Writing a new value to a master propagates it to the local process —
//! the slave's updated cache *is* the acknowledgement, there is no
//! separate ack message.

use super::Severity;
use core::fmt;

/// How verbose a component's (or the process's) logging is.
///
/// Ordered so that a higher verbosity permits strictly more: `None` emits
/// nothing, `Trace` emits everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Verbosity {
    #[default]
    None = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl Verbosity {
    /// Whether a log record of the given severity should be emitted under
    /// this verbosity.
    #[must_use]
    pub const fn permits(self, severity: Severity) -> bool {
        match self {
            Self::None => false,
            other => (other as u8) >= severity_rank(severity),
        }
    }

    /// Combines a component's own verbosity with the process-wide max
    /// verbosity gate: the *more restrictive* of the two wins. This is the
    /// resolution for spec §9's open question on the `None` interaction —
    /// `None` on either side disables the component entirely, since it is
    /// the most restrictive value in the ordering.
    #[must_use]
    pub fn clamped_by(self, max: Self) -> Self {
        self.min(max)
    }
}

const fn severity_rank(s: Severity) -> u8 {
    match s {
        Severity::Error => 1,
        Severity::Warn => 2,
        Severity::Info => 3,
        Severity::Debug => 4,
        Severity::Trace => 5,
    }
}

impl fmt::Display for Verbosity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Error => "error",
            Self::Warn => "warning",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        };
        write!(f, "{s}")
    }
}
