//! Per-terminal monotonic operation identifiers.
//!
//! Used by scatter/gather and request/response to tag an outstanding
//! operation. IDs are unique per terminal for the lifetime of the
//! outstanding operation (spec's *Operation-ID uniqueness* property);
//! zero is reserved as "no operation".

use core::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(NonZeroU64);

impl OperationId {
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0.get()
    }

    /// Reconstructs an operation ID from a wire-carried value (spec §6's
    /// `Scatter`/`GatherResponse` frames echo the initiator's raw ID).
    /// Returns `None` for the reserved zero value.
    #[must_use]
    pub const fn from_wire(bits: u64) -> Option<Self> {
        match NonZeroU64::new(bits) {
            Some(nz) => Some(Self(nz)),
            None => None,
        }
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op#{}", self.0)
    }
}

/// A per-terminal generator of monotonically increasing, non-zero
/// operation IDs. Wraps past `u64::MAX` back to 1 rather than overflowing;
/// a terminal would need to run ~2^64 operations to observe reuse.
#[derive(Debug, Default)]
pub struct OperationIdGenerator {
    next: AtomicU64,
}

impl OperationIdGenerator {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub fn next(&self) -> OperationId {
        loop {
            let candidate = self.next.fetch_add(1, Ordering::Relaxed);
            if let Some(nz) = NonZeroU64::new(candidate) {
                return OperationId(nz);
            }
            // candidate wrapped to 0; the generator resets and retries.
            self.next.store(2, Ordering::Relaxed);
        }
    }
}
