//! The 32-bit payload-schema tag.

use core::fmt;

/// Immutable 32-bit integer tag identifying a payload schema family.
///
/// Two terminals match only if their names are equal *and* their
/// signatures are equal; this is the crate's only payload-schema safety
/// net (the byte payload itself is opaque to the core).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct Signature(pub u32);

impl Signature {
    #[must_use]
    pub const fn new(tag: u32) -> Self {
        Self(tag)
    }

    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({:#010x})", self.0)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

impl From<u32> for Signature {
    fn from(v: u32) -> Self {
        Self(v)
    }
}
