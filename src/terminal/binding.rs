//! Explicit bindings for primitive terminals (spec §3, §4.3).
//!
//! A primitive terminal (`DeafMute`, `PublishSubscribe`,
//! `CachedPublishSubscribe`, `ScatterGather`) is symmetric and needs an
//! explicit [`TerminalBinding`] declaring "I also want messages addressed
//! to terminal path T". Convenience variants never construct one: their
//! binding state is derived purely from counterpart presence (spec
//! §4.3), wired up directly by [`crate::terminal::registry::TerminalRegistry`].

use crate::types::{BindingState, Path};
use parking_lot::Mutex;
use std::sync::Arc;

/// An explicit declaration of interest in a remote path, owned by a
/// primitive terminal.
///
/// Lifecycle: created after the owning terminal, destroyed explicitly.
/// While alive it participates in binding-state changes the matching
/// layer drives via [`Self::set_established`]/[`Self::set_released`].
pub struct TerminalBinding {
    target: Path,
    state: Mutex<BindingState>,
}

impl TerminalBinding {
    #[must_use]
    pub fn new(target: Path) -> Arc<Self> {
        Arc::new(Self {
            target,
            state: Mutex::new(BindingState::Released),
        })
    }

    #[must_use]
    pub fn target(&self) -> &Path {
        &self.target
    }

    #[must_use]
    pub fn state(&self) -> BindingState {
        *self.state.lock()
    }

    pub(crate) fn set_established(&self) {
        *self.state.lock() = BindingState::Established;
    }

    pub(crate) fn set_released(&self) {
        *self.state.lock() = BindingState::Released;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_released() {
        let b = TerminalBinding::new(Path::new("/some/path").unwrap());
        assert_eq!(b.state(), BindingState::Released);
    }

    #[test]
    fn transitions_on_match_changes() {
        let b = TerminalBinding::new(Path::new("/some/path").unwrap());
        b.set_established();
        assert_eq!(b.state(), BindingState::Established);
        b.set_released();
        assert_eq!(b.state(), BindingState::Released);
    }
}
