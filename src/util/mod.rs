//! Internal utilities shared across the runtime.
//!
//! - [`arena`]: generation-counted slot arena backing every cross-referenced
//!   id in the crate (terminals, endpoints, connections, operations).
//! - [`ordered_map`]: insertion-ordered map used by the known-terminals
//!   registry, which must preserve discovery order.

pub mod arena;
pub mod ordered_map;

pub use arena::{Arena, ArenaIndex};
pub use ordered_map::OrderedMap;
