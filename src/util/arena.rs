//! Generation-counted slot arena.
//!
//! Every cross-referenced object in the crate (terminals, endpoints,
//! connections, pending operations) lives in one of these arenas and is
//! addressed by an [`ArenaIndex`] rather than a pointer or `Rc`. This
//! resolves the cyclic ownership between terminals, their owning endpoint,
//! and the connections that carry their traffic: a stale index whose slot
//! has been reused simply fails to resolve instead of dangling.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// An index into an [`Arena`], paired with the generation of the slot it
/// was issued for.
///
/// Looking up a slot whose generation no longer matches returns `None`:
/// the original object has been removed and the slot recycled.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArenaIndex {
    index: u32,
    generation: u32,
}

impl ArenaIndex {
    /// Builds an index from its raw parts. Exposed for callers that need to
    /// round-trip an index through the wire protocol or serde.
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for ArenaIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArenaIndex({}:{})", self.index, self.generation)
    }
}

#[derive(Serialize, Deserialize)]
struct SerdeArenaIndex {
    index: u32,
    generation: u32,
}

impl Serialize for ArenaIndex {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        SerdeArenaIndex {
            index: self.index,
            generation: self.generation,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ArenaIndex {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = SerdeArenaIndex::deserialize(deserializer)?;
        Ok(Self::new(raw.index, raw.generation))
    }
}

enum Slot<T> {
    Occupied { generation: u32, value: T },
    Vacant { generation: u32, next_free: Option<u32> },
}

/// A generation-counted slot arena.
///
/// Removal bumps the slot's generation and pushes it onto a free list so
/// that later insertions reuse the slot under a fresh generation. Any
/// `ArenaIndex` issued before the removal becomes unresolvable.
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    len: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            len: 0,
        }
    }

    /// Number of live entries.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Inserts a value, returning the index it can be looked up under.
    pub fn insert(&mut self, value: T) -> ArenaIndex {
        self.len += 1;
        if let Some(free) = self.free_head {
            let slot = &mut self.slots[free as usize];
            let (generation, next_free) = match slot {
                Slot::Vacant {
                    generation,
                    next_free,
                } => (*generation, *next_free),
                Slot::Occupied { .. } => unreachable!("free list pointed at an occupied slot"),
            };
            self.free_head = next_free;
            *slot = Slot::Occupied { generation, value };
            ArenaIndex::new(free, generation)
        } else {
            let index = u32::try_from(self.slots.len()).expect("arena exceeded u32 capacity");
            self.slots.push(Slot::Occupied {
                generation: 0,
                value,
            });
            ArenaIndex::new(index, 0)
        }
    }

    /// Removes and returns the value at `index`, if its generation is still current.
    pub fn remove(&mut self, index: ArenaIndex) -> Option<T> {
        let slot = self.slots.get_mut(index.index as usize)?;
        match slot {
            Slot::Occupied { generation, .. } if *generation == index.generation => {
                let next_generation = generation.wrapping_add(1);
                let Slot::Occupied { value, .. } = std::mem::replace(
                    slot,
                    Slot::Vacant {
                        generation: next_generation,
                        next_free: self.free_head,
                    },
                ) else {
                    unreachable!()
                };
                self.free_head = Some(index.index);
                self.len -= 1;
                Some(value)
            }
            _ => None,
        }
    }

    #[must_use]
    pub fn get(&self, index: ArenaIndex) -> Option<&T> {
        match self.slots.get(index.index as usize)? {
            Slot::Occupied { generation, value } if *generation == index.generation => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, index: ArenaIndex) -> Option<&mut T> {
        match self.slots.get_mut(index.index as usize)? {
            Slot::Occupied { generation, value } if *generation == index.generation => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub fn contains(&self, index: ArenaIndex) -> bool {
        self.get(index).is_some()
    }

    /// Iterates over all live `(index, value)` pairs in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (ArenaIndex, &T)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| match slot {
            Slot::Occupied { generation, value } => {
                Some((ArenaIndex::new(i as u32, *generation), value))
            }
            Slot::Vacant { .. } => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_get() {
        let mut arena = Arena::new();
        let a = arena.insert("a");
        let b = arena.insert("b");
        assert_eq!(arena.get(a), Some(&"a"));
        assert_eq!(arena.get(b), Some(&"b"));
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn remove_invalidates_index() {
        let mut arena = Arena::new();
        let a = arena.insert(1);
        assert_eq!(arena.remove(a), Some(1));
        assert_eq!(arena.get(a), None);
        assert!(arena.is_empty());
    }

    #[test]
    fn reused_slot_gets_fresh_generation() {
        let mut arena = Arena::new();
        let a = arena.insert("first");
        arena.remove(a);
        let b = arena.insert("second");
        assert_eq!(b.index(), a.index());
        assert_ne!(b.generation(), a.generation());
        assert_eq!(arena.get(a), None);
        assert_eq!(arena.get(b), Some(&"second"));
    }

    #[test]
    fn iter_skips_vacant_slots() {
        let mut arena = Arena::new();
        let a = arena.insert(1);
        let _b = arena.insert(2);
        let c = arena.insert(3);
        arena.remove(a);
        let remaining: Vec<_> = arena.iter().map(|(_, v)| *v).collect();
        assert_eq!(remaining, vec![2, 3]);
        assert!(arena.contains(c));
    }

    #[test]
    fn serde_roundtrip() {
        let idx = ArenaIndex::new(7, 2);
        let json = serde_json::to_string(&idx).unwrap();
        let back: ArenaIndex = serde_json::from_str(&json).unwrap();
        assert_eq!(idx, back);
    }
}
