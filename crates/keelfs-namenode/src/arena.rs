//! Bounded, generation-checked slot arena.
//!
//! Replaces the fixed-capacity pool + manual free list of the original
//! store: entries are addressed by a stable `SlotId` whose generation is
//! bumped on free, so a stale id can never resolve to a recycled slot.
//! Exhaustion is an explicit error instead of a null slot.

use crate::types::NnError;

/// Stable handle to one arena slot.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId {
    index: u32,
    generation: u32,
}

impl SlotId {
    /// Returns the raw slot index (stable for the slot's lifetime).
    pub fn index(&self) -> u32 {
        self.index
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Fixed-capacity arena sized at startup; slots are recycled, never freed
/// individually to the allocator beneath.
pub struct SlotArena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    capacity: usize,
    live: usize,
}

impl<T> SlotArena<T> {
    /// Creates an arena holding at most `capacity` live values.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            capacity,
            live: 0,
        }
    }

    /// Number of live values.
    pub fn len(&self) -> usize {
        self.live
    }

    /// True if no value is live.
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Total capacity fixed at construction.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Inserts a value, returning its slot id or `PoolExhausted`.
    pub fn insert(&mut self, value: T) -> Result<SlotId, NnError> {
        if self.live >= self.capacity {
            return Err(NnError::PoolExhausted(self.capacity));
        }
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return Ok(SlotId {
                index,
                generation: slot.generation,
            });
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        Ok(SlotId {
            index,
            generation: 0,
        })
    }

    /// Returns the value behind `id`, or `None` if freed or stale.
    pub fn get(&self, id: SlotId) -> Option<&T> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.value.as_ref()
    }

    /// Mutable access to the value behind `id`.
    pub fn get_mut(&mut self, id: SlotId) -> Option<&mut T> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.value.as_mut()
    }

    /// Frees the slot, bumping its generation, and returns the value.
    pub fn remove(&mut self, id: SlotId) -> Option<T> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation || slot.value.is_none() {
            return None;
        }
        let value = slot.value.take();
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut arena: SlotArena<String> = SlotArena::with_capacity(4);
        let id = arena.insert("a".into()).unwrap();
        assert_eq!(arena.get(id).map(String::as_str), Some("a"));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_remove_returns_value_and_frees() {
        let mut arena: SlotArena<u32> = SlotArena::with_capacity(2);
        let id = arena.insert(7).unwrap();
        assert_eq!(arena.remove(id), Some(7));
        assert!(arena.get(id).is_none());
        assert!(arena.is_empty());
    }

    #[test]
    fn test_stale_id_rejected_after_reuse() {
        let mut arena: SlotArena<u32> = SlotArena::with_capacity(1);
        let first = arena.insert(1).unwrap();
        arena.remove(first);
        let second = arena.insert(2).unwrap();
        // same physical slot, different generation
        assert_eq!(first.index(), second.index());
        assert!(arena.get(first).is_none());
        assert_eq!(arena.get(second), Some(&2));
    }

    #[test]
    fn test_capacity_enforced() {
        let mut arena: SlotArena<u32> = SlotArena::with_capacity(2);
        arena.insert(1).unwrap();
        arena.insert(2).unwrap();
        match arena.insert(3) {
            Err(NnError::PoolExhausted(2)) => {}
            other => panic!("expected PoolExhausted, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_freeing_makes_room() {
        let mut arena: SlotArena<u32> = SlotArena::with_capacity(1);
        let id = arena.insert(1).unwrap();
        assert!(arena.insert(2).is_err());
        arena.remove(id);
        assert!(arena.insert(2).is_ok());
    }

    #[test]
    fn test_double_remove_is_none() {
        let mut arena: SlotArena<u32> = SlotArena::with_capacity(1);
        let id = arena.insert(5).unwrap();
        assert_eq!(arena.remove(id), Some(5));
        assert_eq!(arena.remove(id), None);
    }
}
