//! # Entity Handles
//!
//! ```text
//!   63            32 31             0
//!  ┌────────────────┬────────────────┐
//!  │   generation   │   slot index   │
//!  └────────────────┴────────────────┘
//! ```
//!
//! A slot's generation is bumped every time it is reused, so a handle kept
//! by the ghost map after a despawn never resolves to the slot's next
//! occupant.

use std::fmt;

use super::archetype::ArchetypeSignature;

/// Generational handle to an entity slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct EntityId(u64);

impl EntityId {
    /// The handle that never names a live entity.
    pub const NULL: Self = Self(u64::MAX);

    /// Packs a slot index and generation.
    #[inline]
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << 32) | index as u64)
    }

    /// Slot index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        (self.0 & 0xFFFF_FFFF) as u32
    }

    /// Reuse counter of the slot at the time this handle was issued.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Whether this is [`Self::NULL`].
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == Self::NULL.0
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::NULL
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("null")
        } else {
            write!(f, "{}v{}", self.index(), self.generation())
        }
    }
}

/// Bookkeeping for one slot of the world.
#[derive(Clone, Copy, Debug)]
pub struct Entity {
    /// Handle currently issued for this slot.
    pub id: EntityId,
    /// Components attached to the occupant.
    pub archetype: ArchetypeSignature,
    /// False once despawned, until the slot is handed out again.
    pub alive: bool,
}

impl Entity {
    /// A freshly spawned occupant with no components.
    #[inline]
    #[must_use]
    pub const fn new(id: EntityId) -> Self {
        Self {
            id,
            archetype: ArchetypeSignature::EMPTY,
            alive: true,
        }
    }

    /// A slot that has never been handed out.
    #[inline]
    #[must_use]
    pub const fn dead() -> Self {
        Self {
            id: EntityId::new(0, 0),
            archetype: ArchetypeSignature::EMPTY,
            alive: false,
        }
    }

    /// Whether component `component_id` is attached.
    #[inline]
    #[must_use]
    pub const fn has_component(self, component_id: u8) -> bool {
        self.archetype.has(component_id)
    }
}

impl Default for Entity {
    fn default() -> Self {
        Self::dead()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_packs_index_and_generation() {
        let id = EntityId::new(7, 3);
        assert_eq!((id.index(), id.generation()), (7, 3));
        assert_ne!(id, EntityId::new(7, 4));
        assert_eq!(id.to_string(), "7v3");
    }

    #[test]
    fn test_null_handle() {
        assert!(EntityId::default().is_null());
        assert!(!EntityId::new(0, 0).is_null());
        assert_eq!(EntityId::NULL.to_string(), "null");
    }

    #[test]
    fn test_spawned_slot_starts_empty() {
        let slot = Entity::new(EntityId::new(2, 1));
        assert!(slot.alive && slot.archetype.is_empty());
        assert!(!slot.has_component(0));
        assert!(!Entity::default().alive);
    }
}
