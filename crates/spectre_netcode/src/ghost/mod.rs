//! # Ghosts
//!
//! A ghost is a replicated entity. The authoritative side assigns every
//! replicated entity a [`GhostId`]; each peer maps that id to its own local
//! entity.
//!
//! ```text
//! SERVER                         CLIENT
//! entity 4v1 ─► GhostId(7) ───►  GhostId(7) ─► entity 0v3
//!               ServerGhostTable GhostEntityMap
//! ```

mod map;
mod table;

pub use map::GhostEntityMap;
pub use table::{ServerGhost, ServerGhostTable};

use std::fmt;

use bytemuck::{Pod, Zeroable};
use spectre_core::{ArchetypeSignature, Component, EntityId, World};

use crate::error::{NetError, NetResult};

/// Stable replication identifier. `0` is reserved as "none".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GhostId(pub u32);

impl GhostId {
    /// The reserved "no ghost" id.
    pub const NONE: Self = Self(0);

    /// Returns true for the reserved id.
    #[inline]
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for GhostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ghost#{}", self.0)
    }
}

/// Issues ghost ids. Ids increase monotonically and are never reissued,
/// even after the ghost is destroyed.
#[derive(Clone, Debug)]
pub struct GhostIdAllocator {
    next: u32,
}

impl GhostIdAllocator {
    /// Creates an allocator whose first id is 1.
    #[must_use]
    pub const fn new() -> Self {
        Self { next: 1 }
    }

    /// Returns a fresh id.
    ///
    /// # Panics
    ///
    /// Panics when the 32-bit id space is exhausted.
    pub fn allocate(&mut self) -> GhostId {
        let id = GhostId(self.next);
        self.next = self
            .next
            .checked_add(1)
            .unwrap_or_else(|| panic!("ghost id space exhausted"));
        id
    }

    /// Number of ids issued so far.
    #[must_use]
    pub const fn issued(&self) -> u32 {
        self.next - 1
    }
}

impl Default for GhostIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Marks a ghost entity on both peers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct GhostComponent {
    /// Raw ghost id.
    pub ghost_id: u32,
}

impl Component for GhostComponent {
    const ID: u8 = 48;
}

impl GhostComponent {
    /// Returns the typed id.
    #[inline]
    #[must_use]
    pub const fn ghost(self) -> GhostId {
        GhostId(self.ghost_id)
    }
}

/// Creates the local entity for a ghost seen for the first time.
///
/// Registered per archetype in the
/// [`RegistryBuilder`](crate::snapshot::RegistryBuilder); the registry
/// writes the snapshot components afterwards, so a spawner only adds what
/// the snapshot does not carry (render handles, local-only state, ...).
pub trait GhostSpawner: Send + Sync {
    /// Spawns the entity. Must tag it with a [`GhostComponent`].
    fn spawn(
        &self,
        world: &mut World,
        ghost: GhostId,
        archetype: ArchetypeSignature,
    ) -> NetResult<EntityId>;
}

impl<F> GhostSpawner for F
where
    F: Fn(&mut World, GhostId, ArchetypeSignature) -> NetResult<EntityId> + Send + Sync,
{
    fn spawn(
        &self,
        world: &mut World,
        ghost: GhostId,
        archetype: ArchetypeSignature,
    ) -> NetResult<EntityId> {
        self(world, ghost, archetype)
    }
}

/// Spawns a bare entity carrying only the [`GhostComponent`].
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultSpawner;

impl GhostSpawner for DefaultSpawner {
    fn spawn(
        &self,
        world: &mut World,
        ghost: GhostId,
        _archetype: ArchetypeSignature,
    ) -> NetResult<EntityId> {
        let entity = world.spawn();
        if entity.is_null() {
            return Err(NetError::EntityStoreFull);
        }
        world.insert(entity, GhostComponent { ghost_id: ghost.0 });
        Ok(entity)
    }
}
