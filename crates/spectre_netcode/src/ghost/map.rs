//! Client-side ghost → local entity mapping.

use std::collections::HashMap;

use spectre_core::{EntityId, World};

use super::GhostId;
use crate::error::NetResult;
use crate::snapshot::{GhostRecord, SerializerRegistry};

/// Bidirectional `GhostId ↔ EntityId` map of one connection.
///
/// Never shared between connections.
#[derive(Debug, Default)]
pub struct GhostEntityMap {
    ghost_to_entity: HashMap<GhostId, EntityId>,
    entity_to_ghost: HashMap<EntityId, GhostId>,
}

impl GhostEntityMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of mapped ghosts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ghost_to_entity.len()
    }

    /// Returns true if nothing is mapped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ghost_to_entity.is_empty()
    }

    /// Local entity of `ghost`.
    #[must_use]
    pub fn get(&self, ghost: GhostId) -> Option<EntityId> {
        self.ghost_to_entity.get(&ghost).copied()
    }

    /// Ghost mapped to `entity`.
    #[must_use]
    pub fn ghost_of(&self, entity: EntityId) -> Option<GhostId> {
        self.entity_to_ghost.get(&entity).copied()
    }

    /// Iterates all mappings in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (GhostId, EntityId)> + '_ {
        self.ghost_to_entity.iter().map(|(g, e)| (*g, *e))
    }

    /// Inserts a mapping, replacing any previous one for either side.
    pub fn insert(&mut self, ghost: GhostId, entity: EntityId) {
        if let Some(old) = self.ghost_to_entity.insert(ghost, entity) {
            self.entity_to_ghost.remove(&old);
        }
        if let Some(old) = self.entity_to_ghost.insert(entity, ghost) {
            if old != ghost {
                self.ghost_to_entity.remove(&old);
            }
        }
    }

    /// Returns the local entity of `ghost`, spawning it from `record` the
    /// first time the ghost is seen.
    ///
    /// A mapping whose entity was destroyed locally is replaced. The
    /// returned flag is true if the entity was created by this call.
    pub fn resolve(
        &mut self,
        ghost: GhostId,
        record: &GhostRecord,
        serializers: &[usize],
        world: &mut World,
        registry: &SerializerRegistry,
    ) -> NetResult<(EntityId, bool)> {
        if let Some(entity) = self.get(ghost) {
            if world.is_alive(entity) {
                return Ok((entity, false));
            }
        }
        let entity = registry.spawn(world, ghost, record, serializers)?;
        self.insert(ghost, entity);
        tracing::trace!(%ghost, ?entity, "ghost spawned");
        Ok((entity, true))
    }

    /// Destroys the local entity of `ghost` and forgets the mapping.
    ///
    /// Returns false if the ghost was not mapped.
    pub fn release(&mut self, ghost: GhostId, world: &mut World) -> bool {
        let Some(entity) = self.ghost_to_entity.remove(&ghost) else {
            return false;
        };
        self.entity_to_ghost.remove(&entity);
        world.despawn(entity);
        tracing::trace!(%ghost, ?entity, "ghost released");
        true
    }

    /// Releases every ghost.
    pub fn clear(&mut self, world: &mut World) {
        for entity in self.ghost_to_entity.values() {
            world.despawn(*entity);
        }
        self.ghost_to_entity.clear();
        self.entity_to_ghost.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{PositionSnapshot, RegistryBuilder};
    use spectre_core::{ArchetypeSignature, Position};

    fn record(x: i32) -> GhostRecord {
        GhostRecord {
            archetype: ArchetypeSignature::of::<Position>(),
            blocks: vec![bytemuck::bytes_of(&PositionSnapshot { x, y: 0, z: 0 }).to_vec()],
        }
    }

    #[test]
    fn test_resolve_spawns_once() {
        let registry = RegistryBuilder::with_builtin().build();
        let mut world = World::new(8);
        let mut map = GhostEntityMap::new();

        let (first, spawned) = map
            .resolve(GhostId(4), &record(1000), &[0], &mut world, &registry)
            .unwrap();
        assert!(spawned);
        let (again, spawned) = map
            .resolve(GhostId(4), &record(2000), &[0], &mut world, &registry)
            .unwrap();
        assert!(!spawned);
        assert_eq!(first, again);
        assert_eq!(map.ghost_of(first), Some(GhostId(4)));
        assert_eq!(world.alive_count(), 1);
    }

    #[test]
    fn test_release_and_clear() {
        let registry = RegistryBuilder::with_builtin().build();
        let mut world = World::new(8);
        let mut map = GhostEntityMap::new();
        for id in 1..=3 {
            map.resolve(GhostId(id), &record(0), &[0], &mut world, &registry)
                .unwrap();
        }

        assert!(map.release(GhostId(2), &mut world));
        assert!(!map.release(GhostId(2), &mut world));
        assert_eq!(world.alive_count(), 2);

        map.clear(&mut world);
        assert!(map.is_empty());
        assert_eq!(world.alive_count(), 0);
    }

    #[test]
    fn test_dead_mapping_is_replaced() {
        let registry = RegistryBuilder::with_builtin().build();
        let mut world = World::new(8);
        let mut map = GhostEntityMap::new();
        let (entity, _) = map
            .resolve(GhostId(1), &record(0), &[0], &mut world, &registry)
            .unwrap();
        world.despawn(entity);

        let (replacement, spawned) = map
            .resolve(GhostId(1), &record(0), &[0], &mut world, &registry)
            .unwrap();
        assert!(spawned);
        assert_ne!(replacement, entity);
        assert_eq!(map.len(), 1);
        assert_eq!(map.ghost_of(entity), None);
    }
}
