//! Authoritative ghost table.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use spectre_core::{ArchetypeSignature, EntityId, World};

use super::{GhostComponent, GhostId, GhostIdAllocator};
use crate::error::{NetError, NetResult};
use crate::snapshot::{BaselineHistory, GhostRecord, SerializerRegistry};

/// Server-side state of one ghost.
#[derive(Debug)]
pub struct ServerGhost {
    /// Replicated entity.
    pub entity: EntityId,
    /// Replicated archetype, fixed at registration.
    pub archetype: ArchetypeSignature,
    /// Serializer set for the archetype.
    pub serializers: Arc<[usize]>,
    /// Records captured on past ticks.
    pub history: BaselineHistory<GhostRecord>,
    /// Tick the ghost was registered on.
    pub spawn_tick: u32,
}

/// Every ghost the server replicates, ordered by id.
#[derive(Debug)]
pub struct ServerGhostTable {
    allocator: GhostIdAllocator,
    ghosts: BTreeMap<GhostId, ServerGhost>,
    by_entity: HashMap<EntityId, GhostId>,
    history_capacity: usize,
}

impl ServerGhostTable {
    /// Creates an empty table whose ghosts keep `history_capacity` ticks.
    #[must_use]
    pub fn new(history_capacity: usize) -> Self {
        Self {
            allocator: GhostIdAllocator::new(),
            ghosts: BTreeMap::new(),
            by_entity: HashMap::new(),
            history_capacity,
        }
    }

    /// Number of live ghosts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ghosts.len()
    }

    /// Returns true if no ghost is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ghosts.is_empty()
    }

    /// Starts replicating `entity`.
    ///
    /// Tags the entity with a [`GhostComponent`]. Registering the same
    /// entity again returns its existing id.
    ///
    /// # Errors
    ///
    /// [`NetError::EntityNotAlive`] for dead entities,
    /// [`NetError::UnknownArchetype`] if no serializer set covers it.
    pub fn register(
        &mut self,
        world: &mut World,
        registry: &SerializerRegistry,
        entity: EntityId,
        tick: u32,
    ) -> NetResult<GhostId> {
        if let Some(ghost) = self.by_entity.get(&entity) {
            return Ok(*ghost);
        }
        let archetype = world.archetype(entity).ok_or(NetError::EntityNotAlive)?;
        let archetype = registry.replicated_archetype(archetype);
        let serializers: Arc<[usize]> = registry
            .select_serializers(archetype)
            .ok_or(NetError::UnknownArchetype(archetype.bits()))?
            .into();

        let ghost = self.allocator.allocate();
        world.insert(entity, GhostComponent { ghost_id: ghost.0 });
        self.ghosts.insert(
            ghost,
            ServerGhost {
                entity,
                archetype,
                serializers,
                history: BaselineHistory::new(self.history_capacity),
                spawn_tick: tick,
            },
        );
        self.by_entity.insert(entity, ghost);
        tracing::debug!(%ghost, ?entity, ?archetype, "ghost registered");
        Ok(ghost)
    }

    /// Stops replicating a ghost. The entity itself is left alone.
    pub fn unregister(&mut self, ghost: GhostId) -> Option<ServerGhost> {
        let removed = self.ghosts.remove(&ghost)?;
        self.by_entity.remove(&removed.entity);
        Some(removed)
    }

    /// Unregisters every ghost whose entity no longer lives.
    ///
    /// Returns the removed ids in ascending order.
    pub fn collect_dead(&mut self, world: &World) -> Vec<GhostId> {
        let dead: Vec<GhostId> = self
            .ghosts
            .iter()
            .filter(|(_, g)| !world.is_alive(g.entity))
            .map(|(id, _)| *id)
            .collect();
        for ghost in &dead {
            self.unregister(*ghost);
        }
        if !dead.is_empty() {
            tracing::debug!(count = dead.len(), "dead ghosts collected");
        }
        dead
    }

    /// Copies every ghost's components into its history for `tick`.
    ///
    /// Returns the number of ghosts captured. Ghosts that lost a component
    /// their serializer set needs are skipped for the tick.
    pub fn capture(&mut self, world: &World, registry: &SerializerRegistry, tick: u32) -> usize {
        let mut captured = 0;
        for (ghost, state) in &mut self.ghosts {
            match registry.copy_to_snapshot(world, state.entity, state.archetype, &state.serializers)
            {
                Some(record) => {
                    state.history.insert(tick, record);
                    captured += 1;
                }
                None => tracing::trace!(%ghost, "ghost missing components, not captured"),
            }
        }
        captured
    }

    /// Looks up a ghost.
    #[must_use]
    pub fn get(&self, ghost: GhostId) -> Option<&ServerGhost> {
        self.ghosts.get(&ghost)
    }

    /// Ghost replicating `entity`.
    #[must_use]
    pub fn ghost_of(&self, entity: EntityId) -> Option<GhostId> {
        self.by_entity.get(&entity).copied()
    }

    /// Iterates ghosts in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (GhostId, &ServerGhost)> {
        self.ghosts.iter().map(|(id, g)| (*id, g))
    }
}
