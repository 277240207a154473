//! # Serializer Registry
//!
//! Built once at startup and shared read-only between sessions.
//!
//! ```text
//! RegistryBuilder::new()
//!     .register::<PositionSnapshot>("position")     ─┐
//!     .register::<MotionSnapshot>("motion")           ├─► Arc<SerializerRegistry>
//!     .spawner(archetype, strategy)                   │
//!     .importance(archetype, weight)                 ─┘
//! ```
//!
//! A ghost's archetype is mapped to a serializer set by a deterministic
//! greedy cover: repeatedly take the serializer (whose components the
//! entity fully has) that covers the most still-uncovered components,
//! lowest index on ties. Both peers run the same selection, so the set
//! itself never travels on the wire.

use std::collections::HashMap;
use std::sync::Arc;

use spectre_core::{ArchetypeSignature, EntityId, World};

use super::builtin::{MotionSnapshot, PositionSnapshot};
use super::serializer::{GhostSerializer, GhostSnapshot, TypedSerializer};
use crate::error::{NetError, NetResult};
use crate::ghost::{DefaultSpawner, GhostId, GhostSpawner};
use crate::protocol::DeltaBuffer;

/// Snapshot of one ghost: one byte block per selected serializer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GhostRecord {
    /// Replicated archetype of the ghost.
    pub archetype: ArchetypeSignature,
    /// Records in serializer-set order.
    pub blocks: Vec<Vec<u8>>,
}

/// Collects serializers, spawners and importance weights.
pub struct RegistryBuilder {
    serializers: Vec<Box<dyn GhostSerializer>>,
    spawners: HashMap<ArchetypeSignature, Arc<dyn GhostSpawner>>,
    default_spawner: Arc<dyn GhostSpawner>,
    importance: HashMap<ArchetypeSignature, u32>,
}

impl RegistryBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            serializers: Vec::new(),
            spawners: HashMap::new(),
            default_spawner: Arc::new(DefaultSpawner),
            importance: HashMap::new(),
        }
    }

    /// Creates a builder with the stock position and motion serializers.
    #[must_use]
    pub fn with_builtin() -> Self {
        Self::new()
            .register::<PositionSnapshot>("position")
            .register::<MotionSnapshot>("motion")
    }

    /// Registers a typed snapshot record.
    ///
    /// # Panics
    ///
    /// Panics if a serializer with the same name or component set exists.
    #[must_use]
    pub fn register<S: GhostSnapshot>(self, name: &str) -> Self {
        self.register_with(TypedSerializer::<S>::new(name))
    }

    /// Registers a hand-written serializer.
    ///
    /// # Panics
    ///
    /// Panics if a serializer with the same name or component set exists,
    /// or if it covers no components.
    #[must_use]
    pub fn register_with<G: GhostSerializer + 'static>(mut self, serializer: G) -> Self {
        assert!(
            !serializer.components().is_empty(),
            "serializer '{}' covers no components",
            serializer.name()
        );
        for existing in &self.serializers {
            assert!(
                existing.name() != serializer.name(),
                "serializer '{}' registered twice",
                serializer.name()
            );
            assert!(
                existing.components() != serializer.components(),
                "serializers '{}' and '{}' cover the same components",
                existing.name(),
                serializer.name()
            );
        }
        self.serializers.push(Box::new(serializer));
        self
    }

    /// Uses `spawner` for ghosts of exactly `archetype`.
    #[must_use]
    pub fn spawner(
        mut self,
        archetype: ArchetypeSignature,
        spawner: impl GhostSpawner + 'static,
    ) -> Self {
        self.spawners.insert(archetype, Arc::new(spawner));
        self
    }

    /// Replaces the spawner used when no archetype-specific one matches.
    #[must_use]
    pub fn default_spawner(mut self, spawner: impl GhostSpawner + 'static) -> Self {
        self.default_spawner = Arc::new(spawner);
        self
    }

    /// Sets the importance weight of ghosts of `archetype`.
    #[must_use]
    pub fn importance(mut self, archetype: ArchetypeSignature, weight: u32) -> Self {
        self.importance.insert(archetype, weight);
        self
    }

    /// Freezes the registry.
    #[must_use]
    pub fn build(self) -> Arc<SerializerRegistry> {
        let replicated = self
            .serializers
            .iter()
            .fold(ArchetypeSignature::EMPTY, |acc, s| acc.union(s.components()));
        tracing::debug!(
            serializers = self.serializers.len(),
            replicated = ?replicated,
            "serializer registry built"
        );
        Arc::new(SerializerRegistry {
            serializers: self.serializers,
            spawners: self.spawners,
            default_spawner: self.default_spawner,
            importance: self.importance,
            replicated,
        })
    }
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable set of ghost serializers.
pub struct SerializerRegistry {
    serializers: Vec<Box<dyn GhostSerializer>>,
    spawners: HashMap<ArchetypeSignature, Arc<dyn GhostSpawner>>,
    default_spawner: Arc<dyn GhostSpawner>,
    importance: HashMap<ArchetypeSignature, u32>,
    replicated: ArchetypeSignature,
}

impl SerializerRegistry {
    /// Number of registered serializers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.serializers.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.serializers.is_empty()
    }

    /// Returns the serializer at `index`.
    #[must_use]
    pub fn serializer(&self, index: usize) -> Option<&dyn GhostSerializer> {
        self.serializers.get(index).map(|s| &**s)
    }

    /// Union of every component some serializer covers.
    #[must_use]
    pub const fn replicated(&self) -> ArchetypeSignature {
        self.replicated
    }

    /// The replicated part of an entity archetype.
    #[must_use]
    pub const fn replicated_archetype(&self, archetype: ArchetypeSignature) -> ArchetypeSignature {
        archetype.intersection(self.replicated)
    }

    /// Minimal covering serializer set, ascending by index.
    ///
    /// Returns `None` if the replicated part of `archetype` is empty or
    /// cannot be covered.
    #[must_use]
    pub fn select_serializers(&self, archetype: ArchetypeSignature) -> Option<Vec<usize>> {
        let needed = self.replicated_archetype(archetype);
        if needed.is_empty() {
            return None;
        }

        let mut covered = ArchetypeSignature::EMPTY;
        let mut chosen = Vec::new();
        while !covered.contains_all(needed) {
            let (index, _) = self
                .serializers
                .iter()
                .enumerate()
                .filter(|(_, s)| archetype.contains_all(s.components()))
                .map(|(i, s)| (i, s.components().difference(covered).len()))
                .filter(|(_, gain)| *gain > 0)
                .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))?;
            covered = covered.union(self.serializers[index].components());
            chosen.push(index);
        }
        chosen.sort_unstable();
        Some(chosen)
    }

    /// Returns true if ghosts of `archetype` can be replicated.
    #[must_use]
    pub fn can_serialize(&self, archetype: ArchetypeSignature) -> bool {
        self.select_serializers(archetype).is_some()
    }

    /// Registered weight for a replicated archetype.
    #[must_use]
    pub fn importance(&self, archetype: ArchetypeSignature) -> Option<u32> {
        self.importance.get(&archetype).copied()
    }

    /// Spawner for ghosts of `archetype`.
    #[must_use]
    pub fn spawner_for(&self, archetype: ArchetypeSignature) -> &dyn GhostSpawner {
        self.spawners
            .get(&archetype)
            .unwrap_or(&self.default_spawner)
            .as_ref()
    }

    /// Copies the current components of `entity` into a record.
    ///
    /// Returns `None` if the entity lost a component the set needs.
    #[must_use]
    pub fn copy_to_snapshot(
        &self,
        world: &World,
        entity: EntityId,
        archetype: ArchetypeSignature,
        serializers: &[usize],
    ) -> Option<GhostRecord> {
        let blocks = serializers
            .iter()
            .map(|&index| self.serializers[index].copy_from(world, entity))
            .collect::<Option<Vec<_>>>()?;
        Some(GhostRecord { archetype, blocks })
    }

    /// Delta-encodes every block of `record`.
    pub fn serialize_record(
        &self,
        record: &GhostRecord,
        baseline: Option<&GhostRecord>,
        serializers: &[usize],
        buffer: &mut DeltaBuffer,
    ) -> NetResult<()> {
        for (slot, &index) in serializers.iter().enumerate() {
            let block = record.blocks.get(slot).ok_or(NetError::SizeMismatch {
                expected: serializers.len(),
                actual: record.blocks.len(),
            })?;
            let base = baseline.and_then(|b| b.blocks.get(slot)).map(Vec::as_slice);
            self.serializers[index].serialize(block, base, buffer)?;
        }
        Ok(())
    }

    /// Decodes the blocks of one ghost.
    pub fn deserialize_record(
        &self,
        buffer: &mut DeltaBuffer,
        archetype: ArchetypeSignature,
        serializers: &[usize],
        baseline: Option<&GhostRecord>,
    ) -> NetResult<GhostRecord> {
        let mut blocks = Vec::with_capacity(serializers.len());
        for (slot, &index) in serializers.iter().enumerate() {
            let base = baseline.and_then(|b| b.blocks.get(slot)).map(Vec::as_slice);
            blocks.push(self.serializers[index].deserialize(buffer, base)?);
        }
        Ok(GhostRecord { archetype, blocks })
    }

    /// Writes a record into an existing entity.
    pub fn apply(
        &self,
        world: &mut World,
        entity: EntityId,
        record: &GhostRecord,
        serializers: &[usize],
    ) -> NetResult<()> {
        for (block, &index) in record.blocks.iter().zip(serializers) {
            self.serializers[index].apply(block, world, entity)?;
        }
        Ok(())
    }

    /// Creates the local entity of a new ghost and writes the record into it.
    pub fn spawn(
        &self,
        world: &mut World,
        ghost: GhostId,
        record: &GhostRecord,
        serializers: &[usize],
    ) -> NetResult<EntityId> {
        let entity = self
            .spawner_for(record.archetype)
            .spawn(world, ghost, record.archetype)?;
        self.apply(world, entity, record, serializers)?;
        Ok(entity)
    }
}

/// Known-archetype list: archetype → serializer set, filled lazily.
#[derive(Debug, Default)]
pub struct ArchetypeCache {
    known: HashMap<ArchetypeSignature, Arc<[usize]>>,
}

impl ArchetypeCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serializer set for `archetype`, computing it on first use.
    pub fn serializers(
        &mut self,
        registry: &SerializerRegistry,
        archetype: ArchetypeSignature,
    ) -> NetResult<Arc<[usize]>> {
        if let Some(set) = self.known.get(&archetype) {
            return Ok(Arc::clone(set));
        }
        let set: Arc<[usize]> = registry
            .select_serializers(archetype)
            .ok_or(NetError::UnknownArchetype(archetype.bits()))?
            .into();
        self.known.insert(archetype, Arc::clone(&set));
        Ok(set)
    }

    /// Number of known archetypes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.known.len()
    }

    /// Returns true if no archetype is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    /// Forgets every archetype.
    pub fn clear(&mut self) {
        self.known.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spectre_core::{Position, Velocity};

    fn motion() -> ArchetypeSignature {
        ArchetypeSignature::of::<Position>().with::<Velocity>()
    }

    #[test]
    fn test_greedy_cover_prefers_composite() {
        let registry = RegistryBuilder::with_builtin().build();
        assert_eq!(registry.select_serializers(motion()), Some(vec![1]));
        assert_eq!(
            registry.select_serializers(ArchetypeSignature::of::<Position>()),
            Some(vec![0])
        );
    }

    #[test]
    fn test_uncoverable_archetypes() {
        let registry = RegistryBuilder::new()
            .register::<MotionSnapshot>("motion")
            .build();
        // Velocity alone: the only serializer needs Position too.
        assert!(!registry.can_serialize(ArchetypeSignature::of::<Velocity>()));
        assert!(!registry.can_serialize(ArchetypeSignature::EMPTY));
        assert!(registry.can_serialize(motion().with_id(20)));
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn test_duplicate_name_panics() {
        let _ = RegistryBuilder::new()
            .register::<PositionSnapshot>("position")
            .register::<MotionSnapshot>("position");
    }

    #[test]
    fn test_record_roundtrip_through_registry() {
        let registry = RegistryBuilder::with_builtin().build();
        let mut world = World::new(4);
        let entity = world.spawn();
        world.insert(entity, Position::new(3.0, 0.0, -1.0));
        world.insert(entity, Velocity::new(0.0, 0.5, 0.0));

        let mut cache = ArchetypeCache::new();
        let set = cache.serializers(&registry, motion()).unwrap();
        let record = registry
            .copy_to_snapshot(&world, entity, motion(), &set)
            .unwrap();

        let mut buffer = DeltaBuffer::new();
        registry
            .serialize_record(&record, None, &set, &mut buffer)
            .unwrap();
        let decoded = registry
            .deserialize_record(&mut buffer, motion(), &set, None)
            .unwrap();
        assert_eq!(decoded, record);

        let ghost_entity = registry
            .spawn(&mut world, GhostId(1), &decoded, &set)
            .unwrap();
        assert_eq!(
            world.get_component::<Velocity>(ghost_entity),
            Some(&Velocity::new(0.0, 0.5, 0.0))
        );
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_custom_spawner_and_importance() {
        let registry = RegistryBuilder::with_builtin()
            .spawner(
                ArchetypeSignature::of::<Position>(),
                |world: &mut World, ghost: GhostId, _: ArchetypeSignature| -> NetResult<EntityId> {
                    let entity = DefaultSpawner.spawn(world, ghost, ArchetypeSignature::EMPTY)?;
                    world.insert(entity, Velocity::new(9.0, 9.0, 9.0));
                    Ok(entity)
                },
            )
            .importance(motion(), 5)
            .build();

        assert_eq!(registry.importance(motion()), Some(5));
        assert_eq!(registry.importance(ArchetypeSignature::of::<Position>()), None);

        let mut world = World::new(2);
        let record = GhostRecord {
            archetype: ArchetypeSignature::of::<Position>(),
            blocks: vec![bytemuck::bytes_of(&PositionSnapshot { x: 1000, y: 0, z: 0 }).to_vec()],
        };
        let entity = registry.spawn(&mut world, GhostId(3), &record, &[0]).unwrap();
        assert!(world.has::<Velocity>(entity));
        assert_eq!(world.get_component::<Position>(entity).map(|p| p.x), Some(1.0));
    }

    #[test]
    fn test_unknown_archetype_error() {
        let registry = RegistryBuilder::with_builtin().build();
        let mut cache = ArchetypeCache::new();
        let velocity_only = ArchetypeSignature::of::<Velocity>();
        assert_eq!(
            cache.serializers(&registry, velocity_only).unwrap_err(),
            NetError::UnknownArchetype(velocity_only.bits())
        );
    }
}
