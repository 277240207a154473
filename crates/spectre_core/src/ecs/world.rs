//! # World
//!
//! Entity slots, component columns, per-entity buffers and singleton
//! resources in one container.
//!
//! ```text
//!  slot:       0      1      2      3
//!  entity:   [3v1]  [dead] [0v4]  [dead]    free list: 3, 1
//!  Position: [p0 ]  [ -  ] [p2 ]  [ -  ]    one column per Component::ID
//!  Vec<Cmd>: {0: [..], 2: [..]}             buffers keyed by element type
//! ```
//!
//! The replication layer reads and writes entities only through this type.

use std::any::{Any, TypeId};
use std::collections::HashMap;

use super::archetype::ArchetypeSignature;
use super::buffer::{BufferStore, ErasedBuffers};
use super::component::{Component, Position, Velocity};
use super::entity::{Entity, EntityId};
use super::storage::{ComponentStorage, ErasedStorage};

/// An archetype is a `u64`, one bit per component id.
const COMPONENT_ID_LIMIT: usize = 64;

/// Fixed-capacity entity store.
///
/// Slots are allocated up front. A component column is allocated, at full
/// capacity, the first time its type is inserted on any entity.
///
/// ```rust
/// use spectre_core::{ArchetypeSignature, Position, Velocity, World};
///
/// let mut world = World::new(4);
/// let still = world.spawn();
/// let moving = world.spawn();
/// world.insert(still, Position::default());
/// world.insert(moving, Position::default());
/// world.insert(moving, Velocity::new(1.0, 0.0, 0.0));
///
/// let movers: Vec<_> = world
///     .query(ArchetypeSignature::of::<Position>().with::<Velocity>())
///     .collect();
/// assert_eq!(movers, vec![moving]);
/// ```
pub struct World {
    slots: Box<[Entity]>,
    /// Reusable slot indices, lowest on top.
    free: Vec<u32>,
    alive_count: usize,
    /// Indexed by `Component::ID`.
    columns: Vec<Option<Box<dyn ErasedStorage>>>,
    buffers: HashMap<TypeId, Box<dyn ErasedBuffers>>,
    resources: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl World {
    /// Creates a world that can hold `capacity` live entities.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero or does not fit in a `u32`.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let Ok(last) = u32::try_from(capacity) else {
            panic!("world capacity {capacity} does not fit a slot index");
        };
        assert!(last > 0, "world needs at least one entity slot");

        Self {
            slots: vec![Entity::dead(); capacity].into_boxed_slice(),
            free: (0..last).rev().collect(),
            alive_count: 0,
            columns: (0..COMPONENT_ID_LIMIT).map(|_| None).collect(),
            buffers: HashMap::new(),
            resources: HashMap::new(),
        }
    }

    /// Slot count.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Live entity count.
    #[inline]
    #[must_use]
    pub const fn alive_count(&self) -> usize {
        self.alive_count
    }

    /// Takes a free slot and returns its new handle.
    ///
    /// Returns [`EntityId::NULL`] when every slot is occupied; callers
    /// that cannot tolerate that check [`EntityId::is_null`].
    #[inline]
    pub fn spawn(&mut self) -> EntityId {
        let Some(index) = self.free.pop() else {
            return EntityId::NULL;
        };
        let slot = &mut self.slots[index as usize];
        let id = EntityId::new(index, slot.id.generation().wrapping_add(1));
        *slot = Entity::new(id);
        self.alive_count += 1;
        id
    }

    /// Frees the slot of a live entity.
    ///
    /// Its component cells go back to their defaults and its buffers are
    /// dropped. Returns `false` for dead or stale handles.
    pub fn despawn(&mut self, id: EntityId) -> bool {
        let Some(archetype) = self.archetype(id) else {
            return false;
        };
        let index = id.index();
        let slot = &mut self.slots[index as usize];
        slot.alive = false;
        slot.archetype = ArchetypeSignature::EMPTY;
        self.alive_count -= 1;
        self.free.push(index);

        for component_id in archetype.ids() {
            if let Some(column) = self.columns[component_id as usize].as_mut() {
                column.reset_slot(index as usize);
            }
        }
        for buffers in self.buffers.values_mut() {
            buffers.clear_slot(index);
        }
        true
    }

    /// Whether `id` names the current occupant of a live slot.
    #[inline]
    #[must_use]
    pub fn is_alive(&self, id: EntityId) -> bool {
        self.slots
            .get(id.index() as usize)
            .is_some_and(|slot| slot.alive && slot.id == id)
    }

    /// Slot bookkeeping for a live entity.
    #[inline]
    #[must_use]
    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.slots
            .get(id.index() as usize)
            .filter(|slot| slot.alive && slot.id == id)
    }

    /// Returns the archetype of a live entity.
    #[inline]
    #[must_use]
    pub fn archetype(&self, id: EntityId) -> Option<ArchetypeSignature> {
        self.get(id).map(|entity| entity.archetype)
    }

    /// Live slots in index order.
    pub fn iter_alive(&self) -> impl Iterator<Item = &Entity> {
        self.slots.iter().filter(|slot| slot.alive)
    }

    /// Iterates the ids of alive entities whose archetype contains `signature`.
    pub fn query(&self, signature: ArchetypeSignature) -> impl Iterator<Item = EntityId> + '_ {
        self.iter_alive()
            .filter(move |e| e.archetype.contains_all(signature))
            .map(|e| e.id)
    }

    // =========================================================================
    // Components
    // =========================================================================

    /// Returns the storage of `C`, if any entity ever had one.
    #[must_use]
    pub fn storage<C: Component>(&self) -> Option<&ComponentStorage<C>> {
        self.columns[C::ID as usize]
            .as_ref()
            .and_then(|s| s.as_any().downcast_ref::<ComponentStorage<C>>())
    }

    fn storage_or_insert<C: Component>(&mut self) -> &mut ComponentStorage<C> {
        let capacity = self.slots.len();
        let slot = &mut self.columns[C::ID as usize];
        let storage = slot.get_or_insert_with(|| Box::new(ComponentStorage::<C>::new(capacity)));
        match storage.as_any_mut().downcast_mut::<ComponentStorage<C>>() {
            Some(typed) => typed,
            None => panic!(
                "component id {} is used by two different component types",
                C::ID
            ),
        }
    }

    /// Attaches (or overwrites) a component.
    ///
    /// Returns `false` if the entity is not alive.
    pub fn insert<C: Component>(&mut self, id: EntityId, component: C) -> bool {
        if !self.is_alive(id) {
            return false;
        }
        let idx = id.index() as usize;
        self.storage_or_insert::<C>().set(idx, component);
        let entity = &mut self.slots[idx];
        entity.archetype = entity.archetype.with::<C>();
        true
    }

    /// Detaches a component.
    ///
    /// Returns `false` if the entity is not alive or did not have `C`.
    pub fn remove<C: Component>(&mut self, id: EntityId) -> bool {
        if !self.has::<C>(id) {
            return false;
        }
        let idx = id.index() as usize;
        self.storage_or_insert::<C>().reset(idx);
        let entity = &mut self.slots[idx];
        entity.archetype = entity.archetype.without_id(C::ID);
        true
    }

    /// Checks whether a live entity has `C`.
    #[inline]
    #[must_use]
    pub fn has<C: Component>(&self, id: EntityId) -> bool {
        self.get(id).is_some_and(|e| e.has_component(C::ID))
    }

    /// Gets a component of a live entity.
    #[must_use]
    pub fn get_component<C: Component>(&self, id: EntityId) -> Option<&C> {
        if !self.has::<C>(id) {
            return None;
        }
        self.storage::<C>()?.get(id.index() as usize)
    }

    /// Gets a mutable component of a live entity.
    pub fn get_component_mut<C: Component>(&mut self, id: EntityId) -> Option<&mut C> {
        if !self.has::<C>(id) {
            return None;
        }
        self.storage_or_insert::<C>().get_mut(id.index() as usize)
    }

    /// Overwrites a component the entity already has.
    ///
    /// Returns `false` if the entity does not have `C`.
    pub fn set<C: Component>(&mut self, id: EntityId, component: C) -> bool {
        match self.get_component_mut::<C>(id) {
            Some(slot) => {
                *slot = component;
                true
            }
            None => false,
        }
    }

    // =========================================================================
    // Dynamic buffers
    // =========================================================================

    fn buffer_store<T: Send + Sync + 'static>(&self) -> Option<&BufferStore<T>> {
        self.buffers
            .get(&TypeId::of::<T>())
            .and_then(|b| b.as_any().downcast_ref::<BufferStore<T>>())
    }

    fn buffer_store_mut<T: Send + Sync + 'static>(&mut self) -> Option<&mut BufferStore<T>> {
        self.buffers
            .get_mut(&TypeId::of::<T>())
            .and_then(|b| b.as_any_mut().downcast_mut::<BufferStore<T>>())
    }

    /// Adds a dynamic buffer of `T` to an entity (or returns the existing one).
    ///
    /// Returns `None` if the entity is not alive.
    pub fn add_buffer<T: Send + Sync + 'static>(&mut self, id: EntityId) -> Option<&mut Vec<T>> {
        if !self.is_alive(id) {
            return None;
        }
        self.buffers
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(BufferStore::<T>::new()));
        self.buffer_store_mut::<T>()
            .map(|store| store.get_or_insert(id.index()))
    }

    /// Gets the dynamic buffer of `T` of a live entity.
    #[must_use]
    pub fn buffer<T: Send + Sync + 'static>(&self, id: EntityId) -> Option<&Vec<T>> {
        if !self.is_alive(id) {
            return None;
        }
        self.buffer_store::<T>()?.get(id.index())
    }

    /// Gets the mutable dynamic buffer of `T` of a live entity.
    pub fn buffer_mut<T: Send + Sync + 'static>(&mut self, id: EntityId) -> Option<&mut Vec<T>> {
        if !self.is_alive(id) {
            return None;
        }
        self.buffer_store_mut::<T>()?.get_mut(id.index())
    }

    /// Removes the dynamic buffer of `T`, returning its contents.
    pub fn remove_buffer<T: Send + Sync + 'static>(&mut self, id: EntityId) -> Option<Vec<T>> {
        if !self.is_alive(id) {
            return None;
        }
        self.buffer_store_mut::<T>()?.remove(id.index())
    }

    // =========================================================================
    // Resources
    // =========================================================================

    /// Inserts a singleton resource, returning the previous value.
    pub fn insert_resource<R: Send + Sync + 'static>(&mut self, resource: R) -> Option<R> {
        self.resources
            .insert(TypeId::of::<R>(), Box::new(resource))
            .and_then(|old| old.downcast::<R>().ok())
            .map(|old| *old)
    }

    /// Gets a singleton resource.
    #[must_use]
    pub fn resource<R: Send + Sync + 'static>(&self) -> Option<&R> {
        self.resources
            .get(&TypeId::of::<R>())
            .and_then(|r| r.downcast_ref::<R>())
    }

    /// Gets a mutable singleton resource.
    pub fn resource_mut<R: Send + Sync + 'static>(&mut self) -> Option<&mut R> {
        self.resources
            .get_mut(&TypeId::of::<R>())
            .and_then(|r| r.downcast_mut::<R>())
    }

    /// Removes a singleton resource.
    pub fn remove_resource<R: Send + Sync + 'static>(&mut self) -> Option<R> {
        self.resources
            .remove(&TypeId::of::<R>())
            .and_then(|r| r.downcast::<R>().ok())
            .map(|r| *r)
    }

    // =========================================================================
    // Simulation helpers
    // =========================================================================

    /// Advances every entity with both a position and a velocity.
    pub fn update_positions(&mut self, delta_time: f32) {
        let movers: Vec<EntityId> = self
            .query(ArchetypeSignature::of::<Position>().with::<Velocity>())
            .collect();

        for id in movers {
            let Some(vel) = self.get_component::<Velocity>(id).copied() else {
                continue;
            };
            if let Some(pos) = self.get_component_mut::<Position>(id) {
                pos.advance(vel, delta_time);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_handle_after_slot_reuse() {
        let mut world = World::new(4);
        let old = world.spawn();
        let other = world.spawn();
        assert_eq!(world.alive_count(), 2);

        assert!(world.despawn(old));
        assert!(!world.despawn(old));
        let reused = world.spawn();

        assert_eq!(reused.index(), old.index());
        assert!(world.is_alive(reused) && world.is_alive(other));
        assert!(!world.is_alive(old));
        assert!(world.get(old).is_none());
        assert!(!world.insert(old, Position::default()));
        assert!(!world.is_alive(EntityId::NULL));
    }

    #[test]
    fn test_capacity_exhaustion() {
        let mut world = World::new(2);
        assert!(!world.spawn().is_null());
        assert!(!world.spawn().is_null());
        assert!(world.spawn().is_null());
    }

    #[test]
    fn test_components_follow_archetype() {
        let mut world = World::new(10);
        let id = world.spawn();

        assert!(world.insert(id, Position::new(1.0, 2.0, 3.0)));
        assert!(world.has::<Position>(id));
        assert!(!world.has::<Velocity>(id));
        assert!(!world.set(id, Velocity::new(1.0, 0.0, 0.0)));

        assert!(world.remove::<Position>(id));
        assert!(world.get_component::<Position>(id).is_none());
        assert!(world.archetype(id).unwrap().is_empty());
    }

    #[test]
    fn test_despawn_clears_components_for_next_occupant() {
        let mut world = World::new(1);
        let first = world.spawn();
        world.insert(first, Position::new(5.0, 5.0, 5.0));
        world.despawn(first);

        let second = world.spawn();
        assert!(world.get_component::<Position>(second).is_none());
        world.insert(second, Velocity::default());
        assert_eq!(world.query(ArchetypeSignature::of::<Position>()).count(), 0);
    }

    #[test]
    fn test_update_positions_skips_entities_without_velocity() {
        let mut world = World::new(4);
        let anchored = world.spawn();
        let drifting = world.spawn();
        world.insert(anchored, Position::new(1.0, 1.0, 1.0));
        world.insert(drifting, Position::default());
        world.insert(drifting, Velocity::new(4.0, 0.0, -2.0));

        world.update_positions(0.25);

        assert_eq!(world.get_component::<Position>(anchored), Some(&Position::new(1.0, 1.0, 1.0)));
        assert_eq!(world.get_component::<Position>(drifting), Some(&Position::new(1.0, 0.0, -0.5)));
    }

    #[test]
    fn test_dynamic_buffers() {
        let mut world = World::new(4);
        let id = world.spawn();

        world.add_buffer::<u32>(id).unwrap().extend([1, 2, 3]);
        world.buffer_mut::<u32>(id).unwrap().push(4);
        assert_eq!(world.buffer::<u32>(id).unwrap().as_slice(), &[1, 2, 3, 4]);
        assert!(world.buffer::<u64>(id).is_none());

        world.despawn(id);
        let next = world.spawn();
        assert!(world.buffer::<u32>(next).is_none());
    }

    #[test]
    fn test_resources() {
        let mut world = World::new(1);
        assert!(world.insert_resource(7u32).is_none());
        *world.resource_mut::<u32>().unwrap() += 1;
        assert_eq!(world.resource::<u32>(), Some(&8));
        assert_eq!(world.insert_resource(1u32), Some(8));
        assert_eq!(world.remove_resource::<u32>(), Some(1));
        assert!(world.resource::<u32>().is_none());
    }
}
