//! Command processors keyed by a stable type byte.

use std::any::TypeId;
use std::collections::{BTreeMap, HashMap};
use std::marker::PhantomData;
use std::sync::Arc;

use spectre_core::{EntityId, World};

use super::buffer::{CommandBuffer, CommandData, COMMAND_BUFFER_CAPACITY};
use crate::error::{NetError, NetResult};
use crate::protocol::{is_newer_tick, DeltaBuffer};

/// Type-erased command channel of one [`CommandData`] type.
pub trait CommandProcessor: Send + Sync {
    /// Type name, for logs.
    fn name(&self) -> &'static str;

    /// Writes `[type byte][count][samples]` for `target` if it has a sample
    /// at `target_tick`, followed by up to `redundancy - 1` older samples.
    ///
    /// Returns false (writing nothing) if there is no sample to send.
    fn write(
        &self,
        type_id: u8,
        world: &World,
        target: EntityId,
        target_tick: u32,
        redundancy: usize,
        buffer: &mut DeltaBuffer,
    ) -> bool;

    /// Reads the samples following a type byte into `target`'s buffer.
    ///
    /// Samples are always consumed; they are only stored if `target` is
    /// alive. Returns the number of samples read.
    ///
    /// # Errors
    ///
    /// Propagates read errors from the buffer.
    fn read(
        &self,
        world: &mut World,
        target: EntityId,
        target_tick: u32,
        buffer: &mut DeltaBuffer,
    ) -> NetResult<usize>;

    /// Empties `target`'s buffer of this type.
    fn clear(&self, world: &mut World, target: EntityId);
}

/// [`CommandProcessor`] for a concrete sample type.
pub struct TypedCommandProcessor<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedCommandProcessor<T> {
    /// Creates the processor.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for TypedCommandProcessor<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: CommandData + 'static> CommandProcessor for TypedCommandProcessor<T> {
    fn name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn write(
        &self,
        type_id: u8,
        world: &World,
        target: EntityId,
        target_tick: u32,
        redundancy: usize,
        buffer: &mut DeltaBuffer,
    ) -> bool {
        let Some(samples) = world.buffer::<T>(target) else {
            return false;
        };
        if samples.get_data_at_tick(target_tick).is_none() {
            return false;
        }

        let mut chosen: Vec<&T> = samples
            .iter()
            .filter(|s| !is_newer_tick(s.tick(), target_tick))
            .collect();
        // Newest first.
        chosen.sort_unstable_by_key(|s| target_tick.wrapping_sub(s.tick()));
        chosen.truncate(redundancy.max(1));

        buffer.add_bits(u32::from(type_id), 8);
        // At most COMMAND_BUFFER_CAPACITY entries.
        #[allow(clippy::cast_possible_truncation)]
        let count = chosen.len() as u32;
        buffer.add_packed_uint(count);
        let mut previous_tick = target_tick;
        let mut baseline = T::zeroed();
        for sample in chosen {
            buffer.add_packed_uint(previous_tick.wrapping_sub(sample.tick()));
            sample.serialize(&baseline, buffer);
            previous_tick = sample.tick();
            baseline = *sample;
        }
        true
    }

    fn read(
        &self,
        world: &mut World,
        target: EntityId,
        target_tick: u32,
        buffer: &mut DeltaBuffer,
    ) -> NetResult<usize> {
        let count = buffer.read_packed_uint()? as usize;
        let mut decoded = Vec::with_capacity(count.min(COMMAND_BUFFER_CAPACITY));
        let mut previous_tick = target_tick;
        let mut baseline = T::zeroed();
        for _ in 0..count {
            let tick = previous_tick.wrapping_sub(buffer.read_packed_uint()?);
            let sample = T::deserialize(buffer, &baseline, tick)?;
            previous_tick = tick;
            baseline = sample;
            decoded.push(sample);
        }

        if let Some(stored) = world.add_buffer::<T>(target) {
            // Oldest first so redundant copies never evict newer samples.
            for sample in decoded.into_iter().rev() {
                stored.add_command_data(sample);
            }
        }
        Ok(count)
    }

    fn clear(&self, world: &mut World, target: EntityId) {
        if let Some(stored) = world.buffer_mut::<T>(target) {
            stored.clear();
        }
    }
}

/// Collects command types at startup.
#[derive(Default)]
pub struct CommandRegistryBuilder {
    processors: BTreeMap<u8, Box<dyn CommandProcessor>>,
    ids: HashMap<TypeId, u8>,
}

impl CommandRegistryBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T` under the lowest free type byte.
    ///
    /// Registering a type again keeps its id.
    ///
    /// # Panics
    ///
    /// Panics if all 256 type bytes are taken.
    #[must_use]
    pub fn register<T: CommandData + 'static>(self) -> Self {
        if let Some(id) = self.ids.get(&TypeId::of::<T>()) {
            let id = *id;
            return self.register_as::<T>(id);
        }
        let id = (0..=u8::MAX)
            .find(|id| !self.processors.contains_key(id))
            .unwrap_or_else(|| panic!("command type bytes exhausted"));
        self.register_as::<T>(id)
    }

    /// Registers `T` under a fixed type byte.
    ///
    /// # Panics
    ///
    /// Panics if `T` already holds a different id, or if `id` belongs to
    /// another type.
    #[must_use]
    pub fn register_as<T: CommandData + 'static>(mut self, id: u8) -> Self {
        let type_id = TypeId::of::<T>();
        if let Some(existing) = self.ids.get(&type_id) {
            if *existing != id {
                panic!(
                    "registered id changed at runtime: {} was {}, now {}",
                    std::any::type_name::<T>(),
                    existing,
                    id
                );
            }
            return self;
        }
        if let Some(owner) = self.processors.get(&id) {
            panic!(
                "command type byte {} already taken by {}",
                id,
                owner.name()
            );
        }
        self.ids.insert(type_id, id);
        self.processors
            .insert(id, Box::new(TypedCommandProcessor::<T>::new()));
        self
    }

    /// Freezes the registry.
    #[must_use]
    pub fn build(self) -> Arc<CommandRegistry> {
        tracing::debug!(commands = self.processors.len(), "command registry built");
        Arc::new(CommandRegistry {
            processors: self.processors,
            ids: self.ids,
        })
    }
}

/// Immutable set of command processors.
pub struct CommandRegistry {
    processors: BTreeMap<u8, Box<dyn CommandProcessor>>,
    ids: HashMap<TypeId, u8>,
}

impl CommandRegistry {
    /// Number of registered command types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.processors.len()
    }

    /// Returns true if no command type is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// Type byte of `T`.
    #[must_use]
    pub fn id_of<T: CommandData + 'static>(&self) -> Option<u8> {
        self.ids.get(&TypeId::of::<T>()).copied()
    }

    /// Processor for a type byte.
    #[must_use]
    pub fn processor(&self, id: u8) -> Option<&dyn CommandProcessor> {
        self.processors.get(&id).map(|p| &**p)
    }

    /// Processors in ascending type byte order.
    pub fn iter(&self) -> impl Iterator<Item = (u8, &dyn CommandProcessor)> {
        self.processors.iter().map(|(id, p)| (*id, &**p))
    }

    /// Dispatches one type byte read from `buffer`.
    ///
    /// # Errors
    ///
    /// [`NetError::UnknownCommandType`] if the byte is not registered, or
    /// any read error.
    pub fn read_one(
        &self,
        world: &mut World,
        target: EntityId,
        target_tick: u32,
        buffer: &mut DeltaBuffer,
    ) -> NetResult<usize> {
        // 8-bit read, always fits.
        #[allow(clippy::cast_possible_truncation)]
        let id = buffer.read_bits(8)? as u8;
        let processor = self
            .processor(id)
            .ok_or(NetError::UnknownCommandType(id))?;
        processor.read(world, target, target_tick, buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::super::buffer::tests::{sample, MoveInput};
    use super::*;
    use bytemuck::{Pod, Zeroable};

    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
    #[repr(C)]
    struct FireInput {
        tick: u32,
        trigger: u32,
    }

    impl CommandData for FireInput {
        fn tick(&self) -> u32 {
            self.tick
        }

        fn serialize(&self, baseline: &Self, buffer: &mut DeltaBuffer) {
            buffer.add_uint_delta(self.trigger, baseline.trigger);
        }

        fn deserialize(buffer: &mut DeltaBuffer, baseline: &Self, tick: u32) -> NetResult<Self> {
            Ok(Self {
                tick,
                trigger: buffer.read_uint_delta(baseline.trigger)?,
            })
        }
    }

    #[test]
    fn test_ids_assigned_in_order() {
        let registry = CommandRegistryBuilder::new()
            .register::<MoveInput>()
            .register::<FireInput>()
            .register::<MoveInput>()
            .build();
        assert_eq!(registry.id_of::<MoveInput>(), Some(0));
        assert_eq!(registry.id_of::<FireInput>(), Some(1));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    #[should_panic(expected = "registered id changed at runtime")]
    fn test_changed_id_panics() {
        let _ = CommandRegistryBuilder::new()
            .register_as::<MoveInput>(3)
            .register_as::<MoveInput>(4);
    }

    #[test]
    #[should_panic(expected = "already taken")]
    fn test_shared_id_panics() {
        let _ = CommandRegistryBuilder::new()
            .register_as::<MoveInput>(3)
            .register_as::<FireInput>(3);
    }

    #[test]
    fn test_redundant_samples_roundtrip() {
        let registry = CommandRegistryBuilder::new().register::<MoveInput>().build();
        let mut client = World::new(1);
        let player = client.spawn();
        let samples = client.add_buffer::<MoveInput>(player).unwrap();
        for tick in 1..=10 {
            samples.add_command_data(sample(tick));
        }

        let mut buffer = DeltaBuffer::new();
        let (id, processor) = registry.iter().next().unwrap();
        assert!(processor.write(id, &client, player, 10, 4, &mut buffer));
        assert!(!processor.write(id, &client, player, 11, 4, &mut buffer));

        let mut server = World::new(1);
        let target = server.spawn();
        assert_eq!(registry.read_one(&mut server, target, 10, &mut buffer).unwrap(), 4);
        assert!(buffer.is_finished());

        let received = server.buffer::<MoveInput>(target).unwrap();
        for tick in 7..=10 {
            assert_eq!(received.get_data_at_tick(tick), Some(&sample(tick)));
        }
        assert_eq!(received.get_data_at_tick(6), None);
    }

    #[test]
    fn test_unknown_type_byte() {
        let registry = CommandRegistryBuilder::new().register::<MoveInput>().build();
        let mut buffer = DeltaBuffer::new();
        buffer.add_bits(9, 8);
        let mut world = World::new(1);
        assert_eq!(
            registry.read_one(&mut world, EntityId::NULL, 0, &mut buffer),
            Err(NetError::UnknownCommandType(9))
        );
    }
}
