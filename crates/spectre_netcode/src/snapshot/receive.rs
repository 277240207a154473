//! # Snapshot Receive
//!
//! Client side of the snapshot stream. Each accepted snapshot:
//!
//! 1. releases the ghosts listed as despawned,
//! 2. decodes every update against the baseline the server named,
//! 3. writes it into the mapped entity, spawning it on first sight,
//! 4. stores the decoded record as a future baseline.
//!
//! Snapshots older than the newest one received are dropped whole.

use std::collections::HashMap;
use std::sync::Arc;

use spectre_core::{ArchetypeSignature, World};

use super::history::BaselineHistory;
use super::registry::{ArchetypeCache, GhostRecord, SerializerRegistry};
use crate::connection::Connection;
use crate::error::{NetError, NetResult};
use crate::ghost::{GhostEntityMap, GhostId};
use crate::protocol::{Compressor, DeltaBuffer, PacketReader};

#[derive(Debug)]
struct ClientGhost {
    serializers: Arc<[usize]>,
    history: BaselineHistory<GhostRecord>,
}

/// Client-side snapshot pipeline.
pub struct SnapshotReceiveSystem {
    registry: Arc<SerializerRegistry>,
    compressor: Box<dyn Compressor>,
    map: GhostEntityMap,
    ghosts: HashMap<GhostId, ClientGhost>,
    cache: ArchetypeCache,
    history_capacity: usize,
    last_tick: u32,
}

impl SnapshotReceiveSystem {
    /// Creates the pipeline.
    #[must_use]
    pub fn new(
        registry: Arc<SerializerRegistry>,
        compressor: Box<dyn Compressor>,
        history_capacity: usize,
    ) -> Self {
        Self {
            registry,
            compressor,
            map: GhostEntityMap::new(),
            ghosts: HashMap::new(),
            cache: ArchetypeCache::new(),
            history_capacity,
            last_tick: 0,
        }
    }

    /// Ghost → local entity mapping.
    #[must_use]
    pub const fn map(&self) -> &GhostEntityMap {
        &self.map
    }

    /// Tick of the newest snapshot applied (0 before the first).
    #[must_use]
    pub const fn last_tick(&self) -> u32 {
        self.last_tick
    }

    /// Records received for `ghost`, for interpolation.
    #[must_use]
    pub fn history(&self, ghost: GhostId) -> Option<&BaselineHistory<GhostRecord>> {
        self.ghosts.get(&ghost).map(|g| &g.history)
    }

    /// Processes one snapshot packet, positioned after its protocol tag.
    ///
    /// Returns false if the snapshot was stale and ignored.
    ///
    /// # Errors
    ///
    /// Any decode failure. The packet is then only partly applied and the
    /// connection should be dropped.
    pub fn receive(
        &mut self,
        world: &mut World,
        connection: &mut Connection,
        reader: &mut PacketReader<'_>,
        now_ms: u32,
    ) -> NetResult<bool> {
        let timestamp = reader.read_u32()?;
        let echo = reader.read_u32()?;
        let tick = reader.read_u32()?;
        let command_age = reader.read_i32()?;
        let compressed_len = reader.read_u32()? as usize;
        let payload_len = reader.read_u32()? as usize;
        let compressed = reader.read_bytes(compressed_len)?;

        if !connection.ack.is_newer_local(tick) {
            tracing::trace!(
                tick,
                newest = connection.ack.last_received_local,
                "stale snapshot dropped"
            );
            return Ok(false);
        }
        connection.time.on_receive(timestamp, echo, now_ms);

        let raw = self.compressor.decompress(compressed, payload_len)?;
        let (mut payload, _) = DeltaBuffer::decode(&raw)?;

        let despawns = payload.read_packed_uint()?;
        let mut previous = 0;
        for _ in 0..despawns {
            previous = payload.read_uint_delta(previous)?;
            let ghost = GhostId(previous);
            self.map.release(ghost, world);
            self.ghosts.remove(&ghost);
        }

        let updates = payload.read_packed_uint()?;
        let mut previous = 0;
        for _ in 0..updates {
            previous = payload.read_uint_delta(previous)?;
            self.read_update(world, GhostId(previous), tick, &mut payload)?;
        }

        connection.ack.record_local(tick);
        connection.command_age.add_raw(command_age);
        self.last_tick = tick;
        tracing::trace!(tick, despawns, updates, "snapshot applied");
        Ok(true)
    }

    fn read_update(
        &mut self,
        world: &mut World,
        ghost: GhostId,
        tick: u32,
        payload: &mut DeltaBuffer,
    ) -> NetResult<()> {
        let (record, serializers) = if payload.read_bool()? {
            let baseline_tick = tick.wrapping_sub(payload.read_packed_uint()?);
            let missing = NetError::MissingBaseline {
                ghost: ghost.0,
                tick: baseline_tick,
            };
            let known = self.ghosts.get(&ghost).ok_or_else(|| missing.clone())?;
            let baseline = known.history.get(baseline_tick).ok_or(missing)?;
            let record = self.registry.deserialize_record(
                payload,
                baseline.archetype,
                &known.serializers,
                Some(baseline),
            )?;
            (record, Arc::clone(&known.serializers))
        } else {
            let low = u64::from(payload.read_bits(32)?);
            let high = u64::from(payload.read_bits(32)?);
            let archetype = ArchetypeSignature::from_bits(low | (high << 32));
            let serializers = self.cache.serializers(&self.registry, archetype)?;
            let record = self
                .registry
                .deserialize_record(payload, archetype, &serializers, None)?;
            (record, serializers)
        };

        match self.map.get(ghost).filter(|entity| world.is_alive(*entity)) {
            Some(entity) => self.registry.apply(world, entity, &record, &serializers)?,
            None => {
                self.map
                    .resolve(ghost, &record, &serializers, world, &self.registry)?;
            }
        }

        let capacity = self.history_capacity;
        let state = self.ghosts.entry(ghost).or_insert_with(|| ClientGhost {
            serializers: Arc::clone(&serializers),
            history: BaselineHistory::new(capacity),
        });
        state.serializers = serializers;
        state.history.insert(tick, record);
        Ok(())
    }

    /// Drops every ghost and its local entity, for a disconnect or a
    /// return to the lobby.
    pub fn clear(&mut self, world: &mut World) {
        if !self.map.is_empty() {
            tracing::debug!(ghosts = self.map.len(), "ghost state cleared");
        }
        self.map.clear(world);
        self.ghosts.clear();
        self.cache.clear();
        self.last_tick = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionId, ConnectionState};
    use crate::protocol::{Lz4Compressor, PacketWriter, StreamProtocol};
    use crate::snapshot::{PositionSnapshot, RegistryBuilder};
    use spectre_core::Position;

    fn position_bits() -> u64 {
        ArchetypeSignature::of::<Position>().bits()
    }

    /// Builds a snapshot packet by hand.
    fn packet(tick: u32, despawns: &[u32], updates: &[(u32, Option<u32>, [i32; 3])]) -> Vec<u8> {
        let mut payload = DeltaBuffer::new();
        payload.add_packed_uint(despawns.len() as u32);
        let mut previous = 0;
        for id in despawns {
            payload.add_uint_delta(*id, previous);
            previous = *id;
        }
        payload.add_packed_uint(updates.len() as u32);
        let mut previous = 0;
        for (id, baseline, [x, y, z]) in updates {
            payload.add_uint_delta(*id, previous);
            previous = *id;
            match baseline {
                Some(delta) => {
                    payload.add_bool(true);
                    payload.add_packed_uint(*delta);
                }
                None => {
                    payload.add_bool(false);
                    payload.add_bits(position_bits() as u32, 32);
                    payload.add_bits((position_bits() >> 32) as u32, 32);
                }
            }
            // Deltas are against zero in these fixtures.
            payload.add_int_delta(*x, 0);
            payload.add_int_delta(*y, 0);
            payload.add_int_delta(*z, 0);
        }
        let mut raw = Vec::new();
        payload.encode_into(&mut raw);
        let compressed = Lz4Compressor.compress(&raw);

        let mut writer = PacketWriter::new(StreamProtocol::Snapshot);
        writer.write_u32(1000 + tick);
        writer.write_u32(0);
        writer.write_u32(tick);
        writer.write_i32(256);
        writer.write_u32(compressed.len() as u32);
        writer.write_u32(raw.len() as u32);
        writer.write_bytes(&compressed);
        writer.into_bytes()
    }

    fn setup() -> (World, Connection, SnapshotReceiveSystem) {
        let registry = RegistryBuilder::with_builtin().build();
        let mut connection = Connection::new(ConnectionId(1), 0);
        connection.state = ConnectionState::InGame;
        (
            World::new(16),
            connection,
            SnapshotReceiveSystem::new(registry, Box::new(Lz4Compressor), 32),
        )
    }

    fn feed(
        system: &mut SnapshotReceiveSystem,
        world: &mut World,
        connection: &mut Connection,
        bytes: &[u8],
    ) -> NetResult<bool> {
        let mut reader = PacketReader::new(bytes);
        assert_eq!(reader.read_protocol().unwrap(), StreamProtocol::Snapshot);
        system.receive(world, connection, &mut reader, 5)
    }

    #[test]
    fn test_spawn_then_update_then_despawn() {
        let (mut world, mut conn, mut system) = setup();

        let bytes = packet(10, &[], &[(3, None, [1000, 2000, 0])]);
        assert!(feed(&mut system, &mut world, &mut conn, &bytes).unwrap());
        let entity = system.map().get(GhostId(3)).unwrap();
        let pos = world.get_component::<Position>(entity).unwrap();
        assert!((pos.x - 1.0).abs() < 1e-6 && (pos.y - 2.0).abs() < 1e-6);
        assert_eq!(conn.ack.last_received_local, 10);
        assert_eq!(system.last_tick(), 10);
        assert_eq!(conn.time.last_remote_timestamp, 1010);

        // Delta of 1000 on x against the tick-10 record.
        let bytes = packet(11, &[], &[(3, Some(1), [1000, 0, 0])]);
        assert!(feed(&mut system, &mut world, &mut conn, &bytes).unwrap());
        let pos = world.get_component::<Position>(entity).unwrap();
        assert!((pos.x - 2.0).abs() < 1e-6 && (pos.y - 2.0).abs() < 1e-6);
        assert_eq!(
            system.history(GhostId(3)).unwrap().get(11).map(|r| r.blocks[0].clone()),
            Some(bytemuck::bytes_of(&PositionSnapshot { x: 2000, y: 2000, z: 0 }).to_vec())
        );

        let bytes = packet(12, &[3], &[]);
        assert!(feed(&mut system, &mut world, &mut conn, &bytes).unwrap());
        assert!(!world.is_alive(entity));
        assert!(system.map().is_empty());
        assert!(system.history(GhostId(3)).is_none());
    }

    #[test]
    fn test_stale_snapshot_ignored() {
        let (mut world, mut conn, mut system) = setup();
        feed(&mut system, &mut world, &mut conn, &packet(20, &[], &[(1, None, [0, 0, 0])])).unwrap();
        let stale = packet(19, &[], &[(2, None, [0, 0, 0])]);
        assert!(!feed(&mut system, &mut world, &mut conn, &stale).unwrap());
        assert_eq!(system.map().len(), 1);
        assert_eq!(conn.ack.last_received_local, 20);
    }

    #[test]
    fn test_missing_baseline_is_error() {
        let (mut world, mut conn, mut system) = setup();
        let bytes = packet(30, &[], &[(9, Some(4), [0, 0, 0])]);
        assert_eq!(
            feed(&mut system, &mut world, &mut conn, &bytes),
            Err(NetError::MissingBaseline { ghost: 9, tick: 26 })
        );
        assert_eq!(conn.ack.last_received_local, 0);
    }

    #[test]
    fn test_locally_destroyed_ghost_respawns() {
        let (mut world, mut conn, mut system) = setup();
        feed(&mut system, &mut world, &mut conn, &packet(1, &[], &[(5, None, [0, 0, 0])])).unwrap();
        let first = system.map().get(GhostId(5)).unwrap();
        world.despawn(first);

        feed(&mut system, &mut world, &mut conn, &packet(2, &[], &[(5, None, [7, 0, 0])])).unwrap();
        let second = system.map().get(GhostId(5)).unwrap();
        assert_ne!(first, second);
        assert!(world.is_alive(second));
    }

    #[test]
    fn test_clear_releases_everything() {
        let (mut world, mut conn, mut system) = setup();
        let bytes = packet(1, &[], &[(1, None, [0, 0, 0]), (2, None, [0, 0, 0])]);
        feed(&mut system, &mut world, &mut conn, &bytes).unwrap();
        assert_eq!(world.alive_count(), 2);
        system.clear(&mut world);
        assert_eq!(world.alive_count(), 0);
        assert_eq!(system.last_tick(), 0);
    }
}
