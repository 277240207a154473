//! Authoritative side.

use std::collections::BTreeMap;
use std::sync::Arc;

use spectre_core::{EntityId, World};

use super::NetRegistries;
use crate::command::CommandReceiveSystem;
use crate::config::NetConfig;
use crate::connection::{Connection, ConnectionId, ConnectionState};
use crate::error::{NetError, NetResult};
use crate::ghost::{GhostId, ServerGhostTable};
use crate::protocol::{PacketReader, StreamProtocol};
use crate::rpc::{RpcCommand, RpcContext, RpcQueue, SetNetworkId};
use crate::snapshot::{ClientSnapshotState, SendStats, SnapshotSendSystem};
use crate::time::Clock;
use crate::transport::{Transport, TransportEvent};

/// Server half of the protocol.
pub struct ServerSession<T: Transport> {
    transport: T,
    config: NetConfig,
    registries: NetRegistries,
    clock: Arc<dyn Clock>,
    connections: BTreeMap<ConnectionId, Connection>,
    ghosts: ServerGhostTable,
    snapshots: SnapshotSendSystem,
    commands: CommandReceiveSystem,
    set_network_id: RpcQueue<SetNetworkId>,
    tick: u32,
    next_network_id: u32,
}

impl<T: Transport> ServerSession<T> {
    /// Creates a session on top of `transport`.
    #[must_use]
    pub fn new(
        transport: T,
        config: NetConfig,
        registries: NetRegistries,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let snapshots = SnapshotSendSystem::new(
            Arc::clone(&registries.snapshots),
            config.compression.compressor(),
            config.snapshot_payload_budget,
            config.baseline_history,
        );
        let commands = CommandReceiveSystem::new(Arc::clone(&registries.commands));
        let set_network_id = registries.rpcs.queue::<SetNetworkId>();
        Self {
            transport,
            ghosts: ServerGhostTable::new(config.baseline_history),
            config,
            registries,
            clock,
            connections: BTreeMap::new(),
            snapshots,
            commands,
            set_network_id,
            tick: 0,
            next_network_id: 1,
        }
    }

    /// Tick of the last [`tick`](Self::tick) call (0 before the first).
    #[must_use]
    pub const fn current_tick(&self) -> u32 {
        self.tick
    }

    /// Every live connection, by id.
    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    /// Looks up a connection.
    #[must_use]
    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    /// Replicated ghosts.
    #[must_use]
    pub const fn ghosts(&self) -> &ServerGhostTable {
        &self.ghosts
    }

    /// Snapshot send state of a connection.
    #[must_use]
    pub fn snapshot_state(&self, id: ConnectionId) -> Option<&ClientSnapshotState> {
        self.snapshots.state(id)
    }

    /// The underlying transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Starts replicating `entity` to every in-game client.
    ///
    /// # Errors
    ///
    /// See [`ServerGhostTable::register`].
    pub fn replicate(&mut self, world: &mut World, entity: EntityId) -> NetResult<GhostId> {
        self.ghosts
            .register(world, &self.registries.snapshots, entity, self.tick)
    }

    /// Stops replicating a ghost and despawns it on clients. The entity
    /// itself is left alive.
    pub fn stop_replicating(&mut self, ghost: GhostId) -> bool {
        if self.ghosts.unregister(ghost).is_none() {
            return false;
        }
        self.snapshots.on_ghosts_destroyed(&[ghost]);
        true
    }

    /// Routes the connection's commands into `entity`'s buffers.
    ///
    /// # Errors
    ///
    /// [`NetError::UnknownConnection`] if the connection is gone.
    pub fn set_command_target(&mut self, id: ConnectionId, entity: EntityId) -> NetResult<()> {
        let connection = self
            .connections
            .get_mut(&id)
            .ok_or(NetError::UnknownConnection(id.0))?;
        connection.command_target = entity;
        Ok(())
    }

    /// Queues an RPC for the next flush.
    ///
    /// # Errors
    ///
    /// [`NetError::UnknownConnection`] if the connection is gone.
    ///
    /// # Panics
    ///
    /// Panics if `R` is not registered.
    pub fn schedule_rpc<R: RpcCommand>(&mut self, id: ConnectionId, rpc: &R) -> NetResult<()> {
        let queue = self.registries.rpcs.queue::<R>();
        let connection = self
            .connections
            .get_mut(&id)
            .ok_or(NetError::UnknownConnection(id.0))?;
        queue.schedule(&mut connection.rpc_out, rpc);
        Ok(())
    }

    /// Queues an RPC for every in-game connection. Returns how many.
    ///
    /// # Panics
    ///
    /// Panics if `R` is not registered.
    pub fn broadcast_rpc<R: RpcCommand>(&mut self, rpc: &R) -> usize {
        let queue = self.registries.rpcs.queue::<R>();
        let mut scheduled = 0;
        for connection in self.connections.values_mut().filter(|c| c.is_in_game()) {
            queue.schedule(&mut connection.rpc_out, rpc);
            scheduled += 1;
        }
        scheduled
    }

    /// Runs one server tick.
    ///
    /// # Errors
    ///
    /// Only if a captured ghost record does not match its serializer set.
    /// Per-connection failures are handled by dropping the connection.
    pub fn tick(&mut self, world: &mut World) -> NetResult<SendStats> {
        self.tick = self.tick.wrapping_add(1).max(1);
        let now = self.clock.now_ms();

        self.poll(world, now);
        self.drop_timed_out(world);

        let dead = self.ghosts.collect_dead(world);
        if !dead.is_empty() {
            self.snapshots.on_ghosts_destroyed(&dead);
        }

        let stats = self.snapshots.send(
            world,
            &mut self.ghosts,
            &self.connections,
            self.tick,
            now,
            &mut self.transport,
        )?;
        self.flush_rpcs();
        Ok(stats)
    }

    fn poll(&mut self, world: &mut World, now: u32) {
        while let Some(event) = self.transport.poll_event() {
            match event {
                TransportEvent::Connect(id) => self.on_connect(id),
                TransportEvent::Disconnect(id) => {
                    if self.remove_connection(world, id) {
                        tracing::info!(connection = id.0, "client disconnected");
                    }
                }
                TransportEvent::Data {
                    connection,
                    payload,
                    ..
                } => match self.on_data(world, connection, &payload, now) {
                    Ok(()) => {}
                    Err(err) if err.closes_connection() => {
                        tracing::warn!(connection = connection.0, %err, "dropping connection");
                        self.transport.disconnect(connection);
                        self.remove_connection(world, connection);
                    }
                    Err(err) => {
                        tracing::warn!(connection = connection.0, %err, "packet ignored");
                    }
                },
            }
        }
    }

    fn on_connect(&mut self, id: ConnectionId) {
        let mut connection = Connection::new(id, self.tick);
        connection.network_id = self.next_network_id;
        connection.state = ConnectionState::Connected;
        self.next_network_id = self.next_network_id.wrapping_add(1).max(1);
        self.set_network_id.schedule(
            &mut connection.rpc_out,
            &SetNetworkId {
                network_id: connection.network_id,
            },
        );
        tracing::info!(
            connection = id.0,
            network_id = connection.network_id,
            "client connected"
        );
        self.connections.insert(id, connection);
    }

    fn on_data(
        &mut self,
        world: &mut World,
        id: ConnectionId,
        payload: &[u8],
        now: u32,
    ) -> NetResult<()> {
        let connection = self
            .connections
            .get_mut(&id)
            .ok_or(NetError::UnknownConnection(id.0))?;
        connection.last_receive_tick = self.tick;

        let mut reader = PacketReader::new(payload);
        match reader.read_protocol()? {
            StreamProtocol::Command => {
                if connection.is_in_game() {
                    self.commands
                        .receive(world, connection, &mut reader, self.tick, now)?;
                }
            }
            StreamProtocol::Rpc => {
                let mut buffer = reader.read_delta()?;
                let mut ctx = RpcContext { world, connection };
                self.registries.rpcs.receive(&mut buffer, &mut ctx)?;
            }
            StreamProtocol::Snapshot => {
                return Err(NetError::UnknownProtocol(StreamProtocol::Snapshot as u8));
            }
        }
        Ok(())
    }

    fn drop_timed_out(&mut self, world: &mut World) {
        let timeout = self.config.connection_timeout_ticks;
        let expired: Vec<ConnectionId> = self
            .connections
            .values()
            .filter(|c| c.is_timed_out(self.tick, timeout))
            .map(|c| c.id)
            .collect();
        for id in expired {
            tracing::warn!(connection = id.0, timeout, "connection timed out");
            self.transport.disconnect(id);
            self.remove_connection(world, id);
        }
    }

    fn remove_connection(&mut self, world: &mut World, id: ConnectionId) -> bool {
        let Some(connection) = self.connections.remove(&id) else {
            return false;
        };
        if world.is_alive(connection.command_target) {
            self.commands.clear(world, connection.command_target);
        }
        self.snapshots.remove_connection(id);
        true
    }

    fn flush_rpcs(&mut self) {
        for (id, connection) in &mut self.connections {
            if let Err(err) = connection.rpc_out.flush(*id, &mut self.transport) {
                tracing::warn!(connection = id.0, %err, "rpc flush failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandRegistryBuilder;
    use crate::rpc::RpcRegistryBuilder;
    use crate::snapshot::RegistryBuilder;
    use crate::time::ManualClock;
    use crate::transport::{LinkConditioner, LoopbackNetwork, LoopbackServer};
    use spectre_core::Position;

    fn server() -> (ServerSession<LoopbackServer>, LoopbackNetwork) {
        let registries = NetRegistries::new(
            RegistryBuilder::with_builtin().build(),
            CommandRegistryBuilder::new().build(),
            RpcRegistryBuilder::new().build(),
        );
        let (network, transport) = LoopbackNetwork::new(LinkConditioner::none());
        let session = ServerSession::new(
            transport,
            NetConfig::default(),
            registries,
            Arc::new(ManualClock::new(0)),
        );
        (session, network)
    }

    #[test]
    fn test_connect_assigns_sequential_network_ids() {
        let (mut session, network) = server();
        let _a = network.connect();
        let _b = network.connect();
        let mut world = World::new(4);
        session.tick(&mut world).unwrap();

        assert_eq!(session.current_tick(), 1);
        let ids: Vec<u32> = session.connections().map(|c| c.network_id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(session
            .connections()
            .all(|c| c.state == ConnectionState::Connected && c.rpc_out.is_empty()));
    }

    #[test]
    fn test_unknown_connection_errors() {
        let (mut session, _network) = server();
        let mut world = World::new(4);
        let entity = world.spawn();
        assert_eq!(
            session.set_command_target(ConnectionId(7), entity),
            Err(NetError::UnknownConnection(7))
        );
        assert_eq!(
            session.schedule_rpc(ConnectionId(7), &SetNetworkId { network_id: 1 }),
            Err(NetError::UnknownConnection(7))
        );
        assert_eq!(session.broadcast_rpc(&SetNetworkId { network_id: 1 }), 0);
    }

    #[test]
    fn test_replicate_requires_serializable_entity() {
        let (mut session, _network) = server();
        let mut world = World::new(4);
        let bare = world.spawn();
        assert!(session.replicate(&mut world, bare).is_err());

        let entity = world.spawn();
        world.insert(entity, Position::new(1.0, 0.0, 0.0));
        let ghost = session.replicate(&mut world, entity).unwrap();
        assert_eq!(session.replicate(&mut world, entity).unwrap(), ghost);
        assert_eq!(session.ghosts().len(), 1);

        world.despawn(entity);
        session.tick(&mut world).unwrap();
        assert!(session.ghosts().is_empty());
    }
}
