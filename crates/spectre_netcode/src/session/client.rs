//! Predicting side.

use std::sync::Arc;

use spectre_core::{EntityId, World};

use super::NetRegistries;
use crate::command::CommandSendSystem;
use crate::config::NetConfig;
use crate::connection::{Connection, ConnectionState};
use crate::error::{NetError, NetResult};
use crate::protocol::{PacketReader, StreamProtocol};
use crate::rpc::{GoInGame, RpcCommand, RpcContext, RpcQueue, RpcRegistry};
use crate::snapshot::SnapshotReceiveSystem;
use crate::time::Clock;
use crate::transport::{Transport, TransportEvent};

/// Client half of the protocol.
pub struct ClientSession<T: Transport> {
    transport: T,
    config: NetConfig,
    registries: NetRegistries,
    clock: Arc<dyn Clock>,
    connection: Option<Connection>,
    snapshots: SnapshotReceiveSystem,
    commands: CommandSendSystem,
    go_in_game: RpcQueue<GoInGame>,
}

impl<T: Transport> ClientSession<T> {
    /// Creates a session on top of `transport`.
    #[must_use]
    pub fn new(
        transport: T,
        config: NetConfig,
        registries: NetRegistries,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let snapshots = SnapshotReceiveSystem::new(
            Arc::clone(&registries.snapshots),
            config.compression.compressor(),
            config.baseline_history,
        );
        let commands =
            CommandSendSystem::new(Arc::clone(&registries.commands), config.command_redundancy);
        let go_in_game = registries.rpcs.queue::<GoInGame>();
        Self {
            transport,
            config,
            registries,
            clock,
            connection: None,
            snapshots,
            commands,
            go_in_game,
        }
    }

    /// The server connection, once the transport reported it.
    #[must_use]
    pub const fn connection(&self) -> Option<&Connection> {
        self.connection.as_ref()
    }

    /// Returns true once snapshots flow.
    #[must_use]
    pub fn is_in_game(&self) -> bool {
        self.connection.as_ref().map_or(false, Connection::is_in_game)
    }

    /// Snapshot receive state: ghost map, histories, last tick.
    #[must_use]
    pub const fn snapshots(&self) -> &SnapshotReceiveSystem {
        &self.snapshots
    }

    /// The underlying transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Sends the samples of `entity`'s command buffers to the server.
    ///
    /// # Errors
    ///
    /// [`NetError::TransportClosed`] if there is no connection.
    pub fn set_command_target(&mut self, entity: EntityId) -> NetResult<()> {
        let connection = self.connection.as_mut().ok_or(NetError::TransportClosed)?;
        connection.command_target = entity;
        Ok(())
    }

    /// Queues an RPC for the next send.
    ///
    /// # Errors
    ///
    /// [`NetError::TransportClosed`] if there is no connection.
    ///
    /// # Panics
    ///
    /// Panics if `R` is not registered.
    pub fn schedule_rpc<R: RpcCommand>(&mut self, rpc: &R) -> NetResult<()> {
        let queue = self.registries.rpcs.queue::<R>();
        let connection = self.connection.as_mut().ok_or(NetError::TransportClosed)?;
        queue.schedule(&mut connection.rpc_out, rpc);
        Ok(())
    }

    /// Tick local input should be stamped with.
    ///
    /// Runs ahead of the newest snapshot by one tick plus the round trip
    /// plus how late the server reports commands arriving, capped at
    /// `max_prediction_offset`. Zero before the first snapshot.
    #[must_use]
    pub fn target_tick(&self) -> u32 {
        let last = self.snapshots.last_tick();
        let Some(connection) = self.connection.as_ref() else {
            return 0;
        };
        if last == 0 {
            return 0;
        }
        let rtt_ticks = connection.time.rtt_ms.map_or(0, |rtt| {
            (u64::from(rtt) * u64::from(self.config.tick_rate)).div_ceil(1000)
        });
        // Fractional ticks round up.
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let age_ticks = connection.command_age.ticks().max(0.0).ceil() as u64;
        let cap = u64::from(self.config.max_prediction_offset.max(1));
        let offset = (1 + rtt_ticks + age_ticks).min(cap);
        // Bounded by max_prediction_offset.
        #[allow(clippy::cast_possible_truncation)]
        let offset = offset as u32;
        last.wrapping_add(offset)
    }

    /// Processes every pending transport event.
    ///
    /// Returns the number of packets handled. Protocol corruption or a
    /// ghost that does not fit in `world` closes the connection; the call
    /// itself still succeeds.
    pub fn receive(&mut self, world: &mut World) -> usize {
        let now = self.clock.now_ms();
        let mut handled = 0;
        while let Some(event) = self.transport.poll_event() {
            match event {
                TransportEvent::Connect(id) => {
                    tracing::info!(connection = id.0, "connected to server");
                    self.connection = Some(Connection::new(id, 0));
                }
                TransportEvent::Disconnect(id) => {
                    tracing::info!(connection = id.0, "disconnected from server");
                    self.connection = None;
                }
                TransportEvent::Data { payload, .. } => {
                    let Some(connection) = self.connection.as_mut() else {
                        continue;
                    };
                    handled += 1;
                    let result = dispatch(
                        &mut self.snapshots,
                        &self.registries.rpcs,
                        world,
                        connection,
                        &payload,
                        now,
                    );
                    match result {
                        Ok(()) => {}
                        Err(err) if err.closes_connection() => {
                            tracing::warn!(connection = connection.id.0, %err, "closing connection");
                            self.transport.disconnect(connection.id);
                            self.connection = None;
                        }
                        Err(err) => tracing::warn!(%err, "packet ignored"),
                    }
                }
            }
        }

        match self.connection.as_mut() {
            Some(connection) if connection.state == ConnectionState::Connected => {
                self.go_in_game.schedule(&mut connection.rpc_out, &GoInGame);
                connection.state = ConnectionState::InGame;
                tracing::info!(
                    network_id = connection.network_id,
                    "requesting snapshots"
                );
            }
            Some(connection) if connection.is_in_game() => {}
            _ => {
                if self.snapshots.last_tick() != 0 || !self.snapshots.map().is_empty() {
                    self.snapshots.clear(world);
                }
            }
        }
        handled
    }

    /// Flushes queued RPCs and, once in game, sends the command packet.
    ///
    /// # Errors
    ///
    /// Propagates transport errors.
    pub fn send(&mut self, world: &World) -> NetResult<()> {
        let Some(connection) = self.connection.as_mut() else {
            return Ok(());
        };
        connection.rpc_out.flush(connection.id, &mut self.transport)?;
        if !connection.is_in_game() {
            return Ok(());
        }
        let target_tick = self.target_tick();
        let now = self.clock.now_ms();
        if let Some(connection) = self.connection.as_ref() {
            self.commands
                .send(world, connection, target_tick, now, &mut self.transport)?;
        }
        Ok(())
    }

    /// [`receive`](Self::receive) then [`send`](Self::send).
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub fn tick(&mut self, world: &mut World) -> NetResult<()> {
        self.receive(world);
        self.send(world)
    }
}

fn dispatch(
    snapshots: &mut SnapshotReceiveSystem,
    rpcs: &RpcRegistry,
    world: &mut World,
    connection: &mut Connection,
    payload: &[u8],
    now: u32,
) -> NetResult<()> {
    let mut reader = PacketReader::new(payload);
    match reader.read_protocol()? {
        StreamProtocol::Snapshot => {
            snapshots.receive(world, connection, &mut reader, now)?;
        }
        StreamProtocol::Rpc => {
            let mut buffer = reader.read_delta()?;
            rpcs.receive(&mut buffer, &mut RpcContext { world, connection })?;
        }
        StreamProtocol::Command => {
            return Err(NetError::UnknownProtocol(StreamProtocol::Command as u8));
        }
    }
    Ok(())
}
