//! # Snapshot Send
//!
//! Once per server tick:
//!
//! ```text
//! ServerGhostTable::capture ──► history[tick] per ghost
//!        │
//!        ▼  per in-game connection
//! importance ─► baseline (newest acked sent tick) ─► encode body
//!        │
//!        ▼
//! sort (SendAtAllCost, score desc, id asc) ─► budget ─► sort by id
//!        │
//!        ▼
//! [despawns][updates] ─► lz4 ─► [2][ts][echo][tick][age][sizes][payload]
//! ```
//!
//! Payload layout:
//!
//! ```text
//! [despawn count]{[id delta]}*
//! [update count]{[id delta][has baseline]([tick - baseline] | [arch lo 32][arch hi 32])[blocks]}*
//! ```

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use spectre_core::World;

use super::history::BaselineHistory;
use super::priority::{GhostPriority, Importance, Priority};
use super::registry::{GhostRecord, SerializerRegistry};
use crate::connection::{Connection, ConnectionId, SnapshotAck};
use crate::error::{NetError, NetResult};
use crate::ghost::{GhostId, ServerGhost, ServerGhostTable};
use crate::protocol::{
    is_newer_tick, Compressor, DeltaBuffer, PacketWriter, StreamProtocol, MAX_DELTA_BITS,
};
use crate::transport::{Pipeline, Transport};

/// Per-connection send phase.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SendPhase {
    /// State created, nothing sent yet.
    #[default]
    AwaitingBuffer,
    /// Snapshots flowing.
    Streaming,
}

/// What one connection has been sent about one ghost.
#[derive(Clone, Debug)]
struct GhostSendState {
    /// Ticks whose snapshot included this ghost.
    sent: BaselineHistory<()>,
    /// Newest of those ticks.
    last_sent: u32,
}

/// Snapshot state of one in-game connection.
#[derive(Clone, Debug)]
pub struct ClientSnapshotState {
    phase: SendPhase,
    ghosts: HashMap<GhostId, GhostSendState>,
    /// Ghost → tick the despawn was first sent on (0 = not yet).
    pending_despawns: BTreeMap<GhostId, u32>,
    /// Payload of the tick being written.
    scratch: DeltaBuffer,
    history_capacity: usize,
}

impl ClientSnapshotState {
    fn new(history_capacity: usize) -> Self {
        Self {
            phase: SendPhase::AwaitingBuffer,
            ghosts: HashMap::new(),
            pending_despawns: BTreeMap::new(),
            scratch: DeltaBuffer::new(),
            history_capacity,
        }
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> SendPhase {
        self.phase
    }

    /// Returns true if the client was sent `ghost` and no despawn since.
    #[must_use]
    pub fn knows(&self, ghost: GhostId) -> bool {
        self.ghosts.contains_key(&ghost)
    }

    /// Tick `ghost` was last included on.
    #[must_use]
    pub fn last_sent(&self, ghost: GhostId) -> Option<u32> {
        self.ghosts.get(&ghost).map(|g| g.last_sent)
    }

    /// Despawns not yet acknowledged, ascending.
    pub fn pending_despawns(&self) -> impl Iterator<Item = GhostId> + '_ {
        self.pending_despawns.keys().copied()
    }

    fn forget(&mut self, ghost: GhostId) {
        if self.ghosts.remove(&ghost).is_some() {
            self.pending_despawns.entry(ghost).or_insert(0);
        }
    }

    fn write_snapshot(
        &mut self,
        ctx: &SendContext<'_>,
        ack: &SnapshotAck,
        stats: &mut SendStats,
    ) -> NetResult<&DeltaBuffer> {
        let tick = ctx.tick;

        // A despawn is done once the client got any snapshot from the
        // first one that carried it.
        let last_acked = ack.last_received_by_remote;
        self.pending_despawns.retain(|_, first_sent| {
            *first_sent == 0 || last_acked == 0 || is_newer_tick(*first_sent, last_acked)
        });

        let mut candidates = Vec::with_capacity(ctx.priorities.len());
        for &(ghost, priority) in ctx.priorities {
            if priority.importance == Importance::DontExist {
                self.forget(ghost);
                stats.ghosts_hidden += 1;
                continue;
            }
            // Visible again before the despawn went through.
            self.pending_despawns.remove(&ghost);

            let Some(server_ghost) = ctx.ghosts.get(ghost) else {
                continue;
            };
            let Some(record) = server_ghost.history.get(tick) else {
                tracing::trace!(%ghost, tick, "ghost not captured this tick");
                continue;
            };
            let known = self.ghosts.get(&ghost);
            let baseline = known.and_then(|state| {
                choose_baseline(state, server_ghost, ack, tick, self.history_capacity)
            });

            let mut body = DeltaBuffer::new();
            if let Some((baseline_tick, baseline_record)) = baseline {
                body.add_bool(true);
                body.add_packed_uint(tick.wrapping_sub(baseline_tick));
                ctx.registry.serialize_record(
                    record,
                    Some(baseline_record),
                    &server_ghost.serializers,
                    &mut body,
                )?;
            } else {
                let bits = record.archetype.bits();
                #[allow(clippy::cast_possible_truncation)]
                let (low, high) = (bits as u32, (bits >> 32) as u32);
                body.add_bool(false);
                body.add_bits(low, 32);
                body.add_bits(high, 32);
                ctx.registry
                    .serialize_record(record, None, &server_ghost.serializers, &mut body)?;
            }

            let age = known.map_or_else(
                || tick.wrapping_sub(server_ghost.spawn_tick),
                |state| tick.wrapping_sub(state.last_sent),
            );
            candidates.push(Candidate {
                ghost,
                forced: priority.importance == Importance::SendAtAllCost,
                score: priority.score(age),
                cost: body.bit_len() + MAX_DELTA_BITS,
                body,
            });
        }
        candidates.sort_unstable_by(Candidate::send_order);

        let payload = &mut self.scratch;
        payload.clear();
        payload.add_packed_uint(count_u32(self.pending_despawns.len())?);
        let mut previous = 0;
        for (ghost, first_sent) in &mut self.pending_despawns {
            payload.add_uint_delta(ghost.0, previous);
            previous = ghost.0;
            if *first_sent == 0 {
                *first_sent = tick;
            }
        }
        stats.despawns_sent += self.pending_despawns.len();

        let mut used = payload.bit_len() + MAX_DELTA_BITS;
        let mut exhausted = false;
        let mut selected = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if candidate.forced || (!exhausted && used + candidate.cost <= ctx.budget_bits) {
                used += candidate.cost;
                selected.push(candidate);
            } else {
                exhausted = true;
                stats.ghosts_dropped += 1;
                tracing::trace!(ghost = %candidate.ghost, "ghost dropped for budget");
            }
        }
        selected.sort_unstable_by_key(|c| c.ghost);

        payload.add_packed_uint(count_u32(selected.len())?);
        let mut previous = 0;
        for candidate in &selected {
            payload.add_uint_delta(candidate.ghost.0, previous);
            previous = candidate.ghost.0;
            payload.append(&candidate.body);

            let capacity = self.history_capacity;
            let state = self
                .ghosts
                .entry(candidate.ghost)
                .or_insert_with(|| GhostSendState {
                    sent: BaselineHistory::new(capacity),
                    last_sent: 0,
                });
            state.sent.insert(tick, ());
            state.last_sent = tick;
        }
        stats.ghosts_sent += selected.len();
        Ok(&self.scratch)
    }
}

fn count_u32(len: usize) -> NetResult<u32> {
    u32::try_from(len).map_err(|_| NetError::SizeMismatch {
        expected: u32::MAX as usize,
        actual: len,
    })
}

/// Newest tick this ghost was sent on that the client acknowledged and
/// both sides still hold.
fn choose_baseline<'a>(
    state: &GhostSendState,
    ghost: &'a ServerGhost,
    ack: &SnapshotAck,
    tick: u32,
    capacity: usize,
) -> Option<(u32, &'a GhostRecord)> {
    state
        .sent
        .ticks()
        .filter(|&sent| {
            let age = tick.wrapping_sub(sent) as usize;
            age > 0 && age < capacity && ack.is_received_by_remote(sent)
        })
        .filter_map(|sent| ghost.history.get(sent).map(|record| (sent, record)))
        .reduce(|a, b| if is_newer_tick(b.0, a.0) { b } else { a })
}

struct Candidate {
    ghost: GhostId,
    forced: bool,
    score: u64,
    cost: usize,
    body: DeltaBuffer,
}

impl Candidate {
    fn send_order(a: &Self, b: &Self) -> Ordering {
        b.forced
            .cmp(&a.forced)
            .then(b.score.cmp(&a.score))
            .then(a.ghost.cmp(&b.ghost))
    }
}

struct SendContext<'a> {
    registry: &'a SerializerRegistry,
    ghosts: &'a ServerGhostTable,
    priorities: &'a [(GhostId, Priority)],
    tick: u32,
    budget_bits: usize,
}

/// Totals of one [`SnapshotSendSystem::send`] call, over all connections.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SendStats {
    /// Connections a snapshot was sent to.
    pub connections: usize,
    /// Ghost updates written.
    pub ghosts_sent: usize,
    /// Ghost updates left out for budget reasons.
    pub ghosts_dropped: usize,
    /// Ghosts skipped as `DontExist`.
    pub ghosts_hidden: usize,
    /// Despawn entries written.
    pub despawns_sent: usize,
    /// Uncompressed payload bytes.
    pub payload_bytes: usize,
    /// Packet bytes handed to the transport.
    pub packet_bytes: usize,
}

/// Server-side snapshot pipeline.
pub struct SnapshotSendSystem {
    registry: Arc<SerializerRegistry>,
    compressor: Box<dyn Compressor>,
    states: BTreeMap<ConnectionId, ClientSnapshotState>,
    budget_bits: usize,
    history_capacity: usize,
}

impl SnapshotSendSystem {
    /// Creates the pipeline.
    ///
    /// `payload_budget` is the uncompressed payload size per connection
    /// and tick, in bytes.
    #[must_use]
    pub fn new(
        registry: Arc<SerializerRegistry>,
        compressor: Box<dyn Compressor>,
        payload_budget: usize,
        history_capacity: usize,
    ) -> Self {
        Self {
            registry,
            compressor,
            states: BTreeMap::new(),
            budget_bits: payload_budget.saturating_mul(8),
            history_capacity,
        }
    }

    /// Snapshot state of a connection.
    #[must_use]
    pub fn state(&self, connection: ConnectionId) -> Option<&ClientSnapshotState> {
        self.states.get(&connection)
    }

    /// Drops the state of a connection. Returns false if it had none.
    pub fn remove_connection(&mut self, connection: ConnectionId) -> bool {
        self.states.remove(&connection).is_some()
    }

    /// Queues despawns of destroyed ghosts for every client that knew them.
    pub fn on_ghosts_destroyed(&mut self, ghosts: &[GhostId]) {
        for state in self.states.values_mut() {
            for ghost in ghosts {
                state.forget(*ghost);
            }
        }
    }

    fn priority_of(&self, world: &World, ghost: &ServerGhost) -> Priority {
        if let Some(priority) = world.get_component::<GhostPriority>(ghost.entity) {
            return Priority {
                importance: priority.importance(),
                weight: priority.weight,
            };
        }
        self.registry
            .importance(ghost.archetype)
            .map_or(Priority::DEFAULT, |weight| Priority {
                importance: Importance::Archetype,
                weight,
            })
    }

    /// Captures this tick's ghost records and sends one snapshot to every
    /// in-game connection.
    ///
    /// Transport failures are logged and treated as packet loss.
    ///
    /// # Errors
    ///
    /// Only if a captured record does not match its serializer set.
    pub fn send<T: Transport + ?Sized>(
        &mut self,
        world: &World,
        ghosts: &mut ServerGhostTable,
        connections: &BTreeMap<ConnectionId, Connection>,
        tick: u32,
        now_ms: u32,
        transport: &mut T,
    ) -> NetResult<SendStats> {
        let mut stats = SendStats::default();
        ghosts.capture(world, &self.registry, tick);

        self.states
            .retain(|id, _| connections.get(id).map_or(false, Connection::is_in_game));
        for (id, connection) in connections {
            if connection.is_in_game() && !self.states.contains_key(id) {
                tracing::debug!(connection = id.0, "snapshot state created");
                self.states
                    .insert(*id, ClientSnapshotState::new(self.history_capacity));
            }
        }

        let priorities: Vec<(GhostId, Priority)> = ghosts
            .iter()
            .map(|(id, ghost)| (id, self.priority_of(world, ghost)))
            .collect();
        let ctx = SendContext {
            registry: &self.registry,
            ghosts: &*ghosts,
            priorities: &priorities,
            tick,
            budget_bits: self.budget_bits,
        };

        for (id, state) in &mut self.states {
            let Some(connection) = connections.get(id) else {
                continue;
            };
            let payload = state.write_snapshot(&ctx, &connection.ack, &mut stats)?;

            let mut raw = Vec::with_capacity(payload.encoded_len());
            payload.encode_into(&mut raw);
            let compressed = self.compressor.compress(&raw);

            let mut writer = PacketWriter::new(StreamProtocol::Snapshot);
            writer.write_u32(now_ms);
            writer.write_u32(connection.time.echo(now_ms));
            writer.write_u32(tick);
            writer.write_i32(connection.command_age.raw());
            writer.write_u32(count_u32(compressed.len())?);
            writer.write_u32(count_u32(raw.len())?);
            writer.write_bytes(&compressed);

            stats.connections += 1;
            stats.payload_bytes += raw.len();
            stats.packet_bytes += writer.len();
            state.phase = SendPhase::Streaming;

            if let Err(err) = transport.send(Pipeline::Unreliable, *id, writer.as_slice()) {
                tracing::warn!(connection = id.0, %err, "snapshot not sent");
            }
        }

        tracing::debug!(
            tick,
            connections = stats.connections,
            sent = stats.ghosts_sent,
            dropped = stats.ghosts_dropped,
            bytes = stats.packet_bytes,
            "snapshots sent"
        );
        Ok(stats)
    }
}
