//! # Connection Management
//!
//! Per-peer bookkeeping shared by the server and client sessions.
//!
//! ## Lifecycle
//!
//! ```text
//! transport Connect ──► Connecting ──SetNetworkId──► Connected ──GoInGame──► InGame
//!                                                                           │
//! transport Disconnect / protocol corruption / timeout ◄────────────────────┘
//! ```
//!
//! Snapshots and commands only flow while a connection is `InGame`.

mod ack;

pub use ack::SnapshotAck;

use spectre_core::EntityId;

use crate::command::SmoothedAge;
use crate::rpc::OutgoingRpcBuffer;

/// Unique identifier for a connection, shared by both peers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u32);

impl ConnectionId {
    /// Never assigned to a peer.
    pub const NULL: Self = Self(u32::MAX);

    /// Whether this is [`Self::NULL`].
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == u32::MAX
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::NULL
    }
}

/// Handshake progress of a peer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Transport link is up, no network id yet.
    #[default]
    Connecting = 0,
    /// Network id assigned.
    Connected = 1,
    /// Streaming snapshots and commands.
    InGame = 2,
}

/// Timestamp echo used for round-trip estimation.
///
/// Every packet carries the sender's clock and an echo of the last
/// timestamp it received, advanced by how long it held it. The original
/// sender subtracts the echo from its clock to get the round trip.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NetworkTime {
    /// Last timestamp received from the peer (peer clock).
    pub last_remote_timestamp: u32,
    /// Local time when that timestamp arrived.
    pub last_receive_time: u32,
    /// Smoothed round trip in milliseconds, `None` before the first sample.
    pub rtt_ms: Option<u32>,
}

impl NetworkTime {
    /// Records the timestamps of a received packet.
    pub fn on_receive(&mut self, remote_timestamp: u32, echo: u32, now_ms: u32) {
        self.last_remote_timestamp = remote_timestamp;
        self.last_receive_time = now_ms;
        if echo != 0 {
            let sample = u64::from(now_ms.wrapping_sub(echo));
            let smoothed = self.rtt_ms.map_or(sample, |rtt| (u64::from(rtt) * 7 + sample) / 8);
            self.rtt_ms = u32::try_from(smoothed).ok();
        }
    }

    /// Echo value to put in an outgoing packet (0 if nothing was received).
    #[must_use]
    pub const fn echo(&self, now_ms: u32) -> u32 {
        if self.last_remote_timestamp == 0 {
            return 0;
        }
        self.last_remote_timestamp
            .wrapping_add(now_ms.wrapping_sub(self.last_receive_time))
    }
}

/// A connection as seen by one peer.
#[derive(Debug)]
pub struct Connection {
    /// Transport-level peer id.
    pub id: ConnectionId,
    /// Handshake progress.
    pub state: ConnectionState,
    /// Network id assigned by the server (0 until assigned).
    pub network_id: u32,
    /// Snapshot acknowledgement.
    pub ack: SnapshotAck,
    /// Timestamp echo state.
    pub time: NetworkTime,
    /// Entity whose command buffers this connection feeds.
    pub command_target: EntityId,
    /// Smoothed command age (server: measured, client: reported).
    pub command_age: SmoothedAge,
    /// Tick of the last packet received on this connection.
    pub last_receive_tick: u32,
    /// RPCs waiting for the next flush.
    pub rpc_out: OutgoingRpcBuffer,
}

impl Connection {
    /// Creates a connection in the `Connecting` state.
    #[must_use]
    pub fn new(id: ConnectionId, tick: u32) -> Self {
        Self {
            id,
            state: ConnectionState::Connecting,
            network_id: 0,
            ack: SnapshotAck::new(),
            time: NetworkTime::default(),
            command_target: EntityId::NULL,
            command_age: SmoothedAge::new(),
            last_receive_tick: tick,
            rpc_out: OutgoingRpcBuffer::new(),
        }
    }

    /// Returns true once snapshots and commands may flow.
    #[inline]
    #[must_use]
    pub fn is_in_game(&self) -> bool {
        self.state == ConnectionState::InGame
    }

    /// Whether more than `timeout_ticks` ticks passed without traffic.
    #[must_use]
    pub fn is_timed_out(&self, current_tick: u32, timeout_ticks: u32) -> bool {
        current_tick.wrapping_sub(self.last_receive_tick) > timeout_ticks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_lifecycle() {
        let mut conn = Connection::new(ConnectionId(1), 0);
        assert_eq!(conn.state, ConnectionState::Connecting);
        assert!(!conn.is_in_game());
        assert!(conn.command_target.is_null());

        conn.state = ConnectionState::InGame;
        assert!(conn.is_in_game());
    }

    #[test]
    fn test_timeout() {
        let quiet = Connection::new(ConnectionId(1), u32::MAX - 4);
        assert!(!quiet.is_timed_out(u32::MAX - 4, 10));
        assert!(!quiet.is_timed_out(5, 10));
        assert!(quiet.is_timed_out(6, 10));
    }

    #[test]
    fn test_round_trip_estimate() {
        let mut client = NetworkTime::default();
        let mut server = NetworkTime::default();

        // Client sends at t=1000 (client clock), nothing to echo yet.
        assert_eq!(client.echo(1000), 0);
        // Server receives it at server time 5000 and replies 10ms later.
        server.on_receive(1000, 0, 5000);
        let echo = server.echo(5010);
        assert_eq!(echo, 1010);
        // Reply reaches the client at t=1060: 60ms round trip, 10ms held.
        client.on_receive(5010, echo, 1060);
        assert_eq!(client.rtt_ms, Some(50));
    }
}
