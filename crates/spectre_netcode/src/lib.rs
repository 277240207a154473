//! # SPECTRE Netcode - Snapshot Replication
//!
//! Authoritative world state, delta compressed per client and rebuilt on
//! the other side of a pluggable transport.
//!
//! ## Architecture
//!
//! ```text
//! SERVER                                               CLIENT
//! ┌──────────────────────────┐                ┌──────────────────────────┐
//! │ ServerGhostTable         │   snapshots    │ SnapshotReceiveSystem    │
//! │ SnapshotSendSystem ──────┼──(unreliable)─►│  GhostEntityMap          │
//! │                          │                │                          │
//! │ CommandReceiveSystem ◄───┼───commands─────┼── CommandSendSystem      │
//! │                          │  (+ snapshot   │                          │
//! │ RpcRegistry ◄────────────┼─────ack)───────┼── OutgoingRpcBuffer      │
//! │ OutgoingRpcBuffer ───────┼──RPCs (reliable sequenced)──► RpcRegistry │
//! └──────────────────────────┘                └──────────────────────────┘
//! ```
//!
//! Every wire structure is written through one bit-level [`DeltaBuffer`]:
//! values travel as zig-zag deltas against a baseline both sides agree on,
//! so an unchanged field costs a single bit.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use spectre_core::{Position, World};
//! use spectre_netcode::{
//!     command::CommandRegistryBuilder, rpc::RpcRegistryBuilder, snapshot::RegistryBuilder,
//!     time::ManualClock, transport::{LinkConditioner, LoopbackNetwork},
//!     ClientSession, NetConfig, NetRegistries, ServerSession,
//! };
//!
//! let registries = NetRegistries::new(
//!     RegistryBuilder::with_builtin().build(),
//!     CommandRegistryBuilder::new().build(),
//!     RpcRegistryBuilder::new().build(),
//! );
//! let clock = Arc::new(ManualClock::new(1));
//! let (network, server_transport) = LoopbackNetwork::new(LinkConditioner::none());
//! let mut server = ServerSession::new(
//!     server_transport, NetConfig::default(), registries.clone(), clock.clone(),
//! );
//! let mut client = ClientSession::new(
//!     network.connect(), NetConfig::default(), registries, clock.clone(),
//! );
//!
//! let mut server_world = World::new(64);
//! let mut client_world = World::new(64);
//! let entity = server_world.spawn();
//! server_world.insert(entity, Position::new(1.0, 2.0, 3.0));
//! server.replicate(&mut server_world, entity).unwrap();
//!
//! for _ in 0..5 {
//!     server.tick(&mut server_world).unwrap();
//!     client.tick(&mut client_world).unwrap();
//!     clock.advance(16);
//! }
//! assert_eq!(client.snapshots().map().len(), 1);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod command;
pub mod config;
pub mod connection;
pub mod error;
pub mod ghost;
pub mod protocol;
pub mod rpc;
pub mod session;
pub mod snapshot;
pub mod time;
pub mod transport;

pub use config::NetConfig;
pub use connection::{Connection, ConnectionId, ConnectionState};
pub use error::{NetError, NetResult};
pub use ghost::{GhostComponent, GhostEntityMap, GhostId};
pub use protocol::{DeltaBuffer, StreamProtocol};
pub use session::{ClientSession, NetRegistries, ServerSession, TickLoop};
pub use snapshot::{SendStats, SnapshotReceiveSystem, SnapshotSendSystem};
pub use transport::{Pipeline, Transport, TransportEvent};
