//! # Sessions
//!
//! A session owns one peer's side of the protocol and advances it one tick
//! per call.
//!
//! ```text
//! ┌──────────────────── ServerSession::tick ────────────────────┐
//! │ poll transport ─► connect / disconnect / commands / RPCs    │
//! │ timeouts ─► dead ghosts ─► snapshots ─► flush RPCs          │
//! └─────────────────────────────────────────────────────────────┘
//! ┌──────────────────── ClientSession::tick ────────────────────┐
//! │ poll transport ─► snapshots / RPCs ─► GoInGame once ready   │
//! │ flush RPCs ─► command packet (carries the snapshot ack)     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Protocol corruption on a connection is logged and ends that connection;
//! the session keeps running.

mod client;
mod server;
mod tick;

pub use client::ClientSession;
pub use server::ServerSession;
pub use tick::{TickLoop, TickStats};

use std::sync::Arc;

use crate::command::CommandRegistry;
use crate::rpc::RpcRegistry;
use crate::snapshot::SerializerRegistry;

/// The three registries both peers must build identically.
#[derive(Clone)]
pub struct NetRegistries {
    /// Ghost serializers.
    pub snapshots: Arc<SerializerRegistry>,
    /// Command types.
    pub commands: Arc<CommandRegistry>,
    /// RPC types.
    pub rpcs: Arc<RpcRegistry>,
}

impl NetRegistries {
    /// Bundles the registries.
    #[must_use]
    pub fn new(
        snapshots: Arc<SerializerRegistry>,
        commands: Arc<CommandRegistry>,
        rpcs: Arc<RpcRegistry>,
    ) -> Self {
        Self {
            snapshots,
            commands,
            rpcs,
        }
    }
}
