//! Connection handshake RPCs, registered on every registry.

use super::{RpcCommand, RpcContext};
use crate::connection::ConnectionState;
use crate::error::NetResult;
use crate::protocol::DeltaBuffer;

/// Server → client: assigns the client its network id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SetNetworkId {
    /// Id assigned by the server.
    pub network_id: u32,
}

impl RpcCommand for SetNetworkId {
    fn serialize(&self, buffer: &mut DeltaBuffer) {
        buffer.add_packed_uint(self.network_id);
    }

    fn deserialize(buffer: &mut DeltaBuffer) -> NetResult<Self> {
        Ok(Self {
            network_id: buffer.read_packed_uint()?,
        })
    }

    fn execute(self, ctx: &mut RpcContext<'_>) {
        ctx.connection.network_id = self.network_id;
        if ctx.connection.state == ConnectionState::Connecting {
            ctx.connection.state = ConnectionState::Connected;
        }
        tracing::info!(
            connection = ctx.connection.id.0,
            network_id = self.network_id,
            "network id assigned"
        );
    }
}

/// Client → server: the client is ready for snapshots.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GoInGame;

impl RpcCommand for GoInGame {
    fn serialize(&self, _buffer: &mut DeltaBuffer) {}

    fn deserialize(_buffer: &mut DeltaBuffer) -> NetResult<Self> {
        Ok(Self)
    }

    /// Only moves a connection that already holds a network id.
    fn execute(self, ctx: &mut RpcContext<'_>) {
        if ctx.connection.state != ConnectionState::Connected {
            tracing::warn!(
                connection = ctx.connection.id.0,
                state = ?ctx.connection.state,
                "go in game ignored"
            );
            return;
        }
        ctx.connection.state = ConnectionState::InGame;
        tracing::info!(connection = ctx.connection.id.0, "connection in game");
    }
}
