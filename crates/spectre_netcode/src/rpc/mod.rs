//! # Remote Procedure Calls
//!
//! One-shot messages, executed in send order on the receiving peer.
//!
//! ```text
//! RpcQueue<T>::schedule ──► OutgoingRpcBuffer [id][payload][id][payload]...
//!                                 │ flush (reliable sequenced)
//!                                 ▼
//!                           [1][delta buffer] ──► RpcRegistry::receive ──► T::execute
//! ```
//!
//! RPC payloads are written against zero; nothing is delta compressed
//! across calls.

mod builtin;
mod registry;

pub use builtin::{GoInGame, SetNetworkId};
pub use registry::{RpcQueue, RpcRegistry, RpcRegistryBuilder};

use spectre_core::World;

use crate::connection::{Connection, ConnectionId};
use crate::error::NetResult;
use crate::protocol::{DeltaBuffer, PacketWriter, StreamProtocol};
use crate::transport::{Pipeline, Transport};

/// What an RPC may touch while executing.
pub struct RpcContext<'a> {
    /// The receiving peer's world.
    pub world: &'a mut World,
    /// The connection the RPC arrived on.
    pub connection: &'a mut Connection,
}

/// A remote procedure.
pub trait RpcCommand: Sized + Send + Sync + 'static {
    /// Writes the arguments.
    fn serialize(&self, buffer: &mut DeltaBuffer);

    /// Reads the arguments.
    ///
    /// # Errors
    ///
    /// Propagates read errors from the buffer.
    fn deserialize(buffer: &mut DeltaBuffer) -> NetResult<Self>;

    /// Runs the procedure on the receiving peer.
    fn execute(self, ctx: &mut RpcContext<'_>);
}

/// RPCs scheduled on one connection, waiting for the next flush.
#[derive(Clone, Debug, Default)]
pub struct OutgoingRpcBuffer {
    buffer: DeltaBuffer,
    pending: usize,
}

impl OutgoingRpcBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buffer: DeltaBuffer::new(),
            pending: 0,
        }
    }

    /// Returns true if nothing is scheduled.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.pending == 0
    }

    /// Number of scheduled RPCs.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.pending
    }

    pub(crate) fn push(&mut self, type_id: u32, rpc: &impl RpcCommand) {
        self.buffer.add_packed_uint(type_id);
        rpc.serialize(&mut self.buffer);
        self.pending += 1;
    }

    /// Sends every scheduled RPC in one reliable packet.
    ///
    /// Returns the number of RPCs sent. The buffer is only emptied once the
    /// transport accepted the packet.
    ///
    /// # Errors
    ///
    /// Propagates transport errors.
    pub fn flush<T: Transport + ?Sized>(
        &mut self,
        connection: ConnectionId,
        transport: &mut T,
    ) -> NetResult<usize> {
        if self.pending == 0 {
            return Ok(0);
        }
        let mut writer = PacketWriter::new(StreamProtocol::Rpc);
        writer.write_delta(&self.buffer);
        transport.send(Pipeline::ReliableSequenced, connection, writer.as_slice())?;
        let sent = self.pending;
        self.buffer.clear();
        self.pending = 0;
        Ok(sent)
    }
}
