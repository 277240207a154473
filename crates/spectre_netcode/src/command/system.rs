//! Command packet send (client) and receive (server).
//!
//! ```text
//! [0][last snapshot u32][ack mask u64][timestamp u32][echo u32][target tick u32]
//! [delta buffer: { [type 8 bits][count][tick delta, fields]* }*]
//! ```

use std::sync::Arc;

use spectre_core::{EntityId, World};

use super::registry::CommandRegistry;
use crate::connection::Connection;
use crate::error::NetResult;
use crate::protocol::{DeltaBuffer, PacketReader, PacketWriter, StreamProtocol};
use crate::transport::{Pipeline, Transport};

/// Client half: packs the command target's samples every tick.
pub struct CommandSendSystem {
    registry: Arc<CommandRegistry>,
    redundancy: usize,
    scratch: DeltaBuffer,
}

impl CommandSendSystem {
    /// Creates a sender repeating each sample in `redundancy` packets.
    #[must_use]
    pub fn new(registry: Arc<CommandRegistry>, redundancy: usize) -> Self {
        Self {
            registry,
            redundancy: redundancy.max(1),
            scratch: DeltaBuffer::new(),
        }
    }

    /// Sends one command packet.
    ///
    /// The packet goes out even without samples, since it also carries the
    /// snapshot acknowledgement. Returns the number of command types
    /// written.
    ///
    /// # Errors
    ///
    /// Propagates transport errors.
    pub fn send<T: Transport + ?Sized>(
        &mut self,
        world: &World,
        connection: &Connection,
        target_tick: u32,
        now_ms: u32,
        transport: &mut T,
    ) -> NetResult<usize> {
        self.scratch.clear();
        let mut written = 0;
        if !connection.command_target.is_null() {
            for (id, processor) in self.registry.iter() {
                if processor.write(
                    id,
                    world,
                    connection.command_target,
                    target_tick,
                    self.redundancy,
                    &mut self.scratch,
                ) {
                    written += 1;
                }
            }
        }

        let mut writer = PacketWriter::new(StreamProtocol::Command);
        writer.write_u32(connection.ack.last_received_local);
        writer.write_u64(connection.ack.received_local_mask);
        writer.write_u32(now_ms);
        writer.write_u32(connection.time.echo(now_ms));
        writer.write_u32(target_tick);
        writer.write_delta(&self.scratch);
        transport.send(Pipeline::Unreliable, connection.id, writer.as_slice())?;
        Ok(written)
    }
}

/// Server half: routes received samples into the command target's buffers.
pub struct CommandReceiveSystem {
    registry: Arc<CommandRegistry>,
}

impl CommandReceiveSystem {
    /// Creates a receiver.
    #[must_use]
    pub const fn new(registry: Arc<CommandRegistry>) -> Self {
        Self { registry }
    }

    /// Handles a command packet whose protocol byte was already read.
    ///
    /// Updates the remote snapshot acknowledgement, the timestamp echo and
    /// the smoothed command age, then stores every sample. Returns the
    /// number of samples read.
    ///
    /// # Errors
    ///
    /// Any error is protocol corruption: truncated header, exhausted
    /// buffer or an unknown type byte.
    pub fn receive(
        &self,
        world: &mut World,
        connection: &mut Connection,
        reader: &mut PacketReader<'_>,
        server_tick: u32,
        now_ms: u32,
    ) -> NetResult<usize> {
        let last_snapshot = reader.read_u32()?;
        let mask = reader.read_u64()?;
        let timestamp = reader.read_u32()?;
        let echo = reader.read_u32()?;
        let target_tick = reader.read_u32()?;
        let mut payload = reader.read_delta()?;

        connection.ack.update_remote(last_snapshot, mask);
        connection.time.on_receive(timestamp, echo, now_ms);
        // Positive when the command arrived after its tick. Tick 0 means
        // the client has no snapshot to predict from yet.
        #[allow(clippy::cast_possible_wrap)]
        let age = server_tick.wrapping_sub(target_tick) as i32;
        if target_tick != 0 {
            connection.command_age.add_sample(age);
        }

        let mut samples = 0;
        while !payload.is_finished() {
            samples += self.registry.read_one(
                world,
                connection.command_target,
                target_tick,
                &mut payload,
            )?;
        }
        tracing::trace!(
            connection = connection.id.0,
            target_tick,
            samples,
            "commands received"
        );
        Ok(samples)
    }

    /// Empties every command buffer of `target`.
    pub fn clear(&self, world: &mut World, target: EntityId) {
        for (_, processor) in self.registry.iter() {
            processor.clear(world, target);
        }
    }
}
