//! # Netcode Error Types
//!
//! All errors that can occur while encoding, decoding or routing
//! replication traffic.

use thiserror::Error;

/// Errors that can occur in the replication layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetError {
    /// A read went past the last written bit of a delta buffer.
    #[error("delta buffer exhausted: read at bit {position} of {length}")]
    BufferExhausted {
        /// Read cursor when the read was attempted.
        position: usize,
        /// Number of valid bits in the buffer.
        length: usize,
    },

    /// A packed value kept announcing continuation groups past 32 bits.
    #[error("overlong packed value at bit {position}")]
    OverlongValue {
        /// Read cursor where the value started.
        position: usize,
    },

    /// Leading packet byte is not a known stream protocol.
    #[error("unknown stream protocol: {0}")]
    UnknownProtocol(u8),

    /// Command stream names a processor that is not registered.
    #[error("unknown command type: {0}")]
    UnknownCommandType(u8),

    /// RPC stream names a type id that is not registered.
    #[error("unknown rpc type: {0}")]
    UnknownRpcType(u32),

    /// A fixed-width header field was cut off.
    #[error("packet truncated: needed {needed} bytes, {available} available")]
    Truncated {
        /// Bytes the field required.
        needed: usize,
        /// Bytes left in the packet.
        available: usize,
    },

    /// A ghost update references a baseline the receiver does not hold.
    #[error("ghost {ghost} references baseline tick {tick} which is not held")]
    MissingBaseline {
        /// Ghost id of the update.
        ghost: u32,
        /// Baseline tick named by the sender.
        tick: u32,
    },

    /// Payload decompression failed.
    #[error("decompression failed: {0}")]
    Decompression(String),

    /// A length on the wire disagrees with the data.
    #[error("size mismatch: expected {expected}, got {actual}")]
    SizeMismatch {
        /// Announced or required size.
        expected: usize,
        /// Actual size.
        actual: usize,
    },

    /// No serializer set covers this archetype.
    #[error("no serializer covers archetype {0:#x}")]
    UnknownArchetype(u64),

    /// The entity store has no free slot for a new ghost.
    #[error("entity store is full")]
    EntityStoreFull,

    /// The entity is not alive in the store.
    #[error("entity is not alive")]
    EntityNotAlive,

    /// The connection id is not known to the session.
    #[error("unknown connection: {0}")]
    UnknownConnection(u32),

    /// The peer side of the transport is gone.
    #[error("transport closed")]
    TransportClosed,

    /// The transport queue towards the peer is full.
    #[error("transport queue full")]
    QueueFull,

    /// Invalid configuration file.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl NetError {
    /// Returns true for errors caused by malformed or hostile input.
    ///
    /// These abort the current decode pass; the session terminates the
    /// offending connection.
    #[must_use]
    pub const fn is_protocol_corruption(&self) -> bool {
        matches!(
            self,
            Self::BufferExhausted { .. }
                | Self::OverlongValue { .. }
                | Self::UnknownProtocol(_)
                | Self::UnknownCommandType(_)
                | Self::UnknownRpcType(_)
                | Self::Truncated { .. }
                | Self::MissingBaseline { .. }
                | Self::Decompression(_)
                | Self::SizeMismatch { .. }
                | Self::UnknownArchetype(_)
        )
    }
}

impl NetError {
    /// Returns true for errors after which the connection cannot continue.
    ///
    /// Protocol corruption, plus a full entity store on the receiving side:
    /// a ghost that cannot be spawned leaves the receiver without the
    /// baselines the sender will delta against, so every later snapshot
    /// would fail the same way.
    #[must_use]
    pub const fn closes_connection(&self) -> bool {
        self.is_protocol_corruption() || matches!(self, Self::EntityStoreFull)
    }
}

/// Result type for replication operations.
pub type NetResult<T> = Result<T, NetError>;
