//! # Wire Protocol
//!
//! Every packet starts with a [`StreamProtocol`] tag byte:
//!
//! ```text
//! Command  (0): [tag][snapshot ack][timestamps][target tick][delta buffer]
//! Rpc      (1): [tag][delta buffer]
//! Snapshot (2): [tag][timestamps][tick][command age][sizes][lz4 payload]
//! ```

mod bitbuffer;
mod compression;
mod framing;

pub use bitbuffer::{DeltaBuffer, MAX_DELTA_BITS};
pub use compression::{CompressionKind, Compressor, Lz4Compressor, NoCompression};
pub use framing::{PacketReader, PacketWriter};

use crate::error::NetError;

/// Stream a packet belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StreamProtocol {
    /// Client input samples plus snapshot acknowledgement.
    Command = 0,
    /// Ordered remote procedure calls.
    Rpc = 1,
    /// Server world state.
    Snapshot = 2,
}

impl TryFrom<u8> for StreamProtocol {
    type Error = NetError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Command),
            1 => Ok(Self::Rpc),
            2 => Ok(Self::Snapshot),
            other => Err(NetError::UnknownProtocol(other)),
        }
    }
}

/// Returns true if tick `a` is newer than tick `b`, tolerating wraparound.
#[inline]
#[must_use]
pub const fn is_newer_tick(a: u32, b: u32) -> bool {
    #[allow(clippy::cast_possible_wrap)]
    let diff = a.wrapping_sub(b) as i32;
    diff > 0
}
