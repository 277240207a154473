//! # Packet Framing
//!
//! Byte-level writer/reader for the fixed-width packet headers.
//! All multi-byte fields are little-endian. Payloads that follow the
//! header are framed [`DeltaBuffer`]s.

use super::bitbuffer::DeltaBuffer;
use super::StreamProtocol;
use crate::error::{NetError, NetResult};

/// Packet writer - appends header fields to a growable buffer.
///
/// This struct can be reused across packets via [`reset`](Self::reset).
#[derive(Clone, Debug, Default)]
pub struct PacketWriter {
    buffer: Vec<u8>,
}

impl PacketWriter {
    /// Creates a writer whose first byte is the stream protocol tag.
    #[must_use]
    pub fn new(protocol: StreamProtocol) -> Self {
        let mut writer = Self {
            buffer: Vec::with_capacity(64),
        };
        writer.write_u8(protocol as u8);
        writer
    }

    /// Clears the buffer and writes a new protocol tag.
    pub fn reset(&mut self, protocol: StreamProtocol) {
        self.buffer.clear();
        self.write_u8(protocol as u8);
    }

    /// Returns the number of bytes written.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true if no bytes have been written.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Returns a slice of the written data.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    /// Consumes the writer and returns the packet bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Writes a single byte.
    #[inline]
    pub fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Writes a u32 in little-endian format.
    #[inline]
    pub fn write_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes an i32 in little-endian format.
    #[inline]
    pub fn write_i32(&mut self, value: i32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes a u64 in little-endian format.
    #[inline]
    pub fn write_u64(&mut self, value: u64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes raw bytes.
    #[inline]
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Writes a framed delta buffer.
    #[inline]
    pub fn write_delta(&mut self, delta: &DeltaBuffer) {
        delta.encode_into(&mut self.buffer);
    }
}

/// Packet reader - reads header fields from a received packet.
pub struct PacketReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> PacketReader<'a> {
    /// Creates a new reader from a buffer.
    #[must_use]
    pub const fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    /// Returns the number of bytes remaining.
    #[inline]
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    #[inline]
    fn take<const N: usize>(&mut self) -> NetResult<[u8; N]> {
        let Some(slice) = self.buffer.get(self.position..self.position + N) else {
            return Err(NetError::Truncated {
                needed: N,
                available: self.remaining(),
            });
        };
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        self.position += N;
        Ok(out)
    }

    /// Reads the leading protocol tag.
    pub fn read_protocol(&mut self) -> NetResult<StreamProtocol> {
        StreamProtocol::try_from(self.read_u8()?)
    }

    /// Reads a single byte.
    #[inline]
    pub fn read_u8(&mut self) -> NetResult<u8> {
        self.take::<1>().map(|b| b[0])
    }

    /// Reads a u32 in little-endian format.
    #[inline]
    pub fn read_u32(&mut self) -> NetResult<u32> {
        self.take::<4>().map(u32::from_le_bytes)
    }

    /// Reads an i32 in little-endian format.
    #[inline]
    pub fn read_i32(&mut self) -> NetResult<i32> {
        self.take::<4>().map(i32::from_le_bytes)
    }

    /// Reads a u64 in little-endian format.
    #[inline]
    pub fn read_u64(&mut self) -> NetResult<u64> {
        self.take::<8>().map(u64::from_le_bytes)
    }

    /// Reads exactly `len` raw bytes.
    pub fn read_bytes(&mut self, len: usize) -> NetResult<&'a [u8]> {
        let Some(slice) = self.buffer.get(self.position..self.position + len) else {
            return Err(NetError::Truncated {
                needed: len,
                available: self.remaining(),
            });
        };
        self.position += len;
        Ok(slice)
    }

    /// Reads a framed delta buffer.
    pub fn read_delta(&mut self) -> NetResult<DeltaBuffer> {
        let (delta, consumed) = DeltaBuffer::decode(&self.buffer[self.position.min(self.buffer.len())..])?;
        self.position += consumed;
        Ok(delta)
    }
}
