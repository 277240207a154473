//! # Delta Buffer
//!
//! Bit stream with variable-width integer encoding. Every wire structure
//! (snapshot payloads, command samples, RPC records) is written through it.
//!
//! ## Encoding
//!
//! A value is written as the wrapping difference to a baseline, zig-zag
//! mapped so small negative and positive deltas are both small:
//!
//! ```text
//! delta == 0   ->  0
//! delta != 0   ->  1 [d0 d1 d2 d3 c] [d4 d5 d6 d7 c] ...
//!                    └── 4 data bits, continuation bit
//! ```
//!
//! An unchanged field costs one bit; a full 32-bit value costs at most 41.
//!
//! Reads past the written length fail with [`NetError::BufferExhausted`]
//! instead of producing garbage, so a corrupt packet aborts the decode pass.

use crate::error::{NetError, NetResult};

/// Data bits per continuation group.
const GROUP_BITS: u32 = 4;

/// Maximum encoded size of a 32-bit delta, in bits.
pub const MAX_DELTA_BITS: usize = 41;

#[inline]
const fn zigzag(value: i32) -> u32 {
    #[allow(clippy::cast_sign_loss)]
    let encoded = ((value << 1) ^ (value >> 31)) as u32;
    encoded
}

#[inline]
const fn unzigzag(value: u32) -> i32 {
    #[allow(clippy::cast_possible_wrap)]
    let decoded = ((value >> 1) as i32) ^ -((value & 1) as i32);
    decoded
}

/// Bit stream with independent write and read cursors.
///
/// # Example
///
/// ```rust
/// use spectre_netcode::protocol::DeltaBuffer;
///
/// let mut buffer = DeltaBuffer::new();
/// buffer.add_uint_delta(1005, 1000);
/// buffer.add_int_delta(-3, 0);
///
/// assert_eq!(buffer.read_uint_delta(1000).unwrap(), 1005);
/// assert_eq!(buffer.read_int_delta(0).unwrap(), -3);
/// assert!(buffer.is_finished());
/// ```
#[derive(Clone, Debug, Default)]
pub struct DeltaBuffer {
    /// Backing storage, bit `n` lives in `bytes[n / 8]` at `1 << (n % 8)`.
    bytes: Vec<u8>,
    /// Number of bits written.
    next_position: usize,
    /// Next bit to read.
    read_position: usize,
}

impl DeltaBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bytes: Vec::new(),
            next_position: 0,
            read_position: 0,
        }
    }

    /// Creates an empty buffer with room for `bits` bits.
    #[must_use]
    pub fn with_capacity(bits: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(bits.div_ceil(8)),
            next_position: 0,
            read_position: 0,
        }
    }

    // =========================================================================
    // Cursors
    // =========================================================================

    /// Number of bits written (the write cursor).
    #[inline]
    #[must_use]
    pub const fn next_position(&self) -> usize {
        self.next_position
    }

    /// The read cursor.
    #[inline]
    #[must_use]
    pub const fn read_position(&self) -> usize {
        self.read_position
    }

    /// Number of valid bits.
    #[inline]
    #[must_use]
    pub const fn bit_len(&self) -> usize {
        self.next_position
    }

    /// Number of bytes needed to hold the valid bits.
    #[inline]
    #[must_use]
    pub const fn byte_len(&self) -> usize {
        self.next_position.div_ceil(8)
    }

    /// Returns true if nothing was written.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.next_position == 0
    }

    /// Returns true once every written bit has been read.
    #[inline]
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.read_position >= self.next_position
    }

    /// Bits left to read.
    #[inline]
    #[must_use]
    pub const fn remaining_bits(&self) -> usize {
        self.next_position.saturating_sub(self.read_position)
    }

    /// Moves the read cursor. Positions past the end make the next read fail.
    #[inline]
    pub fn seek(&mut self, position: usize) {
        self.read_position = position;
    }

    /// Rewinds the read cursor to the first bit.
    #[inline]
    pub fn reset_read(&mut self) {
        self.read_position = 0;
    }

    /// Discards all bits and resets both cursors. Keeps the allocation.
    pub fn clear(&mut self) {
        self.bytes.clear();
        self.next_position = 0;
        self.read_position = 0;
    }

    // =========================================================================
    // Raw bits
    // =========================================================================

    #[inline]
    fn push_bit(&mut self, bit: bool) {
        let byte = self.next_position / 8;
        if byte == self.bytes.len() {
            self.bytes.push(0);
        }
        if bit {
            self.bytes[byte] |= 1 << (self.next_position % 8);
        }
        self.next_position += 1;
    }

    #[inline]
    fn bit_at(&self, position: usize) -> bool {
        self.bytes[position / 8] & (1 << (position % 8)) != 0
    }

    #[inline]
    fn ensure_readable(&self, bits: usize) -> NetResult<()> {
        if self.read_position + bits > self.next_position {
            return Err(NetError::BufferExhausted {
                position: self.read_position,
                length: self.next_position,
            });
        }
        Ok(())
    }

    /// Writes a single bit.
    #[inline]
    pub fn add_bool(&mut self, value: bool) {
        self.push_bit(value);
    }

    /// Reads a single bit.
    #[inline]
    pub fn read_bool(&mut self) -> NetResult<bool> {
        self.ensure_readable(1)?;
        let bit = self.bit_at(self.read_position);
        self.read_position += 1;
        Ok(bit)
    }

    /// Writes the low `count` bits of `value`, least significant first.
    ///
    /// # Panics
    ///
    /// Panics if `count > 32`.
    pub fn add_bits(&mut self, value: u32, count: u32) {
        assert!(count <= 32, "cannot write more than 32 bits at once");
        for i in 0..count {
            self.push_bit(value & (1 << i) != 0);
        }
    }

    /// Reads `count` bits written by [`add_bits`](Self::add_bits).
    ///
    /// # Panics
    ///
    /// Panics if `count > 32`.
    pub fn read_bits(&mut self, count: u32) -> NetResult<u32> {
        assert!(count <= 32, "cannot read more than 32 bits at once");
        self.ensure_readable(count as usize)?;
        let mut value = 0u32;
        for i in 0..count {
            if self.bit_at(self.read_position) {
                value |= 1 << i;
            }
            self.read_position += 1;
        }
        Ok(value)
    }

    // =========================================================================
    // Delta encoding
    // =========================================================================

    fn add_zigzag(&mut self, mut encoded: u32) {
        if encoded == 0 {
            self.push_bit(false);
            return;
        }
        self.push_bit(true);
        loop {
            self.add_bits(encoded & 0xF, GROUP_BITS);
            encoded >>= GROUP_BITS;
            self.push_bit(encoded != 0);
            if encoded == 0 {
                break;
            }
        }
    }

    fn read_zigzag(&mut self) -> NetResult<u32> {
        let start = self.read_position;
        if !self.read_bool()? {
            return Ok(0);
        }
        let mut value = 0u32;
        let mut shift = 0u32;
        loop {
            if shift >= 32 {
                return Err(NetError::OverlongValue { position: start });
            }
            value |= self.read_bits(GROUP_BITS)? << shift;
            shift += GROUP_BITS;
            if !self.read_bool()? {
                return Ok(value);
            }
        }
    }

    /// Writes `value` relative to `baseline`.
    #[inline]
    pub fn add_uint_delta(&mut self, value: u32, baseline: u32) {
        #[allow(clippy::cast_possible_wrap)]
        let delta = value.wrapping_sub(baseline) as i32;
        self.add_zigzag(zigzag(delta));
    }

    /// Reads a value written by [`add_uint_delta`](Self::add_uint_delta).
    #[inline]
    pub fn read_uint_delta(&mut self, baseline: u32) -> NetResult<u32> {
        #[allow(clippy::cast_sign_loss)]
        let delta = unzigzag(self.read_zigzag()?) as u32;
        Ok(baseline.wrapping_add(delta))
    }

    /// Writes a signed `value` relative to `baseline`.
    #[inline]
    pub fn add_int_delta(&mut self, value: i32, baseline: i32) {
        self.add_zigzag(zigzag(value.wrapping_sub(baseline)));
    }

    /// Reads a value written by [`add_int_delta`](Self::add_int_delta).
    #[inline]
    pub fn read_int_delta(&mut self, baseline: i32) -> NetResult<i32> {
        Ok(baseline.wrapping_add(unzigzag(self.read_zigzag()?)))
    }

    /// Writes `value` relative to zero.
    #[inline]
    pub fn add_packed_uint(&mut self, value: u32) {
        self.add_uint_delta(value, 0);
    }

    /// Reads a value written by [`add_packed_uint`](Self::add_packed_uint).
    #[inline]
    pub fn read_packed_uint(&mut self) -> NetResult<u32> {
        self.read_uint_delta(0)
    }

    // =========================================================================
    // Composition
    // =========================================================================

    /// Appends every valid bit of `other` without a length prefix.
    pub fn append(&mut self, other: &Self) {
        for position in 0..other.next_position {
            self.push_bit(other.bit_at(position));
        }
    }

    /// Embeds `other` with a length prefix so it can be read back as a unit.
    ///
    /// # Panics
    ///
    /// Panics if `other` holds more than `u32::MAX` bits.
    pub fn add_bit_buffer(&mut self, other: &Self) {
        let len = u32::try_from(other.next_position).expect("embedded buffer exceeds u32 bits");
        self.add_packed_uint(len);
        self.append(other);
    }

    /// Reads a buffer embedded by [`add_bit_buffer`](Self::add_bit_buffer).
    pub fn read_bit_buffer(&mut self) -> NetResult<Self> {
        let len = self.read_packed_uint()? as usize;
        self.ensure_readable(len)?;
        let mut out = Self::with_capacity(len);
        for _ in 0..len {
            out.push_bit(self.bit_at(self.read_position));
            self.read_position += 1;
        }
        Ok(out)
    }

    // =========================================================================
    // Byte framing
    // =========================================================================

    /// Size of the framed form produced by [`encode_into`](Self::encode_into).
    #[inline]
    #[must_use]
    pub const fn encoded_len(&self) -> usize {
        4 + self.byte_len()
    }

    /// Appends `[bit length u32 LE][bytes]` to `out`.
    ///
    /// # Panics
    ///
    /// Panics if the buffer holds more than `u32::MAX` bits.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        let bits = u32::try_from(self.next_position).expect("delta buffer exceeds u32 bits");
        out.extend_from_slice(&bits.to_le_bytes());
        out.extend_from_slice(&self.bytes[..self.byte_len()]);
    }

    /// Parses the framed form, returning the buffer and the bytes consumed.
    ///
    /// Trailing bytes after the frame are left untouched.
    pub fn decode(src: &[u8]) -> NetResult<(Self, usize)> {
        let Some(header) = src.get(..4) else {
            return Err(NetError::Truncated {
                needed: 4,
                available: src.len(),
            });
        };
        let bits = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let byte_len = bits.div_ceil(8);
        let Some(body) = src.get(4..4 + byte_len) else {
            return Err(NetError::Truncated {
                needed: 4 + byte_len,
                available: src.len(),
            });
        };

        let mut bytes = body.to_vec();
        let tail = bits % 8;
        if tail != 0 {
            if let Some(last) = bytes.last_mut() {
                *last &= (1u8 << tail) - 1;
            }
        }

        Ok((
            Self {
                bytes,
                next_position: bits,
                read_position: 0,
            },
            4 + byte_len,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_zero_delta_costs_one_bit() {
        let mut buffer = DeltaBuffer::new();
        buffer.add_uint_delta(77, 77);
        assert_eq!(buffer.bit_len(), 1);
        assert_eq!(buffer.read_uint_delta(77).unwrap(), 77);
    }

    #[test]
    fn test_small_deltas_are_small() {
        let mut buffer = DeltaBuffer::new();
        // zigzag(1) = 2, one group
        buffer.add_int_delta(11, 10);
        assert_eq!(buffer.bit_len(), 6);
        buffer.clear();
        buffer.add_int_delta(9, 10);
        assert_eq!(buffer.bit_len(), 6);
    }

    #[test]
    fn test_worst_case_size() {
        let mut buffer = DeltaBuffer::new();
        buffer.add_int_delta(i32::MIN, 0);
        assert_eq!(buffer.bit_len(), MAX_DELTA_BITS);
        assert_eq!(buffer.read_int_delta(0).unwrap(), i32::MIN);
    }

    #[test]
    fn test_random_delta_roundtrip() {
        let mut rng = StdRng::seed_from_u64(0x5EED);
        let mut buffer = DeltaBuffer::new();
        let mut expected = Vec::new();
        for _ in 0..2000 {
            let value: u32 = rng.gen();
            let baseline: u32 = if rng.gen_bool(0.5) {
                value.wrapping_add(rng.gen_range(0..64))
            } else {
                rng.gen()
            };
            let signed: i32 = rng.gen();
            let signed_base: i32 = rng.gen();
            buffer.add_uint_delta(value, baseline);
            buffer.add_int_delta(signed, signed_base);
            expected.push((value, baseline, signed, signed_base));
        }
        for (value, baseline, signed, signed_base) in expected {
            assert_eq!(buffer.read_uint_delta(baseline).unwrap(), value);
            assert_eq!(buffer.read_int_delta(signed_base).unwrap(), signed);
        }
        assert!(buffer.is_finished());
    }

    #[test]
    fn test_extremes_roundtrip() {
        let cases = [
            (0u32, u32::MAX),
            (u32::MAX, 0),
            (0x8000_0000, 0x7FFF_FFFF),
            (0x7FFF_FFFF, 0x8000_0000),
        ];
        let mut buffer = DeltaBuffer::new();
        for (value, baseline) in cases {
            buffer.add_uint_delta(value, baseline);
        }
        for (value, baseline) in cases {
            assert_eq!(buffer.read_uint_delta(baseline).unwrap(), value);
        }
    }

    #[test]
    fn test_read_past_end_fails() {
        let mut buffer = DeltaBuffer::new();
        buffer.add_bool(true);
        assert!(buffer.read_bool().unwrap());
        assert!(buffer.is_finished());
        assert_eq!(
            buffer.read_bool(),
            Err(NetError::BufferExhausted {
                position: 1,
                length: 1
            })
        );
        // A truncated delta is also caught.
        let mut buffer = DeltaBuffer::new();
        buffer.add_bool(true);
        buffer.add_bits(0b1010, 4);
        assert!(buffer.read_packed_uint().is_err());
    }

    #[test]
    fn test_overlong_value_rejected() {
        let mut buffer = DeltaBuffer::new();
        buffer.add_bool(true);
        for _ in 0..9 {
            buffer.add_bits(0xF, 4);
            buffer.add_bool(true);
        }
        assert_eq!(
            buffer.read_packed_uint(),
            Err(NetError::OverlongValue { position: 0 })
        );
    }

    #[test]
    fn test_bits_and_seek() {
        let mut buffer = DeltaBuffer::new();
        buffer.add_bits(0xABCD, 16);
        buffer.add_bits(0x3, 2);
        assert_eq!(buffer.read_bits(16).unwrap(), 0xABCD);
        let mark = buffer.read_position();
        assert_eq!(buffer.read_bits(2).unwrap(), 0x3);
        buffer.seek(mark);
        assert_eq!(buffer.read_bits(2).unwrap(), 0x3);
        buffer.reset_read();
        assert_eq!(buffer.read_bits(8).unwrap(), 0xCD);
    }

    #[test]
    fn test_embedded_buffer() {
        let mut inner = DeltaBuffer::new();
        inner.add_packed_uint(12345);
        inner.add_bool(false);

        let mut outer = DeltaBuffer::new();
        outer.add_bool(true);
        outer.add_bit_buffer(&inner);
        outer.add_packed_uint(9);

        assert!(outer.read_bool().unwrap());
        let mut nested = outer.read_bit_buffer().unwrap();
        assert_eq!(nested.bit_len(), inner.bit_len());
        assert_eq!(nested.read_packed_uint().unwrap(), 12345);
        assert!(!nested.read_bool().unwrap());
        assert_eq!(outer.read_packed_uint().unwrap(), 9);
    }

    #[test]
    fn test_byte_framing() {
        let mut buffer = DeltaBuffer::new();
        buffer.add_packed_uint(300);
        buffer.add_bool(true);

        let mut bytes = vec![0xEE];
        buffer.encode_into(&mut bytes);
        bytes.push(0xFF);
        assert_eq!(bytes.len(), 1 + buffer.encoded_len() + 1);

        let (mut decoded, consumed) = DeltaBuffer::decode(&bytes[1..]).unwrap();
        assert_eq!(consumed, buffer.encoded_len());
        assert_eq!(decoded.bit_len(), buffer.bit_len());
        assert_eq!(decoded.read_packed_uint().unwrap(), 300);
        assert!(decoded.read_bool().unwrap());
        assert!(decoded.is_finished());
    }

    #[test]
    fn test_decode_truncated() {
        assert!(matches!(
            DeltaBuffer::decode(&[1, 0]),
            Err(NetError::Truncated { needed: 4, .. })
        ));
        // Claims 16 bits, carries one byte.
        assert!(matches!(
            DeltaBuffer::decode(&[16, 0, 0, 0, 0xFF]),
            Err(NetError::Truncated { needed: 6, available: 5 })
        ));
    }
}
