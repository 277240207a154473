//! # Payload Compression
//!
//! Snapshot payloads are compressed as a whole after delta encoding.
//! The [`Compressor`] trait keeps the codec swappable; LZ4 is the default
//! because it decodes faster than the payloads arrive.

use serde::Deserialize;

use crate::error::{NetError, NetResult};

/// Block compressor used for snapshot payloads.
pub trait Compressor: Send + Sync {
    /// Compresses a whole payload.
    fn compress(&self, src: &[u8]) -> Vec<u8>;

    /// Decompresses a payload whose original size is known from the header.
    ///
    /// Output of any other length is a [`NetError::SizeMismatch`].
    fn decompress(&self, src: &[u8], uncompressed_len: usize) -> NetResult<Vec<u8>>;
}

/// LZ4 block compression (`lz4_flex`).
#[derive(Clone, Copy, Debug, Default)]
pub struct Lz4Compressor;

impl Compressor for Lz4Compressor {
    fn compress(&self, src: &[u8]) -> Vec<u8> {
        lz4_flex::block::compress(src)
    }

    fn decompress(&self, src: &[u8], uncompressed_len: usize) -> NetResult<Vec<u8>> {
        let out = lz4_flex::block::decompress(src, uncompressed_len)
            .map_err(|e| NetError::Decompression(e.to_string()))?;
        if out.len() != uncompressed_len {
            return Err(NetError::SizeMismatch {
                expected: uncompressed_len,
                actual: out.len(),
            });
        }
        Ok(out)
    }
}

/// Pass-through codec for debugging and loopback tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoCompression;

impl Compressor for NoCompression {
    fn compress(&self, src: &[u8]) -> Vec<u8> {
        src.to_vec()
    }

    fn decompress(&self, src: &[u8], uncompressed_len: usize) -> NetResult<Vec<u8>> {
        if src.len() != uncompressed_len {
            return Err(NetError::SizeMismatch {
                expected: uncompressed_len,
                actual: src.len(),
            });
        }
        Ok(src.to_vec())
    }
}

/// Codec selection in [`NetConfig`](crate::NetConfig).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionKind {
    /// LZ4 block compression.
    #[default]
    Lz4,
    /// No compression.
    None,
}

impl CompressionKind {
    /// Instantiates the selected codec.
    #[must_use]
    pub fn compressor(self) -> Box<dyn Compressor> {
        match self {
            Self::Lz4 => Box::new(Lz4Compressor),
            Self::None => Box::new(NoCompression),
        }
    }
}
