//! Tile blob compression

use tilenav_common::{Error, Result};

/// Stateless codec for tile-cache layer payloads.
pub trait TileCompressor: Send + Sync {
    /// Compresses a payload.
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;
    /// Decompresses a payload.
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// LZ4 compressor, the default codec for cached tile layers.
#[derive(Debug, Default, Clone, Copy)]
pub struct Lz4Compressor;

impl TileCompressor for Lz4Compressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(lz4_flex::compress_prepend_size(data))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4_flex::decompress_size_prepended(data).map_err(|e| {
            log::error!("LZ4 decompression failed: {e}");
            Error::Compression(e.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let compressor = Lz4Compressor;
        let payload: Vec<u8> = (0..1024u32).map(|i| (i % 7) as u8).collect();
        let packed = compressor.compress(&payload).unwrap();
        assert!(packed.len() < payload.len());
        let unpacked = compressor.decompress(&packed).unwrap();
        assert_eq!(unpacked, payload);
    }

    #[test]
    fn test_corrupt_data_rejected() {
        let compressor = Lz4Compressor;
        assert!(compressor.decompress(&[0xFF, 0xFF, 0xFF, 0xFF, 1, 2]).is_err());
    }
}
