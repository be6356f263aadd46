//! Tile cache layer blob format
//!
//! A blob is a plain-bytes header followed by the LZ4-compressed grid
//! payload (heights, areas, connectivity). Headers stay uncompressed so
//! snapshot writers can inspect tile coordinates without inflating data.

use glam::Vec3;
use tilenav_common::{ByteReader, ByteWriter, Error, Result};
use tilenav_voxel::LinearAllocator;

use crate::TileCompressor;

/// Magic number for tile cache layer blobs ('TNAV')
const LAYER_MAGIC: u32 = 0x54_4E_41_56;
/// Version number for the layer blob format
const LAYER_VERSION: u32 = 1;

/// Serialized size of [`TileCacheLayerHeader`]
pub const LAYER_HEADER_SIZE: usize = 54;

/// Header of one cached tile layer.
#[derive(Debug, Clone, PartialEq)]
pub struct TileCacheLayerHeader {
    pub magic: u32,
    pub version: u32,
    /// Tile position X
    pub tx: i32,
    /// Tile position Z
    pub ty: i32,
    /// Layer index within the tile
    pub tlayer: i32,
    /// Bounding box of the layer volume
    pub bmin: Vec3,
    pub bmax: Vec3,
    /// Quantized height range
    pub hmin: u16,
    pub hmax: u16,
    /// Grid dimensions in cells
    pub width: u8,
    pub height: u8,
    /// Tight usable cell rectangle
    pub minx: u8,
    pub maxx: u8,
    pub miny: u8,
    pub maxy: u8,
}

impl TileCacheLayerHeader {
    /// Creates a header with the current magic and version.
    pub fn new(tx: i32, ty: i32, tlayer: i32) -> Self {
        Self {
            magic: LAYER_MAGIC,
            version: LAYER_VERSION,
            tx,
            ty,
            tlayer,
            bmin: Vec3::ZERO,
            bmax: Vec3::ZERO,
            hmin: 0,
            hmax: 0,
            width: 0,
            height: 0,
            minx: 0,
            maxx: 0,
            miny: 0,
            maxy: 0,
        }
    }

    /// Validates magic and version.
    pub fn validate(&self) -> Result<()> {
        if self.magic != LAYER_MAGIC {
            return Err(Error::WrongMagic);
        }
        if self.version != LAYER_VERSION {
            return Err(Error::WrongVersion(self.version));
        }
        Ok(())
    }

    /// Serializes the header.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.write_u32(self.magic);
        w.write_u32(self.version);
        w.write_i32(self.tx);
        w.write_i32(self.ty);
        w.write_i32(self.tlayer);
        w.write_vec3(self.bmin);
        w.write_vec3(self.bmax);
        w.write_u16(self.hmin);
        w.write_u16(self.hmax);
        w.write_u8(self.width);
        w.write_u8(self.height);
        w.write_u8(self.minx);
        w.write_u8(self.maxx);
        w.write_u8(self.miny);
        w.write_u8(self.maxy);
        debug_assert_eq!(w.len(), LAYER_HEADER_SIZE);
        w.into_bytes()
    }

    /// Deserializes and validates a header.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < LAYER_HEADER_SIZE {
            return Err(Error::InvalidParam(format!(
                "layer header truncated: {} bytes",
                data.len()
            )));
        }
        let mut r = ByteReader::new(data);
        let header = Self {
            magic: r.read_u32()?,
            version: r.read_u32()?,
            tx: r.read_i32()?,
            ty: r.read_i32()?,
            tlayer: r.read_i32()?,
            bmin: r.read_vec3()?,
            bmax: r.read_vec3()?,
            hmin: r.read_u16()?,
            hmax: r.read_u16()?,
            width: r.read_u8()?,
            height: r.read_u8()?,
            minx: r.read_u8()?,
            maxx: r.read_u8()?,
            miny: r.read_u8()?,
            maxy: r.read_u8()?,
        };
        header.validate()?;
        Ok(header)
    }
}

/// A decompressed tile cache layer.
#[derive(Debug, Clone)]
pub struct TileCacheLayer {
    pub header: TileCacheLayerHeader,
    /// Floor height per cell relative to `header.hmin`
    pub heights: Vec<u16>,
    /// Area ID per cell
    pub areas: Vec<u8>,
    /// Packed connectivity per cell
    pub cons: Vec<u8>,
}

/// Serializes and compresses one layer into a cacheable blob.
///
/// The uncompressed payload is staged in the build arena, which the caller
/// resets between tile builds.
pub fn build_tile_cache_layer(
    compressor: &dyn TileCompressor,
    header: &TileCacheLayerHeader,
    heights: &[u16],
    areas: &[u8],
    cons: &[u8],
    arena: &mut LinearAllocator,
) -> Result<Vec<u8>> {
    let grid_size = header.width as usize * header.height as usize;
    if heights.len() != grid_size || areas.len() != grid_size || cons.len() != grid_size {
        return Err(Error::InvalidParam(format!(
            "layer grid size mismatch: expected {grid_size} cells"
        )));
    }

    let staged = arena.alloc(grid_size * 4);
    {
        let bytes = arena.bytes_mut(staged);
        for (i, &h) in heights.iter().enumerate() {
            bytes[i * 2..i * 2 + 2].copy_from_slice(&h.to_le_bytes());
        }
        bytes[grid_size * 2..grid_size * 3].copy_from_slice(areas);
        bytes[grid_size * 3..].copy_from_slice(cons);
    }

    let compressed = compressor.compress(arena.bytes(staged))?;
    let mut blob = header.to_bytes();
    blob.extend_from_slice(&compressed);
    Ok(blob)
}

/// Parses and decompresses a layer blob.
pub fn decompress_tile_cache_layer(
    compressor: &dyn TileCompressor,
    blob: &[u8],
) -> Result<TileCacheLayer> {
    let header = TileCacheLayerHeader::from_bytes(blob)?;
    let grid_size = header.width as usize * header.height as usize;

    let payload = compressor.decompress(&blob[LAYER_HEADER_SIZE..])?;
    if payload.len() != grid_size * 4 {
        return Err(Error::Compression(format!(
            "layer payload size mismatch: {} bytes for {} cells",
            payload.len(),
            grid_size
        )));
    }

    let heights = payload[..grid_size * 2]
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    let areas = payload[grid_size * 2..grid_size * 3].to_vec();
    let cons = payload[grid_size * 3..].to_vec();

    Ok(TileCacheLayer {
        header,
        heights,
        areas,
        cons,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Lz4Compressor;

    fn sample_header() -> TileCacheLayerHeader {
        let mut header = TileCacheLayerHeader::new(3, -2, 1);
        header.bmin = Vec3::new(0.0, 0.5, 0.0);
        header.bmax = Vec3::new(19.2, 2.5, 19.2);
        header.hmin = 5;
        header.hmax = 9;
        header.width = 4;
        header.height = 4;
        header.maxx = 3;
        header.maxy = 3;
        header
    }

    #[test]
    fn test_header_round_trip() {
        let header = sample_header();
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), LAYER_HEADER_SIZE);
        let parsed = TileCacheLayerHeader::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_header_rejects_bad_magic() {
        let mut bytes = sample_header().to_bytes();
        bytes[0] ^= 0xFF;
        assert!(matches!(
            TileCacheLayerHeader::from_bytes(&bytes),
            Err(Error::WrongMagic)
        ));
    }

    #[test]
    fn test_layer_round_trip() {
        let header = sample_header();
        let heights: Vec<u16> = (0..16).map(|i| i as u16).collect();
        let areas = vec![63u8; 16];
        let cons = vec![0x0Fu8; 16];

        let mut arena = LinearAllocator::new(256);
        let blob = build_tile_cache_layer(
            &Lz4Compressor,
            &header,
            &heights,
            &areas,
            &cons,
            &mut arena,
        )
        .unwrap();

        let layer = decompress_tile_cache_layer(&Lz4Compressor, &blob).unwrap();
        assert_eq!(layer.header, header);
        assert_eq!(layer.heights, heights);
        assert_eq!(layer.areas, areas);
        assert_eq!(layer.cons, cons);
    }

    #[test]
    fn test_grid_size_mismatch_rejected() {
        let header = sample_header();
        let mut arena = LinearAllocator::new(256);
        let result = build_tile_cache_layer(
            &Lz4Compressor,
            &header,
            &[0u16; 4],
            &[0u8; 16],
            &[0u8; 16],
            &mut arena,
        );
        assert!(result.is_err());
    }
}
