//! Compressed tile cache for dynamic navigation meshes
//!
//! The cache stores every tile layer as a compressed blob — the sole
//! persisted representation of tile content — and regenerates navigation
//! mesh polygon tiles from those blobs on demand, carving live obstacles in
//! the process. Obstacle add/remove requests go through a bounded queue
//! drained incrementally by [`TileCache::update`].

mod builder;
mod compressor;
mod layer;
mod tile_cache;

pub use builder::{MeshProcess, TileBuildArgs, TileCacheBuildConfig, TileCacheBuilder};
pub use compressor::{Lz4Compressor, TileCompressor};
pub use layer::{
    build_tile_cache_layer, decompress_tile_cache_layer, TileCacheLayer, TileCacheLayerHeader,
    LAYER_HEADER_SIZE,
};
pub use tile_cache::{
    CompressedTile, CompressedTileRef, ObstacleRef, ObstacleState, TileCache, TileCacheParams,
    MAX_OBSTACLE_REQUESTS,
};

/// Fewest layers a tile may be configured for. Layers like to form inside
/// the hollow space of stacked objects, so very low caps surprise users.
pub const MIN_LAYERS: u32 = 3;
/// Hard cap on layers per tile
pub const MAX_LAYERS: u32 = 255;

/// Clamps a configured max-layer count to the supported range.
pub fn clamp_max_layers(max_layers: u32) -> u32 {
    max_layers.clamp(MIN_LAYERS, MAX_LAYERS)
}
