//! Voxelization pipeline for tiled navigation mesh construction
//!
//! This crate turns triangle soup into per-tile heightfield layers:
//! rasterization into a span heightfield, walkability filtering, compact
//! heightfield construction, area marking, region partitioning and finally
//! decomposition into height-banded layers suitable for tile caching.

mod area;
mod arena;
mod compact;
mod config;
mod heightfield;
mod layers;
mod rasterize;
mod region;
mod watershed;

pub use area::{erode_walkable_area, mark_box_area};
pub use arena::{ArenaBlock, LinearAllocator};
pub use compact::{CompactCell, CompactHeightfield, CompactSpan};
pub use config::{PartitionType, VoxelConfig};
pub use heightfield::{Heightfield, Span};
pub use layers::{HeightfieldLayer, HeightfieldLayerSet};
pub use rasterize::{mark_walkable_triangles, rasterize_triangles};
pub use region::build_regions_monotone;
pub use watershed::{build_distance_field, build_regions_watershed};

/// Area ID for unwalkable space
pub const NULL_AREA: u8 = 0;
/// Default area ID for walkable space
pub const WALKABLE_AREA: u8 = 63;

/// Region ID flag marking border regions
pub const BORDER_REG: u16 = 0x8000;
/// Connection value meaning "no neighbor span"
pub const NOT_CONNECTED: u8 = 0xff;
/// Maximum quantized span height
pub const SPAN_MAX_HEIGHT: u16 = 0xffff;
/// Sentinel height for empty layer cells
pub const LAYER_EMPTY_HEIGHT: u16 = 0xffff;

/// X offset for the 4 cardinal directions (W, N, E, S order)
pub const DIR_OFFSET_X: [i32; 4] = [-1, 0, 1, 0];
/// Z offset for the 4 cardinal directions
pub const DIR_OFFSET_Z: [i32; 4] = [0, 1, 0, -1];
