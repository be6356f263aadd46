//! Persistent tiled navigation mesh
//!
//! Polygon tiles are keyed by (x, z, layer) and addressed through salted
//! 32-bit references. The reference layout spends 22 bits on tile + polygon
//! indices — how those 22 bits split is derived from the tile budget at
//! initialization — and the remaining 10 bits on the slot salt.

mod nav_mesh;

pub use nav_mesh::{MeshTile, NavMesh, NavMeshParams, OffMeshLink, Poly, PolyRef, TileHeader};

/// Polygon flag: standard walkable surface
pub const POLY_FLAG_WALK: u16 = 0x01;
/// Polygon flag: off-mesh portal edge (jump, ladder)
pub const POLY_FLAG_PORTAL: u16 = 0x02;

/// Total reference bits shared between tile index and polygon index
pub const TILE_POLY_BITS: u32 = 22;
/// Salt bits in a 32-bit polygon reference
pub const SALT_BITS: u32 = 32 - TILE_POLY_BITS;
