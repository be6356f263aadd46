//! Navigation mesh storage and point queries

use std::collections::HashMap;

use glam::Vec3;
use tilenav_common::{ilog2, next_power_of_two, Error, Result};

use crate::{SALT_BITS, TILE_POLY_BITS};

/// Opaque reference to a polygon (or a whole tile when the poly index is 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct PolyRef(u32);

impl PolyRef {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u32 {
        self.0
    }

    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

/// Navigation mesh initialization parameters.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct NavMeshParams {
    /// Origin of the tile grid (minimum corner of the mesh bounds)
    pub origin: Vec3,
    /// World-space edge length of one tile along X
    pub tile_width: f32,
    /// World-space edge length of one tile along Z
    pub tile_height: f32,
    /// Maximum number of tiles; must be a power of two
    pub max_tiles: u32,
    /// Maximum polygons per tile; must be a power of two
    pub max_polys: u32,
}

/// Tile location and content summary.
#[derive(Debug, Clone)]
pub struct TileHeader {
    pub x: i32,
    pub z: i32,
    pub layer: i32,
    pub bmin: Vec3,
    pub bmax: Vec3,
}

/// Polygon in a mesh tile: a convex fan of vertex indices.
#[derive(Debug, Clone)]
pub struct Poly {
    /// Indices into the tile vertex array, counterclockwise
    pub verts: Vec<u16>,
    /// Traversal flags
    pub flags: u16,
    /// Area ID carried over from voxelization
    pub area: u8,
}

/// Off-mesh portal edge attached to a tile.
#[derive(Debug, Clone)]
pub struct OffMeshLink {
    pub start: Vec3,
    pub end: Vec3,
    pub radius: f32,
    pub flags: u16,
    pub area: u8,
    pub bidirectional: bool,
}

/// One polygon tile of the navigation mesh.
#[derive(Debug, Clone)]
pub struct MeshTile {
    pub header: TileHeader,
    pub verts: Vec<Vec3>,
    pub polys: Vec<Poly>,
    pub off_mesh_links: Vec<OffMeshLink>,
}

struct TileSlot {
    salt: u32,
    tile: Option<MeshTile>,
}

/// Tiled navigation mesh.
///
/// Slots are reused through a free list; each reuse bumps the slot salt so
/// stale references never resolve.
pub struct NavMesh {
    params: NavMeshParams,
    tile_bits: u32,
    poly_bits: u32,
    slots: Vec<TileSlot>,
    free: Vec<usize>,
    lookup: HashMap<(i32, i32, i32), usize>,
}

impl NavMesh {
    /// Creates an empty mesh.
    ///
    /// `max_tiles` and `max_polys` must be powers of two whose exponents sum
    /// to the 22-bit reference budget.
    pub fn new(params: NavMeshParams) -> Result<Self> {
        if params.max_tiles == 0 || params.max_tiles != next_power_of_two(params.max_tiles) {
            return Err(Error::InvalidParam(format!(
                "max_tiles {} is not a power of two",
                params.max_tiles
            )));
        }
        if params.max_polys == 0 || params.max_polys != next_power_of_two(params.max_polys) {
            return Err(Error::InvalidParam(format!(
                "max_polys {} is not a power of two",
                params.max_polys
            )));
        }
        let tile_bits = ilog2(params.max_tiles);
        let poly_bits = ilog2(params.max_polys);
        if tile_bits + poly_bits != TILE_POLY_BITS {
            return Err(Error::InvalidParam(format!(
                "tile bits ({tile_bits}) + poly bits ({poly_bits}) must equal {TILE_POLY_BITS}"
            )));
        }
        if params.tile_width <= 0.0 || params.tile_height <= 0.0 {
            return Err(Error::InvalidParam("invalid tile dimensions".into()));
        }

        let max_tiles = params.max_tiles as usize;
        let slots = (0..max_tiles)
            .map(|_| TileSlot {
                salt: 1,
                tile: None,
            })
            .collect();
        // Low indices come off the free list first
        let free = (0..max_tiles).rev().collect();

        Ok(Self {
            params,
            tile_bits,
            poly_bits,
            slots,
            free,
            lookup: HashMap::new(),
        })
    }

    pub fn params(&self) -> &NavMeshParams {
        &self.params
    }

    /// Bits of a reference spent on the tile index.
    pub fn tile_bits(&self) -> u32 {
        self.tile_bits
    }

    /// Bits of a reference spent on the polygon index.
    pub fn poly_bits(&self) -> u32 {
        self.poly_bits
    }

    /// Encodes a polygon reference.
    pub fn encode_poly_ref(&self, salt: u32, tile_index: u32, poly_index: u32) -> PolyRef {
        let salt_mask = (1u32 << SALT_BITS) - 1;
        let tile_mask = (1u32 << self.tile_bits) - 1;
        let poly_mask = (1u32 << self.poly_bits) - 1;
        PolyRef(
            ((salt & salt_mask) << TILE_POLY_BITS)
                | ((tile_index & tile_mask) << self.poly_bits)
                | (poly_index & poly_mask),
        )
    }

    /// Decodes a reference into (salt, tile index, poly index).
    pub fn decode_poly_ref(&self, reference: PolyRef) -> (u32, u32, u32) {
        let salt_mask = (1u32 << SALT_BITS) - 1;
        let tile_mask = (1u32 << self.tile_bits) - 1;
        let poly_mask = (1u32 << self.poly_bits) - 1;
        let id = reference.id();
        (
            (id >> TILE_POLY_BITS) & salt_mask,
            (id >> self.poly_bits) & tile_mask,
            id & poly_mask,
        )
    }

    /// Adds a tile, replacing any existing tile at its (x, z, layer).
    pub fn add_tile(&mut self, tile: MeshTile) -> Result<PolyRef> {
        if tile.polys.len() > self.params.max_polys as usize {
            return Err(Error::InvalidParam(format!(
                "tile at ({}, {}) holds {} polys, budget is {}",
                tile.header.x,
                tile.header.z,
                tile.polys.len(),
                self.params.max_polys
            )));
        }
        let key = (tile.header.x, tile.header.z, tile.header.layer);
        // Replace in place so the coordinate is never observably empty
        if let Some(&slot_idx) = self.lookup.get(&key) {
            let slot = &mut self.slots[slot_idx];
            slot.salt = (slot.salt + 1) & ((1 << SALT_BITS) - 1);
            if slot.salt == 0 {
                slot.salt = 1;
            }
            slot.tile = Some(tile);
            let salt = slot.salt;
            return Ok(self.encode_poly_ref(salt, slot_idx as u32, 0));
        }

        let slot_idx = self
            .free
            .pop()
            .ok_or_else(|| Error::OutOfSlots("navigation mesh tile budget exhausted".into()))?;
        self.slots[slot_idx].tile = Some(tile);
        self.lookup.insert(key, slot_idx);
        let salt = self.slots[slot_idx].salt;
        Ok(self.encode_poly_ref(salt, slot_idx as u32, 0))
    }

    /// Removes the tile at a coordinate, returning it.
    pub fn remove_tile_at(&mut self, x: i32, z: i32, layer: i32) -> Option<MeshTile> {
        let slot_idx = self.lookup.remove(&(x, z, layer))?;
        let slot = &mut self.slots[slot_idx];
        let tile = slot.tile.take();
        slot.salt = (slot.salt + 1) & ((1 << SALT_BITS) - 1);
        if slot.salt == 0 {
            slot.salt = 1;
        }
        self.free.push(slot_idx);
        tile
    }

    /// Removes every tile.
    pub fn remove_all_tiles(&mut self) {
        let keys: Vec<_> = self.lookup.keys().copied().collect();
        for (x, z, layer) in keys {
            self.remove_tile_at(x, z, layer);
        }
    }

    /// Tile at an exact coordinate.
    pub fn tile_at(&self, x: i32, z: i32, layer: i32) -> Option<&MeshTile> {
        let &slot_idx = self.lookup.get(&(x, z, layer))?;
        self.slots[slot_idx].tile.as_ref()
    }

    /// All layers present at a tile footprint.
    pub fn tiles_at(&self, x: i32, z: i32) -> Vec<&MeshTile> {
        let mut tiles: Vec<(i32, &MeshTile)> = self
            .lookup
            .iter()
            .filter(|&(&(tx, tz, _), _)| tx == x && tz == z)
            .filter_map(|(&(_, _, layer), &slot)| {
                self.slots[slot].tile.as_ref().map(|t| (layer, t))
            })
            .collect();
        tiles.sort_by_key(|(layer, _)| *layer);
        tiles.into_iter().map(|(_, t)| t).collect()
    }

    /// Number of live tiles.
    pub fn tile_count(&self) -> usize {
        self.lookup.len()
    }

    /// Iterates over live tiles.
    pub fn tiles(&self) -> impl Iterator<Item = &MeshTile> {
        self.slots.iter().filter_map(|s| s.tile.as_ref())
    }

    /// Resolves a tile reference (poly index ignored).
    pub fn tile_by_ref(&self, reference: PolyRef) -> Option<&MeshTile> {
        let (salt, tile_index, _) = self.decode_poly_ref(reference);
        let slot = self.slots.get(tile_index as usize)?;
        if slot.salt != salt {
            return None;
        }
        slot.tile.as_ref()
    }

    /// Finds the polygon nearest to `center` within `half_extents`.
    ///
    /// Returns the reference and the nearest point on the polygon. Distance
    /// is measured in the XZ plane with the vertical band enforced from
    /// `half_extents.y`.
    pub fn find_nearest_poly(&self, center: Vec3, half_extents: Vec3) -> Option<(PolyRef, Vec3)> {
        let mut best: Option<(f32, PolyRef, Vec3)> = None;

        for (&(_, _, _), &slot_idx) in self.lookup.iter() {
            let slot = &self.slots[slot_idx];
            let Some(tile) = slot.tile.as_ref() else {
                continue;
            };
            // Cull tiles outside the query volume
            if tile.header.bmin.x > center.x + half_extents.x
                || tile.header.bmax.x < center.x - half_extents.x
                || tile.header.bmin.z > center.z + half_extents.z
                || tile.header.bmax.z < center.z - half_extents.z
            {
                continue;
            }

            for (pi, poly) in tile.polys.iter().enumerate() {
                let nearest = nearest_point_on_poly(tile, poly, center);
                if (nearest.x - center.x).abs() > half_extents.x
                    || (nearest.y - center.y).abs() > half_extents.y
                    || (nearest.z - center.z).abs() > half_extents.z
                {
                    continue;
                }
                let d = Vec3::new(nearest.x - center.x, 0.0, nearest.z - center.z).length();
                if best.as_ref().map_or(true, |(bd, _, _)| d < *bd) {
                    let reference = self.encode_poly_ref(slot.salt, slot_idx as u32, pi as u32);
                    best = Some((d, reference, nearest));
                }
            }
        }

        best.map(|(_, r, p)| (r, p))
    }
}

/// Nearest point to `p` on a convex polygon (XZ plane; Y from the polygon).
fn nearest_point_on_poly(tile: &MeshTile, poly: &Poly, p: Vec3) -> Vec3 {
    let n = poly.verts.len();
    let verts: Vec<Vec3> = poly.verts.iter().map(|&i| tile.verts[i as usize]).collect();

    // Inside test: point must be on the same side of every edge
    // (winding-agnostic for convex polygons)
    let mut has_pos = false;
    let mut has_neg = false;
    for i in 0..n {
        let a = verts[i];
        let b = verts[(i + 1) % n];
        let cross = (b.x - a.x) * (p.z - a.z) - (b.z - a.z) * (p.x - a.x);
        if cross > 0.0 {
            has_pos = true;
        } else if cross < 0.0 {
            has_neg = true;
        }
    }
    if !(has_pos && has_neg) {
        let y = verts.iter().map(|v| v.y).sum::<f32>() / n as f32;
        return Vec3::new(p.x, y, p.z);
    }

    // Closest point on the boundary
    let mut best = verts[0];
    let mut best_d = f32::MAX;
    for i in 0..n {
        let a = verts[i];
        let b = verts[(i + 1) % n];
        let ab = Vec3::new(b.x - a.x, 0.0, b.z - a.z);
        let ap = Vec3::new(p.x - a.x, 0.0, p.z - a.z);
        let len_sq = ab.length_squared();
        let t = if len_sq > 0.0 {
            (ap.dot(ab) / len_sq).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let q = a + (b - a) * t;
        let d = Vec3::new(q.x - p.x, 0.0, q.z - p.z).length_squared();
        if d < best_d {
            best_d = d;
            best = q;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::POLY_FLAG_WALK;

    fn params(max_tiles: u32) -> NavMeshParams {
        NavMeshParams {
            origin: Vec3::ZERO,
            tile_width: 19.2,
            tile_height: 19.2,
            max_tiles,
            max_polys: 1 << (TILE_POLY_BITS - ilog2(max_tiles)),
        }
    }

    fn quad_tile(x: i32, z: i32, layer: i32) -> MeshTile {
        let bmin = Vec3::new(x as f32 * 19.2, 0.0, z as f32 * 19.2);
        let bmax = bmin + Vec3::new(19.2, 1.0, 19.2);
        MeshTile {
            header: TileHeader {
                x,
                z,
                layer,
                bmin,
                bmax,
            },
            verts: vec![
                bmin,
                Vec3::new(bmin.x, 0.0, bmax.z),
                Vec3::new(bmax.x, 0.0, bmax.z),
                Vec3::new(bmax.x, 0.0, bmin.z),
            ],
            polys: vec![Poly {
                verts: vec![0, 1, 2, 3],
                flags: POLY_FLAG_WALK,
                area: 63,
            }],
            off_mesh_links: Vec::new(),
        }
    }

    #[test]
    fn test_bit_budget_invariant() {
        for max_tiles in [1u32, 64, 256, 1024] {
            let mesh = NavMesh::new(params(max_tiles)).unwrap();
            assert_eq!(mesh.tile_bits() + mesh.poly_bits(), TILE_POLY_BITS);
            assert_eq!(1u32 << mesh.tile_bits(), max_tiles);
        }
    }

    #[test]
    fn test_rejects_non_power_of_two() {
        let mut p = params(64);
        p.max_tiles = 100;
        assert!(NavMesh::new(p).is_err());
    }

    #[test]
    fn test_ref_round_trip() {
        let mesh = NavMesh::new(params(256)).unwrap();
        let r = mesh.encode_poly_ref(5, 200, 77);
        assert_eq!(mesh.decode_poly_ref(r), (5, 200, 77));
        assert!(r.is_valid());
    }

    #[test]
    fn test_add_replace_remove() {
        let mut mesh = NavMesh::new(params(64)).unwrap();
        let r1 = mesh.add_tile(quad_tile(1, 2, 0)).unwrap();
        assert_eq!(mesh.tile_count(), 1);
        assert!(mesh.tile_by_ref(r1).is_some());

        // Replacing invalidates the old reference
        let r2 = mesh.add_tile(quad_tile(1, 2, 0)).unwrap();
        assert_ne!(r1, r2);
        assert!(mesh.tile_by_ref(r1).is_none());
        assert!(mesh.tile_by_ref(r2).is_some());
        assert_eq!(mesh.tile_count(), 1);

        assert!(mesh.remove_tile_at(1, 2, 0).is_some());
        assert_eq!(mesh.tile_count(), 0);
        assert!(mesh.tile_by_ref(r2).is_none());
    }

    #[test]
    fn test_layers_at_footprint() {
        let mut mesh = NavMesh::new(params(64)).unwrap();
        mesh.add_tile(quad_tile(0, 0, 1)).unwrap();
        mesh.add_tile(quad_tile(0, 0, 0)).unwrap();
        let tiles = mesh.tiles_at(0, 0);
        assert_eq!(tiles.len(), 2);
        assert_eq!(tiles[0].header.layer, 0);
        assert_eq!(tiles[1].header.layer, 1);
    }

    #[test]
    fn test_find_nearest_poly() {
        let mut mesh = NavMesh::new(params(64)).unwrap();
        mesh.add_tile(quad_tile(0, 0, 0)).unwrap();

        let center = Vec3::new(10.0, 0.0, 10.0);
        let hit = mesh.find_nearest_poly(center, Vec3::new(1.0, 1.0, 1.0));
        assert!(hit.is_some());
        let (_, point) = hit.unwrap();
        assert!((point.x - 10.0).abs() < 1e-6);
        assert!((point.z - 10.0).abs() < 1e-6);

        // Far outside the mesh nothing is within the extents
        let miss = mesh.find_nearest_poly(Vec3::new(100.0, 0.0, 100.0), Vec3::splat(1.0));
        assert!(miss.is_none());
    }
}
