//! Rebuilding navigation mesh polygon tiles from cached layers
//!
//! The builder decompresses a layer, carves live obstacles out of its
//! walkable area, partitions the remaining cells into regions and emits an
//! axis-aligned polygon tile. A mesh-process callback then rewrites polygon
//! flags and injects off-mesh connections before the tile is merged.

use glam::Vec3;
use tilenav_common::{BoundingBox, Result};
use tilenav_mesh::{MeshTile, OffMeshLink, Poly, TileHeader};
use tilenav_voxel::{LAYER_EMPTY_HEIGHT, NULL_AREA};

use crate::layer::TileCacheLayer;

/// Parameters the builder needs to turn layers into polygon tiles.
#[derive(Debug, Clone)]
pub struct TileCacheBuildConfig {
    /// Cell size (horizontal resolution)
    pub cs: f32,
    /// Cell height (vertical resolution)
    pub ch: f32,
    /// Agent clearance in cells
    pub walkable_height: i32,
    /// Maximum step height in cells; gives carve tests vertical slack
    pub walkable_climb: i32,
}

impl Default for TileCacheBuildConfig {
    fn default() -> Self {
        Self {
            cs: 0.3,
            ch: 0.2,
            walkable_height: 10,
            walkable_climb: 4,
        }
    }
}

/// Mutable view of a tile build handed to the mesh-process callback.
///
/// The callback may rewrite per-polygon flags (walkable areas typically get
/// a uniform walkable flag) and append off-mesh connections overlapping the
/// tile bounds.
pub struct TileBuildArgs {
    /// World bounds of the tile being built
    pub bounds: BoundingBox,
    /// Area ID per polygon
    pub poly_areas: Vec<u8>,
    /// Flags per polygon, zeroed before the callback runs
    pub poly_flags: Vec<u16>,
    /// Off-mesh connections to attach to the tile
    pub off_mesh_links: Vec<OffMeshLink>,
}

/// Callback invoked for every tile the cache converts into polygons.
pub trait MeshProcess {
    fn process(&mut self, args: &mut TileBuildArgs);
}

/// A mesh process that leaves polygons untouched beyond the defaults.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMeshProcess;

impl MeshProcess for NoopMeshProcess {
    fn process(&mut self, _args: &mut TileBuildArgs) {}
}

/// Builds navigation mesh tiles from decompressed cache layers.
#[derive(Debug)]
pub struct TileCacheBuilder {
    config: TileCacheBuildConfig,
}

impl TileCacheBuilder {
    pub fn new(config: TileCacheBuildConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TileCacheBuildConfig {
        &self.config
    }

    /// Builds the polygon tile for one layer.
    ///
    /// `obstacles` are live cylinder carves as (position, radius, height).
    /// Returns `None` when no walkable polygon survives.
    pub fn build_tile(
        &self,
        layer: &TileCacheLayer,
        obstacles: &[(Vec3, f32, f32)],
        processor: &mut dyn MeshProcess,
    ) -> Result<Option<MeshTile>> {
        let header = &layer.header;
        let w = header.width as i32;
        let h = header.height as i32;
        let grid = (w * h) as usize;

        // Carve obstacles into a working copy of the area grid
        let mut areas = layer.areas.clone();
        for &(pos, radius, height) in obstacles {
            self.mark_cylinder(layer, &mut areas, pos, radius, height);
        }

        // Partition walkable cells into monotone regions
        let regions = build_layer_regions(layer, &areas, self.config.walkable_climb);

        // Greedy rectangle decomposition per region
        let mut verts: Vec<Vec3> = Vec::new();
        let mut polys: Vec<Poly> = Vec::new();
        let mut visited = vec![false; grid];

        for z in 0..h {
            for x in 0..w {
                let idx = (x + z * w) as usize;
                if visited[idx] || regions[idx] == 0 {
                    continue;
                }
                let region = regions[idx];
                let area = areas[idx];

                // Extend the run along x
                let mut x1 = x;
                while x1 + 1 < w {
                    let nidx = (x1 + 1 + z * w) as usize;
                    if visited[nidx] || regions[nidx] != region || areas[nidx] != area {
                        break;
                    }
                    x1 += 1;
                }
                // Extend the full run along z
                let mut z1 = z;
                'rows: while z1 + 1 < h {
                    for cx in x..=x1 {
                        let nidx = (cx + (z1 + 1) * w) as usize;
                        if visited[nidx] || regions[nidx] != region || areas[nidx] != area {
                            break 'rows;
                        }
                    }
                    z1 += 1;
                }

                let mut top = 0u16;
                for cz in z..=z1 {
                    for cx in x..=x1 {
                        let cidx = (cx + cz * w) as usize;
                        visited[cidx] = true;
                        top = top.max(layer.heights[cidx]);
                    }
                }

                let y = header.bmin.y + top as f32 * self.config.ch;
                let cs = self.config.cs;
                let base = verts.len() as u16;
                verts.push(Vec3::new(
                    header.bmin.x + x as f32 * cs,
                    y,
                    header.bmin.z + z as f32 * cs,
                ));
                verts.push(Vec3::new(
                    header.bmin.x + (x1 + 1) as f32 * cs,
                    y,
                    header.bmin.z + z as f32 * cs,
                ));
                verts.push(Vec3::new(
                    header.bmin.x + (x1 + 1) as f32 * cs,
                    y,
                    header.bmin.z + (z1 + 1) as f32 * cs,
                ));
                verts.push(Vec3::new(
                    header.bmin.x + x as f32 * cs,
                    y,
                    header.bmin.z + (z1 + 1) as f32 * cs,
                ));
                polys.push(Poly {
                    verts: vec![base, base + 1, base + 2, base + 3],
                    flags: 0,
                    area,
                });
            }
        }

        if polys.is_empty() {
            return Ok(None);
        }

        let bounds = BoundingBox::new(header.bmin, header.bmax);
        let mut args = TileBuildArgs {
            bounds,
            poly_areas: polys.iter().map(|p| p.area).collect(),
            poly_flags: vec![0; polys.len()],
            off_mesh_links: Vec::new(),
        };
        processor.process(&mut args);

        for (poly, (&flags, &area)) in polys
            .iter_mut()
            .zip(args.poly_flags.iter().zip(args.poly_areas.iter()))
        {
            poly.flags = flags;
            poly.area = area;
        }

        Ok(Some(MeshTile {
            header: TileHeader {
                x: header.tx,
                z: header.ty,
                layer: header.tlayer,
                bmin: header.bmin,
                bmax: header.bmax,
            },
            verts,
            polys,
            off_mesh_links: args.off_mesh_links,
        }))
    }

    /// Clears the walkable area under a cylinder obstacle.
    fn mark_cylinder(
        &self,
        layer: &TileCacheLayer,
        areas: &mut [u8],
        pos: Vec3,
        radius: f32,
        height: f32,
    ) {
        let header = &layer.header;
        let w = header.width as i32;
        let h = header.height as i32;
        let cs = self.config.cs;
        let ch = self.config.ch;

        let min_x = (((pos.x - radius) - header.bmin.x) / cs).floor() as i32;
        let max_x = (((pos.x + radius) - header.bmin.x) / cs).ceil() as i32;
        let min_z = (((pos.z - radius) - header.bmin.z) / cs).floor() as i32;
        let max_z = (((pos.z + radius) - header.bmin.z) / cs).ceil() as i32;
        if max_x < 0 || min_x >= w || max_z < 0 || min_z >= h {
            return;
        }
        let min_x = min_x.max(0);
        let max_x = max_x.min(w - 1);
        let min_z = min_z.max(0);
        let max_z = max_z.min(h - 1);

        let min_y = ((pos.y - header.bmin.y) / ch).floor() as i32 - self.config.walkable_climb;
        let max_y = ((pos.y + height - header.bmin.y) / ch).ceil() as i32;
        let r_sq = radius * radius;

        for z in min_z..=max_z {
            for x in min_x..=max_x {
                let idx = (x + z * w) as usize;
                let cell_height = layer.heights[idx];
                if cell_height == LAYER_EMPTY_HEIGHT {
                    continue;
                }
                let hy = cell_height as i32;
                if hy < min_y || hy > max_y {
                    continue;
                }
                let cx = header.bmin.x + (x as f32 + 0.5) * cs;
                let cz = header.bmin.z + (z as f32 + 0.5) * cs;
                let dx = cx - pos.x;
                let dz = cz - pos.z;
                if dx * dx + dz * dz <= r_sq {
                    areas[idx] = NULL_AREA;
                }
            }
        }
    }
}

/// Monotone sweep regions over a layer grid with carved areas applied.
///
/// Region 0 means "not walkable"; ids are otherwise arbitrary but stable for
/// identical input.
fn build_layer_regions(layer: &TileCacheLayer, areas: &[u8], walkable_climb: i32) -> Vec<u16> {
    let w = layer.header.width as i32;
    let h = layer.header.height as i32;
    let climb = walkable_climb;

    let walkable = |idx: usize| areas[idx] != NULL_AREA && layer.heights[idx] != LAYER_EMPTY_HEIGHT;
    let connected = |a: usize, b: usize| {
        (layer.heights[a] as i32 - layer.heights[b] as i32).abs() <= climb
    };

    let mut regions = vec![0u16; (w * h) as usize];
    let mut next_id: u16 = 1;
    // (region -> canonical region) union table
    let mut remap: Vec<u16> = vec![0];

    for z in 0..h {
        for x in 0..w {
            let idx = (x + z * w) as usize;
            if !walkable(idx) {
                continue;
            }

            let west = if x > 0 { Some(idx - 1) } else { None };
            let north = if z > 0 { Some(idx - w as usize) } else { None };

            let west_reg = west
                .filter(|&wi| walkable(wi) && areas[wi] == areas[idx] && connected(wi, idx))
                .map(|wi| regions[wi])
                .filter(|&r| r != 0);
            let north_reg = north
                .filter(|&ni| walkable(ni) && areas[ni] == areas[idx] && connected(ni, idx))
                .map(|ni| regions[ni])
                .filter(|&r| r != 0);

            let assigned = match (west_reg, north_reg) {
                (Some(wr), Some(nr)) => {
                    // Connecting two sweeps merges their regions
                    let (wr_root, nr_root) = (resolve(&remap, wr), resolve(&remap, nr));
                    if wr_root != nr_root {
                        let (lo, hi) = if wr_root < nr_root {
                            (wr_root, nr_root)
                        } else {
                            (nr_root, wr_root)
                        };
                        remap[hi as usize] = lo;
                    }
                    wr
                }
                (Some(wr), None) => wr,
                (None, Some(nr)) => nr,
                (None, None) => {
                    let id = next_id;
                    next_id += 1;
                    remap.push(id);
                    id
                }
            };
            regions[idx] = assigned;
        }
    }

    for r in regions.iter_mut() {
        if *r != 0 {
            *r = resolve(&remap, *r);
        }
    }
    regions
}

fn resolve(remap: &[u16], mut r: u16) -> u16 {
    while remap[r as usize] != r {
        r = remap[r as usize];
    }
    r
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::TileCacheLayerHeader;
    use tilenav_voxel::WALKABLE_AREA;

    fn flat_layer(w: u8, h: u8) -> TileCacheLayer {
        let mut header = TileCacheLayerHeader::new(0, 0, 0);
        header.width = w;
        header.height = h;
        header.maxx = w - 1;
        header.maxy = h - 1;
        header.bmin = Vec3::ZERO;
        header.bmax = Vec3::new(w as f32 * 0.3, 1.0, h as f32 * 0.3);
        let grid = w as usize * h as usize;
        TileCacheLayer {
            header,
            heights: vec![0u16; grid],
            areas: vec![WALKABLE_AREA; grid],
            cons: vec![0u8; grid],
        }
    }

    #[test]
    fn test_flat_layer_builds_single_quad() {
        let layer = flat_layer(8, 8);
        let builder = TileCacheBuilder::new(TileCacheBuildConfig::default());
        let tile = builder
            .build_tile(&layer, &[], &mut NoopMeshProcess)
            .unwrap()
            .expect("tile");
        assert_eq!(tile.polys.len(), 1);
        assert_eq!(tile.verts.len(), 4);
        assert_eq!(tile.polys[0].area, WALKABLE_AREA);
    }

    #[test]
    fn test_obstacle_carves_hole() {
        let layer = flat_layer(8, 8);
        let builder = TileCacheBuilder::new(TileCacheBuildConfig::default());
        // Cylinder over the middle of the 2.4 x 2.4 world tile
        let obstacle = (Vec3::new(1.2, 0.0, 1.2), 0.5, 1.0);
        let tile = builder
            .build_tile(&layer, &[obstacle], &mut NoopMeshProcess)
            .unwrap()
            .expect("tile");
        // The hole splits the plane into several rectangles
        assert!(tile.polys.len() > 1);
        // No polygon covers the obstacle center
        for poly in &tile.polys {
            let xs: Vec<f32> = poly.verts.iter().map(|&v| tile.verts[v as usize].x).collect();
            let zs: Vec<f32> = poly.verts.iter().map(|&v| tile.verts[v as usize].z).collect();
            let min_x = xs.iter().cloned().fold(f32::MAX, f32::min);
            let max_x = xs.iter().cloned().fold(f32::MIN, f32::max);
            let min_z = zs.iter().cloned().fold(f32::MAX, f32::min);
            let max_z = zs.iter().cloned().fold(f32::MIN, f32::max);
            let covers = min_x < 1.2 && max_x > 1.2 && min_z < 1.2 && max_z > 1.2;
            assert!(!covers, "polygon covers the carved center");
        }
    }

    #[test]
    fn test_fully_carved_layer_builds_nothing() {
        let layer = flat_layer(4, 4);
        let builder = TileCacheBuilder::new(TileCacheBuildConfig::default());
        let obstacle = (Vec3::new(0.6, 0.0, 0.6), 5.0, 2.0);
        let tile = builder
            .build_tile(&layer, &[obstacle], &mut NoopMeshProcess)
            .unwrap();
        assert!(tile.is_none());
    }

    #[test]
    fn test_mesh_process_sets_flags() {
        struct WalkableFlagger;
        impl MeshProcess for WalkableFlagger {
            fn process(&mut self, args: &mut TileBuildArgs) {
                for (flags, &area) in args.poly_flags.iter_mut().zip(args.poly_areas.iter()) {
                    if area != NULL_AREA {
                        *flags = tilenav_mesh::POLY_FLAG_WALK;
                    }
                }
            }
        }

        let layer = flat_layer(4, 4);
        let builder = TileCacheBuilder::new(TileCacheBuildConfig::default());
        let tile = builder
            .build_tile(&layer, &[], &mut WalkableFlagger)
            .unwrap()
            .expect("tile");
        assert!(tile
            .polys
            .iter()
            .all(|p| p.flags == tilenav_mesh::POLY_FLAG_WALK));
    }
}
