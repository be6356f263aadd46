//! Decomposition of a compact heightfield into height-banded layers
//!
//! Layers are the tile-cache representation: one floor height and area per
//! cell, so overlapping walkable levels (bridges, stacked floors) within a
//! tile footprint end up in separate layers.

use glam::Vec3;
use tilenav_common::{Error, Result};

use crate::{CompactHeightfield, LAYER_EMPTY_HEIGHT, NULL_AREA};

/// Maximum distinct sweep regions feeding the layer assignment; ids above
/// this are reserved for the sentinels below
const MAX_LAYER_REGIONS: usize = 253;
const NO_REGION: u8 = 0xff;
const NULL_NEI: u8 = 0xfe;

/// One height-banded slice of a tile's walkable space.
#[derive(Debug, Clone)]
pub struct HeightfieldLayer {
    /// Grid width in cells (tile size, border trimmed)
    pub width: i32,
    /// Grid height (depth) in cells
    pub height: i32,
    /// Bounds of the layer volume
    pub bmin: Vec3,
    pub bmax: Vec3,
    pub cs: f32,
    pub ch: f32,
    /// Quantized height range of the layer
    pub hmin: u16,
    pub hmax: u16,
    /// Tight usable cell rectangle within the grid
    pub minx: i32,
    pub maxx: i32,
    pub miny: i32,
    pub maxy: i32,
    /// Floor height per cell relative to `hmin`; [`LAYER_EMPTY_HEIGHT`] when empty
    pub heights: Vec<u16>,
    /// Area ID per cell
    pub areas: Vec<u8>,
    /// Packed connectivity per cell: low nibble in-layer neighbor bits,
    /// high nibble portal bits toward other layers
    pub cons: Vec<u8>,
}

/// The set of layers produced for one tile.
#[derive(Debug, Default)]
pub struct HeightfieldLayerSet {
    pub layers: Vec<HeightfieldLayer>,
}

#[derive(Debug, Clone, Copy, Default)]
struct LayerSweep {
    ns: u16,
    id: u8,
    nei: u8,
}

#[derive(Debug, Clone)]
struct LayerRegion {
    ymin: u16,
    ymax: u16,
    layer_id: u8,
    /// Regions stacked above or below this one (may not share a layer)
    stacked: Vec<u8>,
    /// Regions adjacent through span connections
    neis: Vec<u8>,
}

impl LayerRegion {
    fn new() -> Self {
        Self {
            ymin: u16::MAX,
            ymax: 0,
            layer_id: NO_REGION,
            stacked: Vec::new(),
            neis: Vec::new(),
        }
    }
}

fn add_unique(list: &mut Vec<u8>, v: u8) {
    if !list.contains(&v) {
        list.push(v);
    }
}

impl HeightfieldLayerSet {
    /// Builds the layer set, trimming `border_size` cells off each side.
    pub fn build(chf: &CompactHeightfield, border_size: i32, _walkable_height: i32) -> Result<Self> {
        let w = chf.width;
        let h = chf.height;
        let lw = w - border_size * 2;
        let lh = h - border_size * 2;
        if lw <= 0 || lh <= 0 {
            return Err(Error::InvalidParam(
                "border leaves no usable layer area".into(),
            ));
        }

        // Partition walkable spans into small monotone sweep regions
        let mut src_reg = vec![NO_REGION; chf.span_count()];
        let mut nregs: usize = 0;
        let mut sweeps: Vec<LayerSweep> = Vec::new();
        let mut prev_counts: Vec<i32> = Vec::new();

        for z in border_size..h - border_size {
            prev_counts.clear();
            prev_counts.resize(nregs, 0);
            sweeps.clear();

            for x in border_size..w - border_size {
                let cell = chf.cell(x, z);
                for si in cell.index as usize..(cell.index + cell.count) as usize {
                    if chf.areas[si] == NULL_AREA {
                        continue;
                    }
                    let span = chf.spans[si];

                    let mut sid = NO_REGION;
                    if let Some(ai) = chf.connected_span_index(&span, x, z, 0) {
                        if src_reg[ai] != NO_REGION {
                            sid = src_reg[ai];
                        }
                    }
                    if sid == NO_REGION {
                        if sweeps.len() >= MAX_LAYER_REGIONS {
                            return Err(Error::Build("too many layer sweep regions".into()));
                        }
                        sid = sweeps.len() as u8;
                        sweeps.push(LayerSweep {
                            ns: 0,
                            id: NO_REGION,
                            nei: NO_REGION,
                        });
                    }

                    if let Some(ai) = chf.connected_span_index(&span, x, z, 3) {
                        let nr = src_reg[ai];
                        if nr != NO_REGION {
                            let sweep = &mut sweeps[sid as usize];
                            if sweep.nei == NO_REGION || sweep.nei == nr {
                                sweep.nei = nr;
                                sweep.ns += 1;
                                prev_counts[nr as usize] += 1;
                            } else {
                                sweep.nei = NULL_NEI;
                            }
                        }
                    }

                    src_reg[si] = sid;
                }
            }

            for sweep in sweeps.iter_mut() {
                if sweep.nei != NO_REGION
                    && sweep.nei != NULL_NEI
                    && prev_counts[sweep.nei as usize] == sweep.ns as i32
                {
                    sweep.id = sweep.nei;
                } else {
                    if nregs >= MAX_LAYER_REGIONS {
                        return Err(Error::Build("too many layer regions".into()));
                    }
                    sweep.id = nregs as u8;
                    nregs += 1;
                }
            }

            for x in border_size..w - border_size {
                let cell = chf.cell(x, z);
                for si in cell.index as usize..(cell.index + cell.count) as usize {
                    let r = src_reg[si];
                    if r != NO_REGION && (r as usize) < sweeps.len() && chf.areas[si] != NULL_AREA {
                        src_reg[si] = sweeps[r as usize].id;
                    }
                }
            }
        }

        if nregs == 0 {
            return Ok(Self::default());
        }

        // Region metadata: height ranges, adjacency and stacking conflicts
        let mut regions: Vec<LayerRegion> = vec![LayerRegion::new(); nregs];
        for z in border_size..h - border_size {
            for x in border_size..w - border_size {
                let cell = chf.cell(x, z);
                let mut column_regs: Vec<u8> = Vec::new();
                for si in cell.index as usize..(cell.index + cell.count) as usize {
                    let ri = src_reg[si];
                    if ri == NO_REGION {
                        continue;
                    }
                    let span = chf.spans[si];
                    let region = &mut regions[ri as usize];
                    region.ymin = region.ymin.min(span.y);
                    region.ymax = region.ymax.max(span.y);

                    for &other in &column_regs {
                        if other != ri {
                            add_unique(&mut regions[other as usize].stacked, ri);
                            add_unique(&mut regions[ri as usize].stacked, other);
                        }
                    }
                    column_regs.push(ri);

                    for dir in 0..4 {
                        if let Some(ai) = chf.connected_span_index(&span, x, z, dir) {
                            let nr = src_reg[ai];
                            if nr != NO_REGION && nr != ri {
                                add_unique(&mut regions[ri as usize].neis, nr);
                            }
                        }
                    }
                }
            }
        }

        // Merge adjacent compatible regions into layers
        let mut layer_count: u8 = 0;
        for root in 0..nregs {
            if regions[root].layer_id != NO_REGION {
                continue;
            }
            regions[root].layer_id = layer_count;
            let mut root_ymin = regions[root].ymin;
            let mut root_ymax = regions[root].ymax;
            let mut root_stacked = regions[root].stacked.clone();
            let mut stack = vec![root as u8];

            while let Some(ri) = stack.pop() {
                let neis = regions[ri as usize].neis.clone();
                for nei in neis {
                    if regions[nei as usize].layer_id != NO_REGION {
                        continue;
                    }
                    // Stacked regions may never share a layer
                    if root_stacked.contains(&nei) {
                        continue;
                    }
                    // The merged height band must stay addressable
                    let ymin = root_ymin.min(regions[nei as usize].ymin);
                    let ymax = root_ymax.max(regions[nei as usize].ymax);
                    if (ymax - ymin) as u32 >= 255 {
                        continue;
                    }

                    regions[nei as usize].layer_id = layer_count;
                    root_ymin = ymin;
                    root_ymax = ymax;
                    let nei_stacked = regions[nei as usize].stacked.clone();
                    for s in nei_stacked {
                        add_unique(&mut root_stacked, s);
                    }
                    stack.push(nei);
                }
            }
            layer_count += 1;
        }

        // Emit one grid per layer
        let mut set = Self::default();
        for layer_id in 0..layer_count {
            let members: Vec<usize> = (0..nregs)
                .filter(|&r| regions[r].layer_id == layer_id)
                .collect();
            let hmin = members.iter().map(|&r| regions[r].ymin).min().unwrap_or(0);
            let hmax = members.iter().map(|&r| regions[r].ymax).max().unwrap_or(0);

            let mut layer = HeightfieldLayer {
                width: lw,
                height: lh,
                bmin: Vec3::new(
                    chf.bmin.x + border_size as f32 * chf.cs,
                    chf.bmin.y + hmin as f32 * chf.ch,
                    chf.bmin.z + border_size as f32 * chf.cs,
                ),
                bmax: Vec3::new(
                    chf.bmax.x - border_size as f32 * chf.cs,
                    chf.bmin.y + hmax as f32 * chf.ch,
                    chf.bmax.z - border_size as f32 * chf.cs,
                ),
                cs: chf.cs,
                ch: chf.ch,
                hmin,
                hmax,
                minx: lw,
                maxx: 0,
                miny: lh,
                maxy: 0,
                heights: vec![LAYER_EMPTY_HEIGHT; (lw * lh) as usize],
                areas: vec![NULL_AREA; (lw * lh) as usize],
                cons: vec![0; (lw * lh) as usize],
            };

            for lz in 0..lh {
                for lx in 0..lw {
                    let cx = border_size + lx;
                    let cz = border_size + lz;
                    let cell = chf.cell(cx, cz);
                    for si in cell.index as usize..(cell.index + cell.count) as usize {
                        let ri = src_reg[si];
                        if ri == NO_REGION || regions[ri as usize].layer_id != layer_id {
                            continue;
                        }
                        let span = chf.spans[si];
                        let idx = (lx + lz * lw) as usize;
                        layer.heights[idx] = span.y - hmin;
                        layer.areas[idx] = chf.areas[si];

                        let mut con: u8 = 0;
                        let mut portal: u8 = 0;
                        for dir in 0..4 {
                            if let Some(ai) = chf.connected_span_index(&span, cx, cz, dir) {
                                let nr = src_reg[ai];
                                if nr == NO_REGION {
                                    continue;
                                }
                                if regions[nr as usize].layer_id == layer_id {
                                    con |= 1 << dir;
                                } else {
                                    portal |= 1 << dir;
                                }
                            }
                        }
                        layer.cons[idx] = (portal << 4) | con;

                        layer.minx = layer.minx.min(lx);
                        layer.maxx = layer.maxx.max(lx);
                        layer.miny = layer.miny.min(lz);
                        layer.maxy = layer.maxy.max(lz);
                    }
                }
            }

            // Layers whose cells all fell outside the trimmed grid are dropped
            if layer.minx <= layer.maxx && layer.miny <= layer.maxy {
                set.layers.push(layer);
            }
        }

        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Heightfield, WALKABLE_AREA};

    fn build_flat_layers(w: i32, h: i32, border: i32) -> HeightfieldLayerSet {
        let mut hf = Heightfield::new(
            w,
            h,
            Vec3::ZERO,
            Vec3::new(w as f32 * 0.5, 2.0, h as f32 * 0.5),
            0.5,
            0.1,
        );
        for z in 0..h {
            for x in 0..w {
                hf.add_span(x, z, 0, 1, WALKABLE_AREA, 1).unwrap();
            }
        }
        let chf = CompactHeightfield::build(&hf, 5, 2).unwrap();
        HeightfieldLayerSet::build(&chf, border, 5).unwrap()
    }

    #[test]
    fn test_flat_tile_single_layer() {
        let set = build_flat_layers(12, 12, 2);
        assert_eq!(set.layers.len(), 1);
        let layer = &set.layers[0];
        assert_eq!(layer.width, 8);
        assert_eq!(layer.height, 8);
        // Every trimmed cell is occupied and walkable
        assert!(layer.heights.iter().all(|&ht| ht != LAYER_EMPTY_HEIGHT));
        assert!(layer.areas.iter().all(|&a| a == WALKABLE_AREA));
        assert_eq!((layer.minx, layer.maxx), (0, 7));
        assert_eq!((layer.miny, layer.maxy), (0, 7));
    }

    #[test]
    fn test_empty_heightfield_no_layers() {
        let hf = Heightfield::new(8, 8, Vec3::ZERO, Vec3::new(4.0, 2.0, 4.0), 0.5, 0.1);
        let chf = CompactHeightfield::build(&hf, 5, 2).unwrap();
        let set = HeightfieldLayerSet::build(&chf, 0, 5).unwrap();
        assert!(set.layers.is_empty());
    }

    #[test]
    fn test_bridge_produces_two_layers() {
        // Ground plane everywhere plus an elevated deck over the middle rows,
        // high enough to leave walkable clearance underneath
        let mut hf = Heightfield::new(
            10,
            10,
            Vec3::ZERO,
            Vec3::new(5.0, 5.0, 5.0),
            0.5,
            0.1,
        );
        for z in 0..10 {
            for x in 0..10 {
                hf.add_span(x, z, 0, 1, WALKABLE_AREA, 1).unwrap();
            }
        }
        for z in 4..6 {
            for x in 0..10 {
                hf.add_span(x, z, 20, 21, WALKABLE_AREA, 1).unwrap();
            }
        }
        let chf = CompactHeightfield::build(&hf, 5, 2).unwrap();
        let set = HeightfieldLayerSet::build(&chf, 0, 5).unwrap();
        assert_eq!(set.layers.len(), 2);

        let mut hmins: Vec<u16> = set.layers.iter().map(|l| l.hmin).collect();
        hmins.sort_unstable();
        assert_eq!(hmins[0], 1);
        assert_eq!(hmins[1], 21);
    }
}
