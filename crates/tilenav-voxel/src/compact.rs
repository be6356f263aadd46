//! Compact (open-space) heightfield with neighbor connectivity

use glam::Vec3;
use tilenav_common::Result;

use crate::{Heightfield, DIR_OFFSET_X, DIR_OFFSET_Z, NOT_CONNECTED, NULL_AREA, SPAN_MAX_HEIGHT};

/// Maximum spans stacked in one compact cell that can still be linked
const MAX_LAYERS_PER_CELL: usize = (NOT_CONNECTED - 1) as usize;

/// A cell in the compact heightfield: a range into the span array.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompactCell {
    /// Index of the first span in the cell
    pub index: u32,
    /// Number of spans in the cell
    pub count: u32,
}

/// An open span: walkable floor plus the air above it.
#[derive(Debug, Clone, Copy)]
pub struct CompactSpan {
    /// Floor height (bottom of open space)
    pub y: u16,
    /// Open space height above the floor
    pub h: u16,
    /// Region ID assigned by partitioning (0 = none)
    pub reg: u16,
    /// Per-direction connection: index of the linked span within the
    /// neighbor cell, or [`NOT_CONNECTED`]
    pub con: [u8; 4],
}

impl CompactSpan {
    fn new(y: u16, h: u16) -> Self {
        Self {
            y,
            h,
            reg: 0,
            con: [NOT_CONNECTED; 4],
        }
    }

    /// Resolves the connected span index in direction `dir`, if any.
    pub fn con(&self, dir: usize) -> Option<u8> {
        let c = self.con[dir];
        (c != NOT_CONNECTED).then_some(c)
    }
}

/// Compact heightfield: open spans over a row-major cell grid.
#[derive(Debug)]
pub struct CompactHeightfield {
    pub width: i32,
    pub height: i32,
    pub bmin: Vec3,
    pub bmax: Vec3,
    pub cs: f32,
    pub ch: f32,
    /// Clearance required for traversal, in cells
    pub walkable_height: i32,
    /// Maximum traversable step, in cells
    pub walkable_climb: i32,
    /// Border cells around the tile proper
    pub border_size: i32,
    /// Highest region ID assigned by partitioning
    pub max_regions: u16,
    /// Highest distance value in the distance field
    pub max_distance: u16,
    pub cells: Vec<CompactCell>,
    pub spans: Vec<CompactSpan>,
    /// Per-span area IDs, parallel to `spans`
    pub areas: Vec<u8>,
    /// Per-span distance field, filled by watershed partitioning
    pub dist: Vec<u16>,
}

impl CompactHeightfield {
    /// Builds the compact heightfield from the walkable spans of `hf`.
    ///
    /// The ceiling of each open span is the bottom of the next solid span in
    /// the column; neighbor connections require `walkable_height` clearance
    /// and at most `walkable_climb` of step.
    pub fn build(hf: &Heightfield, walkable_height: i32, walkable_climb: i32) -> Result<Self> {
        let w = hf.width;
        let h = hf.height;
        let span_count = hf.walkable_span_count();

        let mut chf = Self {
            width: w,
            height: h,
            bmin: hf.bmin,
            bmax: Vec3::new(
                hf.bmax.x,
                hf.bmax.y + walkable_height as f32 * hf.ch,
                hf.bmax.z,
            ),
            cs: hf.cs,
            ch: hf.ch,
            walkable_height,
            walkable_climb,
            border_size: 0,
            max_regions: 0,
            max_distance: 0,
            cells: vec![CompactCell::default(); (w * h) as usize],
            spans: Vec::with_capacity(span_count),
            areas: Vec::with_capacity(span_count),
            dist: Vec::new(),
        };

        // Open spans: floor at span top, ceiling at the next span bottom
        for z in 0..h {
            for x in 0..w {
                let column = hf.column(x, z);
                let cell = &mut chf.cells[(x + z * w) as usize];
                cell.index = chf.spans.len() as u32;
                let mut count = 0;
                for (si, span) in column.iter().enumerate() {
                    if span.area == NULL_AREA {
                        continue;
                    }
                    let bot = span.max;
                    let top = column
                        .get(si + 1)
                        .map_or(SPAN_MAX_HEIGHT as i32, |s| s.min as i32);
                    let clearance = (top - bot as i32).clamp(0, SPAN_MAX_HEIGHT as i32) as u16;
                    chf.spans.push(CompactSpan::new(bot, clearance));
                    chf.areas.push(span.area);
                    count += 1;
                }
                cell.count = count;
            }
        }

        chf.build_connections();
        Ok(chf)
    }

    fn build_connections(&mut self) {
        let w = self.width;
        let h = self.height;
        for z in 0..h {
            for x in 0..w {
                let cell = self.cells[(x + z * w) as usize];
                for si in cell.index..cell.index + cell.count {
                    let span = self.spans[si as usize];
                    for dir in 0..4 {
                        let nx = x + DIR_OFFSET_X[dir];
                        let nz = z + DIR_OFFSET_Z[dir];
                        if nx < 0 || nz < 0 || nx >= w || nz >= h {
                            continue;
                        }
                        let ncell = self.cells[(nx + nz * w) as usize];
                        for (k, ni) in (ncell.index..ncell.index + ncell.count).enumerate() {
                            if k >= MAX_LAYERS_PER_CELL {
                                break;
                            }
                            let nspan = self.spans[ni as usize];
                            let bot = span.y.max(nspan.y) as i32;
                            let top =
                                (span.y as i32 + span.h as i32).min(nspan.y as i32 + nspan.h as i32);
                            if top - bot >= self.walkable_height
                                && (nspan.y as i32 - span.y as i32).abs() <= self.walkable_climb
                            {
                                self.spans[si as usize].con[dir] = k as u8;
                                break;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Cell lookup helper.
    pub fn cell(&self, x: i32, z: i32) -> CompactCell {
        self.cells[(x + z * self.width) as usize]
    }

    /// Index of the span connected to `span` in direction `dir`.
    pub fn connected_span_index(&self, span: &CompactSpan, x: i32, z: i32, dir: usize) -> Option<usize> {
        let k = span.con(dir)?;
        let nx = x + DIR_OFFSET_X[dir];
        let nz = z + DIR_OFFSET_Z[dir];
        let ncell = self.cell(nx, nz);
        Some(ncell.index as usize + k as usize)
    }

    /// Number of spans.
    pub fn span_count(&self) -> usize {
        self.spans.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WALKABLE_AREA;

    fn flat_field(w: i32, h: i32) -> Heightfield {
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
        hf
    }

    #[test]
    fn test_build_flat() {
        let hf = flat_field(4, 4);
        let chf = CompactHeightfield::build(&hf, 5, 2).unwrap();
        assert_eq!(chf.span_count(), 16);
        // Interior spans connect in all four directions
        let cell = chf.cell(1, 1);
        let span = chf.spans[cell.index as usize];
        for dir in 0..4 {
            assert!(span.con(dir).is_some(), "dir {dir}");
        }
        // Corner spans connect in exactly two
        let corner = chf.spans[chf.cell(0, 0).index as usize];
        let n = (0..4).filter(|&d| corner.con(d).is_some()).count();
        assert_eq!(n, 2);
    }

    #[test]
    fn test_unwalkable_spans_dropped() {
        let mut hf = flat_field(2, 2);
        hf.add_span(0, 0, 5, 6, NULL_AREA, 1).unwrap();
        let chf = CompactHeightfield::build(&hf, 5, 2).unwrap();
        // The null span does not become an open span, but it caps the
        // clearance of the walkable span below it
        assert_eq!(chf.span_count(), 4);
        let capped = chf.spans[chf.cell(0, 0).index as usize];
        assert_eq!(capped.h, 4);
    }

    #[test]
    fn test_step_too_high_not_connected() {
        let mut hf = flat_field(2, 1);
        // Raise one column well past the climb limit
        hf.add_span(1, 0, 0, 10, WALKABLE_AREA, 1).unwrap();
        let chf = CompactHeightfield::build(&hf, 5, 2).unwrap();
        let low = chf.spans[chf.cell(0, 0).index as usize];
        assert!(low.con(2).is_none());
    }
}
