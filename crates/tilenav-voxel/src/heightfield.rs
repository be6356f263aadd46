//! Span heightfield: the first structure in the voxelization pipeline

use glam::Vec3;
use tilenav_common::{Error, Result};

use crate::{NULL_AREA, SPAN_MAX_HEIGHT};

/// A solid vertical segment in one heightfield column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Span {
    /// Quantized minimum height
    pub min: u16,
    /// Quantized maximum height
    pub max: u16,
    /// Area ID (0 = not walkable)
    pub area: u8,
}

/// Heightfield storing height-ordered span columns on a row-major grid.
#[derive(Debug)]
pub struct Heightfield {
    /// Width of the heightfield along the x-axis
    pub width: i32,
    /// Height (depth) of the heightfield along the z-axis
    pub height: i32,
    /// The minimum bounds of the heightfield's AABB
    pub bmin: Vec3,
    /// The maximum bounds of the heightfield's AABB
    pub bmax: Vec3,
    /// Cell size (horizontal resolution)
    pub cs: f32,
    /// Cell height (vertical resolution)
    pub ch: f32,
    /// Span columns, row-major; each column is sorted by span min
    columns: Vec<Vec<Span>>,
}

impl Heightfield {
    /// Creates a new empty heightfield.
    pub fn new(width: i32, height: i32, bmin: Vec3, bmax: Vec3, cs: f32, ch: f32) -> Self {
        Self {
            width,
            height,
            bmin,
            bmax,
            cs,
            ch,
            columns: vec![Vec::new(); (width * height) as usize],
        }
    }

    /// Spans of one column, sorted ascending by height.
    pub fn column(&self, x: i32, z: i32) -> &[Span] {
        &self.columns[(x + z * self.width) as usize]
    }

    fn column_mut(&mut self, x: i32, z: i32) -> &mut Vec<Span> {
        &mut self.columns[(x + z * self.width) as usize]
    }

    /// Total number of spans.
    pub fn span_count(&self) -> usize {
        self.columns.iter().map(|c| c.len()).sum()
    }

    /// Number of spans carrying a walkable area.
    pub fn walkable_span_count(&self) -> usize {
        self.columns
            .iter()
            .map(|c| c.iter().filter(|s| s.area != NULL_AREA).count())
            .sum()
    }

    /// Adds a span, merging it with overlapping or touching spans.
    ///
    /// When the merged span's top is within `flag_merge_threshold` of an
    /// absorbed span's top, the higher-priority area is kept so thin
    /// walkable surfaces survive re-rasterization.
    pub fn add_span(
        &mut self,
        x: i32,
        z: i32,
        min: u16,
        max: u16,
        area: u8,
        flag_merge_threshold: i32,
    ) -> Result<()> {
        if x < 0 || x >= self.width || z < 0 || z >= self.height {
            return Err(Error::InvalidParam(format!(
                "span position out of bounds: ({x}, {z})"
            )));
        }
        if min > max {
            return Err(Error::InvalidParam(format!(
                "invalid span: min {min} > max {max}"
            )));
        }

        let mut new_span = Span { min, max, area };
        let column = self.column_mut(x, z);

        let mut i = 0;
        while i < column.len() {
            let existing = column[i];
            if existing.min > new_span.max {
                // Remaining spans are fully above the new span
                break;
            }
            if existing.max < new_span.min {
                i += 1;
                continue;
            }
            // Overlapping or touching: absorb the existing span
            new_span.min = new_span.min.min(existing.min);
            new_span.max = new_span.max.max(existing.max);
            if (new_span.max as i32 - existing.max as i32).abs() <= flag_merge_threshold {
                new_span.area = new_span.area.max(existing.area);
            }
            column.remove(i);
        }
        column.insert(i, new_span);
        Ok(())
    }

    /// Marks non-walkable spans as walkable when a walkable span lies just
    /// below within climbing distance (stairs, curbs).
    pub fn filter_low_hanging_walkable_obstacles(&mut self, walkable_climb: i32) {
        for column in &mut self.columns {
            let mut previous_was_walkable = false;
            let mut previous_area = NULL_AREA;
            let mut previous_max = 0u16;

            for span in column.iter_mut() {
                let walkable = span.area != NULL_AREA;
                if !walkable
                    && previous_was_walkable
                    && (span.max as i32 - previous_max as i32).abs() <= walkable_climb
                {
                    span.area = previous_area;
                }
                // Track the original walkability so runs of low obstacles
                // do not cascade upward
                previous_was_walkable = walkable;
                previous_area = span.area;
                previous_max = span.max;
            }
        }
    }

    /// Marks spans adjacent to ledges as unwalkable.
    pub fn filter_ledge_spans(&mut self, walkable_height: i32, walkable_climb: i32) {
        const MAX_HEIGHT: i32 = SPAN_MAX_HEIGHT as i32;
        let w = self.width;
        let h = self.height;

        for z in 0..h {
            for x in 0..w {
                for si in 0..self.column(x, z).len() {
                    let column = self.column(x, z);
                    let span = column[si];
                    if span.area == NULL_AREA {
                        continue;
                    }

                    let bot = span.max as i32;
                    let top = column.get(si + 1).map_or(MAX_HEIGHT, |s| s.min as i32);

                    // Lowest reachable neighbor floor relative to this span
                    let mut min_neighbor_diff = MAX_HEIGHT;
                    // Height band of neighbors reachable within the climb
                    let mut accessible_min = span.max as i32;
                    let mut accessible_max = span.max as i32;

                    for dir in 0..4 {
                        let nx = x + crate::DIR_OFFSET_X[dir];
                        let nz = z + crate::DIR_OFFSET_Z[dir];
                        if nx < 0 || nz < 0 || nx >= w || nz >= h {
                            min_neighbor_diff = -walkable_climb - 1;
                            break;
                        }

                        let neighbor = self.column(nx, nz);
                        // Gap from the ground up to the first neighbor span
                        let mut nbot = -walkable_climb;
                        let mut ntop = neighbor.first().map_or(MAX_HEIGHT, |s| s.min as i32);
                        if top.min(ntop) - bot.max(nbot) > walkable_height {
                            min_neighbor_diff = min_neighbor_diff.min(nbot - bot);
                        }

                        for (ni, nspan) in neighbor.iter().enumerate() {
                            nbot = nspan.max as i32;
                            ntop = neighbor.get(ni + 1).map_or(MAX_HEIGHT, |s| s.min as i32);
                            if top.min(ntop) - bot.max(nbot) > walkable_height {
                                min_neighbor_diff = min_neighbor_diff.min(nbot - bot);
                                if (nbot - bot).abs() <= walkable_climb {
                                    accessible_min = accessible_min.min(nbot);
                                    accessible_max = accessible_max.max(nbot);
                                }
                            }
                        }
                    }

                    // A drop taller than the climb, or neighbors spanning more
                    // than the climb, makes this a ledge
                    if min_neighbor_diff < -walkable_climb
                        || (accessible_max - accessible_min) > walkable_climb
                    {
                        self.column_mut(x, z)[si].area = NULL_AREA;
                    }
                }
            }
        }
    }

    /// Marks walkable spans with insufficient clearance above as unwalkable.
    pub fn filter_walkable_low_height_spans(&mut self, walkable_height: i32) {
        const MAX_HEIGHT: i32 = SPAN_MAX_HEIGHT as i32;
        for column in &mut self.columns {
            for si in 0..column.len() {
                let bot = column[si].max as i32;
                let top = column.get(si + 1).map_or(MAX_HEIGHT, |s| s.min as i32);
                if top - bot < walkable_height {
                    column[si].area = NULL_AREA;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WALKABLE_AREA;

    fn field() -> Heightfield {
        Heightfield::new(
            4,
            4,
            Vec3::ZERO,
            Vec3::new(4.0, 10.0, 4.0),
            1.0,
            0.5,
        )
    }

    #[test]
    fn test_add_span_ordering() {
        let mut hf = field();
        hf.add_span(1, 1, 10, 12, WALKABLE_AREA, 1).unwrap();
        hf.add_span(1, 1, 0, 2, WALKABLE_AREA, 1).unwrap();
        hf.add_span(1, 1, 5, 6, NULL_AREA, 1).unwrap();
        let col = hf.column(1, 1);
        assert_eq!(col.len(), 3);
        assert!(col[0].min < col[1].min && col[1].min < col[2].min);
    }

    #[test]
    fn test_add_span_merges_overlap() {
        let mut hf = field();
        hf.add_span(0, 0, 0, 4, NULL_AREA, 1).unwrap();
        hf.add_span(0, 0, 3, 5, WALKABLE_AREA, 1).unwrap();
        let col = hf.column(0, 0);
        assert_eq!(col.len(), 1);
        assert_eq!(col[0].min, 0);
        assert_eq!(col[0].max, 5);
        // New span top wins the area vote
        assert_eq!(col[0].area, WALKABLE_AREA);
    }

    #[test]
    fn test_add_span_out_of_bounds() {
        let mut hf = field();
        assert!(hf.add_span(4, 0, 0, 1, NULL_AREA, 1).is_err());
    }

    #[test]
    fn test_filter_low_height_spans() {
        let mut hf = field();
        hf.add_span(0, 0, 0, 2, WALKABLE_AREA, 1).unwrap();
        hf.add_span(0, 0, 4, 6, WALKABLE_AREA, 1).unwrap();
        // Clearance between spans is 4 - 2 = 2, below the required 5
        hf.filter_walkable_low_height_spans(5);
        let col = hf.column(0, 0);
        assert_eq!(col[0].area, NULL_AREA);
        // Top span has open sky above
        assert_eq!(col[1].area, WALKABLE_AREA);
    }

    #[test]
    fn test_filter_ledge_spans_marks_cliff_edge() {
        let mut hf = field();
        // A raised platform on one cell, flat floor elsewhere
        for z in 0..4 {
            for x in 0..4 {
                let (min, max) = if x == 1 && z == 1 { (0, 20) } else { (0, 1) };
                hf.add_span(x, z, min, max, WALKABLE_AREA, 1).unwrap();
            }
        }
        hf.filter_ledge_spans(5, 2);
        // The platform top is a ledge; floor cells bordering the grid edge
        // are ledges too, interior floor cells remain walkable
        assert_eq!(hf.column(1, 1)[0].area, NULL_AREA);
    }
}
