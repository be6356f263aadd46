//! Walkable-area adjustment: erosion and area-volume painting

use tilenav_common::BoundingBox;

use crate::{CompactHeightfield, NULL_AREA};

/// Shrinks the walkable area away from obstructions by `radius` cells.
///
/// Runs a two-pass chamfer distance transform over the span graph seeded at
/// area boundaries, then clears every span closer than the radius.
pub fn erode_walkable_area(radius: i32, chf: &mut CompactHeightfield) {
    let w = chf.width;
    let h = chf.height;
    let mut dist = vec![u8::MAX; chf.span_count()];

    // Seed: unwalkable spans and spans missing a walkable neighbor
    for z in 0..h {
        for x in 0..w {
            let cell = chf.cell(x, z);
            for si in cell.index as usize..(cell.index + cell.count) as usize {
                if chf.areas[si] == NULL_AREA {
                    dist[si] = 0;
                    continue;
                }
                let span = chf.spans[si];
                let mut connected = 0;
                for dir in 0..4 {
                    if let Some(ni) = chf.connected_span_index(&span, x, z, dir) {
                        if chf.areas[ni] != NULL_AREA {
                            connected += 1;
                        }
                    }
                }
                if connected != 4 {
                    dist[si] = 0;
                }
            }
        }
    }

    let relax = |dist: &mut Vec<u8>, si: usize, from: usize, cost: u8| {
        let nd = dist[from].saturating_add(cost);
        if nd < dist[si] {
            dist[si] = nd;
        }
    };

    // Forward pass: west and south neighbors plus their diagonals
    for z in 0..h {
        for x in 0..w {
            let cell = chf.cell(x, z);
            for si in cell.index as usize..(cell.index + cell.count) as usize {
                let span = chf.spans[si];
                if let Some(ai) = chf.connected_span_index(&span, x, z, 0) {
                    relax(&mut dist, si, ai, 2);
                    let aspan = chf.spans[ai];
                    if let Some(aai) = chf.connected_span_index(&aspan, x - 1, z, 3) {
                        relax(&mut dist, si, aai, 3);
                    }
                }
                if let Some(ai) = chf.connected_span_index(&span, x, z, 3) {
                    relax(&mut dist, si, ai, 2);
                    let aspan = chf.spans[ai];
                    if let Some(aai) = chf.connected_span_index(&aspan, x, z - 1, 0) {
                        relax(&mut dist, si, aai, 3);
                    }
                }
            }
        }
    }

    // Backward pass: east and north neighbors plus their diagonals
    for z in (0..h).rev() {
        for x in (0..w).rev() {
            let cell = chf.cell(x, z);
            for si in cell.index as usize..(cell.index + cell.count) as usize {
                let span = chf.spans[si];
                if let Some(ai) = chf.connected_span_index(&span, x, z, 2) {
                    relax(&mut dist, si, ai, 2);
                    let aspan = chf.spans[ai];
                    if let Some(aai) = chf.connected_span_index(&aspan, x + 1, z, 1) {
                        relax(&mut dist, si, aai, 3);
                    }
                }
                if let Some(ai) = chf.connected_span_index(&span, x, z, 1) {
                    relax(&mut dist, si, ai, 2);
                    let aspan = chf.spans[ai];
                    if let Some(aai) = chf.connected_span_index(&aspan, x, z + 1, 2) {
                        relax(&mut dist, si, aai, 3);
                    }
                }
            }
        }
    }

    let threshold = (radius * 2).min(u8::MAX as i32) as u8;
    for si in 0..chf.span_count() {
        if dist[si] < threshold {
            chf.areas[si] = NULL_AREA;
        }
    }
}

/// Paints every walkable span inside an axis-aligned box with `area_id`.
///
/// Used for area-volume stubs (no-go and custom-cost zones).
pub fn mark_box_area(bounds: &BoundingBox, area_id: u8, chf: &mut CompactHeightfield) {
    let min_x = ((bounds.min.x - chf.bmin.x) / chf.cs) as i32;
    let min_y = ((bounds.min.y - chf.bmin.y) / chf.ch) as i32;
    let min_z = ((bounds.min.z - chf.bmin.z) / chf.cs) as i32;
    let max_x = ((bounds.max.x - chf.bmin.x) / chf.cs) as i32;
    let max_y = ((bounds.max.y - chf.bmin.y) / chf.ch) as i32;
    let max_z = ((bounds.max.z - chf.bmin.z) / chf.cs) as i32;

    if max_x < 0 || min_x >= chf.width || max_z < 0 || min_z >= chf.height {
        return;
    }
    let min_x = min_x.max(0);
    let max_x = max_x.min(chf.width - 1);
    let min_z = min_z.max(0);
    let max_z = max_z.min(chf.height - 1);

    for z in min_z..=max_z {
        for x in min_x..=max_x {
            let cell = chf.cell(x, z);
            for si in cell.index as usize..(cell.index + cell.count) as usize {
                let y = chf.spans[si].y as i32;
                if y >= min_y && y <= max_y && chf.areas[si] != NULL_AREA {
                    chf.areas[si] = area_id;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CompactHeightfield, Heightfield, WALKABLE_AREA};
    use glam::Vec3;

    fn flat_chf(w: i32, h: i32) -> CompactHeightfield {
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
        CompactHeightfield::build(&hf, 5, 2).unwrap()
    }

    #[test]
    fn test_erode_strips_boundary() {
        let mut chf = flat_chf(8, 8);
        erode_walkable_area(1, &mut chf);
        // Outermost ring is eroded, the interior survives
        let edge = chf.cell(0, 3).index as usize;
        assert_eq!(chf.areas[edge], NULL_AREA);
        let center = chf.cell(4, 4).index as usize;
        assert_eq!(chf.areas[center], WALKABLE_AREA);
    }

    #[test]
    fn test_erode_radius_swallows_narrow_strip() {
        let mut chf = flat_chf(3, 8);
        erode_walkable_area(2, &mut chf);
        // A 3-cell wide strip cannot fit a radius-2 agent anywhere
        assert!(chf.areas.iter().all(|&a| a == NULL_AREA));
    }

    #[test]
    fn test_mark_box_area() {
        let mut chf = flat_chf(8, 8);
        let zone = BoundingBox::new(Vec3::new(1.0, 0.0, 1.0), Vec3::new(2.0, 1.0, 2.0));
        mark_box_area(&zone, 7, &mut chf);
        let inside = chf.cell(3, 3).index as usize;
        assert_eq!(chf.areas[inside], 7);
        let outside = chf.cell(0, 0).index as usize;
        assert_eq!(chf.areas[outside], WALKABLE_AREA);
    }
}
