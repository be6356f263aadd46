//! Distance-field watershed region partitioning
//!
//! Slower than the monotone sweep but preserves concave region shapes.

use tilenav_common::Result;

use crate::region::{filter_small_regions, paint_rect_region};
use crate::{CompactHeightfield, BORDER_REG, NULL_AREA};

/// Builds the boundary distance field over the walkable spans.
///
/// Two chamfer passes (cost 2 straight, 3 diagonal) seeded at area
/// boundaries, followed by a box blur. Stores the result in `chf.dist` and
/// `chf.max_distance`.
pub fn build_distance_field(chf: &mut CompactHeightfield) {
    let w = chf.width;
    let h = chf.height;
    let mut dist = vec![u16::MAX; chf.span_count()];

    // Seed at area boundaries
    for z in 0..h {
        for x in 0..w {
            let cell = chf.cell(x, z);
            for si in cell.index as usize..(cell.index + cell.count) as usize {
                let span = chf.spans[si];
                let area = chf.areas[si];
                let mut matching = 0;
                for dir in 0..4 {
                    if let Some(ni) = chf.connected_span_index(&span, x, z, dir) {
                        if chf.areas[ni] == area {
                            matching += 1;
                        }
                    }
                }
                if matching != 4 {
                    dist[si] = 0;
                }
            }
        }
    }

    let relax = |dist: &mut Vec<u16>, si: usize, from: usize, cost: u16| {
        let nd = dist[from].saturating_add(cost);
        if nd < dist[si] {
            dist[si] = nd;
        }
    };

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

    // Box blur smooths basin boundaries
    let mut blurred = dist.clone();
    for z in 0..h {
        for x in 0..w {
            let cell = chf.cell(x, z);
            for si in cell.index as usize..(cell.index + cell.count) as usize {
                let cd = dist[si];
                if cd <= 2 {
                    continue;
                }
                let span = chf.spans[si];
                let mut total = cd as u32;
                for dir in 0..4 {
                    if let Some(ai) = chf.connected_span_index(&span, x, z, dir) {
                        total += dist[ai] as u32;
                        let aspan = chf.spans[ai];
                        let ddir = (dir + 1) & 3;
                        let ax = x + crate::DIR_OFFSET_X[dir];
                        let az = z + crate::DIR_OFFSET_Z[dir];
                        if let Some(aai) = chf.connected_span_index(&aspan, ax, az, ddir) {
                            total += dist[aai] as u32;
                        } else {
                            total += cd as u32;
                        }
                    } else {
                        total += cd as u32 * 2;
                    }
                }
                blurred[si] = ((total + 5) / 9) as u16;
            }
        }
    }

    chf.max_distance = blurred.iter().copied().max().unwrap_or(0);
    chf.dist = blurred;
}

fn flood_region(
    seed: (i32, i32, usize),
    level: u16,
    region_id: u16,
    chf: &CompactHeightfield,
    src_reg: &mut [u16],
    src_dist: &mut [u16],
) -> bool {
    let area = chf.areas[seed.2];
    let lev = level.saturating_sub(2);
    let mut stack = vec![seed];
    src_reg[seed.2] = region_id;
    src_dist[seed.2] = 0;
    let mut count = 0usize;

    while let Some((cx, cz, ci)) = stack.pop() {
        let span = chf.spans[ci];

        // Abandon cells already bordering another region
        let mut adjacent = 0u16;
        for dir in 0..4 {
            if let Some(ai) = chf.connected_span_index(&span, cx, cz, dir) {
                if chf.areas[ai] != area {
                    continue;
                }
                let nr = src_reg[ai];
                if (nr & BORDER_REG) != 0 {
                    continue;
                }
                if nr != 0 && nr != region_id {
                    adjacent = nr;
                    break;
                }
                let aspan = chf.spans[ai];
                let ddir = (dir + 1) & 3;
                let ax = cx + crate::DIR_OFFSET_X[dir];
                let az = cz + crate::DIR_OFFSET_Z[dir];
                if let Some(aai) = chf.connected_span_index(&aspan, ax, az, ddir) {
                    if chf.areas[aai] == area {
                        let nr2 = src_reg[aai];
                        if nr2 != 0 && nr2 != region_id && (nr2 & BORDER_REG) == 0 {
                            adjacent = nr2;
                            break;
                        }
                    }
                }
            }
        }
        if adjacent != 0 {
            src_reg[ci] = 0;
            continue;
        }
        count += 1;

        for dir in 0..4 {
            let nx = cx + crate::DIR_OFFSET_X[dir];
            let nz = cz + crate::DIR_OFFSET_Z[dir];
            if let Some(ai) = chf.connected_span_index(&span, cx, cz, dir) {
                if chf.areas[ai] == area && chf.dist[ai] >= lev && src_reg[ai] == 0 {
                    src_reg[ai] = region_id;
                    src_dist[ai] = 0;
                    stack.push((nx, nz, ai));
                }
            }
        }
    }

    count > 0
}

fn expand_regions(
    max_iter: i32,
    level: u16,
    chf: &CompactHeightfield,
    src_reg: &mut [u16],
    src_dist: &mut [u16],
) {
    let w = chf.width;
    let h = chf.height;

    // Spans still unassigned at this water level
    let mut stack: Vec<(i32, i32, usize)> = Vec::new();
    for z in 0..h {
        for x in 0..w {
            let cell = chf.cell(x, z);
            for si in cell.index as usize..(cell.index + cell.count) as usize {
                if chf.dist[si] >= level && src_reg[si] == 0 && chf.areas[si] != NULL_AREA {
                    stack.push((x, z, si));
                }
            }
        }
    }

    let mut iter = 0;
    while !stack.is_empty() {
        let mut failed = 0;
        let mut dirty: Vec<(usize, u16, u16)> = Vec::new();

        for entry in stack.iter_mut() {
            let (x, z, si) = *entry;
            if si == usize::MAX {
                failed += 1;
                continue;
            }
            let span = chf.spans[si];
            let mut best_reg = 0u16;
            let mut best_dist = u16::MAX;
            for dir in 0..4 {
                if let Some(ai) = chf.connected_span_index(&span, x, z, dir) {
                    if chf.areas[ai] != chf.areas[si] {
                        continue;
                    }
                    let nr = src_reg[ai];
                    if nr > 0 && (nr & BORDER_REG) == 0 && src_dist[ai].saturating_add(2) < best_dist
                    {
                        best_reg = nr;
                        best_dist = src_dist[ai].saturating_add(2);
                    }
                }
            }
            if best_reg != 0 {
                dirty.push((si, best_reg, best_dist));
                entry.2 = usize::MAX;
            } else {
                failed += 1;
            }
        }

        for (si, reg, dist) in dirty {
            src_reg[si] = reg;
            src_dist[si] = dist;
        }

        if failed == stack.len() {
            break;
        }
        if level > 0 {
            iter += 1;
            if iter >= max_iter {
                break;
            }
        }
    }
}

/// Partitions the walkable area into regions by flooding the distance field
/// from its peaks downward. Requires [`build_distance_field`] to have run.
pub fn build_regions_watershed(
    chf: &mut CompactHeightfield,
    border_size: i32,
    min_region_area: i32,
    merge_region_area: i32,
) -> Result<()> {
    let w = chf.width;
    let h = chf.height;
    let mut src_reg = vec![0u16; chf.span_count()];
    let mut src_dist = vec![0u16; chf.span_count()];
    let mut id: u16 = 1;

    if border_size > 0 {
        let bw = w.min(border_size);
        let bh = h.min(border_size);
        paint_rect_region(0, bw, 0, h, id | BORDER_REG, chf, &mut src_reg);
        id += 1;
        paint_rect_region(w - bw, w, 0, h, id | BORDER_REG, chf, &mut src_reg);
        id += 1;
        paint_rect_region(0, w, 0, bh, id | BORDER_REG, chf, &mut src_reg);
        id += 1;
        paint_rect_region(0, w, h - bh, h, id | BORDER_REG, chf, &mut src_reg);
        id += 1;
    }
    chf.border_size = border_size;

    let mut level = (chf.max_distance + 1) & !1u16;
    while level > 0 {
        level = level.saturating_sub(2);

        expand_regions(8, level, chf, &mut src_reg, &mut src_dist);

        // New basins appear where unassigned spans surface at this level
        for z in border_size..h - border_size {
            for x in border_size..w - border_size {
                let cell = chf.cell(x, z);
                for si in cell.index as usize..(cell.index + cell.count) as usize {
                    if chf.dist[si] >= level
                        && src_reg[si] == 0
                        && chf.areas[si] != NULL_AREA
                        && flood_region((x, z, si), level, id, chf, &mut src_reg, &mut src_dist)
                    {
                        id += 1;
                    }
                }
            }
        }
    }

    expand_regions(64, 0, chf, &mut src_reg, &mut src_dist);

    filter_small_regions(chf, &mut src_reg, id, min_region_area, merge_region_area);

    chf.max_regions = id;
    for (span, reg) in chf.spans.iter_mut().zip(src_reg) {
        span.reg = reg;
    }
    Ok(())
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
    fn test_distance_field_peaks_inside() {
        let mut chf = flat_chf(9, 9);
        build_distance_field(&mut chf);
        assert!(chf.max_distance > 0);
        let edge = chf.cell(0, 4).index as usize;
        let center = chf.cell(4, 4).index as usize;
        assert_eq!(chf.dist[edge], 0);
        assert!(chf.dist[center] > chf.dist[edge]);
    }

    #[test]
    fn test_watershed_covers_walkable_spans() {
        let mut chf = flat_chf(9, 9);
        build_distance_field(&mut chf);
        build_regions_watershed(&mut chf, 0, 2, 10).unwrap();
        assert!(chf.spans.iter().all(|s| s.reg != 0));
    }
}
