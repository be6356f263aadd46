//! Monotone region partitioning of the compact heightfield

use tilenav_common::Result;

use crate::{CompactHeightfield, BORDER_REG, NULL_AREA};

const NULL_NEI: u16 = 0xffff;

#[derive(Debug, Clone, Copy, Default)]
struct SweepSpan {
    /// Samples merged from the neighbor row
    ns: u16,
    /// Final region id
    id: u16,
    /// Candidate neighbor region from the previous row
    nei: u16,
}

pub(crate) fn paint_rect_region(
    min_x: i32,
    max_x: i32,
    min_z: i32,
    max_z: i32,
    region_id: u16,
    chf: &CompactHeightfield,
    src_reg: &mut [u16],
) {
    for z in min_z..max_z {
        for x in min_x..max_x {
            let cell = chf.cell(x, z);
            for si in cell.index as usize..(cell.index + cell.count) as usize {
                if chf.areas[si] != NULL_AREA {
                    src_reg[si] = region_id;
                }
            }
        }
    }
}

/// Removes isolated regions below `min_region_area` and merges regions below
/// `merge_region_area` into an adjacent region where one exists.
pub(crate) fn filter_small_regions(
    chf: &CompactHeightfield,
    src_reg: &mut [u16],
    num_regions: u16,
    min_region_area: i32,
    merge_region_area: i32,
) {
    let nreg = num_regions as usize;
    let mut sizes = vec![0i32; nreg];
    let mut neighbors: Vec<Vec<u16>> = vec![Vec::new(); nreg];

    for z in 0..chf.height {
        for x in 0..chf.width {
            let cell = chf.cell(x, z);
            for si in cell.index as usize..(cell.index + cell.count) as usize {
                let r = src_reg[si];
                if r == 0 || (r & BORDER_REG) != 0 || (r as usize) >= nreg {
                    continue;
                }
                sizes[r as usize] += 1;
                let span = chf.spans[si];
                for dir in 0..4 {
                    if let Some(ni) = chf.connected_span_index(&span, x, z, dir) {
                        let nr = src_reg[ni];
                        if nr != 0
                            && nr != r
                            && (nr & BORDER_REG) == 0
                            && (nr as usize) < nreg
                            && !neighbors[r as usize].contains(&nr)
                        {
                            neighbors[r as usize].push(nr);
                        }
                    }
                }
            }
        }
    }

    let mut remap: Vec<u16> = (0..nreg as u16).collect();
    let resolve = |remap: &[u16], mut r: u16| {
        while remap[r as usize] != r {
            r = remap[r as usize];
        }
        r
    };

    // Isolated specks below the minimum area disappear entirely
    for r in 1..nreg {
        if sizes[r] > 0 && sizes[r] < min_region_area && neighbors[r].is_empty() {
            remap[r] = 0;
            sizes[r] = 0;
        }
    }

    // Undersized regions fold into the first live neighbor
    for r in 1..nreg {
        if sizes[r] == 0 || sizes[r] >= merge_region_area.max(min_region_area) {
            continue;
        }
        let target = neighbors[r]
            .iter()
            .map(|&n| resolve(&remap, n))
            .find(|&n| n != 0 && n != r as u16 && sizes[n as usize] > 0);
        if let Some(t) = target {
            remap[r] = t;
            sizes[t as usize] += sizes[r];
            sizes[r] = 0;
        } else if sizes[r] < min_region_area {
            remap[r] = 0;
            sizes[r] = 0;
        }
    }

    for reg in src_reg.iter_mut() {
        if *reg != 0 && (*reg & BORDER_REG) == 0 && (*reg as usize) < nreg {
            *reg = resolve(&remap, *reg);
        }
    }
}

/// Partitions the walkable area into regions with a monotone row sweep.
///
/// Fast and deterministic; regions are monotone in the sweep axis which can
/// produce long slivers on concave layouts. Border cells get ids flagged
/// with [`BORDER_REG`].
pub fn build_regions_monotone(
    chf: &mut CompactHeightfield,
    border_size: i32,
    min_region_area: i32,
    merge_region_area: i32,
) -> Result<()> {
    let w = chf.width;
    let h = chf.height;
    let mut src_reg = vec![0u16; chf.span_count()];
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

    let mut sweeps: Vec<SweepSpan> = Vec::new();
    let mut prev_counts: Vec<i32> = Vec::new();

    for z in border_size..h - border_size {
        prev_counts.clear();
        prev_counts.resize(id as usize + 1, 0);
        sweeps.clear();
        sweeps.push(SweepSpan::default()); // index 0 unused

        for x in border_size..w - border_size {
            let cell = chf.cell(x, z);
            for si in cell.index as usize..(cell.index + cell.count) as usize {
                if chf.areas[si] == NULL_AREA {
                    continue;
                }
                let span = chf.spans[si];

                // Continue the sweep region from the west neighbor
                let mut previd: u16 = 0;
                if let Some(ai) = chf.connected_span_index(&span, x, z, 0) {
                    let nr = src_reg[ai];
                    if nr != 0 && (nr & BORDER_REG) == 0 && chf.areas[si] == chf.areas[ai] {
                        previd = nr;
                    }
                }
                if previd == 0 {
                    previd = sweeps.len() as u16;
                    sweeps.push(SweepSpan::default());
                }

                // Vote on the region from the previous row
                if let Some(ai) = chf.connected_span_index(&span, x, z, 3) {
                    let nr = src_reg[ai];
                    if nr != 0 && (nr & BORDER_REG) == 0 && chf.areas[si] == chf.areas[ai] {
                        let sweep = &mut sweeps[previd as usize];
                        if sweep.nei == 0 || sweep.nei == nr {
                            sweep.nei = nr;
                            sweep.ns += 1;
                            prev_counts[nr as usize] += 1;
                        } else {
                            sweep.nei = NULL_NEI;
                        }
                    }
                }

                src_reg[si] = previd;
            }
        }

        // A sweep adopts the previous row's id only when the vote is unanimous
        for sweep in sweeps.iter_mut().skip(1) {
            if sweep.nei != NULL_NEI
                && sweep.nei != 0
                && prev_counts[sweep.nei as usize] == sweep.ns as i32
            {
                sweep.id = sweep.nei;
            } else {
                sweep.id = id;
                id += 1;
            }
        }

        for x in border_size..w - border_size {
            let cell = chf.cell(x, z);
            for si in cell.index as usize..(cell.index + cell.count) as usize {
                let r = src_reg[si] as usize;
                if r > 0 && r < sweeps.len() {
                    src_reg[si] = sweeps[r].id;
                }
            }
        }
    }

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
    use crate::{Heightfield, CompactHeightfield, WALKABLE_AREA};
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
    fn test_flat_grid_single_region() {
        let mut chf = flat_chf(8, 8);
        build_regions_monotone(&mut chf, 0, 4, 10).unwrap();
        let first = chf.spans[0].reg;
        assert_ne!(first, 0);
        assert!(chf.spans.iter().all(|s| s.reg == first));
    }

    #[test]
    fn test_border_cells_flagged() {
        let mut chf = flat_chf(10, 10);
        build_regions_monotone(&mut chf, 2, 4, 10).unwrap();
        let border_span = chf.spans[chf.cell(0, 5).index as usize];
        assert_ne!(border_span.reg & BORDER_REG, 0);
        let inner_span = chf.spans[chf.cell(5, 5).index as usize];
        assert_eq!(inner_span.reg & BORDER_REG, 0);
        assert_ne!(inner_span.reg, 0);
    }

    #[test]
    fn test_separated_islands_get_distinct_regions() {
        // Two columns of walkable cells separated by an unwalkable gap
        let mut hf = Heightfield::new(
            7,
            4,
            Vec3::ZERO,
            Vec3::new(3.5, 2.0, 2.0),
            0.5,
            0.1,
        );
        for z in 0..4 {
            for x in [0, 1, 5, 6] {
                hf.add_span(x, z, 0, 1, WALKABLE_AREA, 1).unwrap();
            }
        }
        let mut chf = CompactHeightfield::build(&hf, 5, 2).unwrap();
        build_regions_monotone(&mut chf, 0, 1, 1).unwrap();

        let left = chf.spans[chf.cell(0, 0).index as usize].reg;
        let right = chf.spans[chf.cell(5, 0).index as usize].reg;
        assert_ne!(left, 0);
        assert_ne!(right, 0);
        assert_ne!(left, right);
    }
}
