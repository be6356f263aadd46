//! Triangle rasterization into the span heightfield

use glam::Vec3;
use tilenav_common::Result;

use crate::{Heightfield, NULL_AREA, SPAN_MAX_HEIGHT, WALKABLE_AREA};

/// Classifies triangles by slope: walkable triangles get [`WALKABLE_AREA`].
///
/// `areas` must hold one entry per triangle and is only written where the
/// triangle is walkable, so pre-marked special areas survive.
pub fn mark_walkable_triangles(
    walkable_slope_angle: f32,
    vertices: &[Vec3],
    indices: &[u32],
    areas: &mut [u8],
) {
    let threshold = walkable_slope_angle.to_radians().cos();
    for (tri, area) in areas.iter_mut().enumerate() {
        let a = vertices[indices[tri * 3] as usize];
        let b = vertices[indices[tri * 3 + 1] as usize];
        let c = vertices[indices[tri * 3 + 2] as usize];
        let normal = (b - a).cross(c - a);
        let len = normal.length();
        if len > f32::EPSILON && normal.y / len > threshold {
            *area = WALKABLE_AREA;
        }
    }
}

/// Rasterizes triangles into the heightfield.
///
/// Each triangle is clipped to the cell columns it overlaps and contributes
/// one span per column; spans merge per [`Heightfield::add_span`] with
/// `walkable_climb` as the area-carry threshold.
pub fn rasterize_triangles(
    vertices: &[Vec3],
    indices: &[u32],
    areas: &[u8],
    heightfield: &mut Heightfield,
    walkable_climb: i32,
) -> Result<()> {
    let num_triangles = indices.len() / 3;
    for tri in 0..num_triangles {
        let v0 = vertices[indices[tri * 3] as usize];
        let v1 = vertices[indices[tri * 3 + 1] as usize];
        let v2 = vertices[indices[tri * 3 + 2] as usize];
        let area = areas.get(tri).copied().unwrap_or(NULL_AREA);
        rasterize_triangle(v0, v1, v2, area, heightfield, walkable_climb)?;
    }
    Ok(())
}

/// Splits a convex polygon along an axis-aligned line.
///
/// Returns the part at or below `offset` on `axis` and the part above it.
fn divide_poly(input: &[Vec3], offset: f32, axis: usize) -> (Vec<Vec3>, Vec<Vec3>) {
    let mut below = Vec::with_capacity(input.len() + 1);
    let mut above = Vec::with_capacity(input.len() + 1);

    let d: Vec<f32> = input.iter().map(|v| offset - v[axis]).collect();
    for i in 0..input.len() {
        let j = (i + input.len() - 1) % input.len();
        let prev_below = d[j] >= 0.0;
        let curr_below = d[i] >= 0.0;
        if prev_below != curr_below {
            let s = d[j] / (d[j] - d[i]);
            let v = input[j] + (input[i] - input[j]) * s;
            below.push(v);
            above.push(v);
            // The current vertex goes to exactly one side unless on the line
            if d[i] > 0.0 {
                below.push(input[i]);
            } else if d[i] < 0.0 {
                above.push(input[i]);
            }
        } else if curr_below {
            below.push(input[i]);
            if d[i] != 0.0 {
                continue;
            }
            above.push(input[i]);
        } else {
            above.push(input[i]);
        }
    }
    (below, above)
}

fn rasterize_triangle(
    v0: Vec3,
    v1: Vec3,
    v2: Vec3,
    area: u8,
    hf: &mut Heightfield,
    walkable_climb: i32,
) -> Result<()> {
    let tri_min = v0.min(v1).min(v2);
    let tri_max = v0.max(v1).max(v2);

    // Cull triangles fully outside the grid
    if tri_max.x < hf.bmin.x
        || tri_min.x > hf.bmax.x
        || tri_max.z < hf.bmin.z
        || tri_min.z > hf.bmax.z
        || tri_max.y < hf.bmin.y
        || tri_min.y > hf.bmax.y
    {
        return Ok(());
    }

    let w = hf.width;
    let h = hf.height;
    let by = hf.bmax.y - hf.bmin.y;
    let cs = hf.cs;
    let ch = hf.ch;
    let ics = 1.0 / cs;
    let ich = 1.0 / ch;

    let z0 = (((tri_min.z - hf.bmin.z) * ics) as i32).clamp(-1, h - 1);
    let z1 = (((tri_max.z - hf.bmin.z) * ics) as i32).clamp(0, h - 1);

    // Clip the triangle into rows, then each row into cells
    let mut rest = vec![v0, v1, v2];
    for z in z0..=z1 {
        if rest.len() < 3 {
            break;
        }
        let row_top = hf.bmin.z + (z + 1) as f32 * cs;
        let (row, next_rest) = divide_poly(&rest, row_top, 2);
        rest = next_rest;
        if row.len() < 3 || z < 0 {
            continue;
        }

        let mut min_x = row[0].x;
        let mut max_x = row[0].x;
        for v in &row[1..] {
            min_x = min_x.min(v.x);
            max_x = max_x.max(v.x);
        }
        let x0 = (((min_x - hf.bmin.x) * ics) as i32).clamp(-1, w - 1);
        let x1 = (((max_x - hf.bmin.x) * ics) as i32).clamp(0, w - 1);

        let mut row_rest = row;
        for x in x0..=x1 {
            if row_rest.len() < 3 {
                break;
            }
            let cell_right = hf.bmin.x + (x + 1) as f32 * cs;
            let (cell, next_row_rest) = divide_poly(&row_rest, cell_right, 0);
            row_rest = next_row_rest;
            if cell.len() < 3 || x < 0 {
                continue;
            }

            let mut span_min = cell[0].y;
            let mut span_max = cell[0].y;
            for v in &cell[1..] {
                span_min = span_min.min(v.y);
                span_max = span_max.max(v.y);
            }
            span_min -= hf.bmin.y;
            span_max -= hf.bmin.y;
            if span_max < 0.0 || span_min > by {
                continue;
            }
            let span_min = span_min.max(0.0);
            let span_max = span_max.min(by);

            let qmin = ((span_min * ich).floor() as i32).clamp(0, SPAN_MAX_HEIGHT as i32) as u16;
            let qmax = ((span_max * ich).ceil() as i32)
                .clamp(qmin as i32 + 1, SPAN_MAX_HEIGHT as i32) as u16;
            hf.add_span(x, z, qmin, qmax, area, walkable_climb)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_quad(size: f32, y: f32) -> (Vec<Vec3>, Vec<u32>) {
        let vertices = vec![
            Vec3::new(0.0, y, 0.0),
            Vec3::new(size, y, 0.0),
            Vec3::new(size, y, size),
            Vec3::new(0.0, y, size),
        ];
        let indices = vec![0, 2, 1, 0, 3, 2];
        (vertices, indices)
    }

    #[test]
    fn test_mark_walkable_triangles() {
        let (vertices, indices) = flat_quad(2.0, 0.0);
        let mut areas = vec![NULL_AREA; 2];
        mark_walkable_triangles(45.0, &vertices, &indices, &mut areas);
        assert_eq!(areas, vec![WALKABLE_AREA; 2]);

        // A vertical wall is never walkable
        let wall = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.0, 2.0, 0.0),
            Vec3::new(2.0, 2.0, 0.0),
        ];
        let mut areas = vec![NULL_AREA; 1];
        mark_walkable_triangles(45.0, &wall, &[0, 1, 2], &mut areas);
        assert_eq!(areas[0], NULL_AREA);
    }

    #[test]
    fn test_rasterize_flat_plane_fills_grid() {
        let (vertices, indices) = flat_quad(4.0, 0.1);
        let mut hf = Heightfield::new(
            8,
            8,
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(4.0, 2.0, 4.0),
            0.5,
            0.1,
        );
        let areas = vec![WALKABLE_AREA; 2];
        rasterize_triangles(&vertices, &indices, &areas, &mut hf, 1).unwrap();

        // Every cell under the quad gets exactly one walkable span
        for z in 0..8 {
            for x in 0..8 {
                let col = hf.column(x, z);
                assert_eq!(col.len(), 1, "column ({x},{z})");
                assert_eq!(col[0].area, WALKABLE_AREA);
            }
        }
    }

    #[test]
    fn test_rasterize_outside_bounds_is_noop() {
        let mut hf = Heightfield::new(
            4,
            4,
            Vec3::ZERO,
            Vec3::new(2.0, 2.0, 2.0),
            0.5,
            0.1,
        );
        let vertices = vec![
            Vec3::new(10.0, 0.0, 10.0),
            Vec3::new(11.0, 0.0, 10.0),
            Vec3::new(10.0, 0.0, 11.0),
        ];
        rasterize_triangles(&vertices, &[0, 1, 2], &[WALKABLE_AREA], &mut hf, 1).unwrap();
        assert_eq!(hf.span_count(), 0);
    }
}
