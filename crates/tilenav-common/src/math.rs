//! Small numeric helpers used across the navigation crates

use glam::Vec3;

/// Rounds `value` up to the next power of two. Zero rounds to 1.
pub fn next_power_of_two(value: u32) -> u32 {
    let mut v = value.wrapping_sub(1);
    v |= v >> 1;
    v |= v >> 2;
    v |= v >> 4;
    v |= v >> 8;
    v |= v >> 16;
    v.wrapping_add(1).max(1)
}

/// Returns floor(log2(value)); 0 for inputs below 2.
pub fn ilog2(value: u32) -> u32 {
    if value < 2 { 0 } else { 31 - value.leading_zeros() }
}

/// Calculates the grid size in cells covering the XZ extent of an AABB.
pub fn calc_grid_size(bmin: Vec3, bmax: Vec3, cell_size: f32) -> (i32, i32) {
    let w = ((bmax.x - bmin.x) / cell_size + 0.5) as i32;
    let h = ((bmax.z - bmin.z) / cell_size + 0.5) as i32;
    (w, h)
}
