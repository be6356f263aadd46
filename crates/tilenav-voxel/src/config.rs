//! Configuration for one tile's voxelization pass

use glam::Vec3;
use tilenav_common::{BoundingBox, Error, Result};

/// Region partitioning algorithm selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PartitionType {
    /// Monotone sweep partition; fast, produces long thin regions
    #[default]
    Monotone,
    /// Distance-field watershed partition; slower, preserves concavity
    Watershed,
}

/// Parameters for voxelizing a single tile.
///
/// Dimensions are in cells, heights in cell-height units. The bounds cover
/// the tile expanded by `border_size` cells on every horizontal side so that
/// walkable edges voxelize correctly across tile seams.
#[derive(Debug, Clone)]
pub struct VoxelConfig {
    /// Grid width in cells (tile size + 2 * border)
    pub width: i32,
    /// Grid height (depth) in cells
    pub height: i32,
    /// Cell size (horizontal resolution)
    pub cs: f32,
    /// Cell height (vertical resolution)
    pub ch: f32,
    /// Expanded bounds of the grid
    pub bmin: Vec3,
    pub bmax: Vec3,
    /// Maximum walkable slope in degrees
    pub walkable_slope_angle: f32,
    /// Minimum clearance in cells for a span to be walkable
    pub walkable_height: i32,
    /// Maximum step height in cells
    pub walkable_climb: i32,
    /// Agent radius in cells; also drives the seam border
    pub walkable_radius: i32,
    /// Minimum region area in cells
    pub min_region_area: i32,
    /// Regions below this area are merged into neighbors when possible
    pub merge_region_area: i32,
    /// Border cells around the tile proper
    pub border_size: i32,
    /// Partitioning algorithm
    pub partition: PartitionType,
}

impl VoxelConfig {
    /// Builds the per-tile config from agent metrics and a tile bounding box,
    /// expanding the bounds by the seam border exactly as the tile pipeline
    /// requires: `border = walkable_radius + 3` cells.
    #[allow(clippy::too_many_arguments)]
    pub fn for_tile(
        tile_box: &BoundingBox,
        tile_size: i32,
        cs: f32,
        ch: f32,
        agent_max_slope: f32,
        agent_height: f32,
        agent_max_climb: f32,
        agent_radius: f32,
        min_region_size: f32,
        merge_region_size: f32,
        partition: PartitionType,
    ) -> Self {
        let walkable_radius = (agent_radius / cs).ceil() as i32;
        let border_size = walkable_radius + 3;
        let pad = border_size as f32 * cs;
        let bmin = Vec3::new(tile_box.min.x - pad, tile_box.min.y, tile_box.min.z - pad);
        let bmax = Vec3::new(tile_box.max.x + pad, tile_box.max.y, tile_box.max.z + pad);

        Self {
            width: tile_size + border_size * 2,
            height: tile_size + border_size * 2,
            cs,
            ch,
            bmin,
            bmax,
            walkable_slope_angle: agent_max_slope,
            walkable_height: (agent_height / ch).ceil() as i32,
            walkable_climb: (agent_max_climb / ch).floor() as i32,
            walkable_radius,
            min_region_area: min_region_size.sqrt() as i32,
            merge_region_area: merge_region_size.sqrt() as i32,
            border_size,
            partition,
        }
    }

    /// Validates the configuration parameters.
    pub fn validate(&self) -> Result<()> {
        if self.width <= 0 || self.height <= 0 {
            return Err(Error::InvalidParam("invalid grid size".into()));
        }
        if self.cs <= 0.0 || self.ch <= 0.0 {
            return Err(Error::InvalidParam("invalid cell size or height".into()));
        }
        if !(0.0..=90.0).contains(&self.walkable_slope_angle) {
            return Err(Error::InvalidParam("invalid walkable slope angle".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_tile_border_expansion() {
        let tile_box = BoundingBox::new(Vec3::ZERO, Vec3::new(19.2, 1.0, 19.2));
        let cfg = VoxelConfig::for_tile(
            &tile_box,
            64,
            0.3,
            0.2,
            45.0,
            2.0,
            0.9,
            0.6,
            8.0,
            20.0,
            PartitionType::Monotone,
        );
        // radius 0.6 / cs 0.3 = 2 cells, border = 2 + 3
        assert_eq!(cfg.border_size, 5);
        assert_eq!(cfg.width, 64 + 10);
        assert!((cfg.bmin.x - (-1.5)).abs() < 1e-6);
        assert!((cfg.bmax.z - 20.7).abs() < 1e-6);
        assert!(cfg.validate().is_ok());
    }
}
