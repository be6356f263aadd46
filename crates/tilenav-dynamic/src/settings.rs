//! Build settings for the dynamic navigation mesh

use glam::Vec3;
use tilenav_cache::clamp_max_layers;
use tilenav_voxel::PartitionType;

/// Default obstacle capacity
pub const DEFAULT_MAX_OBSTACLES: u32 = 1024;
/// Default layer cap per tile
pub const DEFAULT_MAX_LAYERS: u32 = 16;

/// Agent metrics and tiling parameters for mesh construction.
#[derive(Debug, Clone)]
pub struct NavBuildSettings {
    /// Voxel cell size (world units)
    pub cell_size: f32,
    /// Voxel cell height (world units)
    pub cell_height: f32,
    /// Tile edge length in cells. 64 is the largest size the tile cache
    /// layer headers can address without truncation.
    pub tile_size: i32,
    /// Agent height (world units)
    pub agent_height: f32,
    /// Agent radius (world units)
    pub agent_radius: f32,
    /// Maximum step height (world units)
    pub agent_max_climb: f32,
    /// Maximum walkable slope (degrees)
    pub agent_max_slope: f32,
    /// Minimum region size before a region is culled
    pub region_min_size: f32,
    /// Regions below this size merge into neighbors
    pub region_merge_size: f32,
    /// Padding added around collected geometry on full builds
    pub padding: Vec3,
    /// Region partitioning algorithm
    pub partition: PartitionType,
    /// Maximum simultaneous obstacles
    pub max_obstacles: u32,
    /// Maximum layers per tile (clamped to 3..=255)
    max_layers: u32,
}

impl Default for NavBuildSettings {
    fn default() -> Self {
        Self {
            cell_size: 0.3,
            cell_height: 0.2,
            tile_size: 64,
            agent_height: 2.0,
            agent_radius: 0.6,
            agent_max_climb: 0.9,
            agent_max_slope: 45.0,
            region_min_size: 8.0,
            region_merge_size: 20.0,
            padding: Vec3::ONE,
            partition: PartitionType::Monotone,
            max_obstacles: DEFAULT_MAX_OBSTACLES,
            max_layers: DEFAULT_MAX_LAYERS,
        }
    }
}

impl NavBuildSettings {
    /// Maximum layers per tile.
    pub fn max_layers(&self) -> u32 {
        self.max_layers
    }

    /// Sets the layer cap, clamped to the supported range.
    pub fn set_max_layers(&mut self, max_layers: u32) {
        self.max_layers = clamp_max_layers(max_layers);
    }

    /// World-space edge length of one tile.
    pub fn tile_edge_length(&self) -> f32 {
        self.tile_size as f32 * self.cell_size
    }
}

/// Bound on the obstacle-queue backpressure loop.
///
/// Each spin advances the cache by one update step. The cap turns a stuck
/// queue into a logged registration failure instead of a livelock.
#[derive(Debug, Clone, Copy)]
pub struct ObstacleWaitPolicy {
    pub max_spins: u32,
}

impl Default for ObstacleWaitPolicy {
    fn default() -> Self {
        Self { max_spins: 128 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_layers_clamped() {
        let mut settings = NavBuildSettings::default();
        settings.set_max_layers(1);
        assert_eq!(settings.max_layers(), 3);
        settings.set_max_layers(400);
        assert_eq!(settings.max_layers(), 255);
        settings.set_max_layers(16);
        assert_eq!(settings.max_layers(), 16);
    }

    #[test]
    fn test_tile_edge_length() {
        let settings = NavBuildSettings::default();
        assert!((settings.tile_edge_length() - 19.2).abs() < 1e-6);
    }
}
