//! Per-tile build pipeline and its transient scratch data

use glam::Affine3A;
use tilenav_cache::{build_tile_cache_layer, TileCacheLayerHeader, TileCompressor};
use tilenav_common::{BoundingBox, Error, Result};
use tilenav_voxel::{
    build_distance_field, build_regions_monotone, build_regions_watershed, erode_walkable_area,
    mark_box_area, mark_walkable_triangles, rasterize_triangles, CompactHeightfield, Heightfield,
    HeightfieldLayerSet, LinearAllocator, PartitionType, VoxelConfig, NULL_AREA,
};

use crate::{AreaVolume, GeometryCollector, NavBuildSettings};

/// Transient per-tile build input: geometry gathered for the expanded tile
/// region, transformed into mesh-local space. Created at the start of one
/// tile's build and dropped at the end.
#[derive(Debug, Default)]
pub struct NavBuildData {
    /// World-space bounds geometry was collected for
    pub world_bounds: BoundingBox,
    /// Triangle vertices in mesh-local space
    pub vertices: Vec<glam::Vec3>,
    /// Triangle indices
    pub indices: Vec<u32>,
    /// Area volumes with mesh-local bounds
    pub area_volumes: Vec<AreaVolume>,
}

impl NavBuildData {
    /// Collects geometry for `world_bounds` and transforms it into local
    /// space with `inverse`.
    pub fn collect(
        collector: &dyn GeometryCollector,
        world_bounds: BoundingBox,
        inverse: &Affine3A,
    ) -> Self {
        let geometry = collector.collect(&world_bounds);
        Self {
            world_bounds,
            vertices: geometry
                .vertices
                .iter()
                .map(|&v| inverse.transform_point3(v))
                .collect(),
            indices: geometry.indices,
            area_volumes: geometry
                .area_volumes
                .iter()
                .map(|v| AreaVolume {
                    bounds: v.bounds.transformed(inverse),
                    area_id: v.area_id,
                })
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() || self.indices.is_empty()
    }
}

/// Builds the compressed layer blobs for one tile coordinate.
///
/// Runs the full voxelization pipeline over the tile's expanded bounds:
/// rasterization, walkability filters, compact heightfield, erosion,
/// area-volume painting, region partitioning and layer decomposition, then
/// serializes each layer through the compressor. An empty tile yields an
/// empty vector and is not an error; any pipeline failure aborts just this
/// tile.
#[allow(clippy::too_many_arguments)]
pub fn build_tile_layers(
    settings: &NavBuildSettings,
    tile_box_local: &BoundingBox,
    x: i32,
    z: i32,
    collector: &dyn GeometryCollector,
    transform: &Affine3A,
    arena: &mut LinearAllocator,
    compressor: &dyn TileCompressor,
) -> Result<Vec<Vec<u8>>> {
    arena.reset();

    let cfg = VoxelConfig::for_tile(
        tile_box_local,
        settings.tile_size,
        settings.cell_size,
        settings.cell_height,
        settings.agent_max_slope,
        settings.agent_height,
        settings.agent_max_climb,
        settings.agent_radius,
        settings.region_min_size,
        settings.region_merge_size,
        settings.partition,
    );
    cfg.validate()?;

    let expanded_local = BoundingBox::new(cfg.bmin, cfg.bmax);
    let inverse = transform.inverse();
    let build = NavBuildData::collect(
        collector,
        expanded_local.transformed(transform),
        &inverse,
    );
    if build.is_empty() {
        return Ok(Vec::new());
    }

    let mut heightfield = Heightfield::new(
        cfg.width,
        cfg.height,
        cfg.bmin,
        cfg.bmax,
        cfg.cs,
        cfg.ch,
    );

    let num_triangles = build.indices.len() / 3;
    let mut tri_areas = vec![NULL_AREA; num_triangles];
    mark_walkable_triangles(
        cfg.walkable_slope_angle,
        &build.vertices,
        &build.indices,
        &mut tri_areas,
    );
    rasterize_triangles(
        &build.vertices,
        &build.indices,
        &tri_areas,
        &mut heightfield,
        cfg.walkable_climb,
    )
    .map_err(|e| {
        log::error!("Could not rasterize tile ({x}, {z}): {e}");
        e
    })?;

    heightfield.filter_low_hanging_walkable_obstacles(cfg.walkable_climb);
    heightfield.filter_ledge_spans(cfg.walkable_height, cfg.walkable_climb);
    heightfield.filter_walkable_low_height_spans(cfg.walkable_height);

    let mut chf = CompactHeightfield::build(&heightfield, cfg.walkable_height, cfg.walkable_climb)
        .map_err(|e| {
            log::error!("Could not build compact heightfield for tile ({x}, {z}): {e}");
            e
        })?;
    erode_walkable_area(cfg.walkable_radius, &mut chf);

    for volume in &build.area_volumes {
        mark_box_area(&volume.bounds, volume.area_id, &mut chf);
    }

    match cfg.partition {
        PartitionType::Watershed => {
            build_distance_field(&mut chf);
            build_regions_watershed(
                &mut chf,
                cfg.border_size,
                cfg.min_region_area,
                cfg.merge_region_area,
            )
        }
        PartitionType::Monotone => build_regions_monotone(
            &mut chf,
            cfg.border_size,
            cfg.min_region_area,
            cfg.merge_region_area,
        ),
    }
    .map_err(|e| {
        log::error!("Could not build regions for tile ({x}, {z}): {e}");
        e
    })?;

    let layer_set = HeightfieldLayerSet::build(&chf, cfg.border_size, cfg.walkable_height)
        .map_err(|e| {
            log::error!("Could not build heightfield layers for tile ({x}, {z}): {e}");
            e
        })?;

    let mut blobs = Vec::with_capacity(layer_set.layers.len());
    for (i, layer) in layer_set.layers.iter().enumerate() {
        let mut header = TileCacheLayerHeader::new(x, z, i as i32);
        header.bmin = layer.bmin;
        header.bmax = layer.bmax;
        header.hmin = layer.hmin;
        header.hmax = layer.hmax;
        header.width = layer.width as u8;
        header.height = layer.height as u8;
        header.minx = layer.minx as u8;
        header.maxx = layer.maxx as u8;
        header.miny = layer.miny as u8;
        header.maxy = layer.maxy as u8;

        let blob = build_tile_cache_layer(
            compressor,
            &header,
            &layer.heights,
            &layer.areas,
            &layer.cons,
            arena,
        )
        .map_err(|e| {
            log::error!("Failed to serialize tile cache layer {i} for tile ({x}, {z}): {e}");
            Error::Build(format!("layer serialization failed for tile ({x}, {z})"))
        })?;
        blobs.push(blob);
    }

    Ok(blobs)
}
