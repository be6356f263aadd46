//! Dynamic navigation mesh orchestrator
//!
//! Owns the persistent navigation mesh and the compressed tile cache,
//! drives full and partial rebuilds through the voxelization pipeline, and
//! manages the obstacle lifecycle. All public operations report failure as
//! a logged message plus a false/empty return.

use glam::{Affine3A, Vec3};
use tilenav_cache::{
    CompressedTileRef, Lz4Compressor, MeshProcess, ObstacleRef, TileBuildArgs, TileCache,
    TileCacheBuildConfig, TileCacheBuilder, TileCacheLayerHeader, TileCacheParams,
    LAYER_HEADER_SIZE,
};
use tilenav_common::{
    calc_grid_size, ilog2, next_power_of_two, BoundingBox, ByteReader, ByteWriter, Error, Result,
};
use tilenav_mesh::{NavMesh, NavMeshParams, OffMeshLink, POLY_FLAG_WALK, TILE_POLY_BITS};
use tilenav_voxel::{LinearAllocator, NULL_AREA};

use crate::build_data::build_tile_layers;
use crate::settings::{NavBuildSettings, ObstacleWaitPolicy};
use crate::traits::{EventSink, GeometryCollector, NavigationEvent, NullEventSink, TransformProvider};

/// Magic number for whole-mesh snapshots ('DNAV')
const SNAPSHOT_MAGIC: u32 = 0x44_4E_41_56;
/// Snapshot format version
const SNAPSHOT_VERSION: u32 = 1;

/// Starting arena capacity for per-tile build scratch
const ARENA_INITIAL_CAPACITY: usize = 32_000;

/// Handle to an obstacle registered with the mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObstacleId(usize);

/// World-space description of a cylinder obstacle.
#[derive(Debug, Clone)]
pub struct ObstacleDesc {
    pub position: Vec3,
    pub radius: f32,
    pub height: f32,
}

/// Off-mesh connection registered with the mesh (world-space endpoints).
#[derive(Debug, Clone)]
pub struct OffMeshConnection {
    pub start: Vec3,
    pub end: Vec3,
    pub radius: f32,
    /// Traversal flag mask published on the portal
    pub mask: u16,
    pub area_id: u8,
    pub bidirectional: bool,
    pub enabled: bool,
}

#[derive(Debug, Clone)]
struct ObstacleEntry {
    desc: ObstacleDesc,
    enabled: bool,
    cache_ref: ObstacleRef,
}

/// Injects off-mesh connections and flag overrides into freshly built tiles.
struct ConnectionProcessor<'a> {
    connections: &'a [OffMeshConnection],
    inverse: Affine3A,
}

impl MeshProcess for ConnectionProcessor<'_> {
    fn process(&mut self, args: &mut TileBuildArgs) {
        // Walkable areas get the uniform walkable flag
        for (flags, &area) in args.poly_flags.iter_mut().zip(args.poly_areas.iter()) {
            if area != NULL_AREA {
                *flags = POLY_FLAG_WALK;
            }
        }

        for connection in self.connections.iter().filter(|c| c.enabled) {
            let start = self.inverse.transform_point3(connection.start);
            let end = self.inverse.transform_point3(connection.end);
            let reach = args.bounds.padded(Vec3::splat(connection.radius));
            if reach.contains_point(start) || reach.contains_point(end) {
                args.off_mesh_links.push(OffMeshLink {
                    start,
                    end,
                    radius: connection.radius,
                    flags: connection.mask,
                    area: connection.area_id,
                    bidirectional: connection.bidirectional,
                });
            }
        }
    }
}

/// Dynamic tiled navigation mesh.
///
/// Compressed layer blobs in the tile cache are the source of truth; the
/// polygon tiles of the navigation mesh are derived from them and rebuilt
/// whenever obstacles or geometry change.
pub struct DynamicNavMesh {
    settings: NavBuildSettings,
    wait_policy: ObstacleWaitPolicy,
    enabled: bool,
    /// Mesh bounds in local (anchor) space
    bounding_box: BoundingBox,
    num_tiles_x: i32,
    num_tiles_z: i32,
    nav_mesh: Option<NavMesh>,
    tile_cache: Option<TileCache>,
    builder: Option<TileCacheBuilder>,
    arena: LinearAllocator,
    anchor: Option<(Affine3A, Affine3A)>,
    obstacles: Vec<Option<ObstacleEntry>>,
    connections: Vec<OffMeshConnection>,
    events: Box<dyn EventSink>,
}

impl DynamicNavMesh {
    pub fn new(settings: NavBuildSettings) -> Self {
        Self {
            settings,
            wait_policy: ObstacleWaitPolicy::default(),
            enabled: true,
            bounding_box: BoundingBox::UNDEFINED,
            num_tiles_x: 0,
            num_tiles_z: 0,
            nav_mesh: None,
            tile_cache: None,
            builder: None,
            arena: LinearAllocator::new(ARENA_INITIAL_CAPACITY),
            anchor: None,
            obstacles: Vec::new(),
            connections: Vec::new(),
            events: Box::new(NullEventSink),
        }
    }

    /// Replaces the notification sink.
    pub fn set_event_sink(&mut self, sink: Box<dyn EventSink>) {
        self.events = sink;
    }

    /// Configures the obstacle-queue backpressure bound.
    pub fn set_wait_policy(&mut self, policy: ObstacleWaitPolicy) {
        self.wait_policy = policy;
    }

    /// Enables or disables periodic cache updates.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn settings(&self) -> &NavBuildSettings {
        &self.settings
    }

    /// Captures the owning spatial anchor. Operations that need a transform
    /// fail until this has been called.
    pub fn set_anchor(&mut self, provider: &dyn TransformProvider) {
        let scale = provider.world_scale();
        if (scale - Vec3::ONE).abs().max_element() > 1e-4 {
            log::warn!("Navigation mesh anchor has scaling; agent parameters may not work as intended");
        }
        let transform = provider.world_transform();
        self.anchor = Some((transform, transform.inverse()));
    }

    /// Grid dimensions in tiles.
    pub fn num_tiles(&self) -> (i32, i32) {
        (self.num_tiles_x, self.num_tiles_z)
    }

    /// Mesh bounds in local space.
    pub fn bounding_box(&self) -> &BoundingBox {
        &self.bounding_box
    }

    /// The persistent navigation mesh, if built.
    pub fn nav_mesh(&self) -> Option<&NavMesh> {
        self.nav_mesh.as_ref()
    }

    /// The compressed tile cache, if built.
    pub fn tile_cache(&self) -> Option<&TileCache> {
        self.tile_cache.as_ref()
    }

    /// World-space bounding box of a tile footprint.
    pub fn tile_bounding_box(&self, tile: (i32, i32)) -> BoundingBox {
        let local = self.tile_bounding_box_local(tile.0, tile.1);
        match &self.anchor {
            Some((transform, _)) => local.transformed(transform),
            None => local,
        }
    }

    fn tile_bounding_box_local(&self, x: i32, z: i32) -> BoundingBox {
        let edge = self.settings.tile_edge_length();
        let min = self.bounding_box.min;
        BoundingBox::new(
            Vec3::new(min.x + x as f32 * edge, min.y, min.z + z as f32 * edge),
            Vec3::new(
                min.x + (x + 1) as f32 * edge,
                self.bounding_box.max.y,
                min.z + (z + 1) as f32 * edge,
            ),
        )
    }

    // ------------------------------------------------------------------
    // Allocation and builds
    // ------------------------------------------------------------------

    /// Allocates an empty mesh over `world_bounds` with room for `max_tiles`
    /// tiles (rounded up to the next power of two). Re-adds every enabled
    /// obstacle and emits a mesh-rebuilt notification on success.
    pub fn allocate(&mut self, world_bounds: BoundingBox, max_tiles: u32) -> bool {
        self.release_navigation_mesh();

        let Some((_, inverse)) = self.anchor else {
            log::error!("Cannot allocate navigation mesh without a spatial anchor");
            return false;
        };
        self.bounding_box = world_bounds.transformed(&inverse);
        let max_tiles = next_power_of_two(max_tiles.max(1));

        let (grid_w, grid_h) = calc_grid_size(
            self.bounding_box.min,
            self.bounding_box.max,
            self.settings.cell_size,
        );
        self.num_tiles_x = (grid_w + self.settings.tile_size - 1) / self.settings.tile_size;
        self.num_tiles_z = (grid_h + self.settings.tile_size - 1) / self.settings.tile_size;

        if let Err(e) = self.init_mesh_and_cache(max_tiles) {
            log::error!("Could not allocate navigation mesh: {e}");
            self.release_navigation_mesh();
            return false;
        }
        log::debug!("Allocated empty navigation mesh with max {max_tiles} tiles");

        self.readd_obstacles();
        self.events.notify(NavigationEvent::MeshRebuilt);
        true
    }

    /// Full rebuild: collects all geometry, derives bounds (plus padding),
    /// builds every tile in row-major order and merges the result.
    ///
    /// Returns true with no work when the collector yields nothing.
    pub fn build(&mut self, collector: &dyn GeometryCollector) -> bool {
        self.release_navigation_mesh();

        let Some((_, inverse)) = self.anchor else {
            log::error!("Cannot build navigation mesh without a spatial anchor");
            return false;
        };

        let everything = BoundingBox::new(
            Vec3::splat(f32::NEG_INFINITY),
            Vec3::splat(f32::INFINITY),
        );
        let geometry = collector.collect(&everything);
        if geometry.is_empty() {
            return true; // Nothing to do
        }

        let mut bounds = BoundingBox::UNDEFINED;
        for &v in &geometry.vertices {
            bounds.merge_point(inverse.transform_point3(v));
        }
        self.bounding_box = bounds.padded(self.settings.padding);

        let (grid_w, grid_h) = calc_grid_size(
            self.bounding_box.min,
            self.bounding_box.max,
            self.settings.cell_size,
        );
        self.num_tiles_x = (grid_w + self.settings.tile_size - 1) / self.settings.tile_size;
        self.num_tiles_z = (grid_h + self.settings.tile_size - 1) / self.settings.tile_size;

        let max_tiles = next_power_of_two(
            (self.num_tiles_x * self.num_tiles_z) as u32 * self.settings.max_layers(),
        );
        if let Err(e) = self.init_mesh_and_cache(max_tiles) {
            log::error!("Could not initialize navigation mesh: {e}");
            self.release_navigation_mesh();
            return false;
        }

        let mut num_tiles = 0u32;
        for z in 0..self.num_tiles_z {
            for x in 0..self.num_tiles_x {
                let blobs = self.build_tile_internal(x, z, collector);
                for blob in blobs {
                    if let Some(cache) = self.tile_cache.as_mut() {
                        if let Err(e) = cache.add_tile(blob) {
                            // The failed blob is dropped and skipped
                            log::error!("Failed to insert tile ({x}, {z}) layer into cache: {e}");
                        }
                    }
                }
                self.stitch_tile(x, z);
                num_tiles += 1;
            }
        }

        // Layers inserted via add_tile stay queued until an update pass runs
        self.update_step(0.0);

        log::debug!("Built navigation mesh with {num_tiles} tiles");
        self.events.notify(NavigationEvent::MeshRebuilt);
        self.readd_obstacles();
        true
    }

    /// Partial rebuild of the tiles overlapped by a world-space box.
    /// Requires a prior full build.
    pub fn build_in_box(&mut self, world_bounds: BoundingBox, collector: &dyn GeometryCollector) -> bool {
        if self.nav_mesh.is_none() {
            log::error!(
                "Navigation mesh must first be built fully before it can be partially rebuilt"
            );
            return false;
        }
        let Some((_, inverse)) = self.anchor else {
            log::error!("Cannot rebuild navigation mesh without a spatial anchor");
            return false;
        };

        let local = world_bounds.transformed(&inverse);
        let edge = self.settings.tile_edge_length();
        let min = self.bounding_box.min;
        let sx = (((local.min.x - min.x) / edge) as i32).clamp(0, self.num_tiles_x - 1);
        let sz = (((local.min.z - min.z) / edge) as i32).clamp(0, self.num_tiles_z - 1);
        let ex = (((local.max.x - min.x) / edge) as i32).clamp(0, self.num_tiles_x - 1);
        let ez = (((local.max.z - min.z) / edge) as i32).clamp(0, self.num_tiles_z - 1);

        let num = self.rebuild_tile_range((sx, sz), (ex, ez), collector);
        log::debug!("Rebuilt {num} tiles of the navigation mesh");
        true
    }

    /// Partial rebuild of an inclusive tile-coordinate rectangle.
    /// Requires a prior full build.
    pub fn build_tiles(&mut self, from: (i32, i32), to: (i32, i32), collector: &dyn GeometryCollector) -> bool {
        if self.nav_mesh.is_none() {
            log::error!(
                "Navigation mesh must first be built fully before it can be partially rebuilt"
            );
            return false;
        }
        let num = self.rebuild_tile_range(from, to, collector);
        log::debug!("Rebuilt {num} tiles of the navigation mesh");
        true
    }

    fn rebuild_tile_range(
        &mut self,
        from: (i32, i32),
        to: (i32, i32),
        collector: &dyn GeometryCollector,
    ) -> u32 {
        let mut count = 0u32;
        for z in from.1..=to.1 {
            for x in from.0..=to.0 {
                // Rebuild replaces: drop the old blobs before regenerating
                if let Some(cache) = self.tile_cache.as_mut() {
                    for reference in cache.tiles_at(x, z) {
                        let _ = cache.remove_tile(reference);
                    }
                }

                let blobs = self.build_tile_internal(x, z, collector);
                for blob in blobs {
                    let added = match self.tile_cache.as_mut() {
                        Some(cache) => cache.add_tile(blob),
                        None => continue,
                    };
                    match added {
                        Ok(reference) => {
                            self.stitch_layer(reference);
                            count += 1;
                        }
                        Err(e) => {
                            log::error!("Failed to insert tile ({x}, {z}) layer into cache: {e}");
                        }
                    }
                }
            }
        }
        count
    }

    /// Runs the voxelization pipeline for one tile and returns its
    /// compressed layer blobs. Failures abort only this tile.
    fn build_tile_internal(&mut self, x: i32, z: i32, collector: &dyn GeometryCollector) -> Vec<Vec<u8>> {
        let Some((transform, _)) = self.anchor else {
            return Vec::new();
        };
        if let Some(mesh) = self.nav_mesh.as_mut() {
            mesh.remove_tile_at(x, z, 0);
        }

        let tile_box = self.tile_bounding_box_local(x, z);
        match build_tile_layers(
            &self.settings,
            &tile_box,
            x,
            z,
            collector,
            &transform,
            &mut self.arena,
            &Lz4Compressor,
        ) {
            Ok(blobs) => {
                if !blobs.is_empty() {
                    let world_bounds = self.tile_bounding_box((x, z));
                    self.events
                        .notify(NavigationEvent::AreaRebuilt { bounds: world_bounds });
                }
                blobs
            }
            Err(_) => Vec::new(), // Already logged by the pipeline
        }
    }

    fn init_mesh_and_cache(&mut self, max_tiles: u32) -> Result<()> {
        let tile_bits = ilog2(max_tiles);
        if tile_bits >= TILE_POLY_BITS {
            return Err(Error::InvalidParam(format!(
                "tile budget {max_tiles} exceeds the {TILE_POLY_BITS}-bit reference space"
            )));
        }
        let max_polys = 1u32 << (TILE_POLY_BITS - tile_bits);
        let edge = self.settings.tile_edge_length();

        let mesh = NavMesh::new(NavMeshParams {
            origin: self.bounding_box.min,
            tile_width: edge,
            tile_height: edge,
            max_tiles,
            max_polys,
        })?;

        let cache = TileCache::new(
            TileCacheParams {
                origin: self.bounding_box.min,
                cs: self.settings.cell_size,
                ch: self.settings.cell_height,
                width: self.settings.tile_size,
                height: self.settings.tile_size,
                max_tiles: max_tiles.saturating_mul(self.settings.max_layers()).min(u16::MAX as u32),
                max_layers: self.settings.max_layers(),
                max_obstacles: self.settings.max_obstacles,
            },
            Box::new(Lz4Compressor),
        )?;

        let builder = TileCacheBuilder::new(TileCacheBuildConfig {
            cs: self.settings.cell_size,
            ch: self.settings.cell_height,
            walkable_height: (self.settings.agent_height / self.settings.cell_height).ceil() as i32,
            walkable_climb: (self.settings.agent_max_climb / self.settings.cell_height).floor()
                as i32,
        });

        self.nav_mesh = Some(mesh);
        self.tile_cache = Some(cache);
        self.builder = Some(builder);
        Ok(())
    }

    /// Releases the navigation mesh and tile cache. Registered obstacles
    /// drop their cache handles but stay in the registry.
    pub fn release_navigation_mesh(&mut self) {
        self.nav_mesh = None;
        self.tile_cache = None;
        self.builder = None;
        self.bounding_box = BoundingBox::UNDEFINED;
        self.num_tiles_x = 0;
        self.num_tiles_z = 0;
        for entry in self.obstacles.iter_mut().flatten() {
            entry.cache_ref = ObstacleRef::default();
        }
    }

    // ------------------------------------------------------------------
    // Cache stitching and updates
    // ------------------------------------------------------------------

    fn stitch_tile(&mut self, x: i32, z: i32) {
        let (Some(cache), Some(mesh), Some(builder)) = (
            self.tile_cache.as_ref(),
            self.nav_mesh.as_mut(),
            self.builder.as_ref(),
        ) else {
            return;
        };
        let inverse = self.anchor.map(|(_, inv)| inv).unwrap_or(Affine3A::IDENTITY);
        let mut processor = ConnectionProcessor {
            connections: &self.connections,
            inverse,
        };
        if let Err(e) = cache.build_nav_mesh_tiles_at(x, z, mesh, builder, &mut processor) {
            log::error!("Failed to stitch tile ({x}, {z}): {e}");
        }
    }

    fn stitch_layer(&mut self, reference: CompressedTileRef) {
        let (Some(cache), Some(mesh), Some(builder)) = (
            self.tile_cache.as_ref(),
            self.nav_mesh.as_mut(),
            self.builder.as_ref(),
        ) else {
            return;
        };
        let inverse = self.anchor.map(|(_, inv)| inv).unwrap_or(Affine3A::IDENTITY);
        let mut processor = ConnectionProcessor {
            connections: &self.connections,
            inverse,
        };
        if let Err(e) = cache.build_nav_mesh_tile(reference, mesh, builder, &mut processor) {
            log::error!("Failed to stitch tile layer: {e}");
        }
    }

    fn update_step(&mut self, dt: f32) -> bool {
        let (Some(cache), Some(mesh), Some(builder)) = (
            self.tile_cache.as_mut(),
            self.nav_mesh.as_mut(),
            self.builder.as_ref(),
        ) else {
            return true;
        };
        let inverse = self.anchor.map(|(_, inv)| inv).unwrap_or(Affine3A::IDENTITY);
        let mut processor = ConnectionProcessor {
            connections: &self.connections,
            inverse,
        };
        match cache.update(dt, mesh, builder, &mut processor) {
            Ok(up_to_date) => up_to_date,
            Err(e) => {
                log::error!("Tile cache update failed: {e}");
                true
            }
        }
    }

    /// Periodic update; the only place queued obstacle requests and pending
    /// tile merges drain into the live navmesh.
    pub fn update(&mut self, dt: f32) {
        if self.enabled && self.nav_mesh.is_some() {
            self.update_step(dt);
        }
    }

    /// Runs update steps until the cache reports up to date or `max_steps`
    /// is hit. Returns whether the cache settled.
    pub fn update_until_idle(&mut self, max_steps: u32) -> bool {
        for _ in 0..max_steps {
            if self.update_step(0.0) {
                return true;
            }
        }
        false
    }

    // ------------------------------------------------------------------
    // Obstacles
    // ------------------------------------------------------------------

    /// Registers an obstacle. The returned handle stays valid even when
    /// cache registration fails (the obstacle is then simply not carved).
    pub fn add_obstacle(&mut self, desc: ObstacleDesc) -> ObstacleId {
        let id = ObstacleId(self.obstacles.len());
        self.obstacles.push(Some(ObstacleEntry {
            desc,
            enabled: true,
            cache_ref: ObstacleRef::default(),
        }));
        self.register_obstacle(id, false);
        id
    }

    /// Unregisters and forgets an obstacle.
    pub fn remove_obstacle(&mut self, id: ObstacleId) {
        self.unregister_obstacle(id, false);
        if let Some(entry) = self.obstacles.get_mut(id.0) {
            *entry = None;
        }
    }

    /// Moves or resizes an obstacle: a silent remove-then-add reinsertion.
    pub fn obstacle_changed(&mut self, id: ObstacleId, desc: ObstacleDesc) {
        self.unregister_obstacle(id, true);
        if let Some(Some(entry)) = self.obstacles.get_mut(id.0) {
            entry.desc = desc;
        } else {
            return;
        }
        self.register_obstacle(id, true);
    }

    /// Whether the obstacle currently has a live cache registration.
    pub fn obstacle_registered(&self, id: ObstacleId) -> bool {
        self.obstacles
            .get(id.0)
            .and_then(|e| e.as_ref())
            .is_some_and(|e| e.cache_ref.is_valid())
    }

    /// Whether an obstacle's sphere touches a tile's bounding box.
    pub fn is_obstacle_in_tile(&self, id: ObstacleId, tile: (i32, i32)) -> bool {
        let Some(Some(entry)) = self.obstacles.get(id.0) else {
            return false;
        };
        let tile_box = self.tile_bounding_box(tile);
        tile_box.distance_to_point(entry.desc.position) < entry.desc.radius
    }

    /// Waits for request-queue space, bounded by the wait policy.
    fn wait_for_queue_space(&mut self) -> bool {
        let mut spins = 0u32;
        loop {
            let full = match self.tile_cache.as_ref() {
                Some(cache) => cache.is_obstacle_queue_full(),
                None => return false,
            };
            if !full {
                return true;
            }
            if spins >= self.wait_policy.max_spins {
                log::error!(
                    "Obstacle request queue failed to drain after {spins} update steps"
                );
                return false;
            }
            // The cache only processes requests during its own update
            self.update_step(0.0);
            spins += 1;
        }
    }

    fn register_obstacle(&mut self, id: ObstacleId, silent: bool) {
        if self.tile_cache.is_none() {
            return;
        }
        let Some(Some(entry)) = self.obstacles.get(id.0) else {
            return;
        };
        if !entry.enabled {
            return;
        }
        let desc = entry.desc.clone();
        let inverse = self.anchor.map(|(_, inv)| inv).unwrap_or(Affine3A::IDENTITY);
        let local_pos = inverse.transform_point3(desc.position);

        if !self.wait_for_queue_space() {
            return;
        }
        let Some(cache) = self.tile_cache.as_mut() else {
            return;
        };
        match cache.add_obstacle(local_pos, desc.radius, desc.height) {
            Ok(reference) => {
                if let Some(Some(entry)) = self.obstacles.get_mut(id.0) {
                    entry.cache_ref = reference;
                }
                if !silent {
                    self.events.notify(NavigationEvent::ObstacleAdded {
                        id,
                        position: desc.position,
                        radius: desc.radius,
                        height: desc.height,
                    });
                }
            }
            Err(e) => {
                log::error!("Failed to add obstacle: {e}");
            }
        }
    }

    fn unregister_obstacle(&mut self, id: ObstacleId, silent: bool) {
        let Some(Some(entry)) = self.obstacles.get(id.0) else {
            return;
        };
        let reference = entry.cache_ref;
        let desc = entry.desc.clone();
        if self.tile_cache.is_none() || !reference.is_valid() {
            return;
        }

        if !self.wait_for_queue_space() {
            return;
        }
        let Some(cache) = self.tile_cache.as_mut() else {
            return;
        };
        match cache.remove_obstacle(reference) {
            Ok(()) => {
                // Clear the handle even if the owner is gone
                if let Some(Some(entry)) = self.obstacles.get_mut(id.0) {
                    entry.cache_ref = ObstacleRef::default();
                }
                if !silent {
                    self.events.notify(NavigationEvent::ObstacleRemoved {
                        id,
                        position: desc.position,
                        radius: desc.radius,
                        height: desc.height,
                    });
                }
            }
            Err(e) => {
                log::error!("Failed to remove obstacle: {e}");
            }
        }
    }

    fn readd_obstacles(&mut self) {
        let ids: Vec<ObstacleId> = self
            .obstacles
            .iter()
            .enumerate()
            .filter(|(_, e)| e.as_ref().is_some_and(|e| e.enabled))
            .map(|(i, _)| ObstacleId(i))
            .collect();
        for id in ids {
            self.register_obstacle(id, false);
        }
    }

    // ------------------------------------------------------------------
    // Off-mesh connections
    // ------------------------------------------------------------------

    /// Registers an off-mesh connection; takes effect on the next rebuild
    /// of the tiles it overlaps.
    pub fn add_connection(&mut self, connection: OffMeshConnection) -> usize {
        self.connections.push(connection);
        self.connections.len() - 1
    }

    /// Connections currently registered.
    pub fn connections(&self) -> &[OffMeshConnection] {
        &self.connections
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Nearest walkable point to a world-space position, searched within
    /// world-space half extents.
    pub fn find_nearest_point(&self, point: Vec3, half_extents: Vec3) -> Option<Vec3> {
        let mesh = self.nav_mesh.as_ref()?;
        let (transform, inverse) = self.anchor.unwrap_or((Affine3A::IDENTITY, Affine3A::IDENTITY));
        let local = inverse.transform_point3(point);
        let (_, nearest) = mesh.find_nearest_poly(local, half_extents)?;
        Some(transform.transform_point3(nearest))
    }

    // ------------------------------------------------------------------
    // Serialization
    // ------------------------------------------------------------------

    /// Whole-mesh snapshot: bounds, grid dimensions, parameter structs and
    /// every non-empty tile's compressed blobs. Empty when nothing is built.
    pub fn navigation_data(&self) -> Vec<u8> {
        let (Some(mesh), Some(cache)) = (self.nav_mesh.as_ref(), self.tile_cache.as_ref()) else {
            return Vec::new();
        };

        let mut w = ByteWriter::new();
        w.write_u32(SNAPSHOT_MAGIC);
        w.write_u32(SNAPSHOT_VERSION);
        w.write_vec3(self.bounding_box.min);
        w.write_vec3(self.bounding_box.max);
        w.write_i32(self.num_tiles_x);
        w.write_i32(self.num_tiles_z);

        let mp = mesh.params();
        w.write_vec3(mp.origin);
        w.write_f32(mp.tile_width);
        w.write_f32(mp.tile_height);
        w.write_u32(mp.max_tiles);
        w.write_u32(mp.max_polys);

        let cp = cache.params();
        w.write_vec3(cp.origin);
        w.write_f32(cp.cs);
        w.write_f32(cp.ch);
        w.write_i32(cp.width);
        w.write_i32(cp.height);
        w.write_u32(cp.max_tiles);
        w.write_u32(cp.max_layers);
        w.write_u32(cp.max_obstacles);

        for z in 0..self.num_tiles_z {
            for x in 0..self.num_tiles_x {
                self.write_tiles(&mut w, x, z);
            }
        }
        w.into_bytes()
    }

    /// Restores a whole-mesh snapshot and replays every tile through the
    /// cache. Returns false (and logs) on malformed data.
    pub fn set_navigation_data(&mut self, data: &[u8]) -> bool {
        self.release_navigation_mesh();
        if data.is_empty() {
            return true;
        }

        match self.read_navigation_data(data) {
            Ok(()) => true,
            Err(e) => {
                log::error!("Could not restore navigation data: {e}");
                self.release_navigation_mesh();
                false
            }
        }
    }

    fn read_navigation_data(&mut self, data: &[u8]) -> Result<()> {
        let mut r = ByteReader::new(data);
        if r.read_u32()? != SNAPSHOT_MAGIC {
            return Err(Error::WrongMagic);
        }
        let version = r.read_u32()?;
        if version != SNAPSHOT_VERSION {
            return Err(Error::WrongVersion(version));
        }

        self.bounding_box = BoundingBox::new(r.read_vec3()?, r.read_vec3()?);
        self.num_tiles_x = r.read_i32()?;
        self.num_tiles_z = r.read_i32()?;

        let mesh_params = NavMeshParams {
            origin: r.read_vec3()?,
            tile_width: r.read_f32()?,
            tile_height: r.read_f32()?,
            max_tiles: r.read_u32()?,
            max_polys: r.read_u32()?,
        };
        let cache_params = TileCacheParams {
            origin: r.read_vec3()?,
            cs: r.read_f32()?,
            ch: r.read_f32()?,
            width: r.read_i32()?,
            height: r.read_i32()?,
            max_tiles: r.read_u32()?,
            max_layers: r.read_u32()?,
            max_obstacles: r.read_u32()?,
        };

        self.nav_mesh = Some(NavMesh::new(mesh_params)?);
        self.tile_cache = Some(TileCache::new(cache_params.clone(), Box::new(Lz4Compressor))?);
        self.builder = Some(TileCacheBuilder::new(TileCacheBuildConfig {
            cs: cache_params.cs,
            ch: cache_params.ch,
            walkable_height: (self.settings.agent_height / cache_params.ch).ceil() as i32,
            walkable_climb: (self.settings.agent_max_climb / cache_params.ch).floor() as i32,
        }));

        self.read_tiles(&mut r, true)
    }

    fn write_tiles(&self, w: &mut ByteWriter, x: i32, z: i32) {
        let Some(cache) = self.tile_cache.as_ref() else {
            return;
        };
        for reference in cache.tiles_at(x, z) {
            let Some(tile) = cache.tile_by_ref(reference) else {
                continue;
            };
            if tile.data.is_empty() {
                continue; // Don't write void-space tiles
            }
            w.write_bytes(&tile.header.to_bytes());
            w.write_i32(tile.data.len() as i32);
            w.write_bytes(&tile.data);
        }
    }

    fn read_tiles(&mut self, r: &mut ByteReader<'_>, silent: bool) -> Result<()> {
        let mut queue: Vec<(i32, i32)> = Vec::new();
        while !r.is_eof() {
            let header_bytes = r.read_bytes(LAYER_HEADER_SIZE)?;
            let header = TileCacheLayerHeader::from_bytes(&header_bytes)?;
            let size = r.read_i32()?;
            if size <= 0 {
                return Err(Error::InvalidParam("tile record with invalid size".into()));
            }
            let blob = r.read_bytes(size as usize)?;

            let Some(cache) = self.tile_cache.as_mut() else {
                return Err(Error::InvalidParam("no tile cache to read tiles into".into()));
            };
            if let Err(e) = cache.add_tile(blob) {
                log::error!("Failed to add tile: {e}");
                return Err(e);
            }

            let coord = (header.tx, header.ty);
            if queue.last() != Some(&coord) {
                queue.push(coord);
            }
        }

        for &(x, z) in &queue {
            self.stitch_tile(x, z);
        }
        self.update_step(0.0);

        if !silent {
            for tile in queue {
                self.events.notify(NavigationEvent::TileAdded { tile });
            }
        }
        Ok(())
    }

    /// Serialized blobs for one tile coordinate; empty when the tile is
    /// missing or out of bounds.
    pub fn tile_data(&self, tile: (i32, i32)) -> Vec<u8> {
        let mut w = ByteWriter::new();
        self.write_tiles(&mut w, tile.0, tile.1);
        w.into_bytes()
    }

    /// Streams one serialized tile into the mesh (with notifications).
    pub fn add_tile(&mut self, data: &[u8]) -> bool {
        if self.nav_mesh.is_none() || self.tile_cache.is_none() {
            log::error!("Cannot add tiles before the navigation mesh is allocated");
            return false;
        }
        let mut r = ByteReader::new(data);
        match self.read_tiles(&mut r, false) {
            Ok(()) => true,
            Err(e) => {
                log::error!("Failed to add tile data: {e}");
                false
            }
        }
    }

    /// Removes a tile's cached blobs and navmesh polygons.
    pub fn remove_tile(&mut self, tile: (i32, i32)) {
        let (x, z) = tile;
        if let Some(cache) = self.tile_cache.as_mut() {
            for reference in cache.tiles_at(x, z) {
                let _ = cache.remove_tile(reference);
            }
        }
        if let Some(mesh) = self.nav_mesh.as_mut() {
            for layer in 0..self.settings.max_layers() as i32 {
                mesh.remove_tile_at(x, z, layer);
            }
        }
    }

    /// Removes every tile from cache and mesh.
    pub fn remove_all_tiles(&mut self) {
        if let Some(cache) = self.tile_cache.as_mut() {
            for coord in cache.tile_coordinates() {
                for reference in cache.tiles_at(coord.0, coord.1) {
                    let _ = cache.remove_tile(reference);
                }
            }
        }
        if let Some(mesh) = self.nav_mesh.as_mut() {
            mesh.remove_all_tiles();
        }
    }
}
