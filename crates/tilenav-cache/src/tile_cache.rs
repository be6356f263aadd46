//! Compressed tile cache with incremental obstacle processing

use std::collections::HashMap;

use glam::Vec3;
use tilenav_common::{BoundingBox, Error, Result};
use tilenav_mesh::NavMesh;

use crate::builder::{MeshProcess, TileCacheBuilder};
use crate::layer::TileCacheLayerHeader;
use crate::{clamp_max_layers, decompress_tile_cache_layer, TileCompressor};

/// Capacity of the obstacle request queue; requests beyond this must wait
/// for the cache to drain through `update`
pub const MAX_OBSTACLE_REQUESTS: usize = 64;

/// Reference to a compressed tile: 16-bit salt over a 16-bit slot index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompressedTileRef(u32);

impl CompressedTileRef {
    fn encode(salt: u16, index: usize) -> Self {
        Self(((salt as u32) << 16) | (index as u32 & 0xFFFF))
    }

    fn index(&self) -> usize {
        (self.0 & 0xFFFF) as usize
    }

    fn salt(&self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub fn id(&self) -> u32 {
        self.0
    }
}

/// Opaque obstacle handle; zero never names a live obstacle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ObstacleRef(u32);

impl ObstacleRef {
    fn encode(salt: u16, index: usize) -> Self {
        Self(((salt as u32) << 16) | (index as u32 & 0xFFFF))
    }

    fn index(&self) -> usize {
        (self.0 & 0xFFFF) as usize
    }

    fn salt(&self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub fn id(&self) -> u32 {
        self.0
    }

    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

/// Tile cache parameters.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct TileCacheParams {
    /// Origin of the tile grid
    pub origin: Vec3,
    /// Cell size (horizontal resolution)
    pub cs: f32,
    /// Cell height (vertical resolution)
    pub ch: f32,
    /// Tile width in cells
    pub width: i32,
    /// Tile height (depth) in cells
    pub height: i32,
    /// Maximum cached tiles (layers count individually)
    pub max_tiles: u32,
    /// Maximum layers per tile footprint
    pub max_layers: u32,
    /// Maximum simultaneous obstacles
    pub max_obstacles: u32,
}

/// A compressed tile held by the cache.
#[derive(Debug, Clone)]
pub struct CompressedTile {
    pub header: TileCacheLayerHeader,
    /// Full blob: plain header bytes plus compressed payload
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObstacleState {
    /// Queued for insertion; carve not yet applied
    Processing,
    /// Carved into every touched tile
    Processed,
    /// Queued for removal
    Removing,
}

/// Cylinder obstacle tracked by the cache.
#[derive(Debug, Clone)]
struct Obstacle {
    pos: Vec3,
    radius: f32,
    height: f32,
    state: ObstacleState,
    /// Tiles whose content this obstacle affects
    touched: Vec<CompressedTileRef>,
    /// Touched tiles not yet rebuilt since the last state change
    pending: Vec<CompressedTileRef>,
}

struct ObstacleSlot {
    salt: u16,
    obstacle: Option<Obstacle>,
}

#[derive(Debug, Clone, Copy)]
enum RequestAction {
    Add,
    Remove,
}

#[derive(Debug, Clone, Copy)]
struct ObstacleRequest {
    action: RequestAction,
    reference: ObstacleRef,
}

struct TileSlot {
    salt: u16,
    tile: Option<CompressedTile>,
}

/// The compressed tile cache.
///
/// Tiles enter as compressed layer blobs and are merged into the navigation
/// mesh by [`TileCache::build_nav_mesh_tiles_at`] or incrementally through
/// [`TileCache::update`], which is also the only place obstacle requests are
/// drained.
pub struct TileCache {
    params: TileCacheParams,
    compressor: Box<dyn TileCompressor>,
    slots: Vec<TileSlot>,
    free: Vec<usize>,
    lookup: HashMap<(i32, i32, i32), usize>,
    obstacles: Vec<ObstacleSlot>,
    free_obstacles: Vec<usize>,
    requests: Vec<ObstacleRequest>,
    /// Tiles queued for rebuild, drained one per update step
    update_queue: Vec<CompressedTileRef>,
}

impl TileCache {
    /// Creates a cache sized for `params.max_tiles` compressed tiles.
    pub fn new(params: TileCacheParams, compressor: Box<dyn TileCompressor>) -> Result<Self> {
        if !params.origin.is_finite() {
            return Err(Error::InvalidParam("tile cache origin not finite".into()));
        }
        if params.cs <= 0.0 || params.ch <= 0.0 {
            return Err(Error::InvalidParam("invalid cell dimensions".into()));
        }
        if params.width <= 0 || params.height <= 0 {
            return Err(Error::InvalidParam("invalid tile dimensions".into()));
        }
        if params.max_tiles == 0 || params.max_tiles > u16::MAX as u32 {
            return Err(Error::InvalidParam(format!(
                "max_tiles {} outside supported range",
                params.max_tiles
            )));
        }
        let params = TileCacheParams {
            max_layers: clamp_max_layers(params.max_layers),
            ..params
        };

        let max_tiles = params.max_tiles as usize;
        let max_obstacles = params.max_obstacles as usize;
        Ok(Self {
            params,
            compressor,
            slots: (0..max_tiles)
                .map(|_| TileSlot {
                    salt: 1,
                    tile: None,
                })
                .collect(),
            free: (0..max_tiles).rev().collect(),
            lookup: HashMap::new(),
            obstacles: (0..max_obstacles)
                .map(|_| ObstacleSlot {
                    salt: 1,
                    obstacle: None,
                })
                .collect(),
            free_obstacles: (0..max_obstacles).rev().collect(),
            requests: Vec::new(),
            update_queue: Vec::new(),
        })
    }

    pub fn params(&self) -> &TileCacheParams {
        &self.params
    }

    /// World-space edge length of one tile.
    pub fn tile_edge_length(&self) -> f32 {
        self.params.width as f32 * self.params.cs
    }

    /// Number of cached tiles.
    pub fn tile_count(&self) -> usize {
        self.lookup.len()
    }

    /// Inserts a compressed layer blob. Fails on duplicate coordinates or
    /// slot exhaustion; the caller frees (drops) the blob in that case.
    pub fn add_tile(&mut self, blob: Vec<u8>) -> Result<CompressedTileRef> {
        let header = TileCacheLayerHeader::from_bytes(&blob)?;
        let key = (header.tx, header.ty, header.tlayer);
        if self.lookup.contains_key(&key) {
            return Err(Error::AlreadyExists(format!(
                "tile ({}, {}) layer {}",
                header.tx, header.ty, header.tlayer
            )));
        }
        let slot_idx = self
            .free
            .pop()
            .ok_or_else(|| Error::OutOfSlots("tile cache slot budget exhausted".into()))?;
        self.slots[slot_idx].tile = Some(CompressedTile { header, data: blob });
        self.lookup.insert(key, slot_idx);
        Ok(CompressedTileRef::encode(self.slots[slot_idx].salt, slot_idx))
    }

    /// Removes a tile, returning its blob.
    pub fn remove_tile(&mut self, reference: CompressedTileRef) -> Result<Vec<u8>> {
        let slot_idx = reference.index();
        let slot = self
            .slots
            .get_mut(slot_idx)
            .ok_or_else(|| Error::InvalidParam("tile reference out of range".into()))?;
        if slot.salt != reference.salt() {
            return Err(Error::InvalidParam("stale tile reference".into()));
        }
        let tile = slot
            .tile
            .take()
            .ok_or_else(|| Error::NotFound("tile already removed".into()))?;
        slot.salt = slot.salt.wrapping_add(1).max(1);
        self.lookup
            .remove(&(tile.header.tx, tile.header.ty, tile.header.tlayer));
        self.free.push(slot_idx);
        self.update_queue.retain(|r| *r != reference);
        Ok(tile.data)
    }

    /// Resolves a tile reference.
    pub fn tile_by_ref(&self, reference: CompressedTileRef) -> Option<&CompressedTile> {
        let slot = self.slots.get(reference.index())?;
        if slot.salt != reference.salt() {
            return None;
        }
        slot.tile.as_ref()
    }

    /// All layer tiles at a footprint, ordered by layer.
    pub fn tiles_at(&self, tx: i32, ty: i32) -> Vec<CompressedTileRef> {
        let mut refs: Vec<(i32, CompressedTileRef)> = Vec::new();
        for layer in 0..self.params.max_layers as i32 {
            if let Some(&slot_idx) = self.lookup.get(&(tx, ty, layer)) {
                if self.slots[slot_idx].tile.is_some() {
                    refs.push((
                        layer,
                        CompressedTileRef::encode(self.slots[slot_idx].salt, slot_idx),
                    ));
                }
            }
        }
        refs.sort_by_key(|(layer, _)| *layer);
        refs.into_iter().map(|(_, r)| r).collect()
    }

    /// Coordinates of every cached tile footprint (deduplicated, sorted).
    pub fn tile_coordinates(&self) -> Vec<(i32, i32)> {
        let mut coords: Vec<(i32, i32)> = self.lookup.keys().map(|&(x, z, _)| (x, z)).collect();
        coords.sort_unstable();
        coords.dedup();
        coords
    }

    /// Tight world bounds of a cached layer.
    pub fn tile_bounds(&self, header: &TileCacheLayerHeader) -> BoundingBox {
        let cs = self.params.cs;
        BoundingBox::new(
            Vec3::new(
                header.bmin.x + header.minx as f32 * cs,
                header.bmin.y,
                header.bmin.z + header.miny as f32 * cs,
            ),
            Vec3::new(
                header.bmin.x + (header.maxx + 1) as f32 * cs,
                header.bmax.y,
                header.bmin.z + (header.maxy + 1) as f32 * cs,
            ),
        )
    }

    /// Tiles whose tight bounds overlap a world-space box.
    pub fn query_tiles(&self, bounds: &BoundingBox) -> Vec<CompressedTileRef> {
        let tw = self.tile_edge_length();
        let tx0 = ((bounds.min.x - self.params.origin.x) / tw).floor() as i32;
        let tx1 = ((bounds.max.x - self.params.origin.x) / tw).floor() as i32;
        let tz0 = ((bounds.min.z - self.params.origin.z) / tw).floor() as i32;
        let tz1 = ((bounds.max.z - self.params.origin.z) / tw).floor() as i32;

        let mut results = Vec::new();
        for tz in tz0..=tz1 {
            for tx in tx0..=tx1 {
                for reference in self.tiles_at(tx, tz) {
                    let tile = match self.tile_by_ref(reference) {
                        Some(t) => t,
                        None => continue,
                    };
                    if self.tile_bounds(&tile.header).overlaps(bounds) {
                        results.push(reference);
                    }
                }
            }
        }
        results
    }

    /// True when the request queue cannot take another add/remove.
    pub fn is_obstacle_queue_full(&self) -> bool {
        self.requests.len() >= MAX_OBSTACLE_REQUESTS
    }

    /// Number of live obstacles (any state).
    pub fn obstacle_count(&self) -> usize {
        self.obstacles
            .iter()
            .filter(|s| s.obstacle.is_some())
            .count()
    }

    /// State of an obstacle, if the reference is live.
    pub fn obstacle_state(&self, reference: ObstacleRef) -> Option<ObstacleState> {
        let slot = self.obstacles.get(reference.index())?;
        if slot.salt != reference.salt() {
            return None;
        }
        slot.obstacle.as_ref().map(|o| o.state)
    }

    /// Queues a cylinder obstacle for insertion.
    ///
    /// The carve is applied only when `update` drains the request.
    pub fn add_obstacle(&mut self, pos: Vec3, radius: f32, height: f32) -> Result<ObstacleRef> {
        if radius <= 0.0 || height <= 0.0 {
            return Err(Error::InvalidParam(format!(
                "obstacle radius {radius} / height {height} must be positive"
            )));
        }
        if self.is_obstacle_queue_full() {
            return Err(Error::OutOfSlots("obstacle request queue full".into()));
        }
        let slot_idx = self
            .free_obstacles
            .pop()
            .ok_or_else(|| Error::OutOfSlots("obstacle budget exhausted".into()))?;
        self.obstacles[slot_idx].obstacle = Some(Obstacle {
            pos,
            radius,
            height,
            state: ObstacleState::Processing,
            touched: Vec::new(),
            pending: Vec::new(),
        });
        let reference = ObstacleRef::encode(self.obstacles[slot_idx].salt, slot_idx);
        self.requests.push(ObstacleRequest {
            action: RequestAction::Add,
            reference,
        });
        Ok(reference)
    }

    /// Queues an obstacle for removal.
    pub fn remove_obstacle(&mut self, reference: ObstacleRef) -> Result<()> {
        if !reference.is_valid() {
            return Err(Error::InvalidParam("null obstacle reference".into()));
        }
        if self.is_obstacle_queue_full() {
            return Err(Error::OutOfSlots("obstacle request queue full".into()));
        }
        let slot = self
            .obstacles
            .get(reference.index())
            .ok_or_else(|| Error::InvalidParam("obstacle reference out of range".into()))?;
        if slot.salt != reference.salt() || slot.obstacle.is_none() {
            return Err(Error::NotFound("stale obstacle reference".into()));
        }
        self.requests.push(ObstacleRequest {
            action: RequestAction::Remove,
            reference,
        });
        Ok(())
    }

    /// Advances the cache by one step.
    ///
    /// When the rebuild queue is empty the request queue is drained and
    /// affected tiles are queued; otherwise one queued tile is rebuilt into
    /// the navigation mesh. Returns true when fully up to date.
    pub fn update(
        &mut self,
        _dt: f32,
        mesh: &mut NavMesh,
        builder: &TileCacheBuilder,
        processor: &mut dyn MeshProcess,
    ) -> Result<bool> {
        if self.update_queue.is_empty() {
            let requests = std::mem::take(&mut self.requests);
            for request in requests {
                let slot_idx = request.reference.index();
                let Some(slot) = self.obstacles.get(slot_idx) else {
                    continue;
                };
                if slot.salt != request.reference.salt() || slot.obstacle.is_none() {
                    continue;
                }

                match request.action {
                    RequestAction::Add => {
                        let bounds = match self.obstacles[slot_idx].obstacle.as_ref() {
                            Some(ob) => obstacle_bounds(ob.pos, ob.radius, ob.height),
                            None => continue,
                        };
                        let touched = self.query_tiles(&bounds);
                        if let Some(ob) = self.obstacles[slot_idx].obstacle.as_mut() {
                            ob.state = if touched.is_empty() {
                                ObstacleState::Processed
                            } else {
                                ObstacleState::Processing
                            };
                            ob.touched = touched.clone();
                            ob.pending = touched.clone();
                        }
                        for reference in touched {
                            if !self.update_queue.contains(&reference) {
                                self.update_queue.push(reference);
                            }
                        }
                    }
                    RequestAction::Remove => {
                        let pending = match self.obstacles[slot_idx].obstacle.as_mut() {
                            Some(ob) => {
                                ob.state = ObstacleState::Removing;
                                ob.pending = ob.touched.clone();
                                ob.pending.clone()
                            }
                            None => continue,
                        };
                        // An obstacle touching nothing can retire immediately
                        if pending.is_empty() {
                            self.retire_obstacle(slot_idx);
                        }
                        for reference in pending {
                            if !self.update_queue.contains(&reference) {
                                self.update_queue.push(reference);
                            }
                        }
                    }
                }
            }
        }

        if !self.update_queue.is_empty() {
            let reference = self.update_queue.remove(0);
            self.build_nav_mesh_tile(reference, mesh, builder, processor)?;

            for slot_idx in 0..self.obstacles.len() {
                let retire = {
                    let Some(ob) = self.obstacles[slot_idx].obstacle.as_mut() else {
                        continue;
                    };
                    if ob.state == ObstacleState::Processed {
                        continue;
                    }
                    ob.pending.retain(|r| *r != reference);
                    if ob.pending.is_empty() {
                        match ob.state {
                            ObstacleState::Processing => {
                                ob.state = ObstacleState::Processed;
                                false
                            }
                            ObstacleState::Removing => true,
                            ObstacleState::Processed => false,
                        }
                    } else {
                        false
                    }
                };
                if retire {
                    self.retire_obstacle(slot_idx);
                }
            }
        }

        Ok(self.update_queue.is_empty() && self.requests.is_empty())
    }

    fn retire_obstacle(&mut self, slot_idx: usize) {
        let slot = &mut self.obstacles[slot_idx];
        slot.obstacle = None;
        slot.salt = slot.salt.wrapping_add(1).max(1);
        self.free_obstacles.push(slot_idx);
    }

    /// Rebuilds every layer of a tile footprint into the navigation mesh.
    pub fn build_nav_mesh_tiles_at(
        &self,
        tx: i32,
        ty: i32,
        mesh: &mut NavMesh,
        builder: &TileCacheBuilder,
        processor: &mut dyn MeshProcess,
    ) -> Result<()> {
        for reference in self.tiles_at(tx, ty) {
            self.build_nav_mesh_tile(reference, mesh, builder, processor)?;
        }
        Ok(())
    }

    /// Rebuilds one cached layer into a navigation mesh polygon tile,
    /// carving every live obstacle that overlaps it.
    pub fn build_nav_mesh_tile(
        &self,
        reference: CompressedTileRef,
        mesh: &mut NavMesh,
        builder: &TileCacheBuilder,
        processor: &mut dyn MeshProcess,
    ) -> Result<()> {
        let tile = self
            .tile_by_ref(reference)
            .ok_or_else(|| Error::NotFound("stale compressed tile reference".into()))?;
        let layer = decompress_tile_cache_layer(self.compressor.as_ref(), &tile.data)?;

        // Obstacles carve live cache content: anything not being removed
        let carve: Vec<(Vec3, f32, f32)> = self
            .obstacles
            .iter()
            .filter_map(|slot| slot.obstacle.as_ref())
            .filter(|ob| ob.state != ObstacleState::Removing)
            .map(|ob| (ob.pos, ob.radius, ob.height))
            .collect();

        let header = &layer.header;
        match builder.build_tile(&layer, &carve, processor)? {
            Some(mesh_tile) => {
                mesh.add_tile(mesh_tile)?;
            }
            None => {
                // All walkable space carved away: the mesh tile disappears
                mesh.remove_tile_at(header.tx, header.ty, header.tlayer);
            }
        }
        Ok(())
    }

    /// Access to the cache's compressor (used when replaying snapshots).
    pub fn compressor(&self) -> &dyn TileCompressor {
        self.compressor.as_ref()
    }
}

fn obstacle_bounds(pos: Vec3, radius: f32, height: f32) -> BoundingBox {
    BoundingBox::new(
        Vec3::new(pos.x - radius, pos.y, pos.z - radius),
        Vec3::new(pos.x + radius, pos.y + height, pos.z + radius),
    )
}
