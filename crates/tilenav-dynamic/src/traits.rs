//! Collaborator contracts consumed by the dynamic navigation mesh
//!
//! The orchestrator reaches the rest of the engine only through these
//! traits: world geometry comes from a [`GeometryCollector`], the owning
//! spatial anchor from a [`TransformProvider`], and notifications leave
//! through an [`EventSink`].

use glam::{Affine3A, Vec3};
use tilenav_common::BoundingBox;

use crate::ObstacleId;

/// An axis-aligned volume overriding the area ID of enclosed voxels.
#[derive(Debug, Clone)]
pub struct AreaVolume {
    /// World-space bounds of the volume
    pub bounds: BoundingBox,
    /// Area ID painted over walkable voxels inside the bounds
    pub area_id: u8,
}

/// Triangle soup plus area volumes for one collected region.
#[derive(Debug, Clone, Default)]
pub struct TileGeometry {
    /// World-space vertex positions
    pub vertices: Vec<Vec3>,
    /// Triangle indices, three per triangle
    pub indices: Vec<u32>,
    /// Area-volume stubs overlapping the region
    pub area_volumes: Vec<AreaVolume>,
}

impl TileGeometry {
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() || self.indices.is_empty()
    }
}

/// Supplies world-space geometry overlapping a bounding region.
///
/// Must be side-effect free and callable repeatedly for overlapping or
/// expanding regions.
pub trait GeometryCollector {
    fn collect(&self, bounds: &BoundingBox) -> TileGeometry;
}

/// World transform of the spatial anchor that owns the navigation mesh.
pub trait TransformProvider {
    /// Local-to-world transform
    fn world_transform(&self) -> Affine3A;

    /// World scale; non-uniform scale degrades agent metrics
    fn world_scale(&self) -> Vec3 {
        let m = self.world_transform().matrix3;
        Vec3::new(m.x_axis.length(), m.y_axis.length(), m.z_axis.length())
    }
}

/// Identity transform provider for meshes anchored at the world origin.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityTransform;

impl TransformProvider for IdentityTransform {
    fn world_transform(&self) -> Affine3A {
        Affine3A::IDENTITY
    }
}

/// Fire-and-forget notifications emitted by the mesh.
#[derive(Debug, Clone, PartialEq)]
pub enum NavigationEvent {
    /// The whole mesh was (re)built or reallocated
    MeshRebuilt,
    /// A streamed tile was added at this coordinate
    TileAdded { tile: (i32, i32) },
    /// A tile region was rebuilt; bounds are world-space
    AreaRebuilt { bounds: BoundingBox },
    ObstacleAdded {
        id: ObstacleId,
        position: Vec3,
        radius: f32,
        height: f32,
    },
    ObstacleRemoved {
        id: ObstacleId,
        position: Vec3,
        radius: f32,
        height: f32,
    },
}

/// Receives navigation events; no return value, no ordering guarantees.
pub trait EventSink {
    fn notify(&mut self, event: NavigationEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn notify(&mut self, _event: NavigationEvent) {}
}

/// Collects events into a vector; handy in tests.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    pub events: Vec<NavigationEvent>,
}

impl EventSink for RecordingEventSink {
    fn notify(&mut self, event: NavigationEvent) {
        self.events.push(event);
    }
}

/// A geometry collector over a fixed triangle soup.
///
/// Returns the full soup whenever the query bounds overlap it; real engines
/// would cull per-drawable, which collectors are free to do.
#[derive(Debug, Clone, Default)]
pub struct StaticGeometry {
    vertices: Vec<Vec3>,
    indices: Vec<u32>,
    area_volumes: Vec<AreaVolume>,
    bounds: BoundingBox,
}

impl StaticGeometry {
    pub fn new() -> Self {
        Self {
            bounds: BoundingBox::UNDEFINED,
            ..Default::default()
        }
    }

    /// Adds a triangle mesh in world space.
    pub fn push_mesh(&mut self, vertices: &[Vec3], indices: &[u32]) {
        let base = self.vertices.len() as u32;
        for &v in vertices {
            self.bounds.merge_point(v);
            self.vertices.push(v);
        }
        self.indices.extend(indices.iter().map(|&i| i + base));
    }

    /// Adds an area-volume stub.
    pub fn push_area_volume(&mut self, volume: AreaVolume) {
        self.area_volumes.push(volume);
    }

    /// World bounds of everything pushed so far.
    pub fn bounds(&self) -> &BoundingBox {
        &self.bounds
    }
}

impl GeometryCollector for StaticGeometry {
    fn collect(&self, bounds: &BoundingBox) -> TileGeometry {
        if !self.bounds.is_defined() || !self.bounds.overlaps(bounds) {
            return TileGeometry::default();
        }
        TileGeometry {
            vertices: self.vertices.clone(),
            indices: self.indices.clone(),
            area_volumes: self
                .area_volumes
                .iter()
                .filter(|v| v.bounds.overlaps(bounds))
                .cloned()
                .collect(),
        }
    }
}
