//! Dynamic tiled navigation mesh
//!
//! The orchestrator in this crate owns a persistent polygon navmesh and a
//! compressed tile cache, building both from world geometry supplied by a
//! [`GeometryCollector`]. Tiles rebuild incrementally: obstacle changes
//! carve cached layers and regenerate only the affected polygon tiles.
//!
//! ```no_run
//! use glam::Vec3;
//! use tilenav_dynamic::{DynamicNavMesh, IdentityTransform, NavBuildSettings, StaticGeometry};
//!
//! let mut geometry = StaticGeometry::new();
//! geometry.push_mesh(
//!     &[
//!         Vec3::new(0.0, 0.0, 0.0),
//!         Vec3::new(10.0, 0.0, 0.0),
//!         Vec3::new(10.0, 0.0, 10.0),
//!         Vec3::new(0.0, 0.0, 10.0),
//!     ],
//!     &[0, 2, 1, 0, 3, 2],
//! );
//!
//! let mut mesh = DynamicNavMesh::new(NavBuildSettings::default());
//! mesh.set_anchor(&IdentityTransform);
//! assert!(mesh.build(&geometry));
//! ```

mod build_data;
mod dynamic_mesh;
mod settings;
mod traits;

pub use build_data::{build_tile_layers, NavBuildData};
pub use dynamic_mesh::{DynamicNavMesh, ObstacleDesc, ObstacleId, OffMeshConnection};
pub use settings::{
    NavBuildSettings, ObstacleWaitPolicy, DEFAULT_MAX_LAYERS, DEFAULT_MAX_OBSTACLES,
};
pub use traits::{
    AreaVolume, EventSink, GeometryCollector, IdentityTransform, NavigationEvent, NullEventSink,
    RecordingEventSink, StaticGeometry, TileGeometry, TransformProvider,
};
