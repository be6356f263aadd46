//! End-to-end scenarios for the dynamic navigation mesh

use std::cell::RefCell;
use std::rc::Rc;

use glam::Vec3;
use tilenav_dynamic::{
    DynamicNavMesh, EventSink, IdentityTransform, NavBuildSettings, NavigationEvent, ObstacleDesc,
    ObstacleWaitPolicy, StaticGeometry,
};

/// Event sink sharing its record with the test body.
struct SharedSink(Rc<RefCell<Vec<NavigationEvent>>>);

impl EventSink for SharedSink {
    fn notify(&mut self, event: NavigationEvent) {
        self.0.borrow_mut().push(event);
    }
}

fn ground_plane(min: Vec3, size: f32) -> StaticGeometry {
    let mut geometry = StaticGeometry::new();
    push_plane(&mut geometry, min, size);
    geometry
}

fn push_plane(geometry: &mut StaticGeometry, min: Vec3, size: f32) {
    geometry.push_mesh(
        &[
            min,
            Vec3::new(min.x + size, min.y, min.z),
            Vec3::new(min.x + size, min.y, min.z + size),
            Vec3::new(min.x, min.y, min.z + size),
        ],
        &[0, 2, 1, 0, 3, 2],
    );
}

fn built_mesh(geometry: &StaticGeometry) -> DynamicNavMesh {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut mesh = DynamicNavMesh::new(NavBuildSettings::default());
    mesh.set_anchor(&IdentityTransform);
    assert!(mesh.build(geometry));
    mesh
}

#[test]
fn allocate_rounds_tiles_and_splits_22_bits() {
    let mut mesh = DynamicNavMesh::new(NavBuildSettings::default());
    mesh.set_anchor(&IdentityTransform);

    let bounds =
        tilenav_common::BoundingBox::new(Vec3::new(-50.0, -1.0, -50.0), Vec3::new(50.0, 1.0, 50.0));
    assert!(mesh.allocate(bounds, 1000));

    let nav = mesh.nav_mesh().expect("allocated mesh");
    assert_eq!(nav.params().max_tiles, 1024);
    assert_eq!(nav.tile_bits() + nav.poly_bits(), 22);
    assert_eq!(nav.params().max_polys, 1 << nav.poly_bits());
}

#[test]
fn allocate_without_anchor_fails() {
    let mut mesh = DynamicNavMesh::new(NavBuildSettings::default());
    let bounds =
        tilenav_common::BoundingBox::new(Vec3::new(-1.0, -1.0, -1.0), Vec3::new(1.0, 1.0, 1.0));
    assert!(!mesh.allocate(bounds, 64));
    assert!(mesh.nav_mesh().is_none());
}

#[test]
fn build_with_no_geometry_is_a_noop() {
    let mut mesh = DynamicNavMesh::new(NavBuildSettings::default());
    mesh.set_anchor(&IdentityTransform);
    assert!(mesh.build(&StaticGeometry::new()));
    assert!(mesh.nav_mesh().is_none());
}

#[test]
fn flat_plane_builds_single_tile_with_layers() {
    // 10x10 ground plane, cell size 0.3, tile size 64: exactly one tile
    let geometry = ground_plane(Vec3::ZERO, 10.0);
    let mesh = built_mesh(&geometry);

    assert_eq!(mesh.num_tiles(), (1, 1));
    let cache = mesh.tile_cache().expect("cache");
    assert_eq!(cache.tile_coordinates(), vec![(0, 0)]);
    assert!(!cache.tiles_at(0, 0).is_empty());

    // The built tile answers point queries on the walkable interior
    let hit = mesh.find_nearest_point(Vec3::new(5.0, 0.0, 5.0), Vec3::new(1.0, 2.0, 1.0));
    assert!(hit.is_some());

    // Tile data round-trips per coordinate; out-of-bounds tiles are empty
    assert!(!mesh.tile_data((0, 0)).is_empty());
    assert!(mesh.tile_data((5, 5)).is_empty());
}

#[test]
fn snapshot_round_trip_reproduces_blobs() {
    let geometry = ground_plane(Vec3::ZERO, 10.0);
    let mesh = built_mesh(&geometry);
    let data = mesh.navigation_data();
    assert!(!data.is_empty());

    let mut restored = DynamicNavMesh::new(NavBuildSettings::default());
    assert!(restored.set_navigation_data(&data));

    assert_eq!(restored.num_tiles(), mesh.num_tiles());
    let original_cache = mesh.tile_cache().expect("cache");
    let restored_cache = restored.tile_cache().expect("restored cache");
    assert_eq!(
        restored_cache.tile_coordinates(),
        original_cache.tile_coordinates()
    );
    assert_eq!(restored.tile_data((0, 0)), mesh.tile_data((0, 0)));

    // The restored mesh is queryable without a rebuild
    assert!(restored
        .find_nearest_point(Vec3::new(5.0, 0.0, 5.0), Vec3::new(1.0, 2.0, 1.0))
        .is_some());

    // A second snapshot is byte-identical
    assert_eq!(restored.navigation_data(), data);
}

#[test]
fn snapshot_survives_a_file_round_trip() {
    let geometry = ground_plane(Vec3::ZERO, 10.0);
    let mesh = built_mesh(&geometry);

    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(file.path(), mesh.navigation_data()).unwrap();

    let data = std::fs::read(file.path()).unwrap();
    let mut restored = DynamicNavMesh::new(NavBuildSettings::default());
    assert!(restored.set_navigation_data(&data));
    assert_eq!(restored.tile_data((0, 0)), mesh.tile_data((0, 0)));
}

#[test]
fn set_navigation_data_rejects_garbage() {
    let mut mesh = DynamicNavMesh::new(NavBuildSettings::default());
    assert!(!mesh.set_navigation_data(&[1, 2, 3, 4, 5, 6, 7, 8]));
    assert!(mesh.nav_mesh().is_none());
    // Empty data just clears
    assert!(mesh.set_navigation_data(&[]));
}

#[test]
fn rebuilding_a_tile_is_idempotent() {
    let geometry = ground_plane(Vec3::ZERO, 10.0);
    let mut mesh = built_mesh(&geometry);

    let before = mesh.tile_data((0, 0));
    assert!(mesh.build_tiles((0, 0), (0, 0), &geometry));
    let after = mesh.tile_data((0, 0));
    assert_eq!(before, after);

    assert!(mesh.build_tiles((0, 0), (0, 0), &geometry));
    assert_eq!(mesh.tile_data((0, 0)), before);
}

#[test]
fn partial_rebuild_does_not_touch_other_tiles() {
    // 30x30 plane spans a 2x2 tile grid
    let geometry = ground_plane(Vec3::ZERO, 30.0);
    let mut mesh = built_mesh(&geometry);
    assert_eq!(mesh.num_tiles(), (2, 2));

    let before: Vec<Vec<u8>> = [(0, 0), (1, 0), (0, 1), (1, 1)]
        .iter()
        .map(|&t| mesh.tile_data(t))
        .collect();
    assert!(before.iter().all(|d| !d.is_empty()));

    assert!(mesh.build_tiles((0, 0), (0, 0), &geometry));

    assert_eq!(mesh.tile_data((1, 0)), before[1]);
    assert_eq!(mesh.tile_data((0, 1)), before[2]);
    assert_eq!(mesh.tile_data((1, 1)), before[3]);
}

#[test]
fn partial_rebuild_requires_full_build_first() {
    let geometry = ground_plane(Vec3::ZERO, 10.0);
    let mut mesh = DynamicNavMesh::new(NavBuildSettings::default());
    mesh.set_anchor(&IdentityTransform);
    assert!(!mesh.build_tiles((0, 0), (0, 0), &geometry));
}

#[test]
fn empty_tiles_are_skipped_by_snapshots() {
    // Two ground patches far apart leave interior tiles without geometry
    let mut geometry = ground_plane(Vec3::ZERO, 10.0);
    push_plane(&mut geometry, Vec3::new(50.0, 0.0, 0.0), 10.0);
    let mesh = built_mesh(&geometry);

    let (tiles_x, _) = mesh.num_tiles();
    assert!(tiles_x >= 3);
    let coords = mesh.tile_cache().expect("cache").tile_coordinates();
    // The gap tile produced zero layers
    assert!(!coords.contains(&(1, 0)));
    assert!(mesh.tile_data((1, 0)).is_empty());

    let mut restored = DynamicNavMesh::new(NavBuildSettings::default());
    assert!(restored.set_navigation_data(&mesh.navigation_data()));
    assert_eq!(
        restored.tile_cache().expect("cache").tile_coordinates(),
        coords
    );
}

#[test]
fn obstacle_carves_and_restores_walkability() {
    let geometry = ground_plane(Vec3::ZERO, 10.0);
    let mut mesh = built_mesh(&geometry);

    let probe = Vec3::new(5.0, 0.0, 5.0);
    let tight = Vec3::new(0.4, 5.0, 0.4);
    assert!(mesh.find_nearest_point(probe, tight).is_some());

    let before = mesh.tile_data((0, 0));

    // Carve a cylinder over the probe point and drain the queue
    let id = mesh.add_obstacle(ObstacleDesc {
        position: Vec3::new(5.0, -0.5, 5.0),
        radius: 1.5,
        height: 2.0,
    });
    assert!(mesh.obstacle_registered(id));
    assert!(mesh.update_until_idle(64));

    // No polygon covers the carved region anymore
    assert!(mesh.find_nearest_point(probe, tight).is_none());
    // A point outside the carve radius stays walkable
    assert!(mesh
        .find_nearest_point(Vec3::new(8.0, 0.0, 8.0), tight)
        .is_some());
    // Compressed blobs are untouched: obstacles carve derived tiles only
    assert_eq!(mesh.tile_data((0, 0)), before);

    // Removing the obstacle restores the pre-add state
    mesh.remove_obstacle(id);
    assert!(mesh.update_until_idle(64));
    assert!(mesh.find_nearest_point(probe, tight).is_some());
    assert_eq!(mesh.tile_data((0, 0)), before);
}

#[test]
fn obstacles_survive_reallocation() {
    let geometry = ground_plane(Vec3::ZERO, 10.0);
    let mut mesh = built_mesh(&geometry);

    let id = mesh.add_obstacle(ObstacleDesc {
        position: Vec3::new(5.0, -0.5, 5.0),
        radius: 1.5,
        height: 2.0,
    });
    assert!(mesh.update_until_idle(64));

    // A fresh full build re-registers enabled obstacles automatically
    assert!(mesh.build(&geometry));
    assert!(mesh.obstacle_registered(id));
    assert!(mesh.update_until_idle(64));
    assert!(mesh
        .find_nearest_point(Vec3::new(5.0, 0.0, 5.0), Vec3::new(0.4, 5.0, 0.4))
        .is_none());
}

#[test]
fn obstacle_changed_relocates_the_carve() {
    let geometry = ground_plane(Vec3::ZERO, 10.0);
    let mut mesh = built_mesh(&geometry);
    let tight = Vec3::new(0.4, 5.0, 0.4);

    let id = mesh.add_obstacle(ObstacleDesc {
        position: Vec3::new(3.0, -0.5, 3.0),
        radius: 1.5,
        height: 2.0,
    });
    assert!(mesh.update_until_idle(64));
    assert!(mesh.find_nearest_point(Vec3::new(3.0, 0.0, 3.0), tight).is_none());

    mesh.obstacle_changed(
        id,
        ObstacleDesc {
            position: Vec3::new(7.0, -0.5, 7.0),
            radius: 1.5,
            height: 2.0,
        },
    );
    assert!(mesh.update_until_idle(64));
    assert!(mesh.find_nearest_point(Vec3::new(3.0, 0.0, 3.0), tight).is_some());
    assert!(mesh.find_nearest_point(Vec3::new(7.0, 0.0, 7.0), tight).is_none());
}

#[test]
fn obstacle_queue_backpressure_is_bounded() {
    let geometry = ground_plane(Vec3::ZERO, 10.0);
    let mut mesh = built_mesh(&geometry);
    mesh.set_wait_policy(ObstacleWaitPolicy { max_spins: 0 });

    // Fill the request queue without ever draining it
    let mut ids = Vec::new();
    for i in 0..tilenav_cache::MAX_OBSTACLE_REQUESTS {
        let offset = (i % 8) as f32 * 0.1;
        ids.push(mesh.add_obstacle(ObstacleDesc {
            position: Vec3::new(2.0 + offset, -0.5, 2.0),
            radius: 0.3,
            height: 1.0,
        }));
    }
    assert!(ids.iter().all(|&id| mesh.obstacle_registered(id)));

    // With a zero spin budget the next registration fails instead of
    // spinning forever
    let overflow = mesh.add_obstacle(ObstacleDesc {
        position: Vec3::new(2.0, -0.5, 2.0),
        radius: 0.3,
        height: 1.0,
    });
    assert!(!mesh.obstacle_registered(overflow));

    // With a spin budget the same registration succeeds
    mesh.set_wait_policy(ObstacleWaitPolicy::default());
    let retried = mesh.add_obstacle(ObstacleDesc {
        position: Vec3::new(2.0, -0.5, 2.0),
        radius: 0.3,
        height: 1.0,
    });
    assert!(mesh.obstacle_registered(retried));
}

#[test]
fn streaming_single_tiles_between_meshes() {
    let geometry = ground_plane(Vec3::ZERO, 10.0);
    let source = built_mesh(&geometry);
    let tile = source.tile_data((0, 0));
    assert!(!tile.is_empty());

    // Receiver allocates an empty mesh over the same bounds, then streams
    let mut receiver = DynamicNavMesh::new(NavBuildSettings::default());
    receiver.set_anchor(&IdentityTransform);
    let bounds =
        tilenav_common::BoundingBox::new(Vec3::new(-1.0, -1.0, -1.0), Vec3::new(11.0, 1.0, 11.0));
    assert!(receiver.allocate(bounds, 16));
    assert!(receiver
        .find_nearest_point(Vec3::new(5.0, 0.0, 5.0), Vec3::new(1.0, 2.0, 1.0))
        .is_none());

    assert!(receiver.add_tile(&tile));
    assert!(receiver
        .find_nearest_point(Vec3::new(5.0, 0.0, 5.0), Vec3::new(1.0, 2.0, 1.0))
        .is_some());
    assert_eq!(receiver.tile_data((0, 0)), tile);
}

#[test]
fn remove_tile_clears_cache_and_mesh() {
    let geometry = ground_plane(Vec3::ZERO, 10.0);
    let mut mesh = built_mesh(&geometry);

    mesh.remove_tile((0, 0));
    assert!(mesh.tile_data((0, 0)).is_empty());
    assert!(mesh
        .find_nearest_point(Vec3::new(5.0, 0.0, 5.0), Vec3::new(1.0, 2.0, 1.0))
        .is_none());
    assert_eq!(mesh.tile_cache().expect("cache").tile_count(), 0);
}

#[test]
fn events_fire_for_build_and_obstacles() {
    let record = Rc::new(RefCell::new(Vec::new()));
    let geometry = ground_plane(Vec3::ZERO, 10.0);

    let mut mesh = DynamicNavMesh::new(NavBuildSettings::default());
    mesh.set_event_sink(Box::new(SharedSink(record.clone())));
    mesh.set_anchor(&IdentityTransform);
    assert!(mesh.build(&geometry));

    {
        let events = record.borrow();
        assert!(events.contains(&NavigationEvent::MeshRebuilt));
        assert!(events
            .iter()
            .any(|e| matches!(e, NavigationEvent::AreaRebuilt { .. })));
    }

    record.borrow_mut().clear();
    let id = mesh.add_obstacle(ObstacleDesc {
        position: Vec3::new(5.0, -0.5, 5.0),
        radius: 1.0,
        height: 2.0,
    });
    mesh.remove_obstacle(id);
    let events = record.borrow();
    assert!(events
        .iter()
        .any(|e| matches!(e, NavigationEvent::ObstacleAdded { .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, NavigationEvent::ObstacleRemoved { .. })));
}

#[test]
fn off_mesh_connections_attach_to_rebuilt_tiles() {
    let mut geometry = ground_plane(Vec3::ZERO, 10.0);
    push_plane(&mut geometry, Vec3::new(0.0, 4.0, 0.0), 2.0);

    let mut mesh = DynamicNavMesh::new(NavBuildSettings::default());
    mesh.set_anchor(&IdentityTransform);
    mesh.add_connection(tilenav_dynamic::OffMeshConnection {
        start: Vec3::new(1.0, 0.0, 1.0),
        end: Vec3::new(1.0, 4.0, 1.0),
        radius: 0.5,
        mask: 1,
        area_id: 63,
        bidirectional: true,
        enabled: true,
    });
    assert!(mesh.build(&geometry));

    let nav = mesh.nav_mesh().expect("mesh");
    let has_link = nav
        .tiles()
        .any(|tile| !tile.off_mesh_links.is_empty());
    assert!(has_link);
}
