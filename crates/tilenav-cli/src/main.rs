//! CLI utility for building and inspecting navigation mesh snapshots

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use glam::Vec3;
use serde::Deserialize;

use tilenav_common::BoundingBox;
use tilenav_dynamic::{
    AreaVolume, DynamicNavMesh, IdentityTransform, NavBuildSettings, ObstacleDesc, StaticGeometry,
};

/// Builds dynamic navigation meshes from triangle-soup scenes
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build a navigation mesh snapshot from a JSON scene
    Build {
        /// Input scene file (JSON)
        #[clap(long, value_parser)]
        input: PathBuf,

        /// Output snapshot file
        #[clap(long, value_parser)]
        output: PathBuf,

        /// Voxel cell size (world units)
        #[clap(long, default_value = "0.3")]
        cell_size: f32,

        /// Voxel cell height (world units)
        #[clap(long, default_value = "0.2")]
        cell_height: f32,

        /// Tile edge length in cells
        #[clap(long, default_value = "64")]
        tile_size: i32,

        /// Agent height (world units)
        #[clap(long, default_value = "2.0")]
        agent_height: f32,

        /// Agent radius (world units)
        #[clap(long, default_value = "0.6")]
        agent_radius: f32,

        /// Maximum step height (world units)
        #[clap(long, default_value = "0.9")]
        agent_max_climb: f32,

        /// Maximum walkable slope in degrees
        #[clap(long, default_value = "45.0")]
        agent_max_slope: f32,
    },

    /// Print the tile table of a snapshot
    Info {
        /// Input snapshot file
        #[clap(long, value_parser)]
        input: PathBuf,
    },
}

/// Triangle-soup scene description.
#[derive(Debug, Deserialize)]
struct Scene {
    meshes: Vec<SceneMesh>,
    #[serde(default)]
    area_volumes: Vec<SceneVolume>,
    #[serde(default)]
    obstacles: Vec<SceneObstacle>,
}

#[derive(Debug, Deserialize)]
struct SceneMesh {
    vertices: Vec<[f32; 3]>,
    indices: Vec<u32>,
}

#[derive(Debug, Deserialize)]
struct SceneVolume {
    min: [f32; 3],
    max: [f32; 3],
    area_id: u8,
}

#[derive(Debug, Deserialize)]
struct SceneObstacle {
    position: [f32; 3],
    radius: f32,
    height: f32,
}

fn load_scene(path: &PathBuf) -> Result<(StaticGeometry, Vec<SceneObstacle>)> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read scene file {}", path.display()))?;
    let scene: Scene = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse scene file {}", path.display()))?;

    if scene.meshes.is_empty() {
        bail!("scene contains no meshes");
    }

    let mut geometry = StaticGeometry::new();
    for mesh in &scene.meshes {
        let vertices: Vec<Vec3> = mesh.vertices.iter().map(|v| Vec3::from_array(*v)).collect();
        geometry.push_mesh(&vertices, &mesh.indices);
    }
    for volume in &scene.area_volumes {
        geometry.push_area_volume(AreaVolume {
            bounds: BoundingBox::new(Vec3::from_array(volume.min), Vec3::from_array(volume.max)),
            area_id: volume.area_id,
        });
    }
    Ok((geometry, scene.obstacles))
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    match args.command {
        Commands::Build {
            input,
            output,
            cell_size,
            cell_height,
            tile_size,
            agent_height,
            agent_radius,
            agent_max_climb,
            agent_max_slope,
        } => {
            let (geometry, obstacles) = load_scene(&input)?;

            let mut settings = NavBuildSettings::default();
            settings.cell_size = cell_size;
            settings.cell_height = cell_height;
            settings.tile_size = tile_size;
            settings.agent_height = agent_height;
            settings.agent_radius = agent_radius;
            settings.agent_max_climb = agent_max_climb;
            settings.agent_max_slope = agent_max_slope;

            let mut mesh = DynamicNavMesh::new(settings);
            mesh.set_anchor(&IdentityTransform);
            if !mesh.build(&geometry) {
                bail!("navigation mesh build failed");
            }
            for obstacle in obstacles {
                mesh.add_obstacle(ObstacleDesc {
                    position: Vec3::from_array(obstacle.position),
                    radius: obstacle.radius,
                    height: obstacle.height,
                });
            }
            if !mesh.update_until_idle(1024) {
                log::warn!("tile cache did not settle; snapshot reflects a partial merge");
            }

            let data = mesh.navigation_data();
            if data.is_empty() {
                bail!("scene produced an empty navigation mesh");
            }
            fs::write(&output, &data)
                .with_context(|| format!("failed to write snapshot {}", output.display()))?;

            let (tiles_x, tiles_z) = mesh.num_tiles();
            let cached = mesh
                .tile_cache()
                .map(|cache| cache.tile_count())
                .unwrap_or(0);
            println!(
                "built {tiles_x} x {tiles_z} tile grid, {cached} cached layers, {} bytes",
                data.len()
            );
        }

        Commands::Info { input } => {
            let data = fs::read(&input)
                .with_context(|| format!("failed to read snapshot {}", input.display()))?;
            let mut mesh = DynamicNavMesh::new(NavBuildSettings::default());
            if !mesh.set_navigation_data(&data) {
                bail!("snapshot is malformed");
            }

            let (tiles_x, tiles_z) = mesh.num_tiles();
            let bounds = mesh.bounding_box();
            println!("grid: {tiles_x} x {tiles_z} tiles");
            println!(
                "bounds: ({:.2}, {:.2}, {:.2}) .. ({:.2}, {:.2}, {:.2})",
                bounds.min.x, bounds.min.y, bounds.min.z, bounds.max.x, bounds.max.y, bounds.max.z
            );
            if let Some(cache) = mesh.tile_cache() {
                println!("cached layers: {}", cache.tile_count());
                for (x, z) in cache.tile_coordinates() {
                    let layers = cache.tiles_at(x, z).len();
                    let bytes: usize = cache
                        .tiles_at(x, z)
                        .iter()
                        .filter_map(|&r| cache.tile_by_ref(r))
                        .map(|t| t.data.len())
                        .sum();
                    println!("  tile ({x}, {z}): {layers} layer(s), {bytes} bytes");
                }
            }
        }
    }

    Ok(())
}
