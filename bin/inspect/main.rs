//! Generates a world, edits it, and logs what the store looks like afterwards.
//!
//! Usage: `basalt-inspect [config.ron]`

use basalt::basalt_map::basalt_core::glam::{IVec3, Vec3A};
use basalt::basalt_map::{VoxelType, VoxelUnits, WorldSnapshot};
use basalt::{Brush, Config, FloodFillTool, PaintTool, SphereTool, TerrainGenerator, World};

use std::error::Error;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run() {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let config = match std::env::args().nth(1) {
        Some(path) => Config::read_file(&path)?,
        None => Config::default(),
    };
    log::info!("{:?}", config);

    let mut world = World::new(config);
    let terrain = TerrainGenerator::default();
    world.generate(&terrain)?;
    world.log_stats();

    let size = world.requested_size().0.as_vec3a();
    let center = Vec3A::new(size.x * 0.5, terrain.base_height, size.z * 0.5);
    world.apply_tool(&SphereTool {
        center,
        radius: 12.0,
        brush: Brush::Erase,
    })?;
    world.apply_tool(&PaintTool {
        center,
        radius: 16.0,
        voxel_type: VoxelType(3),
    })?;
    let report = world.update()?;
    log::info!(
        "Update changed {} chunks, {} block runs, {} payloads and {} groups",
        report.changes.chunks.len(),
        report.changes.block_runs.len(),
        report.changes.payloads.len(),
        report.propagation.updates.len()
    );

    // Recolor the ground connected to the bottom of the crater.
    let seed = VoxelUnits(IVec3::new(center.x as i32, 1, center.z as i32));
    let flood = FloodFillTool {
        seed,
        voxel_type: VoxelType(5),
        limit: world.config().tools.flood_fill_limit,
    };
    let replaced = world.store().edit(|session| flood.fill(session))?;
    world.update()?;
    log::info!("Flood fill replaced {} voxels", replaced);

    let eye = Vec3A::new(center.x, size.y - 0.5, center.z);
    match world.pick(eye, Vec3A::new(0.1, -1.0, 0.05)) {
        Some(t) => log::info!("Picked voxel type {} looking down from {:?}", t.0, eye),
        None => log::info!("Nothing below {:?}", eye),
    }

    let mut bytes = Vec::new();
    world.store().snapshot().write_to(&mut bytes)?;
    let restored = WorldSnapshot::read_from(bytes.as_slice())?;
    log::info!(
        "Snapshot is {} bytes compressed, {} chunk words",
        bytes.len(),
        restored.chunk_words.len()
    );

    world.log_stats();

    Ok(())
}
