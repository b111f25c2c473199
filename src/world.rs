use crate::config::Config;
use crate::generator::WorldGenerator;
use crate::tools::EditTool;

use basalt_core::glam::{IVec3, Vec3A};
use basalt_core::ilattice::prelude::Extent;
use basalt_core::work_timer::{MovingAverageMs, WorkTimer};
use basalt_map::{
    extent_points, ChangeSet, ChunkUnits, CommitError, PropagationReport, StagingError, StoreStats, VoxelType,
    VoxelUnits, WorldStore, CHUNK_EDGE, GROUP_EDGE, WORDS_PER_CHUNK,
};
use rayon::prelude::*;
use std::time::Instant;
use thiserror::Error;

/// Segments between generation progress messages.
const PROGRESS_INTERVAL: usize = 50;

#[derive(Debug, Error)]
pub enum WorldError {
    #[error(transparent)]
    Staging(#[from] StagingError),
    #[error(transparent)]
    Commit(#[from] CommitError),
}

/// Everything that changed since the last update.
#[derive(Debug, Default)]
pub struct UpdateReport {
    pub changes: ChangeSet,
    pub propagation: PropagationReport,
}

/// An editable world and the bookkeeping around it.
///
/// The world is sized in whole generation segments, so it may be larger than requested. Generators only fill the requested
/// region.
pub struct World {
    config: Config,
    requested_size: VoxelUnits<IVec3>,
    segment_edge_in_chunks: i32,
    store: WorldStore,
    /// Changes from commits that were forced before the next update.
    pending: ChangeSet,
    change_processing: MovingAverageMs,
}

impl World {
    pub fn new(config: Config) -> Self {
        let [x, y, z] = config.world.size;
        let requested_size = IVec3::new(x as i32, y as i32, z as i32).max(IVec3::ONE);
        let segment_edge_in_chunks = config.world.segment_size_in_groups.max(1) as i32 * GROUP_EDGE;

        let chunks = (requested_size + IVec3::splat(CHUNK_EDGE - 1)) / CHUNK_EDGE;
        let segments = (chunks + IVec3::splat(segment_edge_in_chunks - 1)) / segment_edge_in_chunks;
        let size_in_chunks = segments * segment_edge_in_chunks;

        log::info!(
            "Creating world of {:?} voxels ({:?} chunks) for a requested size of {:?}",
            size_in_chunks * CHUNK_EDGE,
            size_in_chunks,
            requested_size
        );

        Self {
            store: WorldStore::new(ChunkUnits(size_in_chunks), &config.store),
            config,
            requested_size: VoxelUnits(requested_size),
            segment_edge_in_chunks,
            pending: ChangeSet::default(),
            change_processing: MovingAverageMs::new(0.01),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn requested_size(&self) -> VoxelUnits<IVec3> {
        self.requested_size
    }

    pub fn store(&self) -> &WorldStore {
        &self.store
    }

    pub fn num_segments(&self) -> IVec3 {
        self.store.shape().size_in_chunks().0 / self.segment_edge_in_chunks
    }

    /// Fills the world from `generator`, one segment per commit.
    pub fn generate(&mut self, generator: &dyn WorldGenerator) -> Result<(), WorldError> {
        let start = Instant::now();
        let edge = self.segment_edge_in_chunks;
        let segments: Vec<_> = extent_points(Extent::from_min_and_shape(IVec3::ZERO, self.num_segments())).collect();
        let requested_size = self.requested_size;

        for (i, segment) in segments.iter().enumerate() {
            let chunks: Vec<_> =
                extent_points(Extent::from_min_and_shape(*segment * edge, IVec3::splat(edge))).collect();
            self.store.edit(|session| {
                chunks.par_iter().try_for_each(|&c| {
                    let chunk = ChunkUnits(c);
                    let mut flat = [0; WORDS_PER_CHUNK];
                    generator.generate_chunk(chunk, requested_size, &mut flat);
                    // Leave empty chunks alone so they don't seed the clear distance field.
                    if flat.iter().all(|&w| w == 0) && session.hierarchy().chunk_tag(chunk).is_empty() {
                        return Ok(());
                    }
                    session.write_chunk_flat(chunk, &flat)
                })
            })?;
            // Nobody mirrors the world yet, so the change sets are dropped.
            self.store.commit_edits()?;

            if (i + 1) % PROGRESS_INTERVAL == 0 {
                log::info!("Generated {}/{} segments", i + 1, segments.len());
            }
        }

        let propagation = self.store.propagate();
        let stats = self.store.stats();
        log::info!(
            "Generated world in {:.2?}: {} unique payloads, compression ratio {:.2}, {} groups updated",
            start.elapsed(),
            stats.payloads,
            stats.compression_ratio,
            propagation.updates.len()
        );

        Ok(())
    }

    /// Runs `tool` in a staging session. Commits early if too many chunks are staged.
    pub fn apply_tool(&mut self, tool: &dyn EditTool) -> Result<(), WorldError> {
        self.store.edit(|session| tool.apply(session))?;

        if self.store.is_over_budget() {
            log::warn!(
                "{} chunks staged, committing before the next update",
                self.store.num_staged_chunks()
            );
            let changes = self.store.commit_edits()?;
            self.pending.append(changes);
        }

        Ok(())
    }

    /// Commits staged edits and refreshes the clear distance field.
    pub fn update(&mut self) -> Result<UpdateReport, CommitError> {
        let store = &self.store;
        let mut timer = WorkTimer::start();
        let (changes, propagation) = timer.time_item(|| -> Result<_, CommitError> {
            let changes = store.commit_edits()?;
            Ok((changes, store.propagate()))
        })?;
        self.change_processing.add_sample(timer.total_cpu_time());

        let mut all = std::mem::take(&mut self.pending);
        all.append(changes);
        Ok(UpdateReport {
            changes: all,
            propagation,
        })
    }

    /// The type of the first voxel hit by a ray.
    pub fn pick(&self, origin: Vec3A, dir: Vec3A) -> Option<VoxelType> {
        self.store.trace(origin, dir).map(|hit| hit.voxel_type)
    }

    /// Moving average of the time spent in [`World::update`].
    pub fn change_processing_ms(&self) -> f32 {
        self.change_processing.get_ms()
    }

    pub fn stats(&self) -> StoreStats {
        self.store.stats()
    }

    pub fn log_stats(&self) {
        let stats = self.stats();
        let mib = |bytes: usize| bytes as f64 / (1024.0 * 1024.0);
        log::info!(
            "Chunks: {} empty, {} uniform, {} mixed ({:.2} MiB)",
            stats.chunks.empty,
            stats.chunks.uniform,
            stats.chunks.mixed,
            mib(stats.chunk_memory_bytes)
        );
        log::info!(
            "Blocks: {} runs ({:.2} MiB); voxels: {} payloads ({:.2} MiB), compression ratio {:.2}",
            stats.block_runs,
            mib(stats.block_memory_bytes),
            stats.payloads,
            mib(stats.voxel_memory_bytes),
            stats.compression_ratio
        );
        log::info!("Change processing: {:.3} ms", self.change_processing_ms());
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::WorldConfig;
    use crate::generator::TerrainGenerator;
    use crate::tools::{Brush, CubeTool};

    use approx::assert_relative_eq;
    use basalt_map::{ChunkClass, GroupUnits, GroupValue, StoreConfig, VoxelCell};

    fn config(size: [u32; 3]) -> Config {
        Config {
            world: WorldConfig {
                size,
                segment_size_in_groups: 1,
            },
            ..Default::default()
        }
    }

    fn flat_terrain() -> TerrainGenerator {
        TerrainGenerator {
            amplitude: 0.0,
            base_height: 10.0,
            ..Default::default()
        }
    }

    #[test]
    fn size_is_rounded_up_to_segments() {
        let world = World::new(config([100, 40, 70]));
        assert_eq!(world.store().shape().size_in_chunks(), ChunkUnits(IVec3::new(8, 4, 8)));
        assert_eq!(world.num_segments(), IVec3::new(2, 1, 2));
        assert_eq!(world.requested_size(), VoxelUnits(IVec3::new(100, 40, 70)));
    }

    #[test]
    fn generation_fills_only_the_requested_region() {
        let mut world = World::new(config([40, 64, 64]));
        world.generate(&flat_terrain()).unwrap();

        let store = world.store();
        assert_eq!(store.read_voxel(VoxelUnits(IVec3::new(30, 5, 5))), VoxelCell::solid(VoxelType(1)));
        assert_eq!(store.read_voxel(VoxelUnits(IVec3::new(30, 9, 5))), VoxelCell::solid(VoxelType(2)));
        assert!(store.read_voxel(VoxelUnits(IVec3::new(50, 5, 5))).is_empty());
        assert_eq!(store.classify(ChunkUnits(IVec3::new(0, 3, 0))), ChunkClass::Empty);
        // Solid chunks were committed and propagated.
        assert_eq!(store.clear_distance(GroupUnits(IVec3::ZERO)), Some([0; 6]));

        assert_eq!(world.pick(Vec3A::new(8.5, 40.5, 8.5), Vec3A::new(0.0, -1.0, 0.0)), Some(VoxelType(2)));
        let hit = store
            .trace(Vec3A::new(8.5, 40.5, 8.5), Vec3A::new(0.0, -1.0, 0.0))
            .unwrap();
        assert_relative_eq!(hit.distance, 30.5);
        assert_eq!(hit.normal, IVec3::new(0, 1, 0));
    }

    #[test]
    fn update_commits_and_propagates() {
        let mut world = World::new(config([64, 64, 64]));
        world
            .apply_tool(&CubeTool {
                center: Vec3A::splat(8.0),
                half_edge: 7.9,
                brush: Brush::Fill(VoxelType(3)),
            })
            .unwrap();
        assert_eq!(world.store().classify(ChunkUnits(IVec3::ZERO)), ChunkClass::Empty);

        let report = world.update().unwrap();
        assert_eq!(report.changes.chunks.len(), 1);
        assert_eq!(report.propagation.num_seeds, 1);
        assert_eq!(report.propagation.updates[0].value, GroupValue::Rebuild);
        assert_eq!(
            world.store().classify(ChunkUnits(IVec3::ZERO)),
            ChunkClass::Uniform(VoxelType(3))
        );
        assert!(world.change_processing_ms() >= 0.0);

        // Nothing left to do.
        let report = world.update().unwrap();
        assert!(report.changes.is_empty());
        assert!(report.propagation.is_empty());
    }

    #[test]
    fn over_budget_edits_are_committed_early() {
        let mut world = World::new(Config {
            store: StoreConfig {
                max_staged_chunks: 1,
                ..Default::default()
            },
            ..config([64, 64, 64])
        });
        world
            .apply_tool(&CubeTool {
                center: Vec3A::new(16.0, 8.0, 8.0),
                half_edge: 2.0,
                brush: Brush::Fill(VoxelType(4)),
            })
            .unwrap();

        // Visible before the update.
        assert_eq!(world.store().num_staged_chunks(), 0);
        assert!(!world.store().read_voxel(VoxelUnits(IVec3::new(15, 8, 8))).is_empty());

        let report = world.update().unwrap();
        assert_eq!(report.changes.chunks.len(), 2);
    }
}
