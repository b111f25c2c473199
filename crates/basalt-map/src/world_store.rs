use crate::cell::VoxelCell;
use crate::change_set::ChangeSet;
use crate::config::StoreConfig;
use crate::coordinates::*;
use crate::error::{CommitError, SnapshotError, StagingError};
use crate::hierarchy::{ChunkCounts, VoxelHierarchy};
use crate::propagation::{ChangePropagator, PropagationReport};
use crate::raycast::RayHit;
use crate::snapshot::WorldSnapshot;
use crate::staging::{EditSession, EditStaging};
use crate::store::ContentAddressedStore;
use crate::tag::{ChunkClass, NodeTag};
use crate::units::*;

use basalt_core::glam::{IVec3, Vec3A};
use parking_lot::Mutex;

/// One voxel world: the hierarchy, its dedup table, pending edits and the clear distance field.
///
/// Readers and tools only need `&WorldStore`. Commits and propagation serialize on their own locks.
pub struct WorldStore {
    hierarchy: VoxelHierarchy,
    store: Mutex<ContentAddressedStore>,
    staging: EditStaging,
    propagator: Mutex<ChangePropagator>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StoreStats {
    pub chunks: ChunkCounts,
    pub block_runs: usize,
    pub payloads: usize,
    pub payload_references: u64,
    /// Mixed block references per unique payload.
    pub compression_ratio: f64,
    pub chunk_memory_bytes: usize,
    pub block_memory_bytes: usize,
    pub voxel_memory_bytes: usize,
}

impl WorldStore {
    /// An empty world of `size_in_chunks`.
    pub fn new(size_in_chunks: ChunkUnits<IVec3>, config: &StoreConfig) -> Self {
        let shape = WorldShape::new(size_in_chunks);
        Self::from_hierarchy(
            VoxelHierarchy::new(shape),
            ContentAddressedStore::new(config),
            config,
        )
    }

    fn from_hierarchy(
        hierarchy: VoxelHierarchy,
        store: ContentAddressedStore,
        config: &StoreConfig,
    ) -> Self {
        let propagator = ChangePropagator::new(hierarchy.shape().clone());
        Self {
            hierarchy,
            store: Mutex::new(store),
            staging: EditStaging::new(config.max_staged_chunks),
            propagator: Mutex::new(propagator),
        }
    }

    pub fn shape(&self) -> &WorldShape {
        self.hierarchy.shape()
    }

    pub fn hierarchy(&self) -> &VoxelHierarchy {
        &self.hierarchy
    }

    /// Opens a staging session. Any number may be open at once, but a commit waits for all of them to close.
    pub fn begin_edit(&self) -> EditSession<'_> {
        self.staging.begin(&self.hierarchy)
    }

    pub fn edit<T>(&self, f: impl FnOnce(&EditSession) -> T) -> T {
        f(&self.begin_edit())
    }

    pub fn stage_voxel_write(&self, p: VoxelUnits<IVec3>, cell: VoxelCell) -> Result<(), StagingError> {
        self.edit(|session| session.write_voxel(p, cell))
    }

    pub fn stage_fill(&self, chunk: ChunkUnits<IVec3>, cell: VoxelCell) -> Result<(), StagingError> {
        self.edit(|session| session.fill_chunk(chunk, cell))
    }

    pub fn num_staged_chunks(&self) -> usize {
        self.staging.num_staged_chunks()
    }

    pub fn is_over_budget(&self) -> bool {
        self.staging.is_over_budget()
    }

    /// Makes every staged edit visible at once, or none of them.
    pub fn commit_edits(&self) -> Result<ChangeSet, CommitError> {
        self.staging
            .finalize(&self.hierarchy, &self.store, &self.propagator)
    }

    pub fn classify(&self, chunk: ChunkUnits<IVec3>) -> ChunkClass {
        self.hierarchy.classify(chunk)
    }

    pub fn read_voxel(&self, p: VoxelUnits<IVec3>) -> VoxelCell {
        self.hierarchy.read_voxel(p)
    }

    pub fn trace(&self, origin: Vec3A, dir: Vec3A) -> Option<RayHit> {
        self.hierarchy.trace(origin, dir)
    }

    pub fn mark_changed(&self, chunk: ChunkUnits<IVec3>) -> bool {
        self.propagator.lock().mark_changed(chunk)
    }

    pub fn propagate(&self) -> PropagationReport {
        self.propagator.lock().propagate()
    }

    /// `None` outside of the world.
    pub fn clear_distance(&self, group: GroupUnits<IVec3>) -> Option<[u8; 6]> {
        self.propagator.lock().clear_distance(group)
    }

    pub fn stats(&self) -> StoreStats {
        let store = self.store.lock();
        let pool = self.hierarchy.pool();
        StoreStats {
            chunks: self.hierarchy.count_chunks(),
            block_runs: pool.num_block_runs(),
            payloads: store.len(),
            payload_references: store.total_references(),
            compression_ratio: store.compression_ratio(),
            chunk_memory_bytes: self.hierarchy.chunk_memory_bytes(),
            block_memory_bytes: pool.block_memory_bytes(),
            voxel_memory_bytes: pool.voxel_memory_bytes(),
        }
    }

    /// Staged edits are not part of the snapshot.
    pub fn snapshot(&self) -> WorldSnapshot {
        WorldSnapshot::capture(&self.hierarchy)
    }

    /// Restores a world and recomputes the clear distance field around its non-empty chunks.
    pub fn from_snapshot(snapshot: WorldSnapshot, config: &StoreConfig) -> Result<Self, SnapshotError> {
        let (hierarchy, store) = snapshot.restore(config)?;
        let world = Self::from_hierarchy(hierarchy, store, config);
        {
            let mut propagator = world.propagator.lock();
            for i in 0..world.shape().num_chunks() {
                if world.hierarchy.chunk_tag_at(i) != NodeTag::Empty {
                    propagator.mark_changed(world.shape().chunk_coords(i));
                }
            }
            propagator.propagate();
        }
        Ok(world)
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
    use crate::cell::VoxelType;
    use crate::propagation::GroupValue;
    use crate::store::hash_payload;

    use basalt_core::approx::assert_relative_eq;

    fn world_32() -> WorldStore {
        WorldStore::new(ChunkUnits(IVec3::splat(2)), &StoreConfig::default())
    }

    #[test]
    fn single_voxel_world() {
        let world = world_32();
        let cell = VoxelCell::solid(VoxelType(5));
        world.stage_voxel_write(VoxelUnits(IVec3::ZERO), cell).unwrap();
        let changes = world.commit_edits().unwrap();

        assert_eq!(world.classify(ChunkUnits(IVec3::ZERO)), ChunkClass::Mixed);
        for chunk in extent_points(world.shape().chunk_extent().0).skip(1) {
            assert_eq!(world.classify(ChunkUnits(chunk)), ChunkClass::Empty);
        }

        let run = world
            .hierarchy()
            .chunk_tag(ChunkUnits(IVec3::ZERO))
            .mixed_slot()
            .unwrap();
        let mut blocks = [0; BLOCKS_PER_CHUNK];
        world.hierarchy().pool().read_block_run(run, &mut blocks);
        let mixed: Vec<_> = blocks
            .iter()
            .filter_map(|&w| NodeTag::from_bits(w).mixed_slot())
            .collect();
        assert_eq!(mixed.len(), 1);
        assert_eq!(NodeTag::from_bits(blocks[0]), NodeTag::Mixed(mixed[0]));

        assert_eq!(changes.payloads.len(), 1);
        let hash = hash_payload(&changes.payloads[0].words).hash;
        assert_eq!(world.store.lock().ref_count(hash, mixed[0]), Some(1));

        let hit = world
            .trace(Vec3A::new(-5.0, 0.5, 0.5), Vec3A::new(1.0, 0.0, 0.0))
            .unwrap();
        assert_eq!(hit.voxel_type, VoxelType(5));
        assert_eq!(hit.cell, VoxelUnits(IVec3::ZERO));
        assert_eq!(hit.normal, IVec3::new(-1, 0, 0));
        assert_relative_eq!(hit.distance, 5.0);
    }

    #[test]
    fn staged_chunks_round_trip() {
        let world = world_32();
        let mut flat = [0; WORDS_PER_CHUNK];
        for (i, w) in flat.iter_mut().enumerate().step_by(7) {
            *w = 0x8000_0000 | (i as u32 % 3);
        }
        let mixed_chunk = ChunkUnits(IVec3::new(1, 0, 0));
        let uniform_chunk = ChunkUnits(IVec3::new(0, 1, 0));
        let empty_chunk = ChunkUnits(IVec3::new(0, 0, 1));

        world.edit(|session| {
            let buffer = session.buffer(mixed_chunk).unwrap();
            for (i, &w) in flat.iter().enumerate() {
                for high in [false, true] {
                    let cell = crate::cell::cell_in_word(w, high);
                    let index = FlatIndex {
                        block: i / WORDS_PER_BLOCK,
                        cell: (i % WORDS_PER_BLOCK) * 2 + high as usize,
                    };
                    buffer.write_cell(index.to_local(), cell);
                }
            }
            session
                .fill_chunk(uniform_chunk, VoxelCell::solid(VoxelType(3)))
                .unwrap();
            session.fill_chunk(empty_chunk, VoxelCell::EMPTY).unwrap();
        });
        world.commit_edits().unwrap();

        let h = world.hierarchy();
        let mut out = [1; WORDS_PER_CHUNK];
        h.fill_chunk_flat(h.shape().chunk_index(mixed_chunk).unwrap(), &mut out);
        assert_eq!(out, flat);

        assert_eq!(world.classify(uniform_chunk), ChunkClass::Uniform(VoxelType(3)));
        h.fill_chunk_flat(h.shape().chunk_index(uniform_chunk).unwrap(), &mut out);
        assert!(out.iter().all(|&w| w == 0x8003_8003));

        assert_eq!(world.classify(empty_chunk), ChunkClass::Empty);
        h.fill_chunk_flat(h.shape().chunk_index(empty_chunk).unwrap(), &mut out);
        assert!(out.iter().all(|&w| w == 0));
    }

    #[test]
    fn empty_blocks_never_reach_the_store() {
        let world = world_32();
        world.edit(|session| {
            // Both blocks are written but end up all zero.
            for p in [IVec3::new(0, 0, 0), IVec3::new(4, 0, 0)] {
                session.write_voxel(VoxelUnits(p), VoxelCell(0x8001)).unwrap();
                session.write_voxel(VoxelUnits(p), VoxelCell::EMPTY).unwrap();
            }
        });
        let changes = world.commit_edits().unwrap();
        assert!(changes.payloads.is_empty());
        assert_eq!(world.stats().payloads, 0);
        assert_eq!(world.classify(ChunkUnits(IVec3::ZERO)), ChunkClass::Empty);
    }

    #[test]
    fn rejected_batch_keeps_committed_state() {
        let world = WorldStore::new(
            ChunkUnits(IVec3::splat(2)),
            &StoreConfig {
                probe_limit: 1,
                ..Default::default()
            },
        );
        world
            .stage_voxel_write(VoxelUnits(IVec3::new(9, 9, 9)), VoxelCell(0x8004))
            .unwrap();
        world.commit_edits().unwrap();
        let before = world.stats();

        // Two colliding payloads in one batch.
        world.edit(|session| {
            for (x, a, b) in [(2, 0x8003, 0x8007), (18, 0x8002, 0x8026)] {
                session
                    .write_voxel(VoxelUnits(IVec3::new(x, 3, 3)), VoxelCell(a))
                    .unwrap();
                session
                    .write_voxel(VoxelUnits(IVec3::new(x + 1, 3, 3)), VoxelCell(b))
                    .unwrap();
            }
            session
                .write_voxel(VoxelUnits(IVec3::new(9, 9, 9)), VoxelCell::EMPTY)
                .unwrap();
        });
        assert!(world.commit_edits().is_err());

        let after = world.stats();
        assert_eq!(after.chunks, before.chunks);
        assert_eq!(after.block_runs, before.block_runs);
        assert_eq!(after.payloads, before.payloads);
        assert_eq!(after.payload_references, before.payload_references);
        assert_eq!(world.hierarchy().pool().num_payloads(), 1);
        assert_eq!(world.read_voxel(VoxelUnits(IVec3::new(9, 9, 9))), VoxelCell(0x8004));
        assert_eq!(world.num_staged_chunks(), 0);
    }

    #[test]
    fn commits_seed_the_clear_distance_field() {
        let world = WorldStore::new(ChunkUnits(IVec3::new(12, 4, 4)), &StoreConfig::default());
        assert_eq!(world.clear_distance(GroupUnits(IVec3::ZERO)), Some([31; 6]));

        world
            .stage_fill(ChunkUnits(IVec3::ZERO), VoxelCell::solid(VoxelType(1)))
            .unwrap();
        world.commit_edits().unwrap();
        let report = world.propagate();

        assert_eq!(report.num_seeds, 1);
        assert_eq!(report.updates[0].value, GroupValue::Rebuild);
        assert_eq!(world.clear_distance(GroupUnits(IVec3::ZERO)), Some([0; 6]));
        assert_eq!(
            world.clear_distance(GroupUnits(IVec3::new(1, 0, 0))),
            Some([0, 28, 28, 28, 28, 28])
        );
        assert_eq!(world.clear_distance(GroupUnits(IVec3::new(2, 0, 0))).unwrap()[0], 4);
        assert_eq!(world.clear_distance(GroupUnits(IVec3::new(3, 0, 0))), None);
    }

    #[test]
    fn snapshot_round_trip() {
        let world = world_32();
        world.edit(|session| {
            session
                .write_voxel(VoxelUnits(IVec3::new(1, 2, 3)), VoxelCell(0x8002))
                .unwrap();
            session
                .write_voxel(VoxelUnits(IVec3::new(21, 2, 3)), VoxelCell(0x8002))
                .unwrap();
            session
                .fill_chunk(ChunkUnits(IVec3::ONE), VoxelCell::solid(VoxelType(8)))
                .unwrap();
        });
        world.commit_edits().unwrap();

        let mut bytes = Vec::new();
        world.snapshot().write_to(&mut bytes).unwrap();
        let restored =
            WorldStore::from_snapshot(WorldSnapshot::read_from(bytes.as_slice()).unwrap(), &StoreConfig::default())
                .unwrap();

        assert_eq!(restored.snapshot(), world.snapshot());
        let (a, b) = (restored.stats(), world.stats());
        assert_eq!(a.chunks, b.chunks);
        assert_eq!(a.payloads, b.payloads);
        assert_eq!(a.payload_references, b.payload_references);
        assert_eq!(restored.read_voxel(VoxelUnits(IVec3::new(21, 2, 3))), VoxelCell(0x8002));
        assert_eq!(restored.clear_distance(GroupUnits(IVec3::ZERO)), Some([0; 6]));

        // The rebuilt table dedups against restored payloads.
        restored
            .stage_voxel_write(VoxelUnits(IVec3::new(1, 18, 3)), VoxelCell(0x8002))
            .unwrap();
        restored.commit_edits().unwrap();
        assert_eq!(restored.stats().payloads, 1);
    }

    #[test]
    fn oversized_snapshot_is_rejected() {
        let snapshot = WorldSnapshot {
            size_in_chunks: [2048, 2048, 2048],
            chunk_words: Vec::new(),
            block_words: Vec::new(),
            voxel_words: Vec::new(),
        };
        assert!(matches!(
            WorldStore::from_snapshot(snapshot, &StoreConfig::default()),
            Err(SnapshotError::Malformed(_))
        ));
    }
}
