use crate::cell::{cell_in_word, splat_cell, VoxelCell};
use crate::coordinates::*;
use crate::pool::{AllocationPool, BlockRun, Payload, BLOCK_RUN_WORDS};
use crate::tag::{ChunkClass, NodeTag};
use crate::units::*;

use basalt_core::allocator::{AllocError, Slot};
use basalt_core::glam::IVec3;
use std::sync::atomic::{AtomicU32, Ordering};

/// The world → chunk → block → voxel tree.
///
/// Every chunk has one tag word. Mixed chunks own a run of 64 block tags in the pool, and mixed blocks point at shared
/// payloads. Each word is updated atomically, so readers never take a lock, but a reader racing a commit can see a new chunk
/// tag above old block content. Readers must tolerate that.
pub struct VoxelHierarchy {
    shape: WorldShape,
    chunks: Vec<AtomicU32>,
    pool: AllocationPool,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ChunkCounts {
    pub empty: usize,
    pub uniform: usize,
    pub mixed: usize,
}

impl VoxelHierarchy {
    /// An entirely empty world.
    pub fn new(shape: WorldShape) -> Self {
        let chunks = (0..shape.num_chunks())
            .map(|_| AtomicU32::new(NodeTag::Empty.to_bits()))
            .collect();
        Self {
            shape,
            chunks,
            pool: AllocationPool::default(),
        }
    }

    /// `chunk_words` must hold one packed tag per chunk of `shape`.
    pub fn from_parts(shape: WorldShape, chunk_words: Vec<u32>, pool: AllocationPool) -> Self {
        debug_assert_eq!(chunk_words.len(), shape.num_chunks());
        Self {
            shape,
            chunks: chunk_words.into_iter().map(AtomicU32::new).collect(),
            pool,
        }
    }

    pub fn shape(&self) -> &WorldShape {
        &self.shape
    }

    pub fn pool(&self) -> &AllocationPool {
        &self.pool
    }

    #[inline]
    pub fn chunk_tag_at(&self, index: usize) -> NodeTag {
        NodeTag::from_bits(self.chunks[index].load(Ordering::Acquire))
    }

    /// Chunks outside the world read as empty.
    #[inline]
    pub fn chunk_tag(&self, chunk: ChunkUnits<IVec3>) -> NodeTag {
        self.shape
            .chunk_index(chunk)
            .map_or(NodeTag::Empty, |i| self.chunk_tag_at(i))
    }

    pub fn classify(&self, chunk: ChunkUnits<IVec3>) -> ChunkClass {
        self.chunk_tag(chunk).into()
    }

    /// The tag of block `block` (linear index in the chunk) under a chunk tagged `chunk_tag`.
    #[inline]
    pub fn block_tag(&self, chunk_tag: NodeTag, block: usize) -> NodeTag {
        match chunk_tag {
            NodeTag::Mixed(run) => NodeTag::from_bits(self.pool.load_block_word(run, block)),
            uniform => uniform,
        }
    }

    pub fn read_voxel(&self, p: VoxelUnits<IVec3>) -> VoxelCell {
        let chunk_tag = self.chunk_tag(in_chunk(p));
        let flat = FlatIndex::from_local(local_in_chunk(p));
        match self.block_tag(chunk_tag, flat.block) {
            NodeTag::Mixed(slot) => {
                let word = self.pool.load_payload_word(slot, flat.cell / 2);
                cell_in_word(word, flat.is_high())
            }
            uniform => uniform.uniform_cell().unwrap_or_default(),
        }
    }

    /// Expands a chunk into the flat block-major layout: word `block * 32 + cell / 2`.
    pub fn fill_chunk_flat(&self, index: usize, out: &mut [u32; WORDS_PER_CHUNK]) {
        match self.chunk_tag_at(index) {
            NodeTag::Mixed(run) => {
                let mut blocks: BlockRun = [0; BLOCK_RUN_WORDS];
                self.pool.read_block_run(run, &mut blocks);
                for (block, dst) in blocks.iter().zip(out.chunks_exact_mut(WORDS_PER_BLOCK)) {
                    self.expand_block(NodeTag::from_bits(*block), dst);
                }
            }
            uniform => {
                let cell = uniform.uniform_cell().unwrap_or_default();
                out.fill(splat_cell(cell));
            }
        }
    }

    /// The 32 packed words of the block containing voxel `p`.
    pub fn fill_block_flat(&self, p: VoxelUnits<IVec3>, out: &mut Payload) {
        let chunk_tag = self.chunk_tag(in_chunk(p));
        let flat = FlatIndex::from_local(local_in_chunk(p));
        self.expand_block(self.block_tag(chunk_tag, flat.block), out);
    }

    fn expand_block(&self, tag: NodeTag, out: &mut [u32]) {
        match tag {
            NodeTag::Mixed(slot) => {
                let mut payload: Payload = [0; WORDS_PER_BLOCK];
                self.pool.read_payload(slot, &mut payload);
                out.copy_from_slice(&payload);
            }
            uniform => out.fill(splat_cell(uniform.uniform_cell().unwrap_or_default())),
        }
    }

    /// Stores a chunk's block tags, reusing the chunk's run if it already has one.
    pub fn write_block_run(
        &self,
        index: usize,
        blocks: &[NodeTag; BLOCKS_PER_CHUNK],
    ) -> Result<Slot, AllocError> {
        let run = match self.chunk_tag_at(index) {
            NodeTag::Mixed(run) => run,
            _ => self.pool.allocate_block_run()?,
        };
        self.store_block_run(run, blocks);
        Ok(run)
    }

    /// Writes block tags into a run that was already allocated. Returns the packed words.
    pub fn store_block_run(&self, run: Slot, blocks: &[NodeTag; BLOCKS_PER_CHUNK]) -> BlockRun {
        let words: BlockRun = (*blocks).map(NodeTag::to_bits);
        self.pool.write_block_run(run, &words);
        words
    }

    /// Publishes a new chunk tag and returns the previous one. A block run the chunk no longer uses goes back to the pool
    /// only after the new tag is visible.
    pub fn write_chunk(&self, index: usize, tag: NodeTag) -> NodeTag {
        let previous = NodeTag::from_bits(self.chunks[index].swap(tag.to_bits(), Ordering::AcqRel));
        if let NodeTag::Mixed(old_run) = previous {
            if tag.mixed_slot() != Some(old_run) {
                self.pool.free_block_run(old_run);
            }
        }
        previous
    }

    pub fn export_chunk_words(&self) -> Vec<u32> {
        self.chunks
            .iter()
            .map(|w| w.load(Ordering::Acquire))
            .collect()
    }

    pub fn count_chunks(&self) -> ChunkCounts {
        let mut counts = ChunkCounts::default();
        for i in 0..self.chunks.len() {
            match self.chunk_tag_at(i) {
                NodeTag::Empty => counts.empty += 1,
                NodeTag::Uniform(_) => counts.uniform += 1,
                NodeTag::Mixed(_) => counts.mixed += 1,
            }
        }
        counts
    }

    pub fn chunk_memory_bytes(&self) -> usize {
        self.chunks.len() * std::mem::size_of::<AtomicU32>()
    }
}

/// Whether replacing `previous` with `new` must be reported to the clear distance field: emptiness changed, or the chunk is
/// empty after the write.
pub fn affects_clear_distance(previous: NodeTag, new: NodeTag) -> bool {
    previous.is_empty() != new.is_empty() || new.is_empty()
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
