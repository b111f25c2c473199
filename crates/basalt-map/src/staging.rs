use crate::cell::{cell_in_word, replace_cell_in_word, splat_cell, VoxelCell};
use crate::change_set::ChangeSet;
use crate::commit::commit_chunks;
use crate::coordinates::*;
use crate::error::{CommitError, StagingError};
use crate::hierarchy::VoxelHierarchy;
use crate::pool::Payload;
use crate::propagation::ChangePropagator;
use crate::store::ContentAddressedStore;
use crate::units::*;

use basalt_core::glam::IVec3;
use basalt_core::SmallKeyHashMap;
use crossbeam::queue::SegQueue;
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use std::collections::hash_map::Entry;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

/// Spare buffers kept around for the next edit session.
const MAX_SPARE_BUFFERS: usize = 256;

/// A flat, editable copy of one chunk: word `block * 32 + cell / 2`, two cells per word.
///
/// Words are atomic so that tools writing different cells of the same word can't lose each other's updates. Ordering
/// between writes to the same cell is still up to the caller.
pub struct EditChunkBuffer {
    words: Box<[AtomicU32]>,
}

impl EditChunkBuffer {
    fn new() -> Self {
        Self {
            words: (0..WORDS_PER_CHUNK).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    fn load_from(&self, words: &[u32; WORDS_PER_CHUNK]) {
        for (dst, src) in self.words.iter().zip(words.iter()) {
            dst.store(*src, Ordering::Release);
        }
    }

    /// `local` must be in `[0, 16)^3`.
    #[inline]
    pub fn read_cell(&self, local: IVec3) -> VoxelCell {
        let i = FlatIndex::from_local(local);
        cell_in_word(self.words[i.word()].load(Ordering::Acquire), i.is_high())
    }

    /// `local` must be in `[0, 16)^3`.
    #[inline]
    pub fn write_cell(&self, local: IVec3, cell: VoxelCell) {
        let i = FlatIndex::from_local(local);
        let high = i.is_high();
        // The closure always returns Some, so this never fails.
        let _ = self.words[i.word()].fetch_update(Ordering::AcqRel, Ordering::Acquire, |w| {
            Some(replace_cell_in_word(w, high, cell))
        });
    }

    pub fn fill(&self, cell: VoxelCell) {
        let word = splat_cell(cell);
        for w in self.words.iter() {
            w.store(word, Ordering::Release);
        }
    }

    /// Copies out the 32 words of block `block`.
    pub fn read_block(&self, block: usize, out: &mut Payload) {
        let start = block * WORDS_PER_BLOCK;
        for (o, w) in out.iter_mut().zip(&self.words[start..start + WORDS_PER_BLOCK]) {
            *o = w.load(Ordering::Acquire);
        }
    }
}

/// A chunk buffer borrowed from an [`EditSession`]. It can't outlive the session, so every write through it is seen by the
/// next commit.
pub struct StagedBuffer<'s> {
    buffer: Arc<EditChunkBuffer>,
    marker: PhantomData<&'s ()>,
}

impl Deref for StagedBuffer<'_> {
    type Target = EditChunkBuffer;

    fn deref(&self) -> &EditChunkBuffer {
        &self.buffer
    }
}

#[derive(Default)]
struct StagedChunks {
    buffers: Mutex<SmallKeyHashMap<usize, Arc<EditChunkBuffer>>>,
}

/// Per-chunk edit buffers for the current session.
///
/// Tools share the read side of one coarse lock while they stage edits. Finalizing takes the write side, so no tool can see
/// a half-committed buffer set.
pub struct EditStaging {
    staged: RwLock<StagedChunks>,
    num_staged: AtomicUsize,
    spare: SegQueue<EditChunkBuffer>,
    max_staged_chunks: usize,
}

impl EditStaging {
    pub fn new(max_staged_chunks: usize) -> Self {
        Self {
            staged: RwLock::new(StagedChunks::default()),
            num_staged: AtomicUsize::new(0),
            spare: SegQueue::new(),
            max_staged_chunks: max_staged_chunks.max(1),
        }
    }

    /// Opens a session. Blocks while a finalize is running.
    pub fn begin<'a>(&'a self, hierarchy: &'a VoxelHierarchy) -> EditSession<'a> {
        EditSession {
            hierarchy,
            staging: self,
            staged: self.staged.read(),
        }
    }

    pub fn num_staged_chunks(&self) -> usize {
        self.num_staged.load(Ordering::Acquire)
    }

    pub fn is_over_budget(&self) -> bool {
        self.num_staged_chunks() >= self.max_staged_chunks
    }

    fn take_spare(&self) -> EditChunkBuffer {
        self.spare.pop().unwrap_or_else(EditChunkBuffer::new)
    }

    fn recycle(&self, buffer: Arc<EditChunkBuffer>) {
        if self.spare.len() >= MAX_SPARE_BUFFERS {
            return;
        }
        if let Ok(buffer) = Arc::try_unwrap(buffer) {
            self.spare.push(buffer);
        }
    }

    /// Folds every staged chunk back into the hierarchy, deduplicating blocks through `store`.
    ///
    /// Either every staged chunk is committed or none is. The staged buffers are discarded in both cases.
    pub fn finalize(
        &self,
        hierarchy: &VoxelHierarchy,
        store: &Mutex<ContentAddressedStore>,
        propagator: &Mutex<ChangePropagator>,
    ) -> Result<ChangeSet, CommitError> {
        let mut staged = self.staged.write();
        let mut buffers: Vec<_> = staged.buffers.get_mut().drain().collect();
        self.num_staged.store(0, Ordering::Release);
        if buffers.is_empty() {
            return Ok(ChangeSet::default());
        }
        buffers.sort_unstable_by_key(|(index, _)| *index);

        let result = commit_chunks(hierarchy, store, propagator, &buffers);
        if let Err(e) = &result {
            log::warn!("Discarding {} staged chunks: {}", buffers.len(), e);
        }

        for (_, buffer) in buffers {
            self.recycle(buffer);
        }
        drop(staged);

        result
    }
}

/// Shared access to the staged chunks. Any number of sessions may be open at once.
pub struct EditSession<'a> {
    hierarchy: &'a VoxelHierarchy,
    staging: &'a EditStaging,
    staged: RwLockReadGuard<'a, StagedChunks>,
}

impl<'a> EditSession<'a> {
    pub fn hierarchy(&self) -> &'a VoxelHierarchy {
        self.hierarchy
    }

    pub fn is_staged(&self, chunk: ChunkUnits<IVec3>) -> bool {
        self.hierarchy
            .shape()
            .chunk_index(chunk)
            .map_or(false, |i| self.staged.buffers.lock().contains_key(&i))
    }

    /// The chunk's edit buffer. The first request in a session decodes the chunk from the hierarchy.
    pub fn buffer(&self, chunk: ChunkUnits<IVec3>) -> Result<StagedBuffer<'_>, StagingError> {
        self.shared_buffer(chunk).map(|buffer| StagedBuffer {
            buffer,
            marker: PhantomData,
        })
    }

    fn shared_buffer(&self, chunk: ChunkUnits<IVec3>) -> Result<Arc<EditChunkBuffer>, StagingError> {
        let index = self
            .hierarchy
            .shape()
            .chunk_index(chunk)
            .ok_or(StagingError::ChunkOutOfBounds(chunk.0))?;

        if let Some(buffer) = self.staged.buffers.lock().get(&index) {
            return Ok(buffer.clone());
        }

        // Decode without holding the map lock.
        let buffer = self.staging.take_spare();
        let mut flat = [0; WORDS_PER_CHUNK];
        self.hierarchy.fill_chunk_flat(index, &mut flat);
        buffer.load_from(&flat);

        let mut buffers = self.staged.buffers.lock();
        match buffers.entry(index) {
            Entry::Occupied(e) => {
                // Another thread staged it first.
                let existing = e.get().clone();
                drop(buffers);
                self.staging.spare.push(buffer);
                Ok(existing)
            }
            Entry::Vacant(e) => {
                let buffer = Arc::new(buffer);
                e.insert(buffer.clone());
                self.staging.num_staged.fetch_add(1, Ordering::AcqRel);
                Ok(buffer)
            }
        }
    }

    pub fn write_voxel(&self, p: VoxelUnits<IVec3>, cell: VoxelCell) -> Result<(), StagingError> {
        if !self.hierarchy.shape().contains_voxel(p) {
            return Err(StagingError::OutOfBounds(p.0));
        }
        self.buffer(in_chunk(p))?
            .write_cell(local_in_chunk(p), cell);
        Ok(())
    }

    /// Staged content wins over committed content. Positions outside the world read as empty.
    pub fn read_voxel(&self, p: VoxelUnits<IVec3>) -> VoxelCell {
        let shape = self.hierarchy.shape();
        let index = match shape.chunk_index(in_chunk(p)) {
            Some(i) => i,
            None => return VoxelCell::EMPTY,
        };
        let staged = self.staged.buffers.lock().get(&index).cloned();
        match staged {
            Some(buffer) => buffer.read_cell(local_in_chunk(p)),
            None => self.hierarchy.read_voxel(p),
        }
    }

    /// Overwrites a whole chunk with one value.
    pub fn fill_chunk(&self, chunk: ChunkUnits<IVec3>, cell: VoxelCell) -> Result<(), StagingError> {
        self.buffer(chunk)?.fill(cell);
        Ok(())
    }

    /// Replaces a whole chunk with flat block-major content.
    pub fn write_chunk_flat(
        &self,
        chunk: ChunkUnits<IVec3>,
        words: &[u32; WORDS_PER_CHUNK],
    ) -> Result<(), StagingError> {
        self.buffer(chunk)?.load_from(words);
        Ok(())
    }

    pub fn num_staged_chunks(&self) -> usize {
        self.staging.num_staged_chunks()
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
