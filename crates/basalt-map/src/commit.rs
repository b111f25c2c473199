//! Folding staged chunks back into the hierarchy.
//!
//! A commit runs in two phases. The fallible phase turns every staged chunk into 64 block tags, taking store references for
//! mixed blocks and allocating block runs. If anything fails, every reference and run taken so far is given back and the
//! hierarchy is never touched. The second phase publishes the new tags and releases what the old content held. It can't
//! fail.

use crate::cell::cell_in_word;
use crate::change_set::{BlockRunChange, ChangeSet, ChunkChange, PayloadChange};
use crate::coordinates::*;
use crate::error::{CommitError, StoreError};
use crate::hierarchy::{affects_clear_distance, VoxelHierarchy};
use crate::pool::{AllocationPool, BlockRun, Payload, BLOCK_RUN_WORDS};
use crate::propagation::ChangePropagator;
use crate::staging::EditChunkBuffer;
use crate::store::{hash_payload, ContentAddressedStore, Removal};
use crate::tag::NodeTag;

use basalt_core::allocator::Slot;
use parking_lot::Mutex;
use rayon::prelude::*;
use smallvec::SmallVec;
use std::sync::Arc;

/// Store references taken for one chunk, as `(hash, slot)`.
type Acquired = SmallVec<[(u32, Slot); 8]>;

struct PreparedChunk {
    index: usize,
    blocks: [NodeTag; BLOCKS_PER_CHUNK],
    /// Set when every block has the same non-mixed tag, so the chunk needs no block run.
    collapsed: Option<NodeTag>,
    acquired: Acquired,
    created: Vec<PayloadChange>,
    /// Preallocated for chunks that need a run but don't own one yet.
    new_run: Option<Slot>,
}

/// Commits `buffers`, which must be sorted by chunk index with no duplicates.
pub(crate) fn commit_chunks(
    hierarchy: &VoxelHierarchy,
    store: &Mutex<ContentAddressedStore>,
    propagator: &Mutex<ChangePropagator>,
    buffers: &[(usize, Arc<EditChunkBuffer>)],
) -> Result<ChangeSet, CommitError> {
    let pool = hierarchy.pool();
    let num_chunks = buffers.len() as u32;
    pool.check_capacity(num_chunks, num_chunks * BLOCKS_PER_CHUNK as u32)?;

    let results: Vec<Result<PreparedChunk, StoreError>> = buffers
        .par_iter()
        .map(|(index, buffer)| prepare_chunk(*index, buffer, store, pool))
        .collect();
    let mut prepared = Vec::with_capacity(results.len());
    let mut failure = None;
    for result in results {
        match result {
            Ok(p) => prepared.push(p),
            Err(e) => {
                failure.get_or_insert(e);
            }
        }
    }
    if let Some(source) = failure {
        roll_back(&prepared, store, pool);
        return Err(CommitError::Store {
            chunks: buffers.len(),
            source,
        });
    }

    for i in 0..prepared.len() {
        let p = &prepared[i];
        if p.collapsed.is_some() || hierarchy.chunk_tag_at(p.index).mixed_slot().is_some() {
            continue;
        }
        match pool.allocate_block_run() {
            Ok(run) => prepared[i].new_run = Some(run),
            Err(e) => {
                roll_back(&prepared, store, pool);
                return Err(e.into());
            }
        }
    }

    let changes = prepared
        .into_par_iter()
        .map(|p| apply_chunk(p, hierarchy, store, propagator))
        .reduce(ChangeSet::default, |mut a, b| {
            a.append(b);
            a
        });

    log::debug!(
        "Committed {} chunks: {} block runs written, {} payloads created, {} payloads freed",
        changes.chunks.len(),
        changes.block_runs.len(),
        changes.payloads.len(),
        changes.freed_payloads.len()
    );

    Ok(changes)
}

fn prepare_chunk(
    index: usize,
    buffer: &EditChunkBuffer,
    store: &Mutex<ContentAddressedStore>,
    pool: &AllocationPool,
) -> Result<PreparedChunk, StoreError> {
    let mut blocks = [NodeTag::Empty; BLOCKS_PER_CHUNK];
    let mut contents: SmallVec<[(usize, u32, Box<Payload>); 8]> = SmallVec::new();
    for (block, tag) in blocks.iter_mut().enumerate() {
        let mut payload: Payload = [0; WORDS_PER_BLOCK];
        buffer.read_block(block, &mut payload);
        let hash = hash_payload(&payload);
        if hash.all_same {
            if let Some(uniform) = NodeTag::for_uniform_cell(cell_in_word(payload[0], false)) {
                *tag = uniform;
                continue;
            }
        }
        contents.push((block, hash.hash, Box::new(payload)));
    }

    let mut acquired = Acquired::new();
    let mut created = Vec::new();
    if !contents.is_empty() {
        let mut store = store.lock();
        for (block, hash, payload) in contents {
            match store.insert(hash, &payload, pool) {
                Ok(insertion) => {
                    blocks[block] = NodeTag::Mixed(insertion.slot);
                    acquired.push((hash, insertion.slot));
                    if insertion.is_new {
                        created.push(PayloadChange {
                            slot: insertion.slot,
                            words: payload,
                        });
                    }
                }
                Err(e) => {
                    for (hash, slot) in acquired {
                        store.remove(hash, slot, pool);
                    }
                    return Err(e);
                }
            }
        }
    }

    let first = blocks[0];
    let collapsed = (first.mixed_slot().is_none() && blocks.iter().all(|b| *b == first)).then(|| first);

    Ok(PreparedChunk {
        index,
        blocks,
        collapsed,
        acquired,
        created,
        new_run: None,
    })
}

fn roll_back(prepared: &[PreparedChunk], store: &Mutex<ContentAddressedStore>, pool: &AllocationPool) {
    let mut store = store.lock();
    for p in prepared {
        for &(hash, slot) in &p.acquired {
            store.remove(hash, slot, pool);
        }
        if let Some(run) = p.new_run {
            pool.free_block_run(run);
        }
    }
}

fn apply_chunk(
    p: PreparedChunk,
    hierarchy: &VoxelHierarchy,
    store: &Mutex<ContentAddressedStore>,
    propagator: &Mutex<ChangePropagator>,
) -> ChangeSet {
    let pool = hierarchy.pool();
    let previous = hierarchy.chunk_tag_at(p.index);

    let mut old_blocks: BlockRun = [0; BLOCK_RUN_WORDS];
    if let NodeTag::Mixed(old_run) = previous {
        pool.read_block_run(old_run, &mut old_blocks);
    }

    let mut changes = ChangeSet::default();
    let tag = match p.collapsed {
        Some(tag) => tag,
        None => {
            // Preparation guarantees one of these.
            let run = p.new_run.or_else(|| previous.mixed_slot()).unwrap_or_default();
            let words = hierarchy.store_block_run(run, &p.blocks);
            changes.block_runs.push(BlockRunChange {
                run,
                words: Box::new(words),
            });
            NodeTag::Mixed(run)
        }
    };
    hierarchy.write_chunk(p.index, tag);
    if let NodeTag::Mixed(old_run) = previous {
        if tag.mixed_slot() != Some(old_run) {
            changes.freed_runs.push(old_run);
        }
    }

    if previous.mixed_slot().is_some() {
        let mut store = store.lock();
        for word in old_blocks {
            if let NodeTag::Mixed(slot) = NodeTag::from_bits(word) {
                let mut content: Payload = [0; WORDS_PER_BLOCK];
                pool.read_payload(slot, &mut content);
                let hash = hash_payload(&content).hash;
                match store.remove(hash, slot, pool) {
                    Removal::Freed => changes.freed_payloads.push(slot),
                    Removal::Released => (),
                    Removal::NotFound => {
                        log::error!("Chunk {} referenced payload {} with no store entry", p.index, slot)
                    }
                }
            }
        }
    }

    let coords = hierarchy.shape().chunk_coords(p.index);
    if affects_clear_distance(previous, tag) {
        propagator.lock().mark_changed(coords);
    }

    changes.chunks.push(ChunkChange {
        index: p.index,
        coords,
        previous,
        tag,
    });
    changes.payloads = p.created;

    changes
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
