use crate::pool::{BlockRun, Payload};
use crate::tag::NodeTag;
use crate::units::ChunkUnits;

use basalt_core::allocator::Slot;
use basalt_core::glam::IVec3;

/// Everything a commit changed, so a mirror of the hierarchy can be patched without re-reading it.
#[derive(Clone, Debug, Default)]
pub struct ChangeSet {
    /// Every committed chunk with its new tag.
    pub chunks: Vec<ChunkChange>,
    /// Block runs that were written, with their full contents.
    pub block_runs: Vec<BlockRunChange>,
    /// Payloads created by the commit.
    pub payloads: Vec<PayloadChange>,
    /// Payload slots whose last reference was dropped.
    pub freed_payloads: Vec<Slot>,
    /// Block runs released by chunks that stopped being mixed.
    pub freed_runs: Vec<Slot>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ChunkChange {
    pub index: usize,
    pub coords: ChunkUnits<IVec3>,
    pub previous: NodeTag,
    pub tag: NodeTag,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BlockRunChange {
    pub run: Slot,
    pub words: Box<BlockRun>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PayloadChange {
    pub slot: Slot,
    pub words: Box<Payload>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn append(&mut self, mut other: ChangeSet) {
        self.chunks.append(&mut other.chunks);
        self.block_runs.append(&mut other.block_runs);
        self.payloads.append(&mut other.payloads);
        self.freed_payloads.append(&mut other.freed_payloads);
        self.freed_runs.append(&mut other.freed_runs);
    }
}
