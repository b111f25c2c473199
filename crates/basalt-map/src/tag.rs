use crate::cell::{VoxelCell, VoxelType};

use basalt_core::allocator::Slot;
use basalt_core::static_assertions::const_assert;

/// The state of a chunk or block node.
///
/// A `Mixed` chunk points at a run of 64 block words. A `Mixed` block points at a 32-word voxel payload.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum NodeTag {
    Empty,
    Uniform(VoxelType),
    Mixed(Slot),
}

const STATE_SHIFT: u32 = 30;
const VALUE_MASK: u32 = (1 << STATE_SHIFT) - 1;
const STATE_EMPTY: u32 = 0;
const STATE_UNIFORM: u32 = 1;
const STATE_MIXED: u32 = 2;

const_assert!(VALUE_MASK == 0x3FFF_FFFF);

impl Default for NodeTag {
    fn default() -> Self {
        Self::Empty
    }
}

impl NodeTag {
    /// The packed word: a 2-bit state above a 30-bit value. This is the persisted encoding.
    #[inline]
    pub fn to_bits(self) -> u32 {
        match self {
            Self::Empty => STATE_EMPTY << STATE_SHIFT,
            Self::Uniform(t) => (STATE_UNIFORM << STATE_SHIFT) | t.0 as u32,
            Self::Mixed(slot) => (STATE_MIXED << STATE_SHIFT) | (slot & VALUE_MASK),
        }
    }

    /// The unused state `3` decodes as `Empty`.
    #[inline]
    pub fn from_bits(bits: u32) -> Self {
        let value = bits & VALUE_MASK;
        match bits >> STATE_SHIFT {
            STATE_UNIFORM => Self::Uniform(VoxelType(value as u16)),
            STATE_MIXED => Self::Mixed(value),
            _ => Self::Empty,
        }
    }

    /// The tag of a node whose every voxel is `cell`, or `None` if `cell` can't be reproduced from a tag.
    pub fn for_uniform_cell(cell: VoxelCell) -> Option<Self> {
        if !cell.is_canonical() {
            return None;
        }
        Some(if cell.is_empty() {
            Self::Empty
        } else {
            Self::Uniform(cell.voxel_type())
        })
    }

    /// The voxel value a non-mixed node expands to.
    pub fn uniform_cell(self) -> Option<VoxelCell> {
        match self {
            Self::Empty => Some(VoxelCell::EMPTY),
            Self::Uniform(t) => Some(VoxelCell::solid(t)),
            Self::Mixed(_) => None,
        }
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        matches!(self, Self::Empty)
    }

    #[inline]
    pub fn mixed_slot(self) -> Option<Slot> {
        match self {
            Self::Mixed(slot) => Some(slot),
            _ => None,
        }
    }
}

/// The coarse classification returned when the payload pointer of a chunk is irrelevant.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChunkClass {
    Empty,
    Uniform(VoxelType),
    Mixed,
}

impl From<NodeTag> for ChunkClass {
    fn from(tag: NodeTag) -> Self {
        match tag {
            NodeTag::Empty => Self::Empty,
            NodeTag::Uniform(t) => Self::Uniform(t),
            NodeTag::Mixed(_) => Self::Mixed,
        }
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
