use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// A material ID. Only the low 15 bits are meaningful; zero means "no material".
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub struct VoxelType(pub u16);

impl VoxelType {
    pub const NONE: Self = Self(0);
    pub const MAX: Self = Self(VoxelCell::TYPE_MASK);

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

/// One 16-bit voxel: bit 15 marks the voxel as solid and the low 15 bits hold its [`VoxelType`].
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Pod, Zeroable)]
#[repr(transparent)]
pub struct VoxelCell(pub u16);

impl VoxelCell {
    pub const EMPTY: Self = Self(0);
    pub const SOLID_BIT: u16 = 0x8000;
    pub const TYPE_MASK: u16 = 0x7FFF;

    /// A solid voxel of type `t`. Type zero is the empty voxel.
    pub fn solid(t: VoxelType) -> Self {
        if t.is_none() {
            Self::EMPTY
        } else {
            Self(Self::SOLID_BIT | (t.0 & Self::TYPE_MASK))
        }
    }

    #[inline]
    pub fn voxel_type(self) -> VoxelType {
        VoxelType(self.0 & Self::TYPE_MASK)
    }

    #[inline]
    pub fn is_solid(self) -> bool {
        self.0 & Self::SOLID_BIT != 0
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Canonical cells are exactly the ones a uniform tag can reproduce.
    #[inline]
    pub fn is_canonical(self) -> bool {
        self == Self::solid(self.voxel_type())
    }
}

/// Two cells share one word; the even cell index lives in the low half.
#[inline]
pub fn pack_cells(low: VoxelCell, high: VoxelCell) -> u32 {
    low.0 as u32 | ((high.0 as u32) << 16)
}

#[inline]
pub fn unpack_cells(word: u32) -> [VoxelCell; 2] {
    [VoxelCell(word as u16), VoxelCell((word >> 16) as u16)]
}

#[inline]
pub fn cell_in_word(word: u32, high: bool) -> VoxelCell {
    unpack_cells(word)[high as usize]
}

#[inline]
pub fn replace_cell_in_word(word: u32, high: bool, cell: VoxelCell) -> u32 {
    let [low, hi] = unpack_cells(word);
    if high {
        pack_cells(low, cell)
    } else {
        pack_cells(cell, hi)
    }
}

/// A word holding two copies of `cell`.
#[inline]
pub fn splat_cell(cell: VoxelCell) -> u32 {
    pack_cells(cell, cell)
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

    #[test]
    fn solid_type_zero_is_empty() {
        assert_eq!(VoxelCell::solid(VoxelType(0)), VoxelCell::EMPTY);
        assert_eq!(VoxelCell::solid(VoxelType(5)).0, 0x8005);
    }

    #[test]
    fn canonical_cells() {
        assert!(VoxelCell::EMPTY.is_canonical());
        assert!(VoxelCell(0x8001).is_canonical());
        // Type without the solid bit, and a bare solid bit.
        assert!(!VoxelCell(0x0001).is_canonical());
        assert!(!VoxelCell(0x8000).is_canonical());
    }

    #[test]
    fn replace_one_half_of_a_word() {
        let word = pack_cells(VoxelCell(1), VoxelCell(2));
        let word = replace_cell_in_word(word, true, VoxelCell(9));
        assert_eq!(unpack_cells(word), [VoxelCell(1), VoxelCell(9)]);
        let word = replace_cell_in_word(word, false, VoxelCell(7));
        assert_eq!(cell_in_word(word, false), VoxelCell(7));
    }
}
