use crate::units::*;

use basalt_core::glam::{IVec3, Vec3A};
use basalt_core::ilattice::prelude::Extent;
use basalt_core::static_assertions::const_assert;
use itertools::iproduct;
use ndshape::{ConstShape, ConstShape3u32, RuntimeShape, Shape};

pub const CHUNK_EDGE: i32 = 16;
pub const CHUNK_EDGE_LOG2: i32 = 4;
pub const BLOCK_EDGE: i32 = 4;
pub const BLOCK_EDGE_LOG2: i32 = 2;
/// Chunks per edge of a coarse group.
pub const GROUP_EDGE: i32 = 4;
pub const GROUP_EDGE_LOG2: i32 = 2;

/// The 4x4x4 lattice shared by the blocks of a chunk and the voxels of a block.
pub type Shape4 = ConstShape3u32<4, 4, 4>;
const_assert!(<Shape4 as ConstShape<3>>::SIZE == 64);

pub const BLOCKS_PER_CHUNK: usize = <Shape4 as ConstShape<3>>::SIZE as usize;
pub const CELLS_PER_BLOCK: usize = <Shape4 as ConstShape<3>>::SIZE as usize;
pub const WORDS_PER_BLOCK: usize = CELLS_PER_BLOCK / 2;
pub const WORDS_PER_CHUNK: usize = BLOCKS_PER_CHUNK * WORDS_PER_BLOCK;
const_assert!(WORDS_PER_CHUNK == 2048);

pub const CHUNK_SHAPE_IVEC3: IVec3 = IVec3::new(CHUNK_EDGE, CHUNK_EDGE, CHUNK_EDGE);

#[inline]
pub fn linearize4(p: IVec3) -> usize {
    <Shape4 as ConstShape<3>>::linearize([p.x as u32, p.y as u32, p.z as u32]) as usize
}

#[inline]
pub fn delinearize4(i: usize) -> IVec3 {
    let [x, y, z] = <Shape4 as ConstShape<3>>::delinearize(i as u32);
    IVec3::new(x as i32, y as i32, z as i32)
}

/// Where a voxel lives in a flat chunk buffer: the block within the chunk and the cell within the block.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FlatIndex {
    pub block: usize,
    pub cell: usize,
}

impl FlatIndex {
    /// `local` must be in `[0, 16)^3`.
    #[inline]
    pub fn from_local(local: IVec3) -> Self {
        debug_assert!(local.cmpge(IVec3::ZERO).all() && local.cmplt(CHUNK_SHAPE_IVEC3).all());
        Self {
            block: linearize4(local >> BLOCK_EDGE_LOG2),
            cell: linearize4(local & (BLOCK_EDGE - 1)),
        }
    }

    #[inline]
    pub fn word(self) -> usize {
        self.block * WORDS_PER_BLOCK + self.cell / 2
    }

    #[inline]
    pub fn is_high(self) -> bool {
        self.cell & 1 == 1
    }

    pub fn to_local(self) -> IVec3 {
        (delinearize4(self.block) << BLOCK_EDGE_LOG2) + delinearize4(self.cell)
    }
}

/// Returns the [`ChunkUnits`] coordinates of the chunk that contains `p`.
#[inline]
pub fn in_chunk(p: VoxelUnits<IVec3>) -> ChunkUnits<IVec3> {
    ChunkUnits(p.0 >> CHUNK_EDGE_LOG2)
}

/// The offset of `p` from the minimum of its chunk.
#[inline]
pub fn local_in_chunk(p: VoxelUnits<IVec3>) -> IVec3 {
    p.0 & (CHUNK_EDGE - 1)
}

pub fn chunk_min(coordinates: ChunkUnits<IVec3>) -> VoxelUnits<IVec3> {
    VoxelUnits(coordinates.0 << CHUNK_EDGE_LOG2)
}

pub fn chunk_extent_ivec3(coordinates: ChunkUnits<IVec3>) -> VoxelUnits<Extent<IVec3>> {
    chunk_min(coordinates).map(|m| Extent::from_min_and_shape(m, CHUNK_SHAPE_IVEC3))
}

pub fn chunk_extent_vec3a(coordinates: ChunkUnits<IVec3>) -> VoxelUnits<Extent<Vec3A>> {
    chunk_extent_ivec3(coordinates).map(|e| e.map_components(|c| c.as_vec3a()))
}

/// Transforms a [`VoxelUnits`] extent `e` into a [`ChunkUnits`] extent `e'` that contains the coordinates of all chunks
/// intersected by `e`.
pub fn in_chunk_extent(e: VoxelUnits<Extent<IVec3>>) -> ChunkUnits<Extent<IVec3>> {
    ChunkUnits(Extent::from_min_and_max(
        e.0.minimum >> CHUNK_EDGE_LOG2,
        e.0.max() >> CHUNK_EDGE_LOG2,
    ))
}

pub fn group_of_chunk(c: ChunkUnits<IVec3>) -> GroupUnits<IVec3> {
    GroupUnits(c.0 >> GROUP_EDGE_LOG2)
}

/// Iterates over every point of a 3D integer extent in X-major order.
pub fn extent_points(e: Extent<IVec3>) -> impl Iterator<Item = IVec3> {
    let min = e.minimum;
    let lub = e.least_upper_bound();
    iproduct!(min.z..lub.z, min.y..lub.y, min.x..lub.x).map(|(z, y, x)| IVec3::new(x, y, z))
}

fn to_u32_array(p: IVec3) -> [u32; 3] {
    [p.x as u32, p.y as u32, p.z as u32]
}

fn from_u32_array([x, y, z]: [u32; 3]) -> IVec3 {
    IVec3::new(x as i32, y as i32, z as i32)
}

/// The dimensions of a world, and the linear layouts of its chunk and coarse group arrays.
#[derive(Clone)]
pub struct WorldShape {
    size_in_chunks: IVec3,
    size_in_groups: IVec3,
    chunk_shape: RuntimeShape<u32, 3>,
    group_shape: RuntimeShape<u32, 3>,
}

impl std::fmt::Debug for WorldShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldShape")
            .field("size_in_chunks", &self.size_in_chunks)
            .field("size_in_groups", &self.size_in_groups)
            .finish_non_exhaustive()
    }
}

impl WorldShape {
    /// Each dimension is clamped to at least one chunk.
    pub fn new(size_in_chunks: ChunkUnits<IVec3>) -> Self {
        let size_in_chunks = size_in_chunks.0.max(IVec3::ONE);
        let size_in_groups = (size_in_chunks + (GROUP_EDGE - 1)) >> GROUP_EDGE_LOG2;
        Self {
            size_in_chunks,
            size_in_groups,
            chunk_shape: RuntimeShape::<u32, 3>::new(to_u32_array(size_in_chunks)),
            group_shape: RuntimeShape::<u32, 3>::new(to_u32_array(size_in_groups)),
        }
    }

    pub fn size_in_chunks(&self) -> ChunkUnits<IVec3> {
        ChunkUnits(self.size_in_chunks)
    }

    pub fn size_in_voxels(&self) -> VoxelUnits<IVec3> {
        chunk_min(self.size_in_chunks())
    }

    pub fn size_in_groups(&self) -> GroupUnits<IVec3> {
        GroupUnits(self.size_in_groups)
    }

    pub fn num_chunks(&self) -> usize {
        self.chunk_shape.size() as usize
    }

    pub fn num_groups(&self) -> usize {
        self.group_shape.size() as usize
    }

    pub fn voxel_extent(&self) -> VoxelUnits<Extent<IVec3>> {
        VoxelUnits(Extent::from_min_and_shape(
            IVec3::ZERO,
            self.size_in_voxels().0,
        ))
    }

    pub fn voxel_aabb(&self) -> VoxelUnits<Extent<Vec3A>> {
        self.voxel_extent()
            .map(|e| e.map_components(|c| c.as_vec3a()))
    }

    pub fn chunk_extent(&self) -> ChunkUnits<Extent<IVec3>> {
        ChunkUnits(Extent::from_min_and_shape(IVec3::ZERO, self.size_in_chunks))
    }

    #[inline]
    pub fn contains_chunk(&self, c: ChunkUnits<IVec3>) -> bool {
        c.0.cmpge(IVec3::ZERO).all() && c.0.cmplt(self.size_in_chunks).all()
    }

    #[inline]
    pub fn contains_voxel(&self, p: VoxelUnits<IVec3>) -> bool {
        self.contains_chunk(in_chunk(p))
    }

    #[inline]
    pub fn contains_group(&self, g: GroupUnits<IVec3>) -> bool {
        g.0.cmpge(IVec3::ZERO).all() && g.0.cmplt(self.size_in_groups).all()
    }

    #[inline]
    pub fn chunk_index(&self, c: ChunkUnits<IVec3>) -> Option<usize> {
        self.contains_chunk(c)
            .then(|| self.chunk_shape.linearize(to_u32_array(c.0)) as usize)
    }

    pub fn chunk_coords(&self, index: usize) -> ChunkUnits<IVec3> {
        ChunkUnits(from_u32_array(self.chunk_shape.delinearize(index as u32)))
    }

    #[inline]
    pub fn group_index(&self, g: GroupUnits<IVec3>) -> Option<usize> {
        self.contains_group(g)
            .then(|| self.group_shape.linearize(to_u32_array(g.0)) as usize)
    }

    pub fn group_coords(&self, index: usize) -> GroupUnits<IVec3> {
        GroupUnits(from_u32_array(self.group_shape.delinearize(index as u32)))
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

    #[test]
    fn flat_index_is_block_major() {
        let i = FlatIndex::from_local(IVec3::new(5, 0, 0));
        assert_eq!(i.block, 1);
        assert_eq!(i.cell, 1);
        assert_eq!(i.word(), 32);
        assert!(i.is_high());

        let i = FlatIndex::from_local(IVec3::new(15, 15, 15));
        assert_eq!(i.word(), 2047);
        assert_eq!(i.to_local(), IVec3::new(15, 15, 15));
    }

    #[test]
    fn negative_voxels_map_to_negative_chunks() {
        assert_eq!(in_chunk(VoxelUnits(IVec3::new(-1, 0, 16))).0, IVec3::new(-1, 0, 1));
        assert_eq!(local_in_chunk(VoxelUnits(IVec3::new(-1, 0, 17))), IVec3::new(15, 0, 1));
    }

    #[test]
    fn world_shape_rounds_groups_up() {
        let shape = WorldShape::new(ChunkUnits(IVec3::new(2, 5, 8)));
        assert_eq!(shape.size_in_groups().0, IVec3::new(1, 2, 2));
        assert_eq!(shape.num_chunks(), 80);
        assert_eq!(shape.size_in_voxels().0, IVec3::new(32, 80, 128));

        let c = ChunkUnits(IVec3::new(1, 4, 7));
        let i = shape.chunk_index(c).unwrap();
        assert_eq!(shape.chunk_coords(i), c);
        assert_eq!(shape.chunk_index(ChunkUnits(IVec3::new(2, 0, 0))), None);
        assert_eq!(group_of_chunk(c).0, IVec3::new(0, 1, 1));
    }

    #[test]
    fn extent_points_visits_every_point_once() {
        let e = Extent::from_min_and_shape(IVec3::new(-1, 0, 2), IVec3::new(2, 3, 1));
        let points: Vec<_> = extent_points(e).collect();
        assert_eq!(points.len(), 6);
        assert_eq!(points[0], IVec3::new(-1, 0, 2));
        assert_eq!(points[5], IVec3::new(0, 2, 2));
    }
}
