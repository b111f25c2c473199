//! Editing tools. Each tool stages its edits through an [`EditSession`]; nothing is visible until the next commit.

use basalt_core::geometry::Sphere;
use basalt_core::glam::{IVec3, Vec3A};
use basalt_core::ilattice::prelude::Extent;
use basalt_core::SmallKeyHashSet;
use basalt_map::{
    chunk_extent_ivec3, chunk_extent_vec3a, chunk_min, extent_points, in_chunk_extent, ChunkClass, ChunkUnits,
    EditSession, StagingError, VoxelCell, VoxelType, VoxelUnits, WorldStore, CHUNK_SHAPE_IVEC3,
};
use rayon::prelude::*;
use std::collections::VecDeque;

pub trait EditTool {
    fn apply(&self, session: &EditSession) -> Result<(), StagingError>;
}

/// What a shape tool writes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Brush {
    Erase,
    Fill(VoxelType),
}

impl Brush {
    pub fn cell(self) -> VoxelCell {
        match self {
            Self::Erase => VoxelCell::EMPTY,
            Self::Fill(t) => VoxelCell::solid(t),
        }
    }
}

/// Chunks overlapping `aabb`, clamped to the world.
fn chunks_overlapping(session: &EditSession, aabb: Extent<Vec3A>) -> Vec<ChunkUnits<IVec3>> {
    let voxels = Extent::from_min_and_max(
        aabb.minimum.floor().as_ivec3(),
        aabb.least_upper_bound().floor().as_ivec3(),
    );
    let chunks = in_chunk_extent(VoxelUnits(voxels)).0;
    let world = session.hierarchy().shape().chunk_extent().0;
    extent_points(chunks.intersection(&world))
        .map(ChunkUnits)
        .collect()
}

fn voxel_center(p: IVec3) -> Vec3A {
    p.as_vec3a() + Vec3A::splat(0.5)
}

/// Writes `cell` at every voxel of `chunk` whose center passes `inside`.
fn write_where(
    session: &EditSession,
    chunk: ChunkUnits<IVec3>,
    cell: VoxelCell,
    inside: impl Fn(Vec3A) -> bool,
) -> Result<(), StagingError> {
    let buffer = session.buffer(chunk)?;
    let min = chunk_min(chunk).0;
    for local in extent_points(Extent::from_min_and_shape(IVec3::ZERO, CHUNK_SHAPE_IVEC3)) {
        if inside(voxel_center(min + local)) {
            buffer.write_cell(local, cell);
        }
    }
    Ok(())
}

/// Fills or erases a ball.
#[derive(Clone, Copy, Debug)]
pub struct SphereTool {
    pub center: Vec3A,
    pub radius: f32,
    pub brush: Brush,
}

impl EditTool for SphereTool {
    fn apply(&self, session: &EditSession) -> Result<(), StagingError> {
        let sphere = Sphere::new(self.center, self.radius);
        let cell = self.brush.cell();
        chunks_overlapping(session, sphere.aabb())
            .into_par_iter()
            .try_for_each(|chunk| {
                if sphere.contains_extent(chunk_extent_vec3a(chunk).0) {
                    session.fill_chunk(chunk, cell)
                } else {
                    write_where(session, chunk, cell, |p| sphere.contains_point(p))
                }
            })
    }
}

/// Fills or erases an axis-aligned cube.
#[derive(Clone, Copy, Debug)]
pub struct CubeTool {
    pub center: Vec3A,
    pub half_edge: f32,
    pub brush: Brush,
}

impl CubeTool {
    fn aabb(&self) -> Extent<Vec3A> {
        Extent::from_min_and_lub(
            self.center - Vec3A::splat(self.half_edge),
            self.center + Vec3A::splat(self.half_edge),
        )
    }

    fn contains_point(&self, p: Vec3A) -> bool {
        (p - self.center).abs().max_element() < self.half_edge
    }
}

impl EditTool for CubeTool {
    fn apply(&self, session: &EditSession) -> Result<(), StagingError> {
        let cell = self.brush.cell();
        chunks_overlapping(session, self.aabb())
            .into_par_iter()
            .try_for_each(|chunk| {
                let extent = chunk_extent_vec3a(chunk).0;
                let covered = self.contains_point(extent.minimum + Vec3A::splat(0.5))
                    && self.contains_point(extent.least_upper_bound() - Vec3A::splat(0.5));
                if covered {
                    session.fill_chunk(chunk, cell)
                } else {
                    write_where(session, chunk, cell, |p| self.contains_point(p))
                }
            })
    }
}

/// Recolors the non-empty voxels in a ball.
#[derive(Clone, Copy, Debug)]
pub struct PaintTool {
    pub center: Vec3A,
    pub radius: f32,
    pub voxel_type: VoxelType,
}

impl EditTool for PaintTool {
    fn apply(&self, session: &EditSession) -> Result<(), StagingError> {
        let sphere = Sphere::new(self.center, self.radius);
        let cell = VoxelCell::solid(self.voxel_type);
        chunks_overlapping(session, sphere.aabb())
            .into_par_iter()
            .try_for_each(|chunk| {
                // Nothing to paint.
                if !session.is_staged(chunk) && session.hierarchy().classify(chunk) == ChunkClass::Empty {
                    return Ok(());
                }
                let buffer = session.buffer(chunk)?;
                let min = chunk_min(chunk).0;
                for local in extent_points(Extent::from_min_and_shape(IVec3::ZERO, CHUNK_SHAPE_IVEC3)) {
                    if sphere.contains_point(voxel_center(min + local)) && !buffer.read_cell(local).is_empty() {
                        buffer.write_cell(local, cell);
                    }
                }
                Ok(())
            })
    }
}

/// Replaces the 6-connected region of voxels sharing the seed voxel's type.
#[derive(Clone, Copy, Debug)]
pub struct FloodFillTool {
    pub seed: VoxelUnits<IVec3>,
    pub voxel_type: VoxelType,
    /// The most voxels to replace.
    pub limit: usize,
}

const FACE_NEIGHBORS: [IVec3; 6] = [
    IVec3::new(1, 0, 0),
    IVec3::new(-1, 0, 0),
    IVec3::new(0, 1, 0),
    IVec3::new(0, -1, 0),
    IVec3::new(0, 0, 1),
    IVec3::new(0, 0, -1),
];

impl FloodFillTool {
    /// Returns the number of voxels replaced.
    pub fn fill(&self, session: &EditSession) -> Result<usize, StagingError> {
        let shape = session.hierarchy().shape();
        let target = session.read_voxel(self.seed);
        if target.is_empty() || target.voxel_type() == self.voxel_type {
            return Ok(0);
        }
        let replacement = VoxelCell::solid(self.voxel_type);

        let mut queue = VecDeque::new();
        let mut visited = SmallKeyHashSet::default();
        queue.push_back(self.seed.0);
        visited.insert(self.seed.0);
        let mut replaced = 0;
        while let Some(p) = queue.pop_front() {
            if replaced >= self.limit {
                log::warn!("Flood fill stopped after {} voxels", replaced);
                break;
            }
            if session.read_voxel(VoxelUnits(p)).voxel_type() != target.voxel_type() {
                continue;
            }
            session.write_voxel(VoxelUnits(p), replacement)?;
            replaced += 1;
            for offset in FACE_NEIGHBORS {
                let n = p + offset;
                if shape.contains_voxel(VoxelUnits(n)) && visited.insert(n) {
                    queue.push_back(n);
                }
            }
        }

        Ok(replaced)
    }
}

impl EditTool for FloodFillTool {
    fn apply(&self, session: &EditSession) -> Result<(), StagingError> {
        self.fill(session).map(|_| ())
    }
}

/// A dense box of cells that can be stamped into a world.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct VoxelModel {
    size: IVec3,
    cells: Vec<VoxelCell>,
}

impl VoxelModel {
    pub fn new(size: IVec3) -> Self {
        let size = size.max(IVec3::ZERO);
        Self {
            size,
            cells: vec![VoxelCell::EMPTY; (size.x * size.y * size.z) as usize],
        }
    }

    /// Copies the committed content of `extent` out of a world.
    pub fn capture(store: &WorldStore, extent: VoxelUnits<Extent<IVec3>>) -> Self {
        let extent = extent.0;
        let mut model = Self::new(extent.shape);
        for p in extent_points(extent) {
            model.set(p - extent.minimum, store.read_voxel(VoxelUnits(p)));
        }
        model
    }

    pub fn size(&self) -> IVec3 {
        self.size
    }

    fn index(&self, p: IVec3) -> Option<usize> {
        (p.cmpge(IVec3::ZERO).all() && p.cmplt(self.size).all())
            .then(|| (p.x + self.size.x * (p.y + self.size.y * p.z)) as usize)
    }

    /// Empty outside of the model.
    pub fn get(&self, p: IVec3) -> VoxelCell {
        self.index(p).map_or(VoxelCell::EMPTY, |i| self.cells[i])
    }

    pub fn set(&mut self, p: IVec3, cell: VoxelCell) {
        if let Some(i) = self.index(p) {
            self.cells[i] = cell;
        }
    }
}

/// Stamps the non-empty cells of a model with its minimum corner at `origin`.
#[derive(Clone, Copy, Debug)]
pub struct ModelStampTool<'a> {
    pub model: &'a VoxelModel,
    pub origin: VoxelUnits<IVec3>,
}

impl<'a> EditTool for ModelStampTool<'a> {
    fn apply(&self, session: &EditSession) -> Result<(), StagingError> {
        let model_extent = Extent::from_min_and_shape(self.origin.0, self.model.size());
        let chunks = in_chunk_extent(VoxelUnits(model_extent)).0;
        let world = session.hierarchy().shape().chunk_extent().0;
        let chunks: Vec<_> = extent_points(chunks.intersection(&world)).collect();
        chunks.into_par_iter().try_for_each(|c| {
            let chunk = ChunkUnits(c);
            let overlap = chunk_extent_ivec3(chunk).0.intersection(&model_extent);
            let min = chunk_min(chunk).0;
            let mut buffer = None;
            for p in extent_points(overlap) {
                let cell = self.model.get(p - self.origin.0);
                if cell.is_empty() {
                    continue;
                }
                // Only stage chunks the model actually writes to.
                if buffer.is_none() {
                    buffer = Some(session.buffer(chunk)?);
                }
                if let Some(buffer) = &buffer {
                    buffer.write_cell(p - min, VoxelCell::solid(cell.voxel_type()));
                }
            }
            Ok(())
        })
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
