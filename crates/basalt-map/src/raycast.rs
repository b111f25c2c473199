use crate::cell::{cell_in_word, VoxelType};
use crate::coordinates::*;
use crate::hierarchy::VoxelHierarchy;
use crate::tag::NodeTag;
use crate::units::*;

use basalt_core::geometry::Ray;
use basalt_core::glam::{IVec3, Vec3A};

const MAX_STEPS: usize = 1000;
const MIN_STEP: f32 = 1e-5;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RayHit {
    pub voxel_type: VoxelType,
    /// Distance from the ray origin along the normalized direction.
    pub distance: f32,
    pub cell: VoxelUnits<IVec3>,
    /// Points back out of the face that was entered.
    pub normal: IVec3,
}

enum Probe {
    Hit(VoxelType),
    /// The cell lies in an empty node with this edge length.
    Skip(i32),
}

impl VoxelHierarchy {
    /// Marches a ray through the world, skipping whole empty chunks and blocks, and returns the first solid voxel.
    ///
    /// Rays that start outside of the world are clipped to its bounds first. A zero direction never hits.
    pub fn trace(&self, origin: Vec3A, dir: Vec3A) -> Option<RayHit> {
        let length = dir.length();
        if !(length > 0.0 && length.is_finite()) {
            return None;
        }
        let dir = dir / length;
        let sign = dir.signum();

        let aabb = self.shape().voxel_aabb().into_inner();
        let inside = origin.cmpge(aabb.minimum).all() && origin.cmplt(aabb.least_upper_bound()).all();
        let (mut t, mut mask) = if inside {
            (0.0, Vec3A::ZERO)
        } else {
            let ([t_enter, _], axis) = Ray::new(origin, dir).cast_at_extent_with_entry_axis(aabb)?;
            let mut mask = Vec3A::ZERO;
            mask[axis] = 1.0;
            (t_enter, mask)
        };

        let inv_abs = 1.0 / (dir.abs() + Vec3A::splat(1e-10));
        let is_neg = Vec3A::select(dir.cmplt(Vec3A::ZERO), Vec3A::ONE, Vec3A::ZERO);
        let is_pos = dir.cmpgt(Vec3A::ZERO);

        let mut pos = origin + t * dir;
        let mut cell = (pos + mask * sign * 0.5).floor().as_ivec3();
        for _ in 0..MAX_STEPS {
            if !self.shape().contains_voxel(VoxelUnits(cell)) {
                return None;
            }
            let size = match self.probe(cell) {
                Probe::Hit(voxel_type) => {
                    return Some(RayHit {
                        voxel_type,
                        distance: t,
                        cell: VoxelUnits(cell),
                        normal: -(mask * sign).as_ivec3(),
                    })
                }
                Probe::Skip(size) => size,
            };

            let local = (cell & (size - 1)).as_vec3a();
            let bounds = Vec3A::select(is_pos, Vec3A::splat((size - 1) as f32) - local, local);
            let frac = (is_neg - pos.fract()).abs();
            let dist = ((Vec3A::ONE + bounds) - (Vec3A::ONE - mask) * frac) * inv_abs;

            let step = dist.min_element();
            t += step.max(MIN_STEP);
            mask = Vec3A::select(dist.cmple(Vec3A::splat(step)), Vec3A::ONE, Vec3A::ZERO);
            pos = origin + t * dir;
            cell = (pos + mask * sign * 0.5).floor().as_ivec3();
        }

        None
    }

    /// `p` must be inside the world.
    fn probe(&self, p: IVec3) -> Probe {
        let p = VoxelUnits(p);
        let flat = FlatIndex::from_local(local_in_chunk(p));
        match self.chunk_tag(in_chunk(p)) {
            NodeTag::Empty => Probe::Skip(CHUNK_EDGE),
            NodeTag::Uniform(t) => Probe::Hit(t),
            chunk @ NodeTag::Mixed(_) => match self.block_tag(chunk, flat.block) {
                NodeTag::Empty => Probe::Skip(BLOCK_EDGE),
                NodeTag::Uniform(t) => Probe::Hit(t),
                NodeTag::Mixed(slot) => {
                    let word = self.pool().load_payload_word(slot, flat.cell / 2);
                    let cell = cell_in_word(word, flat.is_high());
                    if cell.is_solid() {
                        Probe::Hit(cell.voxel_type())
                    } else {
                        Probe::Skip(1)
                    }
                }
            },
        }
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
    use crate::cell::VoxelCell;
    use crate::pool::Payload;

    use basalt_core::approx::assert_relative_eq;

    /// A 32^3 world whose only non-empty block is the one at the origin.
    fn world_with_first_block(payload: &Payload) -> VoxelHierarchy {
        let h = VoxelHierarchy::new(WorldShape::new(ChunkUnits(IVec3::splat(2))));
        let slot = h.pool().allocate_payload(payload).unwrap();
        let mut blocks = [NodeTag::Empty; BLOCKS_PER_CHUNK];
        blocks[0] = NodeTag::Mixed(slot);
        let run = h.write_block_run(0, &blocks).unwrap();
        h.write_chunk(0, NodeTag::Mixed(run));
        h
    }

    /// A 32^3 world with one voxel of type 5 at the origin.
    fn single_voxel_world() -> VoxelHierarchy {
        let mut payload = [0; WORDS_PER_BLOCK];
        payload[0] = VoxelCell::solid(VoxelType(5)).0 as u32;
        world_with_first_block(&payload)
    }

    #[test]
    fn ray_from_outside_hits_entry_face() {
        let h = single_voxel_world();
        let hit = h
            .trace(Vec3A::new(-5.0, 0.5, 0.5), Vec3A::new(1.0, 0.0, 0.0))
            .unwrap();
        assert_eq!(hit.voxel_type, VoxelType(5));
        assert_eq!(hit.cell, VoxelUnits(IVec3::ZERO));
        assert_eq!(hit.normal, IVec3::new(-1, 0, 0));
        assert_relative_eq!(hit.distance, 5.0);
    }

    #[test]
    fn ray_from_inside_skips_empty_nodes() {
        let h = single_voxel_world();
        let hit = h
            .trace(Vec3A::new(31.5, 0.5, 0.5), Vec3A::new(-2.0, 0.0, 0.0))
            .unwrap();
        assert_eq!(hit.cell, VoxelUnits(IVec3::ZERO));
        assert_eq!(hit.normal, IVec3::new(1, 0, 0));
        assert_relative_eq!(hit.distance, 30.5);
    }

    #[test]
    fn uniform_chunk_is_hit_at_its_face() {
        let h = single_voxel_world();
        h.write_chunk(
            h.shape().chunk_index(ChunkUnits(IVec3::ONE)).unwrap(),
            NodeTag::Uniform(VoxelType(7)),
        );
        let hit = h
            .trace(Vec3A::new(20.5, 20.5, -3.0), Vec3A::new(0.0, 0.0, 1.0))
            .unwrap();
        assert_eq!(hit.voxel_type, VoxelType(7));
        assert_eq!(hit.cell, VoxelUnits(IVec3::new(20, 20, 16)));
        assert_eq!(hit.normal, IVec3::new(0, 0, -1));
        assert_relative_eq!(hit.distance, 19.0);
    }

    #[test]
    fn cells_without_the_solid_bit_are_passed_through() {
        let mut payload = [0; WORDS_PER_BLOCK];
        // Cell (0, 0, 0) has a type but no solid bit. Cell (1, 0, 0) is solid.
        payload[0] = 0x0003 | (VoxelCell::solid(VoxelType(5)).0 as u32) << 16;
        let h = world_with_first_block(&payload);
        let hit = h
            .trace(Vec3A::new(-5.0, 0.5, 0.5), Vec3A::new(1.0, 0.0, 0.0))
            .unwrap();
        assert_eq!(hit.voxel_type, VoxelType(5));
        assert_eq!(hit.cell, VoxelUnits(IVec3::new(1, 0, 0)));
        assert_relative_eq!(hit.distance, 6.0);
    }

    #[test]
    fn misses() {
        let h = single_voxel_world();
        // Passes beside the world.
        assert_eq!(h.trace(Vec3A::new(-5.0, 40.0, 0.5), Vec3A::new(1.0, 0.0, 0.0)), None);
        // Leaves the world without touching the voxel.
        assert_eq!(h.trace(Vec3A::new(0.5, 1.5, 0.5), Vec3A::new(1.0, 0.0, 0.0)), None);
        assert_eq!(h.trace(Vec3A::splat(0.5), Vec3A::ZERO), None);
    }
}
