use crate::tools::VoxelModel;

use basalt_core::glam::IVec3;
use basalt_map::{
    chunk_min, replace_cell_in_word, ChunkUnits, FlatIndex, VoxelCell, VoxelType, VoxelUnits, CHUNK_EDGE,
    WORDS_PER_CHUNK,
};

/// Produces the initial content of a world, one chunk at a time.
///
/// Generators are called from many threads at once.
pub trait WorldGenerator: Sync {
    /// Fills `out` (flat, block-major, zeroed) with the content of `chunk`. Voxels outside of `requested_size` must stay empty.
    fn generate_chunk(
        &self,
        chunk: ChunkUnits<IVec3>,
        requested_size: VoxelUnits<IVec3>,
        out: &mut [u32; WORDS_PER_CHUNK],
    );
}

/// Calls `f` for every voxel of `chunk` inside of `requested_size` and stores the cell it returns.
pub fn fill_chunk_with(
    chunk: ChunkUnits<IVec3>,
    requested_size: VoxelUnits<IVec3>,
    out: &mut [u32; WORDS_PER_CHUNK],
    mut f: impl FnMut(IVec3) -> VoxelCell,
) {
    let min = chunk_min(chunk).0;
    let max = (min + IVec3::splat(CHUNK_EDGE)).min(requested_size.0);
    for z in min.z..max.z {
        for y in min.y..max.y {
            for x in min.x..max.x {
                let p = IVec3::new(x, y, z);
                let cell = f(p);
                if cell.is_empty() {
                    continue;
                }
                let i = FlatIndex::from_local(p - min);
                out[i.word()] = replace_cell_in_word(out[i.word()], i.is_high(), cell);
            }
        }
    }
}

/// Rolling hills over a flat bedrock layer.
#[derive(Clone, Copy, Debug)]
pub struct TerrainGenerator {
    pub base_height: f32,
    pub amplitude: f32,
    pub wavelength: f32,
    pub surface: VoxelType,
    pub ground: VoxelType,
}

impl Default for TerrainGenerator {
    fn default() -> Self {
        Self {
            base_height: 32.0,
            amplitude: 12.0,
            wavelength: 96.0,
            surface: VoxelType(2),
            ground: VoxelType(1),
        }
    }
}

impl TerrainGenerator {
    pub fn height_at(&self, x: i32, z: i32) -> i32 {
        let k = std::f32::consts::TAU / self.wavelength.max(1.0);
        let h = self.base_height
            + self.amplitude * 0.5 * ((x as f32 * k).sin() + (z as f32 * k * 0.7).cos());
        h.max(1.0) as i32
    }
}

impl WorldGenerator for TerrainGenerator {
    fn generate_chunk(
        &self,
        chunk: ChunkUnits<IVec3>,
        requested_size: VoxelUnits<IVec3>,
        out: &mut [u32; WORDS_PER_CHUNK],
    ) {
        let min = chunk_min(chunk).0;
        if min.y > (self.base_height + self.amplitude) as i32 {
            return;
        }
        fill_chunk_with(chunk, requested_size, out, |p| {
            let h = self.height_at(p.x, p.z);
            if p.y >= h {
                VoxelCell::EMPTY
            } else if p.y == h - 1 {
                VoxelCell::solid(self.surface)
            } else {
                VoxelCell::solid(self.ground)
            }
        })
    }
}

/// Repeats a model across the world, tiled along X and Z, standing on the ground plane.
pub struct ModelGenerator {
    pub model: VoxelModel,
}

impl WorldGenerator for ModelGenerator {
    fn generate_chunk(
        &self,
        chunk: ChunkUnits<IVec3>,
        requested_size: VoxelUnits<IVec3>,
        out: &mut [u32; WORDS_PER_CHUNK],
    ) {
        let size = self.model.size();
        if size.cmple(IVec3::ZERO).any() || chunk_min(chunk).0.y >= size.y {
            return;
        }
        fill_chunk_with(chunk, requested_size, out, |p| {
            let q = IVec3::new(p.x.rem_euclid(size.x), p.y, p.z.rem_euclid(size.z));
            self.model.get(q)
        })
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
    use basalt_map::cell_in_word;

    fn cell_at(words: &[u32; WORDS_PER_CHUNK], local: IVec3) -> VoxelCell {
        let i = FlatIndex::from_local(local);
        cell_in_word(words[i.word()], i.is_high())
    }

    #[test]
    fn voxels_outside_the_requested_size_stay_empty() {
        let mut out = [0; WORDS_PER_CHUNK];
        fill_chunk_with(
            ChunkUnits(IVec3::new(1, 0, 0)),
            VoxelUnits(IVec3::new(20, 16, 16)),
            &mut out,
            |_| VoxelCell::solid(VoxelType(3)),
        );
        assert_eq!(cell_at(&out, IVec3::new(3, 5, 5)), VoxelCell(0x8003));
        assert_eq!(cell_at(&out, IVec3::new(4, 5, 5)), VoxelCell::EMPTY);
    }

    #[test]
    fn terrain_has_a_surface_layer() {
        let generator = TerrainGenerator {
            amplitude: 0.0,
            base_height: 10.0,
            ..Default::default()
        };
        let mut out = [0; WORDS_PER_CHUNK];
        generator.generate_chunk(ChunkUnits(IVec3::ZERO), VoxelUnits(IVec3::splat(64)), &mut out);
        assert_eq!(cell_at(&out, IVec3::new(3, 9, 3)), VoxelCell::solid(generator.surface));
        assert_eq!(cell_at(&out, IVec3::new(3, 0, 3)), VoxelCell::solid(generator.ground));
        assert_eq!(cell_at(&out, IVec3::new(3, 10, 3)), VoxelCell::EMPTY);

        // Entirely above the hills.
        let mut out = [0; WORDS_PER_CHUNK];
        generator.generate_chunk(ChunkUnits(IVec3::new(0, 1, 0)), VoxelUnits(IVec3::splat(64)), &mut out);
        assert!(out.iter().all(|&w| w == 0));
    }

    #[test]
    fn model_is_tiled() {
        let mut model = VoxelModel::new(IVec3::new(2, 1, 2));
        model.set(IVec3::new(1, 0, 0), VoxelCell::solid(VoxelType(4)));
        let generator = ModelGenerator { model };
        let mut out = [0; WORDS_PER_CHUNK];
        generator.generate_chunk(ChunkUnits(IVec3::ZERO), VoxelUnits(IVec3::splat(16)), &mut out);
        assert_eq!(cell_at(&out, IVec3::new(5, 0, 2)), VoxelCell(0x8004));
        assert_eq!(cell_at(&out, IVec3::new(4, 0, 2)), VoxelCell::EMPTY);
        assert_eq!(cell_at(&out, IVec3::new(5, 1, 2)), VoxelCell::EMPTY);
    }
}
