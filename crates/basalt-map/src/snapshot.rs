use crate::config::StoreConfig;
use crate::coordinates::*;
use crate::error::SnapshotError;
use crate::hierarchy::VoxelHierarchy;
use crate::pool::{AllocationPool, Payload, BLOCK_RUN_WORDS, PAYLOAD_WORDS};
use crate::store::{hash_payload, ContentAddressedStore};
use crate::tag::NodeTag;
use crate::units::*;

use basalt_core::allocator::MAX_SLOTS;
use basalt_core::glam::IVec3;
use bytemuck::{bytes_of, bytes_of_mut, cast_slice, Pod, Zeroable};
use lz4_flex::frame::{FrameDecoder, FrameEncoder};
use std::io::{self, Read, Write};

const MAGIC: u32 = u32::from_le_bytes(*b"BSLT");
const VERSION: u32 = 1;

/// Largest world a snapshot may describe, in chunks per axis.
const MAX_SIZE_IN_CHUNKS: u32 = 1 << 12;
const MAX_BLOCK_WORDS: u64 = MAX_SLOTS as u64 * BLOCK_RUN_WORDS as u64;
const MAX_VOXEL_WORDS: u64 = MAX_SLOTS as u64 * PAYLOAD_WORDS as u64;

/// The number of chunks in a world of `size` chunks, if such a world can be built.
fn checked_num_chunks(size: [u32; 3]) -> Option<u32> {
    if size.iter().any(|&s| s == 0 || s > MAX_SIZE_IN_CHUNKS) {
        return None;
    }
    size[0].checked_mul(size[1])?.checked_mul(size[2])
}

/// Reads exactly `n` words. The buffer only grows as data arrives, so a lying header can't force a huge allocation.
fn read_words(reader: &mut impl Read, n: u32) -> io::Result<Vec<u32>> {
    let len = n as u64 * 4;
    let mut bytes = Vec::new();
    reader.by_ref().take(len).read_to_end(&mut bytes)?;
    if bytes.len() as u64 != len {
        return Err(io::ErrorKind::UnexpectedEof.into());
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| u32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
struct SnapshotHeader {
    magic: u32,
    version: u32,
    size_in_chunks: [u32; 3],
    num_chunk_words: u32,
    num_block_words: u32,
    num_voxel_words: u32,
}

/// The three flat word arrays of a world, in the packed tag encoding.
///
/// The dedup table and free lists are not stored. They are rebuilt from the arrays on import.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WorldSnapshot {
    pub size_in_chunks: [u32; 3],
    pub chunk_words: Vec<u32>,
    pub block_words: Vec<u32>,
    pub voxel_words: Vec<u32>,
}

impl WorldSnapshot {
    pub fn capture(hierarchy: &VoxelHierarchy) -> Self {
        let size = hierarchy.shape().size_in_chunks().0;
        Self {
            size_in_chunks: [size.x as u32, size.y as u32, size.z as u32],
            chunk_words: hierarchy.export_chunk_words(),
            block_words: hierarchy.pool().export_block_words(),
            voxel_words: hierarchy.pool().export_voxel_words(),
        }
    }

    /// Writes an LZ4 frame holding a small header followed by the three arrays.
    pub fn write_to(&self, writer: impl Write) -> Result<(), SnapshotError> {
        let header = SnapshotHeader {
            magic: MAGIC,
            version: VERSION,
            size_in_chunks: self.size_in_chunks,
            num_chunk_words: self.chunk_words.len() as u32,
            num_block_words: self.block_words.len() as u32,
            num_voxel_words: self.voxel_words.len() as u32,
        };
        let mut encoder = FrameEncoder::new(writer);
        encoder.write_all(bytes_of(&header))?;
        for words in [&self.chunk_words, &self.block_words, &self.voxel_words] {
            encoder.write_all(cast_slice(words))?;
        }
        encoder
            .finish()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(())
    }

    pub fn read_from(reader: impl Read) -> Result<Self, SnapshotError> {
        let mut decoder = FrameDecoder::new(reader);
        let mut header = SnapshotHeader::zeroed();
        decoder.read_exact(bytes_of_mut(&mut header))?;
        if header.magic != MAGIC {
            return Err(SnapshotError::Malformed("bad magic".into()));
        }
        if header.version != VERSION {
            return Err(SnapshotError::Malformed(format!(
                "unsupported version {}",
                header.version
            )));
        }

        match checked_num_chunks(header.size_in_chunks) {
            Some(n) if n == header.num_chunk_words => (),
            _ => {
                return Err(SnapshotError::Malformed(format!(
                    "{} chunk words for a world of {:?} chunks",
                    header.num_chunk_words, header.size_in_chunks
                )))
            }
        }
        if header.num_block_words as u64 > MAX_BLOCK_WORDS || header.num_voxel_words as u64 > MAX_VOXEL_WORDS {
            return Err(SnapshotError::Malformed("block or voxel array too large".into()));
        }

        let chunk_words = read_words(&mut decoder, header.num_chunk_words)?;
        let block_words = read_words(&mut decoder, header.num_block_words)?;
        let voxel_words = read_words(&mut decoder, header.num_voxel_words)?;

        Ok(Self {
            size_in_chunks: header.size_in_chunks,
            chunk_words,
            block_words,
            voxel_words,
        })
    }

    /// Rebuilds a hierarchy and its dedup table. Every tag is checked against the array it points into.
    pub fn restore(
        self,
        config: &StoreConfig,
    ) -> Result<(VoxelHierarchy, ContentAddressedStore), SnapshotError> {
        let num_chunks = checked_num_chunks(self.size_in_chunks);
        if num_chunks.map_or(true, |n| n as usize != self.chunk_words.len()) {
            return Err(SnapshotError::Malformed(format!(
                "{} chunk words for a world of {:?} chunks",
                self.chunk_words.len(),
                self.size_in_chunks
            )));
        }
        let [x, y, z] = self.size_in_chunks;
        let shape = WorldShape::new(ChunkUnits(IVec3::new(x as i32, y as i32, z as i32)));
        if self.block_words.len() % BLOCK_RUN_WORDS != 0 || self.voxel_words.len() % PAYLOAD_WORDS != 0 {
            return Err(SnapshotError::Malformed("truncated block or voxel array".into()));
        }

        let num_runs = self.block_words.len() / BLOCK_RUN_WORDS;
        let num_payloads = self.voxel_words.len() / PAYLOAD_WORDS;
        let mut used_runs = vec![false; num_runs];
        let mut used_payloads = vec![false; num_payloads];
        let mut references = Vec::new();
        for &word in &self.chunk_words {
            let run = match NodeTag::from_bits(word) {
                NodeTag::Mixed(run) => run as usize,
                _ => continue,
            };
            if run >= num_runs || used_runs[run] {
                return Err(SnapshotError::Malformed(format!("bad block run {}", run)));
            }
            used_runs[run] = true;
            for &block in &self.block_words[run * BLOCK_RUN_WORDS..(run + 1) * BLOCK_RUN_WORDS] {
                if let NodeTag::Mixed(slot) = NodeTag::from_bits(block) {
                    let slot = slot as usize;
                    if slot >= num_payloads {
                        return Err(SnapshotError::Malformed(format!("bad payload {}", slot)));
                    }
                    used_payloads[slot] = true;
                    references.push(slot);
                }
            }
        }

        let mut store = ContentAddressedStore::new(config);
        store.maybe_grow(used_payloads.iter().filter(|u| **u).count());
        let mut payload: Payload = [0; PAYLOAD_WORDS];
        for slot in references {
            payload.copy_from_slice(&self.voxel_words[slot * PAYLOAD_WORDS..(slot + 1) * PAYLOAD_WORDS]);
            store.insert_existing(hash_payload(&payload).hash, slot as u32);
        }

        let pool = AllocationPool::from_parts(self.block_words, &used_runs, self.voxel_words, &used_payloads);
        let hierarchy = VoxelHierarchy::from_parts(shape, self.chunk_words, pool);

        log::info!(
            "Restored {} chunks with {} block runs and {} payloads",
            hierarchy.shape().num_chunks(),
            hierarchy.pool().num_block_runs(),
            store.len()
        );

        Ok((hierarchy, store))
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

    fn tiny() -> WorldSnapshot {
        let mut chunk_words = vec![NodeTag::Empty.to_bits(); 8];
        chunk_words[3] = NodeTag::Mixed(0).to_bits();
        let mut block_words = vec![0; BLOCK_RUN_WORDS];
        block_words[0] = NodeTag::Mixed(1).to_bits();
        block_words[1] = NodeTag::Mixed(1).to_bits();
        let mut voxel_words = vec![0; 2 * PAYLOAD_WORDS];
        voxel_words[PAYLOAD_WORDS] = 0x8001;
        WorldSnapshot {
            size_in_chunks: [2, 2, 2],
            chunk_words,
            block_words,
            voxel_words,
        }
    }

    #[test]
    fn bytes_round_trip() {
        let snapshot = tiny();
        let mut bytes = Vec::new();
        snapshot.write_to(&mut bytes).unwrap();
        assert_eq!(WorldSnapshot::read_from(bytes.as_slice()).unwrap(), snapshot);
    }

    #[test]
    fn restore_rebuilds_references_and_free_slots() {
        let (hierarchy, store) = tiny().restore(&StoreConfig::default()).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.total_references(), 2);
        // Slot 0 was never referenced, so it is handed out again.
        assert_eq!(hierarchy.pool().num_payloads(), 1);
        assert_eq!(hierarchy.pool().allocate_payload(&[0; PAYLOAD_WORDS]).unwrap(), 0);
        assert_eq!(WorldSnapshot::capture(&hierarchy).chunk_words, tiny().chunk_words);
    }

    #[test]
    fn rejects_dangling_tags() {
        let mut snapshot = tiny();
        snapshot.block_words[5] = NodeTag::Mixed(9).to_bits();
        assert!(matches!(
            snapshot.restore(&StoreConfig::default()),
            Err(SnapshotError::Malformed(_))
        ));

        let mut snapshot = tiny();
        snapshot.chunk_words.pop();
        assert!(snapshot.restore(&StoreConfig::default()).is_err());

        assert!(matches!(
            WorldSnapshot::read_from(&b"not a snapshot"[..]),
            Err(SnapshotError::Io(_))
        ));
    }

    fn encode_header(header: &SnapshotHeader) -> Vec<u8> {
        let mut encoder = FrameEncoder::new(Vec::new());
        encoder.write_all(bytes_of(header)).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn rejects_impossible_world_sizes() {
        for size_in_chunks in [[2048, 2048, 2048], [0, 1, 1], [1 << 13, 1, 1]] {
            let snapshot = WorldSnapshot {
                size_in_chunks,
                chunk_words: Vec::new(),
                block_words: Vec::new(),
                voxel_words: Vec::new(),
            };
            assert!(matches!(
                snapshot.restore(&StoreConfig::default()),
                Err(SnapshotError::Malformed(_))
            ));
        }
    }

    #[test]
    fn header_counts_are_checked_before_reading() {
        let header = SnapshotHeader {
            magic: MAGIC,
            version: VERSION,
            size_in_chunks: [2048, 2048, 2048],
            num_chunk_words: 0,
            num_block_words: 0,
            num_voxel_words: 0,
        };
        assert!(matches!(
            WorldSnapshot::read_from(encode_header(&header).as_slice()),
            Err(SnapshotError::Malformed(_))
        ));

        // Chunk words disagree with the world size.
        let header = SnapshotHeader {
            size_in_chunks: [2, 2, 2],
            num_chunk_words: u32::MAX,
            ..header
        };
        assert!(matches!(
            WorldSnapshot::read_from(encode_header(&header).as_slice()),
            Err(SnapshotError::Malformed(_))
        ));

        // Counts that fit the limits but aren't backed by data run out of input.
        let header = SnapshotHeader {
            num_chunk_words: 8,
            num_block_words: u32::MAX,
            num_voxel_words: u32::MAX,
            ..header
        };
        let mut bytes = Vec::new();
        {
            let mut encoder = FrameEncoder::new(&mut bytes);
            encoder.write_all(bytes_of(&header)).unwrap();
            encoder.write_all(cast_slice(&[0u32; 8][..])).unwrap();
            encoder.finish().unwrap();
        }
        assert!(matches!(
            WorldSnapshot::read_from(bytes.as_slice()),
            Err(SnapshotError::Io(_))
        ));
    }
}
