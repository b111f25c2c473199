use crate::coordinates::{BLOCKS_PER_CHUNK, WORDS_PER_BLOCK};

use basalt_core::allocator::{AllocError, Slot, SlotAllocator};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU32, Ordering};

/// Words in one block run, the 4x4x4 block tags of a mixed chunk.
pub const BLOCK_RUN_WORDS: usize = BLOCKS_PER_CHUNK;
/// Words in one voxel payload, the 64 packed cells of a mixed block.
pub const PAYLOAD_WORDS: usize = WORDS_PER_BLOCK;

pub type BlockRun = [u32; BLOCK_RUN_WORDS];
pub type Payload = [u32; PAYLOAD_WORDS];

/// A growable array of atomic words.
///
/// Individual words are read and written through a shared lock, so readers never block each other or writers. Only growth
/// takes the exclusive lock. Callers must not hold a guard on an arena while growing that same arena.
#[derive(Default)]
pub struct WordArena {
    words: RwLock<Vec<AtomicU32>>,
}

impl WordArena {
    pub fn from_vec(words: Vec<u32>) -> Self {
        Self {
            words: RwLock::new(words.into_iter().map(AtomicU32::new).collect()),
        }
    }

    pub fn len(&self) -> usize {
        self.words.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Grows geometrically so amortized growth stays cheap.
    pub fn ensure_len(&self, len: usize) {
        if self.words.read().len() >= len {
            return;
        }
        let mut words = self.words.write();
        if words.len() < len {
            let new_len = len.max(2 * words.len());
            words.resize_with(new_len, || AtomicU32::new(0));
        }
    }

    /// Out-of-range reads observe zero.
    #[inline]
    pub fn load(&self, index: usize) -> u32 {
        self.words
            .read()
            .get(index)
            .map_or(0, |w| w.load(Ordering::Acquire))
    }

    pub fn read_into(&self, start: usize, out: &mut [u32]) {
        let words = self.words.read();
        for (i, o) in out.iter_mut().enumerate() {
            *o = words
                .get(start + i)
                .map_or(0, |w| w.load(Ordering::Acquire));
        }
    }

    /// The range must already be allocated.
    pub fn write_from(&self, start: usize, src: &[u32]) {
        let words = self.words.read();
        let dst = &words[start..start + src.len()];
        for (d, s) in dst.iter().zip(src) {
            d.store(*s, Ordering::Release);
        }
    }

    pub fn range_equals(&self, start: usize, other: &[u32]) -> bool {
        let words = self.words.read();
        match words.get(start..start + other.len()) {
            Some(range) => range
                .iter()
                .zip(other)
                .all(|(w, o)| w.load(Ordering::Acquire) == *o),
            None => false,
        }
    }

    pub fn to_vec(&self) -> Vec<u32> {
        self.words
            .read()
            .iter()
            .map(|w| w.load(Ordering::Acquire))
            .collect()
    }

    pub fn memory_bytes(&self) -> usize {
        self.len() * std::mem::size_of::<u32>()
    }
}

/// Owns the two flat arrays that back the hierarchy below the chunk level, and the allocators that hand out their slots.
///
/// - block runs: 64 block tags per mixed chunk
/// - payloads: 32 words (64 cells) per mixed block
#[derive(Default)]
pub struct AllocationPool {
    block_runs: SlotAllocator,
    block_words: WordArena,
    payloads: SlotAllocator,
    voxel_words: WordArena,
}

impl AllocationPool {
    /// Rebuilds a pool from exported arrays. Slots below each array's length that are not listed as used go on the free lists.
    pub fn from_parts(
        block_words: Vec<u32>,
        used_runs: &[bool],
        voxel_words: Vec<u32>,
        used_payloads: &[bool],
    ) -> Self {
        let free_slots = |used: &[bool]| {
            used.iter()
                .enumerate()
                .filter(|(_, u)| !**u)
                .map(|(i, _)| i as Slot)
                .collect::<Vec<_>>()
        };
        Self {
            block_runs: SlotAllocator::from_parts(used_runs.len() as u32, free_slots(used_runs)),
            block_words: WordArena::from_vec(block_words),
            payloads: SlotAllocator::from_parts(
                used_payloads.len() as u32,
                free_slots(used_payloads),
            ),
            voxel_words: WordArena::from_vec(voxel_words),
        }
    }

    /// Fails unless `runs` block runs and `payloads` payloads could all be allocated.
    pub fn check_capacity(&self, runs: u32, payloads: u32) -> Result<(), AllocError> {
        self.block_runs.check_available(runs)?;
        self.payloads.check_available(payloads)
    }

    pub fn allocate_block_run(&self) -> Result<Slot, AllocError> {
        let run = self.block_runs.allocate()?;
        self.block_words
            .ensure_len((run as usize + 1) * BLOCK_RUN_WORDS);
        Ok(run)
    }

    pub fn free_block_run(&self, run: Slot) {
        self.block_runs.free(run);
    }

    #[inline]
    pub fn load_block_word(&self, run: Slot, block: usize) -> u32 {
        self.block_words
            .load(run as usize * BLOCK_RUN_WORDS + block)
    }

    pub fn read_block_run(&self, run: Slot, out: &mut BlockRun) {
        self.block_words
            .read_into(run as usize * BLOCK_RUN_WORDS, out);
    }

    pub fn write_block_run(&self, run: Slot, words: &BlockRun) {
        self.block_words
            .write_from(run as usize * BLOCK_RUN_WORDS, words);
    }

    /// Allocates a slot and fills it with `content`.
    pub fn allocate_payload(&self, content: &Payload) -> Result<Slot, AllocError> {
        let slot = self.payloads.allocate()?;
        let start = slot as usize * PAYLOAD_WORDS;
        self.voxel_words.ensure_len(start + PAYLOAD_WORDS);
        self.voxel_words.write_from(start, content);
        Ok(slot)
    }

    pub fn free_payload(&self, slot: Slot) {
        self.payloads.free(slot);
    }

    #[inline]
    pub fn load_payload_word(&self, slot: Slot, word: usize) -> u32 {
        self.voxel_words.load(slot as usize * PAYLOAD_WORDS + word)
    }

    pub fn read_payload(&self, slot: Slot, out: &mut Payload) {
        self.voxel_words
            .read_into(slot as usize * PAYLOAD_WORDS, out);
    }

    pub fn payload_equals(&self, slot: Slot, content: &Payload) -> bool {
        self.voxel_words
            .range_equals(slot as usize * PAYLOAD_WORDS, content)
    }

    pub fn num_block_runs(&self) -> usize {
        self.block_runs.num_allocated()
    }

    pub fn num_payloads(&self) -> usize {
        self.payloads.num_allocated()
    }

    pub fn block_run_high_water_mark(&self) -> u32 {
        self.block_runs.high_water_mark()
    }

    pub fn payload_high_water_mark(&self) -> u32 {
        self.payloads.high_water_mark()
    }

    /// Block words up to the high water mark.
    pub fn export_block_words(&self) -> Vec<u32> {
        let mut words = self.block_words.to_vec();
        words.truncate(self.block_run_high_water_mark() as usize * BLOCK_RUN_WORDS);
        words
    }

    /// Voxel words up to the high water mark.
    pub fn export_voxel_words(&self) -> Vec<u32> {
        let mut words = self.voxel_words.to_vec();
        words.truncate(self.payload_high_water_mark() as usize * PAYLOAD_WORDS);
        words
    }

    pub fn block_memory_bytes(&self) -> usize {
        self.block_words.memory_bytes()
    }

    pub fn voxel_memory_bytes(&self) -> usize {
        self.voxel_words.memory_bytes()
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
    fn payload_slots_are_recycled() {
        let pool = AllocationPool::default();
        let a = pool.allocate_payload(&[1; PAYLOAD_WORDS]).unwrap();
        let b = pool.allocate_payload(&[2; PAYLOAD_WORDS]).unwrap();
        assert_ne!(a, b);
        assert!(pool.payload_equals(a, &[1; PAYLOAD_WORDS]));
        assert!(!pool.payload_equals(b, &[1; PAYLOAD_WORDS]));

        pool.free_payload(a);
        let c = pool.allocate_payload(&[3; PAYLOAD_WORDS]).unwrap();
        assert_eq!(c, a);
        let mut out = [0; PAYLOAD_WORDS];
        pool.read_payload(c, &mut out);
        assert_eq!(out, [3; PAYLOAD_WORDS]);
        assert_eq!(pool.num_payloads(), 2);
    }

    #[test]
    fn block_runs_grow_the_arena() {
        let pool = AllocationPool::default();
        let runs: Vec<_> = (0..5).map(|_| pool.allocate_block_run().unwrap()).collect();
        let mut words = [0; BLOCK_RUN_WORDS];
        words[63] = 0xDEAD;
        pool.write_block_run(runs[4], &words);
        assert_eq!(pool.load_block_word(runs[4], 63), 0xDEAD);
        assert!(pool.block_memory_bytes() >= 5 * BLOCK_RUN_WORDS * 4);
        assert_eq!(pool.export_block_words().len(), 5 * BLOCK_RUN_WORDS);
    }

    #[test]
    fn out_of_range_reads_are_zero() {
        let arena = WordArena::default();
        assert_eq!(arena.load(100), 0);
        arena.ensure_len(4);
        arena.write_from(0, &[7, 8, 9, 10]);
        let mut out = [1; 6];
        arena.read_into(2, &mut out);
        assert_eq!(out, [9, 10, 0, 0, 0, 0]);
    }

    #[test]
    fn restored_pool_reuses_holes() {
        let pool = AllocationPool::from_parts(
            vec![0; 2 * BLOCK_RUN_WORDS],
            &[true, false],
            vec![0; 3 * PAYLOAD_WORDS],
            &[false, true, true],
        );
        assert_eq!(pool.allocate_block_run().unwrap(), 1);
        assert_eq!(pool.allocate_block_run().unwrap(), 2);
        assert_eq!(pool.allocate_payload(&[5; PAYLOAD_WORDS]).unwrap(), 0);
        assert_eq!(pool.num_payloads(), 3);
    }
}
