//! Content-addressed storage for voxel payloads.
//!
//! Every mixed block points at a 64-cell payload. Identical payloads are shared: the store maps a content hash to the
//! payload's slot in the [`AllocationPool`] and counts how many blocks refer to it. The table uses open addressing with
//! linear probing and grows by doubling.

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::pool::{AllocationPool, Payload, PAYLOAD_WORDS};

use basalt_core::allocator::Slot;

const fn hash_coefficients() -> [u32; 2 * PAYLOAD_WORDS + 1] {
    let mut c = [0u32; 2 * PAYLOAD_WORDS + 1];
    c[2 * PAYLOAD_WORDS] = 1;
    let mut i = 2 * PAYLOAD_WORDS;
    while i > 0 {
        i -= 1;
        c[i] = c[i + 1].wrapping_mul(31);
    }
    c
}

/// `c[64] = 1` and `c[i] = 31 * c[i + 1]`. Cell `i` is weighted by `c[i + 1]`.
static HASH_COEFFICIENTS: [u32; 2 * PAYLOAD_WORDS + 1] = hash_coefficients();

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PayloadHash {
    pub hash: u32,
    /// All 64 cells are bit-identical.
    pub all_same: bool,
}

/// Polynomial hash of the 15-bit voxel types of all 64 cells.
///
/// The solid bit does not participate, so payloads that differ only in solid bits collide and are told apart by full
/// comparison.
pub fn hash_payload(words: &Payload) -> PayloadHash {
    let c = &HASH_COEFFICIENTS;
    let first = words[0];
    let mut hash = c[0];
    let mut all_same = first & 0xFFFF == first >> 16;
    for (v, &w) in words.iter().enumerate() {
        hash = hash
            .wrapping_add(c[2 * v + 1].wrapping_mul(w & 0x7FFF))
            .wrapping_add(c[2 * v + 2].wrapping_mul((w >> 16) & 0x7FFF));
        all_same &= w == first;
    }
    PayloadHash { hash, all_same }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PayloadEntry {
    pub hash: u32,
    pub slot: Slot,
    pub ref_count: u32,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Insertion {
    pub slot: Slot,
    /// The content was not in the store, so a new payload was written.
    pub is_new: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Removal {
    /// Other blocks still refer to the payload.
    Released,
    /// That was the last reference. The payload slot went back to the pool.
    Freed,
    /// No entry owns that slot.
    NotFound,
}

pub struct ContentAddressedStore {
    table: Vec<Option<PayloadEntry>>,
    len: usize,
    total_references: u64,
    load_factor: f32,
    min_reserved_slots: usize,
    probe_limit: usize,
}

impl ContentAddressedStore {
    pub fn new(config: &StoreConfig) -> Self {
        let load_factor = config.load_factor.clamp(0.05, 0.95);
        let min_reserved_slots = config.min_reserved_slots.max(1) as usize;
        let mut size = 1;
        while (size as f32) * load_factor < min_reserved_slots as f32 {
            size *= 2;
        }
        Self {
            table: vec![None; size],
            len: 0,
            total_references: 0,
            load_factor,
            min_reserved_slots,
            probe_limit: config.probe_limit.max(1) as usize,
        }
    }

    /// The number of unique payloads.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.table.len()
    }

    pub fn total_references(&self) -> u64 {
        self.total_references
    }

    /// References per unique payload.
    pub fn compression_ratio(&self) -> f64 {
        self.total_references as f64 / self.len.max(1) as f64
    }

    pub fn entries(&self) -> impl Iterator<Item = &PayloadEntry> {
        self.table.iter().flatten()
    }

    pub fn ref_count(&self, hash: u32, slot: Slot) -> Option<u32> {
        self.find(hash, slot)
            .and_then(|i| self.table[i])
            .map(|e| e.ref_count)
    }

    /// Returns the slot of the payload equal to `content`, writing a new payload only if no such payload exists.
    ///
    /// A failed insert leaves the store and pool untouched.
    pub fn insert(
        &mut self,
        hash: u32,
        content: &Payload,
        pool: &AllocationPool,
    ) -> Result<Insertion, StoreError> {
        self.maybe_grow(self.len + 1);

        let mask = self.table.len() - 1;
        let start = hash as usize & mask;
        for i in 0..self.probe_limit.min(self.table.len()) {
            let index = (start + i) & mask;
            match &mut self.table[index] {
                None => {
                    let slot = pool.allocate_payload(content)?;
                    self.table[index] = Some(PayloadEntry {
                        hash,
                        slot,
                        ref_count: 1,
                    });
                    self.len += 1;
                    self.total_references += 1;
                    return Ok(Insertion { slot, is_new: true });
                }
                Some(entry) => {
                    // Equal hashes are not proof of equal content.
                    if entry.hash == hash && pool.payload_equals(entry.slot, content) {
                        entry.ref_count += 1;
                        self.total_references += 1;
                        return Ok(Insertion {
                            slot: entry.slot,
                            is_new: false,
                        });
                    }
                }
            }
        }

        Err(StoreError::ProbeLimitExceeded {
            hash,
            limit: self.probe_limit as u32,
        })
    }

    /// Adds a reference to an existing payload without comparing content. Used to rebuild the table from the hierarchy.
    pub fn insert_existing(&mut self, hash: u32, slot: Slot) {
        if let Some(i) = self.find(hash, slot) {
            if let Some(entry) = &mut self.table[i] {
                entry.ref_count += 1;
                self.total_references += 1;
            }
            return;
        }
        self.maybe_grow(self.len + 1);
        let index = self.vacant_index(hash);
        self.table[index] = Some(PayloadEntry {
            hash,
            slot,
            ref_count: 1,
        });
        self.len += 1;
        self.total_references += 1;
    }

    /// Drops one reference to the payload at `slot`. `hash` must be the hash of that payload's content.
    pub fn remove(&mut self, hash: u32, slot: Slot, pool: &AllocationPool) -> Removal {
        let index = match self.find(hash, slot) {
            Some(i) => i,
            None => return Removal::NotFound,
        };
        let entry = match &mut self.table[index] {
            Some(e) => e,
            None => return Removal::NotFound,
        };

        entry.ref_count -= 1;
        self.total_references -= 1;
        if entry.ref_count > 0 {
            return Removal::Released;
        }

        self.delete_at(index);
        self.len -= 1;
        pool.free_payload(slot);
        Removal::Freed
    }

    /// Doubles the table until `projected_len` entries plus the reserve fit under the load factor. Returns true if the
    /// table was rebuilt.
    pub fn maybe_grow(&mut self, projected_len: usize) -> bool {
        let needed = (projected_len + self.min_reserved_slots) as f32;
        let mut size = self.table.len();
        while needed > self.load_factor * size as f32 {
            size *= 2;
        }
        if size == self.table.len() {
            return false;
        }

        log::debug!(
            "Growing payload table {} -> {} slots ({} entries)",
            self.table.len(),
            size,
            self.len
        );
        self.rehash(size);
        true
    }

    /// Entries are re-seated by their stored hash alone; content identity was settled when they were inserted.
    fn rehash(&mut self, new_size: usize) {
        let old = std::mem::replace(&mut self.table, vec![None; new_size]);
        for entry in old.into_iter().flatten() {
            let index = self.vacant_index(entry.hash);
            self.table[index] = Some(entry);
        }
    }

    fn vacant_index(&self, hash: u32) -> usize {
        let mask = self.table.len() - 1;
        let mut index = hash as usize & mask;
        while self.table[index].is_some() {
            index = (index + 1) & mask;
        }
        index
    }

    fn find(&self, hash: u32, slot: Slot) -> Option<usize> {
        let mask = self.table.len() - 1;
        let start = hash as usize & mask;
        for i in 0..self.table.len() {
            let index = (start + i) & mask;
            match self.table[index] {
                None => return None,
                Some(e) if e.slot == slot => return Some(index),
                Some(_) => {}
            }
        }
        None
    }

    /// Backward-shift deletion: entries later in the cluster move into the hole when that doesn't put them before their
    /// home slot, so every remaining entry stays reachable from its home.
    fn delete_at(&mut self, index: usize) {
        let mask = self.table.len() - 1;
        let mut hole = index;
        self.table[hole] = None;
        let mut j = hole;
        loop {
            j = (j + 1) & mask;
            let entry = match self.table[j] {
                Some(e) => e,
                None => break,
            };
            let home = entry.hash as usize & mask;
            if (j.wrapping_sub(home) & mask) >= (j.wrapping_sub(hole) & mask) {
                self.table[hole] = Some(entry);
                self.table[j] = None;
                hole = j;
            }
        }
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
