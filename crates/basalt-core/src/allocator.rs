use crossbeam::queue::SegQueue;
use static_assertions::const_assert;
use std::sync::atomic::{AtomicU32, Ordering};
use thiserror::Error;

/// A slot number handed out by a [`SlotAllocator`].
///
/// Slots are stored in the 30-bit value field of a tagged word, so they never exceed [`MAX_SLOTS`].
pub type Slot = u32;

/// The number of addressable slots in any allocator.
pub const MAX_SLOTS: u32 = 1 << 30;

const_assert!(MAX_SLOTS <= u32::MAX / 2);

#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum AllocError {
    #[error("slot allocator exhausted: {requested} requested, {available} available")]
    Exhausted { requested: u32, available: u32 },
}

/// Hands out slots by popping a free list, falling back to bumping a counter.
///
/// Both paths are lock-free. The free list is an unbounded MPMC queue, so any thread may free a slot that another thread
/// allocated.
pub struct SlotAllocator {
    next: AtomicU32,
    free: SegQueue<Slot>,
    max_slots: u32,
}

impl Default for SlotAllocator {
    fn default() -> Self {
        Self::new(MAX_SLOTS)
    }
}

impl SlotAllocator {
    pub fn new(max_slots: u32) -> Self {
        Self {
            next: AtomicU32::new(0),
            free: SegQueue::new(),
            max_slots: max_slots.min(MAX_SLOTS),
        }
    }

    /// Restores an allocator from its high water mark and the slots below it that are not in use.
    pub fn from_parts(high_water_mark: u32, free_slots: impl IntoIterator<Item = Slot>) -> Self {
        let free = SegQueue::new();
        for slot in free_slots {
            debug_assert!(slot < high_water_mark);
            free.push(slot);
        }
        Self {
            next: AtomicU32::new(high_water_mark),
            free,
            max_slots: MAX_SLOTS,
        }
    }

    #[inline]
    pub fn allocate(&self) -> Result<Slot, AllocError> {
        if let Some(slot) = self.free.pop() {
            return Ok(slot);
        }
        let max_slots = self.max_slots;
        self.next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max_slots).then(|| n + 1)
            })
            .map_err(|_| AllocError::Exhausted {
                requested: 1,
                available: 0,
            })
    }

    /// The slot must not be referenced by anything once it is freed.
    #[inline]
    pub fn free(&self, slot: Slot) {
        debug_assert!(slot < self.high_water_mark());
        self.free.push(slot);
    }

    /// Fails if `count` more slots could not be allocated right now.
    pub fn check_available(&self, count: u32) -> Result<(), AllocError> {
        let available = self.available();
        if count > available {
            return Err(AllocError::Exhausted {
                requested: count,
                available,
            });
        }
        Ok(())
    }

    pub fn available(&self) -> u32 {
        let unbumped = self.max_slots.saturating_sub(self.high_water_mark());
        unbumped.saturating_add(self.free.len() as u32)
    }

    /// One past the largest slot ever handed out.
    #[inline]
    pub fn high_water_mark(&self) -> u32 {
        self.next.load(Ordering::Acquire)
    }

    pub fn num_free(&self) -> usize {
        self.free.len()
    }

    pub fn num_allocated(&self) -> usize {
        self.high_water_mark() as usize - self.num_free()
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
