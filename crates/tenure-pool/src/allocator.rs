//! Slot allocation
//!
//! The pool does not decide which slot a participant gets; it asks an
//! allocator. The allocator only tracks free/in-use, never who holds a slot.

use std::fmt;

use tenure_core::SlotId;

/// Fixed-capacity slot source consumed by the pool
pub trait SlotAllocator: fmt::Debug {
    /// Hand out a free slot, if any
    fn try_allocate(&mut self) -> Option<SlotId>;

    /// Return `slot` to the free set
    fn release(&mut self, slot: SlotId);

    /// Every slot, in a stable order
    fn enumerate_slots(&self) -> Vec<SlotId>;

    /// Bring the allocator in line with replicated state observed for `slot`
    fn observe(&mut self, slot: SlotId, in_use: bool);

    fn capacity(&self) -> usize;

    fn in_use(&self) -> usize;

    fn available(&self) -> usize {
        self.capacity() - self.in_use()
    }
}

/// Allocator over `0..capacity` that always hands out the lowest free slot
#[derive(Clone, Debug)]
pub struct FixedSlotAllocator {
    used: Vec<bool>,
}

impl FixedSlotAllocator {
    pub fn new(capacity: usize) -> Self {
        FixedSlotAllocator {
            used: vec![false; capacity],
        }
    }

    pub fn is_in_use(&self, slot: SlotId) -> bool {
        self.used.get(slot.index()).copied().unwrap_or(false)
    }
}

impl SlotAllocator for FixedSlotAllocator {
    fn try_allocate(&mut self) -> Option<SlotId> {
        let index = self.used.iter().position(|used| !used)?;
        self.used[index] = true;
        Some(SlotId::new(index))
    }

    fn release(&mut self, slot: SlotId) {
        if let Some(used) = self.used.get_mut(slot.index()) {
            *used = false;
        }
    }

    fn enumerate_slots(&self) -> Vec<SlotId> {
        (0..self.used.len()).map(SlotId::new).collect()
    }

    fn observe(&mut self, slot: SlotId, in_use: bool) {
        if let Some(used) = self.used.get_mut(slot.index()) {
            *used = in_use;
        }
    }

    fn capacity(&self) -> usize {
        self.used.len()
    }

    fn in_use(&self) -> usize {
        self.used.iter().filter(|used| **used).count()
    }
}
