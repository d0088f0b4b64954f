//! Contiguous registered memory backing the composite buffer pool.
//!
//! # Design
//!
//! All pool slots are carved out of a single allocation so the transport
//! registers one memory region once at setup, exactly like the NIC sees it:
//!
//! ```text
//! base                                                      base + len
//! | slot 0 | slot 1 | slot 2 | ...                | slot capacity-1 |
//!   <----> slot_bytes
//! ```
//!
//! The storage is `u32` words so every slot is 4-byte aligned and can be
//! viewed as `i16` or `i32` pixels through `bytemuck` without copying.
//!
//! ## Safety
//!
//! - The allocation is never resized or moved after construction, so slot
//!   addresses handed to the transport stay valid for the pool's lifetime.
//! - Mutable access to a slot is only created through a `SlotLease`, and the
//!   occupancy table guarantees at most one lease per slot.
//! - While a slot is in flight the transport reads it through its raw
//!   address; no lease exists for it until the reclaimer releases it.

use std::ptr::NonNull;

/// Key the transport assigned when this memory was registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryKey(pub u32);

/// A posted slot: everything the transport needs to build a send descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InFlightSlot {
    /// Pool slot index; echoed back as the completion's work-request id.
    pub buffer_id: usize,
    /// Logical output frame carried by this slot.
    pub frame: u64,
    /// Virtual address of the first payload byte.
    pub addr: u64,
    /// Payload length in bytes.
    pub length: usize,
}

/// Fixed-size, word-aligned memory block split into equal slots.
///
/// Owns the allocation through a raw base pointer taken once at
/// construction. Every slot view and address is derived from that pointer
/// with `add`, never through a reference to the whole block, so a view of
/// one slot stays valid while other slots are written.
pub(crate) struct RegisteredMemory {
    base: NonNull<u32>,
    slot_words: usize,
    slots: usize,
}

// SAFETY: RegisteredMemory is Send + Sync because:
// 1. The allocation is never reallocated or moved after construction
// 2. Slot views are only created for slots claimed in the occupancy table
// 3. Claimed slots are disjoint, so no two &mut views alias
unsafe impl Sync for RegisteredMemory {}
unsafe impl Send for RegisteredMemory {}

impl RegisteredMemory {
    /// Allocate `slots` zeroed slots of `slot_bytes` bytes each.
    ///
    /// `slot_bytes` must be a multiple of 4.
    pub(crate) fn new(slots: usize, slot_bytes: usize) -> Self {
        debug_assert_eq!(slot_bytes % 4, 0, "slot size must be word aligned");
        let slot_words = slot_bytes / 4;
        let words: &mut [u32] = Box::leak(vec![0u32; slots * slot_words].into_boxed_slice());
        Self {
            base: NonNull::from(words).cast::<u32>(),
            slot_words,
            slots,
        }
    }

    fn total_words(&self) -> usize {
        self.slots * self.slot_words
    }

    /// Address of the first byte of the block.
    pub(crate) fn base_addr(&self) -> u64 {
        self.base.as_ptr() as u64
    }

    /// Total size of the block in bytes.
    pub(crate) fn len_bytes(&self) -> usize {
        self.total_words() * 4
    }

    /// Address of the first byte of slot `index`.
    pub(crate) fn slot_addr(&self, index: usize) -> u64 {
        self.base_addr() + (index * self.slot_words * 4) as u64
    }

    /// Mutable word view of slot `index`.
    ///
    /// # Safety
    ///
    /// `index` must be below the slot count. The caller must hold the
    /// occupancy claim for `index` and must not create a second view of the
    /// same slot while this one is alive.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn slot_mut(&self, index: usize) -> &mut [u32] {
        debug_assert!(index < self.slots, "slot {index} out of range");
        let start = self.base.as_ptr().add(index * self.slot_words);
        std::slice::from_raw_parts_mut(start, self.slot_words)
    }
}

impl Drop for RegisteredMemory {
    fn drop(&mut self) {
        let words = std::ptr::slice_from_raw_parts_mut(self.base.as_ptr(), self.total_words());
        // SAFETY: `base` came from `Box::leak` of a slice of exactly
        // `total_words()` words and is released only here.
        drop(unsafe { Box::from_raw(words) });
    }
}

impl std::fmt::Debug for RegisteredMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredMemory")
            .field("base_addr", &format_args!("{:#x}", self.base_addr()))
            .field("slots", &self.slots)
            .field("slot_bytes", &(self.slot_words * 4))
            .finish()
    }
}
