//! Mapping from sound slots to flash regions.
//!
//! ```text
//! block:  0 ........ 63 | 64 ....... 127 | ... | (n-1)·64 ... n·64-1
//! slot:   0             | 1               | ... | n-1
//! ```
//!
//! Every slot owns [`BLOCKS_PER_SOUND`] consecutive blocks whatever the
//! sound's length. The first page of a slot carries the metadata record in
//! its spare area. User metadata for slot `i` lives in block `i`, which
//! places all user metadata inside slot 0's region.

use core::ops::Range;

use crate::constants::{BLOCKS_PER_SOUND, PAGES_PER_BLOCK, PAGES_PER_SOUND, PAGE_SIZE};
use crate::flash::Capacity;

/// Slot geometry of one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SlotLayout {
    slot_count: u32,
}

impl SlotLayout {
    pub const fn new(capacity: Capacity) -> Self {
        SlotLayout {
            slot_count: capacity.slot_count(),
        }
    }

    pub const fn slot_count(&self) -> u32 {
        self.slot_count
    }

    pub const fn contains(&self, slot: u32) -> bool {
        slot < self.slot_count
    }

    /// First page of `slot`, where the metadata record lives.
    pub const fn first_page(&self, slot: u32) -> Option<u32> {
        if self.contains(slot) {
            Some(slot * PAGES_PER_SOUND)
        } else {
            None
        }
    }

    /// Erase blocks owned by `slot`.
    pub const fn blocks(&self, slot: u32) -> Option<Range<u32>> {
        if self.contains(slot) {
            Some(slot * BLOCKS_PER_SOUND..(slot + 1) * BLOCKS_PER_SOUND)
        } else {
            None
        }
    }

    /// Pages owned by `slot`.
    pub const fn pages(&self, slot: u32) -> Option<Range<u32>> {
        if self.contains(slot) {
            Some(slot * PAGES_PER_SOUND..(slot + 1) * PAGES_PER_SOUND)
        } else {
            None
        }
    }

    /// Page holding the user metadata blob of `slot`.
    pub const fn user_metadata_page(&self, slot: u32) -> Option<u32> {
        if self.contains(slot) {
            Some(slot * PAGES_PER_BLOCK)
        } else {
            None
        }
    }

    /// Whether a sound of `length` words fits in `slot`'s region.
    pub const fn fits(&self, slot: u32, length: u32) -> bool {
        self.contains(slot) && pages_for_length(length) <= PAGES_PER_SOUND
    }
}

/// Pages needed for `length` sample words.
pub const fn pages_for_length(length: u32) -> u32 {
    let bytes = length as u64 * 4;
    bytes.div_ceil(PAGE_SIZE as u64) as u32
}

/// Erase blocks needed for `length` sample words.
pub const fn blocks_for_length(length: u32) -> u32 {
    pages_for_length(length).div_ceil(PAGES_PER_BLOCK)
}
