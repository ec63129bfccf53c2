//! RAM copy of what the boot scan found.
//!
//! Holds the metadata of every slot plus the first two pages of the first
//! `N` slots, so a trigger can start the DMA without touching flash.

use super::metadata::SoundMetadata;
use crate::constants::{PAGE_WORDS, RESERVED_SLOTS};

/// Most slots any supported part has.
pub const MAX_SLOTS: usize = 64;

/// First and second page of one slot.
pub struct CacheEntry {
    pub first: [u32; PAGE_WORDS],
    pub second: [u32; PAGE_WORDS],
}

impl CacheEntry {
    const EMPTY: CacheEntry = CacheEntry {
        first: [0; PAGE_WORDS],
        second: [0; PAGE_WORDS],
    };
}

/// Metadata of all slots and page cache of slots `0..N`.
pub struct SoundCache<const N: usize> {
    metadata: [Option<SoundMetadata>; MAX_SLOTS],
    entries: [CacheEntry; N],
    exists: u64,
}

impl<const N: usize> SoundCache<N> {
    /// An empty cache. `const` so it can live in a `static`.
    pub const fn new() -> Self {
        assert!(N <= MAX_SLOTS, "cache cannot hold more than 64 slots");
        SoundCache {
            metadata: [None; MAX_SLOTS],
            entries: [CacheEntry::EMPTY; N],
            exists: 0,
        }
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.metadata = [None; MAX_SLOTS];
        self.exists = 0;
    }

    /// Bit `i` set when slot `i` holds a valid sound.
    pub fn existence_mask(&self) -> u64 {
        self.exists
    }

    pub fn exists(&self, slot: u32) -> bool {
        slot < MAX_SLOTS as u32 && self.exists & (1 << slot) != 0
    }

    pub fn metadata(&self, slot: u32) -> Option<SoundMetadata> {
        self.metadata.get(slot as usize).copied().flatten()
    }

    /// Whether `slot` has its pages cached.
    pub fn is_cached(&self, slot: u32) -> bool {
        (slot as usize) < N && self.exists(slot)
    }

    /// A sound can be triggered when it exists, is cached and is not one of
    /// the reserved envelope slots.
    pub fn is_playable(&self, slot: u32) -> bool {
        slot >= RESERVED_SLOTS && self.is_cached(slot)
    }

    /// Cached pages of an existing slot.
    pub fn entry(&self, slot: u32) -> Option<&CacheEntry> {
        if self.is_cached(slot) {
            self.entries.get(slot as usize)
        } else {
            None
        }
    }

    /// Page storage for `slot`, whether or not it currently holds a sound.
    pub(crate) fn entry_mut(&mut self, slot: u32) -> Option<&mut CacheEntry> {
        self.entries.get_mut(slot as usize)
    }

    /// Record what a read of `slot` found.
    pub(crate) fn set(&mut self, slot: u32, metadata: Option<SoundMetadata>) {
        let Some(cell) = self.metadata.get_mut(slot as usize) else {
            return;
        };
        *cell = metadata;
        if metadata.is_some() {
            self.exists |= 1 << slot;
        } else {
            self.exists &= !(1 << slot);
        }
    }
}

impl<const N: usize> Default for SoundCache<N> {
    fn default() -> Self {
        Self::new()
    }
}
