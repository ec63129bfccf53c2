//! Sound slot allocator.
//!
//! Owns the flash driver and exposes the upload and playback access
//! patterns as small steps. Every `*_step`-style method does at most one
//! page program or one erase start/poll per call, so the main loop stays
//! responsive while a slot is being rewritten.
//!
//! A failed step returns the error and puts its state machine back to
//! standby; nothing is retried.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::StatefulOutputPin;

use super::cache::SoundCache;
use super::layout::{blocks_for_length, SlotLayout};
use super::metadata::SoundMetadata;
use crate::constants::{
    CHUNK_PAGES, MAX_ERASE_POLLS, PAGES_PER_SOUND, PAGE_SIZE, PAGE_WORDS, PRELOAD_PAGES,
    SPARE_SIZE,
};
use crate::error::FlashError;
use crate::flash::{FlashStorage, NandBus};

/// Sixteen pages of upload payload: the preload window or one data chunk.
pub type PageChunk = [[u8; PAGE_SIZE]; CHUNK_PAGES as usize];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum EraseState {
    Standby,
    CheckErase { polls: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum MetadataState {
    Standby,
    /// Page 0 is written; `next` is the next preload page.
    ProgramRemaining { next: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum UserMetadataState {
    Standby,
    CheckErase { polls: u32 },
    EraseDone,
}

/// Blocks scheduled by [`SoundAllocator::prepare_region_check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RegionPlan {
    first_block: u32,
    blocks: u32,
    erased: u32,
}

/// Streaming read position: the next page [`SoundAllocator::read_next_page`]
/// returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ReadCursor {
    pub slot: u32,
    pub page: u32,
}

/// Maps sound slots onto flash and sequences their reads and writes.
pub struct SoundAllocator<B> {
    flash: FlashStorage<B>,
    layout: SlotLayout,
    plan: Option<RegionPlan>,
    erase: EraseState,
    metadata: MetadataState,
    user: UserMetadataState,
    data_counter: u32,
    cursor: ReadCursor,
}

impl<B: NandBus> SoundAllocator<B> {
    /// Identify the part (if not done yet) and derive the slot layout.
    pub fn new(mut flash: FlashStorage<B>) -> Result<Self, FlashError> {
        let capacity = match flash.capacity() {
            Some(c) => c,
            None => flash.identify()?,
        };
        let layout = SlotLayout::new(capacity);
        info!("allocator: {} sound slots", layout.slot_count());
        Ok(Self {
            flash,
            layout,
            plan: None,
            erase: EraseState::Standby,
            metadata: MetadataState::Standby,
            user: UserMetadataState::Standby,
            data_counter: 0,
            cursor: ReadCursor::default(),
        })
    }

    pub fn slot_count(&self) -> u32 {
        self.layout.slot_count()
    }

    pub fn layout(&self) -> SlotLayout {
        self.layout
    }

    pub fn flash(&self) -> &FlashStorage<B> {
        &self.flash
    }

    pub fn flash_mut(&mut self) -> &mut FlashStorage<B> {
        &mut self.flash
    }

    pub fn cursor(&self) -> ReadCursor {
        self.cursor
    }

    /// Drop any half-finished write sequence. An erase already issued to the
    /// chip still completes; the driver waits for it before the next access.
    pub fn abort_sequences(&mut self) {
        self.plan = None;
        self.erase = EraseState::Standby;
        self.metadata = MetadataState::Standby;
        self.user = UserMetadataState::Standby;
        self.data_counter = 0;
    }

    // ── Region preparation ─────────────────────────────────────────────

    /// Plan the erase for a `length`-word sound in `slot`.
    ///
    /// `false` if the slot does not exist or the sound does not fit in it.
    pub fn prepare_region_check(&mut self, slot: u32, length: u32) -> bool {
        self.plan = None;
        self.erase = EraseState::Standby;

        let Some(blocks) = self.layout.blocks(slot) else {
            return false;
        };
        if !self.layout.fits(slot, length) {
            debug!("allocator: {} words do not fit slot {}", length, slot);
            return false;
        }
        self.plan = Some(RegionPlan {
            first_block: blocks.start,
            blocks: blocks_for_length(length),
            erased: 0,
        });
        true
    }

    /// Advance the planned erase by one start or poll.
    ///
    /// Returns `true` once the last planned block has been erased, and also
    /// when nothing is planned.
    pub fn prepare_region_erase_step(&mut self) -> Result<bool, FlashError> {
        let result = self.erase_region_step();
        if result.is_err() {
            self.plan = None;
            self.erase = EraseState::Standby;
        }
        result
    }

    fn erase_region_step(&mut self) -> Result<bool, FlashError> {
        let Some(mut plan) = self.plan else {
            return Ok(true);
        };

        match self.erase {
            EraseState::Standby => {
                self.flash.erase_start(plan.first_block + plan.erased)?;
                self.erase = EraseState::CheckErase { polls: 0 };
                Ok(false)
            }
            EraseState::CheckErase { polls } => {
                if !self.flash.erase_poll()? {
                    if polls + 1 >= MAX_ERASE_POLLS {
                        error!("allocator: erase of block {} never finished", plan.first_block + plan.erased);
                        return Err(FlashError::Timeout);
                    }
                    self.erase = EraseState::CheckErase { polls: polls + 1 };
                    return Ok(false);
                }

                self.flash.erase_finish()?.erase_result()?;
                self.erase = EraseState::Standby;
                plan.erased += 1;

                if plan.erased == plan.blocks {
                    debug!("allocator: {} blocks erased", plan.blocks);
                    self.plan = None;
                    Ok(true)
                } else {
                    self.plan = Some(plan);
                    Ok(false)
                }
            }
        }
    }

    // ── Writing a sound ────────────────────────────────────────────────

    /// Program the next page of the preload window.
    ///
    /// The first call writes page 0 with `metadata` in its spare area, each
    /// later call one more page. Returns `true` when all 16 pages are written.
    pub fn allocate_metadata(
        &mut self,
        metadata: &SoundMetadata,
        preload: &PageChunk,
    ) -> Result<bool, FlashError> {
        let result = self.allocate_metadata_step(metadata, preload);
        if result.is_err() {
            self.metadata = MetadataState::Standby;
        }
        result
    }

    fn allocate_metadata_step(
        &mut self,
        metadata: &SoundMetadata,
        preload: &PageChunk,
    ) -> Result<bool, FlashError> {
        let base = self
            .layout
            .first_page(metadata.slot)
            .ok_or(FlashError::OutOfRange(metadata.slot))?;

        match self.metadata {
            MetadataState::Standby => {
                self.flash
                    .program_page(base, &preload[0], &metadata.to_spare())?
                    .program_result()?;
                self.metadata = MetadataState::ProgramRemaining { next: 1 };
                Ok(false)
            }
            MetadataState::ProgramRemaining { next } => {
                let page = preload
                    .get(next as usize)
                    .ok_or(FlashError::OutOfRange(base + next))?;
                self.flash.program_page_data(base + next, page)?.program_result()?;

                if next + 1 == PRELOAD_PAGES {
                    self.metadata = MetadataState::Standby;
                    Ok(true)
                } else {
                    self.metadata = MetadataState::ProgramRemaining { next: next + 1 };
                    Ok(false)
                }
            }
        }
    }

    /// Program one page of data chunk `data_index` (1-based; chunk 0 is the
    /// preload window). Returns how many pages of this chunk are now written.
    pub fn allocate_data_step(
        &mut self,
        slot: u32,
        data_index: u32,
        chunk: &PageChunk,
    ) -> Result<u32, FlashError> {
        let base = self.layout.first_page(slot).ok_or(FlashError::OutOfRange(slot))?;
        let offset = data_index
            .checked_mul(CHUNK_PAGES)
            .and_then(|o| o.checked_add(self.data_counter))
            .filter(|&o| o < PAGES_PER_SOUND)
            .ok_or(FlashError::OutOfRange(data_index))?;
        let page = chunk
            .get(self.data_counter as usize)
            .ok_or(FlashError::OutOfRange(base + offset))?;

        self.flash.program_page_data(base + offset, page)?.program_result()?;
        self.data_counter += 1;
        Ok(self.data_counter)
    }

    /// Restart the page counter for the next data chunk.
    pub fn allocate_data_reset(&mut self) {
        self.data_counter = 0;
    }

    // ── Reading a sound ────────────────────────────────────────────────

    /// Read page 0 of `slot` and decode its metadata.
    ///
    /// `Ok(None)` when the slot does not exist or holds no valid record. On
    /// success the cursor points at page 1.
    pub fn read_first_page(
        &mut self,
        slot: u32,
        words: &mut [u32; PAGE_WORDS],
    ) -> Result<Option<SoundMetadata>, FlashError> {
        let Some(page) = self.layout.first_page(slot) else {
            return Ok(None);
        };
        let mut spare = [0u8; SPARE_SIZE];
        self.flash.read_page_words_and_spare(page, words, &mut spare)?;

        let metadata = SoundMetadata::from_spare(&spare, slot);
        if metadata.is_some() {
            self.cursor = ReadCursor { slot, page: 1 };
        }
        Ok(metadata)
    }

    /// Decode the metadata of `slot` from the spare area alone.
    pub fn probe(&mut self, slot: u32) -> Result<Option<SoundMetadata>, FlashError> {
        let Some(page) = self.layout.first_page(slot) else {
            return Ok(None);
        };
        let mut spare = [0u8; SPARE_SIZE];
        self.flash.read_spare(page, &mut spare)?;
        Ok(SoundMetadata::from_spare(&spare, slot))
    }

    /// Point the cursor at `page` of `slot`.
    pub fn seek(&mut self, slot: u32, page: u32) {
        self.cursor = ReadCursor { slot, page };
    }

    /// Read the page under the cursor and advance it.
    pub fn read_next_page(&mut self, words: &mut [u32; PAGE_WORDS]) -> Result<(), FlashError> {
        let ReadCursor { slot, page } = self.cursor;
        let base = self.layout.first_page(slot).ok_or(FlashError::OutOfRange(slot))?;
        if page >= PAGES_PER_SOUND {
            return Err(FlashError::OutOfRange(base + page));
        }
        self.flash.read_page_words(base + page, words)?;
        self.cursor.page += 1;
        Ok(())
    }

    // ── Boot scan ──────────────────────────────────────────────────────

    /// Rebuild `cache` from flash: existence of every slot, and the first two
    /// pages of every existing slot the cache has room for. A slot that
    /// fails to read is recorded as empty and the scan carries on. Returns
    /// the number of such slots.
    pub fn scan_into<const N: usize>(&mut self, cache: &mut SoundCache<N>) -> u32 {
        cache.clear();
        let mut unreadable = 0;
        for slot in 0..self.slot_count() {
            if let Err(e) = self.refresh(cache, slot) {
                warn!("allocator: slot {} unreadable, treated as empty: {:?}", slot, e);
                cache.set(slot, None);
                unreadable += 1;
            }
        }
        info!(
            "allocator: scan found {} sounds, mask {:#x}",
            cache.existence_mask().count_ones(),
            cache.existence_mask()
        );
        unreadable
    }

    /// Re-read one slot into `cache`.
    pub fn refresh<const N: usize>(&mut self, cache: &mut SoundCache<N>, slot: u32) -> Result<(), FlashError> {
        let metadata = match cache.entry_mut(slot) {
            Some(entry) => {
                let metadata = self.read_first_page(slot, &mut entry.first)?;
                if metadata.is_some() {
                    self.read_next_page(&mut entry.second)?;
                }
                metadata
            }
            None => self.probe(slot)?,
        };
        cache.set(slot, metadata);
        Ok(())
    }

    // ── User metadata ──────────────────────────────────────────────────

    /// Erase block `slot` and program `blob` into its first page, one step
    /// per call. Returns `true` once the blob is written.
    pub fn save_user_metadata(&mut self, slot: u32, blob: &[u8; PAGE_SIZE]) -> Result<bool, FlashError> {
        let result = self.save_user_metadata_step(slot, blob);
        if result.is_err() {
            self.user = UserMetadataState::Standby;
        }
        result
    }

    fn save_user_metadata_step(&mut self, slot: u32, blob: &[u8; PAGE_SIZE]) -> Result<bool, FlashError> {
        let page = self
            .layout
            .user_metadata_page(slot)
            .ok_or(FlashError::OutOfRange(slot))?;

        match self.user {
            UserMetadataState::Standby => {
                self.flash.erase_start(slot)?;
                self.user = UserMetadataState::CheckErase { polls: 0 };
                Ok(false)
            }
            UserMetadataState::CheckErase { polls } => {
                if self.flash.erase_poll()? {
                    self.flash.erase_finish()?.erase_result()?;
                    self.user = UserMetadataState::EraseDone;
                } else if polls + 1 >= MAX_ERASE_POLLS {
                    error!("allocator: user metadata erase of block {} never finished", slot);
                    return Err(FlashError::Timeout);
                } else {
                    self.user = UserMetadataState::CheckErase { polls: polls + 1 };
                }
                Ok(false)
            }
            UserMetadataState::EraseDone => {
                self.flash.program_page_data(page, blob)?.program_result()?;
                self.user = UserMetadataState::Standby;
                Ok(true)
            }
        }
    }

    /// Read the user metadata blob of `slot`.
    pub fn read_user_metadata(&mut self, slot: u32, blob: &mut [u8; PAGE_SIZE]) -> Result<(), FlashError> {
        let page = self
            .layout
            .user_metadata_page(slot)
            .ok_or(FlashError::OutOfRange(slot))?;
        self.flash.read_page_data(page, blob)
    }

    // ── Maintenance ────────────────────────────────────────────────────

    /// Erase every block of every slot region, synchronously.
    pub fn wipe_all_regions(&mut self) -> Result<(), FlashError> {
        self.abort_sequences();
        for slot in 0..self.slot_count() {
            let Some(blocks) = self.layout.blocks(slot) else {
                continue;
            };
            for block in blocks {
                self.flash.erase_block(block)?.erase_result()?;
            }
        }
        warn!("allocator: all {} slots wiped", self.slot_count());
        Ok(())
    }

    /// Wipe everything, then blink `led` every 100 ms until power-cycled.
    pub fn erase_all<L, D>(&mut self, mut led: L, mut delay: D) -> !
    where
        L: StatefulOutputPin,
        D: DelayNs,
    {
        if let Err(e) = self.wipe_all_regions() {
            error!("allocator: wipe failed: {:?}", e);
        }
        loop {
            // Nothing left to report a pin error to.
            let _ = led.toggle();
            delay.delay_ms(100);
        }
    }
}
