//! The whole sound card behind one main-loop object.
//!
//! `SoundCard` owns the allocator, the RAM cache, the playback engine and
//! the upload session, and decides which of them may touch flash on each
//! pass:
//!
//! 1. the engine ticks first, since it has a deadline;
//! 2. while nothing plays, the upload advances by one flash operation;
//! 3. a finished upload is re-read into the cache so it can be triggered at
//!    once.
//!
//! The host link and the trigger inputs call the command methods between
//! polls.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{OutputPin, StatefulOutputPin};

use crate::constants::{CHUNK_BYTES, PRELOAD_BYTES, USER_METADATA_SIZE};
use crate::control::{AudioControl, AudioDma, SystemReset};
use crate::error::{FlashError, PlaybackError, TriggerError, UploadError};
use crate::flash::{FlashStorage, NandBus};
use crate::playback::{PlaybackEngine, PlaybackEvent};
use crate::sounds::{RawMetadata, SoundAllocator, SoundCache, SoundMetadata};
use crate::upload::{UploadPhase, UploadSession};

/// Answer to a sound info query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SoundInfo {
    /// Bit `i` set when slot `i` holds a sound.
    pub existence: u64,
    /// Metadata of the queried slot.
    pub metadata: Option<SoundMetadata>,
}

pub struct SoundCard<'a, B, DMA, CODEC, RST, SIG, const N: usize> {
    allocator: SoundAllocator<B>,
    cache: SoundCache<N>,
    engine: PlaybackEngine<'a, DMA, CODEC, RST, SIG>,
    upload: UploadSession,
}

impl<'a, B, DMA, CODEC, RST, SIG, const N: usize> SoundCard<'a, B, DMA, CODEC, RST, SIG, N>
where
    B: NandBus,
    DMA: AudioDma,
    CODEC: AudioControl,
    RST: SystemReset,
    SIG: OutputPin,
{
    /// Identify the flash part. Call [`boot`](Self::boot) before the first
    /// poll.
    pub fn new(
        flash: FlashStorage<B>,
        engine: PlaybackEngine<'a, DMA, CODEC, RST, SIG>,
    ) -> Result<Self, FlashError> {
        Ok(SoundCard {
            allocator: SoundAllocator::new(flash)?,
            cache: SoundCache::new(),
            engine,
            upload: UploadSession::new(),
        })
    }

    /// Scan every slot and cache the playable ones. Returns how many slots
    /// could not be read; those count as empty.
    pub fn boot(&mut self) -> u32 {
        self.allocator.scan_into(&mut self.cache)
    }

    /// One main-loop pass.
    pub fn poll(&mut self) -> Result<Option<PlaybackEvent>, PlaybackError> {
        let event = self.engine.tick(&mut self.allocator, &self.cache)?;

        // Upload failures are kept in the session phase for the host to read.
        if let Ok(Some(slot)) = self.upload.step(&mut self.allocator, self.engine.is_playing()) {
            self.allocator.refresh(&mut self.cache, slot)?;
        }
        Ok(event)
    }

    // ── Playback commands ──────────────────────────────────────────────

    pub fn trigger(&mut self, slot: u32) -> Result<(), TriggerError> {
        self.engine.trigger(slot, &self.cache)
    }

    #[cfg(feature = "tone")]
    pub fn play_tone(&mut self, hz: u32) -> Result<(), TriggerError> {
        self.engine.play_tone(hz)
    }

    pub fn stop(&mut self) {
        self.engine.stop();
    }

    pub fn is_playing(&self) -> bool {
        self.engine.is_playing()
    }

    // ── Host commands ──────────────────────────────────────────────────

    /// Start an upload. The slot is unplayable until the upload completes.
    pub fn begin_upload(
        &mut self,
        raw: &RawMetadata,
        preload: &[u8; PRELOAD_BYTES],
        user: &[u8; USER_METADATA_SIZE],
    ) -> Result<SoundMetadata, UploadError> {
        let metadata = self.upload.begin(
            raw,
            preload,
            user,
            &mut self.allocator,
            self.engine.is_playing(),
        )?;
        self.cache.set(metadata.slot, None);
        Ok(metadata)
    }

    pub fn upload_data(&mut self, index: u32, chunk: &[u8; CHUNK_BYTES]) -> Result<(), UploadError> {
        self.upload.data(index, chunk, self.engine.is_playing())
    }

    pub fn abort_upload(&mut self) {
        self.upload.abort(&mut self.allocator);
    }

    pub fn upload_phase(&self) -> UploadPhase {
        self.upload.phase()
    }

    /// Existence mask and metadata of `slot`, with its user blob copied into
    /// `user`. Refused while a sound plays, since it reads flash.
    pub fn sound_info(
        &mut self,
        slot: u32,
        user: &mut [u8; USER_METADATA_SIZE],
    ) -> Result<SoundInfo, UploadError> {
        if slot >= self.allocator.slot_count() {
            return Err(UploadError::BadSoundIndex);
        }
        if self.engine.is_playing() {
            return Err(UploadError::ProducingSound);
        }
        self.allocator.read_user_metadata(slot, user)?;
        Ok(SoundInfo {
            existence: self.cache.existence_mask(),
            metadata: self.cache.metadata(slot),
        })
    }

    /// Suspend the DMA watchdog while the host link is busy.
    pub fn set_watchdog_enabled(&mut self, enabled: bool) {
        self.engine.set_watchdog_enabled(enabled);
    }

    pub fn request_reset(&mut self) {
        warn!("card: reset requested by host");
        self.engine.reset_board();
    }

    /// Erase every slot and forget the cache.
    pub fn wipe(&mut self) -> Result<(), FlashError> {
        self.upload.abort(&mut self.allocator);
        self.cache.clear();
        self.allocator.wipe_all_regions()
    }

    /// Maintenance mode: wipe everything, then blink `led` forever.
    pub fn erase_all<L, D>(&mut self, led: L, delay: D) -> !
    where
        L: StatefulOutputPin,
        D: DelayNs,
    {
        self.cache.clear();
        self.allocator.erase_all(led, delay)
    }

    // ── Accessors ──────────────────────────────────────────────────────

    pub fn cache(&self) -> &SoundCache<N> {
        &self.cache
    }

    pub fn allocator(&self) -> &SoundAllocator<B> {
        &self.allocator
    }

    pub fn engine(&self) -> &PlaybackEngine<'a, DMA, CODEC, RST, SIG> {
        &self.engine
    }
}
