//! Host upload sequencing.
//!
//! An upload is a metadata command carrying the preload window and the
//! user-metadata blob, followed by numbered data chunks `1..`. Every chunk is
//! 32 KiB, i.e. 16 pages. The session turns these commands into the
//! allocator's one-operation-per-call steps:
//!
//! ```text
//! begin ──> SavingUserMetadata ──> ErasingRegion ──> WritingPreload
//!                                                        │
//!            ┌───────────────────── data(i) ─────────────┤
//!            v                                           v
//!      WritingData(i) ──────────> AwaitingData ──> ... Complete
//! ```
//!
//! Rejections carry the host error codes of [`UploadError::code`].

use crate::constants::{CHUNK_BYTES, CHUNK_PAGES, PAGE_SIZE, PRELOAD_BYTES, USER_METADATA_SIZE};
use crate::error::UploadError;
use crate::flash::NandBus;
use crate::sounds::layout::pages_for_length;
use crate::sounds::{PageChunk, RawMetadata, SoundAllocator, SoundMetadata};

/// Where an upload stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UploadPhase {
    /// No upload has been started.
    Idle,
    SavingUserMetadata,
    ErasingRegion,
    WritingPreload,
    /// Ready for the data chunk with this index.
    AwaitingData(u32),
    /// Writing the data chunk with this index.
    WritingData(u32),
    /// The last upload landed in flash.
    Complete,
    /// The last upload was abandoned.
    Failed(UploadError),
}

impl UploadPhase {
    /// Whether an upload is underway and blocks a new one.
    pub fn in_progress(&self) -> bool {
        !matches!(self, UploadPhase::Idle | UploadPhase::Complete | UploadPhase::Failed(_))
    }
}

/// State and staging buffers of one upload.
pub struct UploadSession {
    phase: UploadPhase,
    metadata: Option<SoundMetadata>,
    /// Chunks in the sound, the preload window included.
    chunks: u32,
    preload: PageChunk,
    chunk: PageChunk,
    user: [u8; USER_METADATA_SIZE],
}

impl UploadSession {
    pub const fn new() -> Self {
        UploadSession {
            phase: UploadPhase::Idle,
            metadata: None,
            chunks: 0,
            preload: [[0; PAGE_SIZE]; CHUNK_PAGES as usize],
            chunk: [[0; PAGE_SIZE]; CHUNK_PAGES as usize],
            user: [0; USER_METADATA_SIZE],
        }
    }

    pub fn phase(&self) -> UploadPhase {
        self.phase
    }

    /// Metadata of the current or last upload.
    pub fn metadata(&self) -> Option<SoundMetadata> {
        self.metadata
    }

    /// Accept a metadata command.
    ///
    /// Fields are checked in order and the first failure is reported. Nothing
    /// is written to flash before [`step`](Self::step) runs.
    pub fn begin<B: NandBus>(
        &mut self,
        raw: &RawMetadata,
        preload: &[u8; PRELOAD_BYTES],
        user: &[u8; USER_METADATA_SIZE],
        allocator: &mut SoundAllocator<B>,
        playing: bool,
    ) -> Result<SoundMetadata, UploadError> {
        let metadata = raw
            .validate(allocator.slot_count())
            .inspect_err(|e| warn!("upload: metadata rejected: {:?}", e))?;
        if playing {
            warn!("upload: rejected, a sound is playing");
            return Err(UploadError::ProducingSound);
        }
        if self.phase.in_progress() {
            warn!("upload: rejected, previous upload unfinished in {:?}", self.phase);
            return Err(UploadError::BadDataIndex);
        }
        if !allocator.prepare_region_check(metadata.slot, metadata.length) {
            return Err(UploadError::BadSoundLength);
        }

        load_chunk(&mut self.preload, preload);
        self.user.copy_from_slice(user);
        self.metadata = Some(metadata);
        self.chunks = pages_for_length(metadata.length).div_ceil(CHUNK_PAGES).max(1);
        self.phase = UploadPhase::SavingUserMetadata;
        info!(
            "upload: slot {} accepted, {} words in {} chunks",
            metadata.slot,
            metadata.length,
            self.chunks
        );
        Ok(metadata)
    }

    /// Accept data chunk `index`. Chunks must arrive in order, each after the
    /// previous one has been written.
    pub fn data(&mut self, index: u32, chunk: &[u8; CHUNK_BYTES], playing: bool) -> Result<(), UploadError> {
        if playing {
            if self.phase.in_progress() {
                self.fail(UploadError::StartedProducingSound);
            }
            return Err(UploadError::StartedProducingSound);
        }
        match self.phase {
            UploadPhase::AwaitingData(expected) if expected == index => {
                load_chunk(&mut self.chunk, chunk);
                self.phase = UploadPhase::WritingData(index);
                Ok(())
            }
            phase => {
                warn!("upload: chunk {} rejected in {:?}", index, phase);
                Err(UploadError::BadDataIndex)
            }
        }
    }

    /// Run one flash operation of the upload.
    ///
    /// Returns the slot once its last page is written. A sound that started
    /// playing abandons the upload with
    /// [`StartedProducingSound`](UploadError::StartedProducingSound).
    pub fn step<B: NandBus>(
        &mut self,
        allocator: &mut SoundAllocator<B>,
        playing: bool,
    ) -> Result<Option<u32>, UploadError> {
        if !self.phase.in_progress() {
            return Ok(None);
        }
        if playing {
            allocator.abort_sequences();
            self.fail(UploadError::StartedProducingSound);
            return Err(UploadError::StartedProducingSound);
        }
        match self.advance(allocator) {
            Ok(done) => Ok(done),
            Err(e) => {
                allocator.abort_sequences();
                self.fail(e);
                Err(e)
            }
        }
    }

    fn advance<B: NandBus>(&mut self, allocator: &mut SoundAllocator<B>) -> Result<Option<u32>, UploadError> {
        let Some(metadata) = self.metadata else {
            return Err(UploadError::BadDataIndex);
        };
        match self.phase {
            UploadPhase::SavingUserMetadata => {
                if allocator.save_user_metadata(metadata.slot, &self.user)? {
                    self.phase = UploadPhase::ErasingRegion;
                }
            }
            UploadPhase::ErasingRegion => {
                if allocator.prepare_region_erase_step()? {
                    self.phase = UploadPhase::WritingPreload;
                }
            }
            UploadPhase::WritingPreload => {
                if allocator.allocate_metadata(&metadata, &self.preload)? {
                    return Ok(self.chunk_written(0, metadata.slot));
                }
            }
            UploadPhase::WritingData(index) => {
                if allocator.allocate_data_step(metadata.slot, index, &self.chunk)? == CHUNK_PAGES {
                    allocator.allocate_data_reset();
                    return Ok(self.chunk_written(index, metadata.slot));
                }
            }
            UploadPhase::AwaitingData(_)
            | UploadPhase::Idle
            | UploadPhase::Complete
            | UploadPhase::Failed(_) => {}
        }
        Ok(None)
    }

    fn chunk_written(&mut self, index: u32, slot: u32) -> Option<u32> {
        let next = index + 1;
        if next >= self.chunks {
            self.phase = UploadPhase::Complete;
            info!("upload: slot {} complete", slot);
            Some(slot)
        } else {
            self.phase = UploadPhase::AwaitingData(next);
            None
        }
    }

    /// Abandon the current upload, e.g. on host request.
    pub fn abort<B: NandBus>(&mut self, allocator: &mut SoundAllocator<B>) {
        if self.phase.in_progress() {
            allocator.abort_sequences();
            self.phase = UploadPhase::Idle;
        }
    }

    fn fail(&mut self, error: UploadError) {
        warn!("upload: abandoned in {:?}: {:?}", self.phase, error);
        self.phase = UploadPhase::Failed(error);
    }
}

impl Default for UploadSession {
    fn default() -> Self {
        Self::new()
    }
}

fn load_chunk(dst: &mut PageChunk, src: &[u8; CHUNK_BYTES]) {
    for (page, bytes) in dst.iter_mut().zip(src.chunks_exact(PAGE_SIZE)) {
        page.copy_from_slice(bytes);
    }
}
