//! Error types.
//!
//! Flash failures are reported, never retried. Upload rejections carry the
//! numeric codes the host tooling already understands.

use thiserror::Error;

/// NAND driver failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlashError {
    /// The underlying bus reported an error.
    #[error("flash bus transfer failed")]
    Bus,
    /// The ready line stayed low past the poll limit.
    #[error("flash stayed busy past the poll limit")]
    Timeout,
    /// The read-ID sequence returned a device code this driver does not know.
    #[error("unrecognised flash device code {0:#04x}")]
    UnknownDevice(u8),
    /// A page program reported a non-zero status.
    #[error("page program failed, status {0:#04x}")]
    ProgramFailed(u8),
    /// A block erase reported a non-zero status.
    #[error("block erase failed, status {0:#04x}")]
    EraseFailed(u8),
    /// Page or block beyond the end of the device, or beyond the slot.
    #[error("address {0} is out of range")]
    OutOfRange(u32),
    /// An operation that needs the capacity ran before `identify()`.
    #[error("device has not been identified")]
    NotIdentified,
}

/// Upload rejection. See [`UploadError::code`] for the wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UploadError {
    #[error("sound index out of range")]
    BadSoundIndex,
    #[error("sound length too short or larger than the slot")]
    BadSoundLength,
    #[error("sample rate must be 96000 or 192000")]
    BadSampleRate,
    #[error("data type must be 0 (int32) or 1 (float32)")]
    BadDataType,
    #[error("data type does not match the slot")]
    DataTypeMismatch,
    #[error("data chunk out of sequence or outside the slot")]
    BadDataIndex,
    #[error("a sound is playing")]
    ProducingSound,
    #[error("a sound started while the upload was in progress")]
    StartedProducingSound,
    /// Flash failed while the upload was being written.
    #[error("flash write failed: {0}")]
    Flash(FlashError),
}

impl UploadError {
    /// Numeric code reported to the host.
    ///
    /// Flash failures are reported as [`BadDataIndex`](Self::BadDataIndex),
    /// the code the host treats as "write did not land".
    pub const fn code(&self) -> i32 {
        match self {
            UploadError::BadSoundIndex => -1020,
            UploadError::BadSoundLength => -1021,
            UploadError::BadSampleRate => -1022,
            UploadError::BadDataType => -1023,
            UploadError::DataTypeMismatch => -1024,
            UploadError::BadDataIndex | UploadError::Flash(_) => -1025,
            UploadError::ProducingSound => -1030,
            UploadError::StartedProducingSound => -1031,
        }
    }
}

impl From<FlashError> for UploadError {
    fn from(e: FlashError) -> Self {
        UploadError::Flash(e)
    }
}

/// Why a trigger was ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TriggerError {
    /// Nothing playable is stored in the slot.
    #[error("slot {0} holds no playable sound")]
    NoSound(u32),
    /// A sound is already starting or playing.
    #[error("a sound is already active")]
    Busy,
    /// Tone frequency outside 1..=40000 Hz.
    #[error("tone frequency {0} Hz out of range")]
    BadFrequency(u32),
}

/// A DMA channel flag was flipped out of turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[error("DMA channel {channel} is not empty")]
pub struct BufferStateError {
    pub channel: usize,
}

/// Failure inside the playback tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PlaybackError {
    #[error("flash read failed: {0}")]
    Flash(#[from] FlashError),
    #[error("DMA submit failed")]
    Dma,
    #[error("codec reconfiguration failed")]
    Codec,
    #[error("sound-on signal pin failed")]
    Signal,
    #[error(transparent)]
    BufferState(#[from] BufferStateError),
}
