//! Sound metadata and its 16-byte persisted record.
//!
//! The record is four little-endian `i32`s, in this order: slot index,
//! length in sample words, sample rate in Hz, data type code. The host sends
//! the same layout in the upload command, so one decoder serves both.

use crate::constants::{
    FILLER_WORDS_192K, FILLER_WORDS_96K, METADATA_RECORD_SIZE, MIN_SOUND_LENGTH, PAGES_PER_SOUND,
    PAGE_WORDS, RESERVED_SLOTS, SPARE_SIZE,
};
use crate::error::UploadError;

/// Longest sound a slot can hold, in sample words.
pub const MAX_SOUND_LENGTH: u32 = PAGES_PER_SOUND * PAGE_WORDS as u32;

/// DAC sample rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SampleRate {
    Hz96000,
    Hz192000,
}

impl SampleRate {
    pub const fn from_hz(hz: i32) -> Option<Self> {
        match hz {
            96_000 => Some(SampleRate::Hz96000),
            192_000 => Some(SampleRate::Hz192000),
            _ => None,
        }
    }

    pub const fn hz(self) -> u32 {
        match self {
            SampleRate::Hz96000 => 96_000,
            SampleRate::Hz192000 => 192_000,
        }
    }

    /// Words per idle filler buffer, sized so the DMA completes at the same
    /// pace at either rate.
    pub const fn filler_words(self) -> usize {
        match self {
            SampleRate::Hz96000 => FILLER_WORDS_96K,
            SampleRate::Hz192000 => FILLER_WORDS_192K,
        }
    }
}

/// Sample encoding of a stored sound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataType {
    /// Signed 32-bit PCM words.
    Int32 = 0,
    /// IEEE-754 single precision, used by the reserved envelope slots.
    Float32 = 1,
}

impl DataType {
    pub const fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(DataType::Int32),
            1 => Some(DataType::Float32),
            _ => None,
        }
    }

    pub const fn code(self) -> i32 {
        self as i32
    }

    /// The type a slot must carry: float for the reserved slots, PCM elsewhere.
    pub const fn required_for(slot: u32) -> Self {
        if slot < RESERVED_SLOTS {
            DataType::Float32
        } else {
            DataType::Int32
        }
    }
}

/// Validated description of a stored sound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SoundMetadata {
    pub slot: u32,
    /// Length in 32-bit sample words. Always a multiple of 4.
    pub length: u32,
    pub sample_rate: SampleRate,
    pub data_type: DataType,
}

impl SoundMetadata {
    /// Encode as the 16-byte record.
    pub fn to_record(&self) -> [u8; METADATA_RECORD_SIZE] {
        RawMetadata::from(*self).to_record()
    }

    /// Spare area for the first page: the record followed by zeros.
    pub fn to_spare(&self) -> [u8; SPARE_SIZE] {
        let mut spare = [0u8; SPARE_SIZE];
        spare[..METADATA_RECORD_SIZE].copy_from_slice(&self.to_record());
        spare
    }

    /// Decode the record stored in `spare` for `slot`.
    ///
    /// `None` for an erased page, an unsupported rate or type, a slot index
    /// that does not match, or a length no slot could hold.
    pub fn from_spare(spare: &[u8; SPARE_SIZE], slot: u32) -> Option<Self> {
        let mut record = [0u8; METADATA_RECORD_SIZE];
        record.copy_from_slice(&spare[..METADATA_RECORD_SIZE]);
        let raw = RawMetadata::from_record(&record);

        let sample_rate = SampleRate::from_hz(raw.sample_rate)?;
        let data_type = DataType::from_code(raw.data_type)?;
        if raw.slot < 0 || raw.slot as u32 != slot {
            return None;
        }
        if raw.length <= 0 || raw.length as u32 > MAX_SOUND_LENGTH {
            return None;
        }
        Some(SoundMetadata {
            slot,
            length: raw.length as u32,
            sample_rate,
            data_type,
        })
    }

    /// Payload bytes of the sound.
    pub const fn byte_len(&self) -> u32 {
        self.length * 4
    }

    /// Reserved slots hold envelope data, not audio.
    pub const fn is_playable(&self) -> bool {
        self.slot >= RESERVED_SLOTS
    }
}

/// Metadata fields as received, before validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RawMetadata {
    pub slot: i32,
    pub length: i32,
    pub sample_rate: i32,
    pub data_type: i32,
}

impl RawMetadata {
    pub fn from_record(record: &[u8; METADATA_RECORD_SIZE]) -> Self {
        let field = |i: usize| {
            i32::from_le_bytes([record[i * 4], record[i * 4 + 1], record[i * 4 + 2], record[i * 4 + 3]])
        };
        RawMetadata {
            slot: field(0),
            length: field(1),
            sample_rate: field(2),
            data_type: field(3),
        }
    }

    pub fn to_record(&self) -> [u8; METADATA_RECORD_SIZE] {
        let mut record = [0u8; METADATA_RECORD_SIZE];
        for (dst, v) in record
            .chunks_exact_mut(4)
            .zip([self.slot, self.length, self.sample_rate, self.data_type])
        {
            dst.copy_from_slice(&v.to_le_bytes());
        }
        record
    }

    /// Check the fields of an upload against a device with `slot_count`
    /// slots. Checks run in field order and the first failure is reported.
    /// The length is truncated down to a multiple of 4.
    pub fn validate(&self, slot_count: u32) -> Result<SoundMetadata, UploadError> {
        if self.slot < 0 || self.slot as u32 >= slot_count {
            return Err(UploadError::BadSoundIndex);
        }
        let slot = self.slot as u32;

        if self.length < MIN_SOUND_LENGTH as i32 {
            return Err(UploadError::BadSoundLength);
        }
        let length = self.length as u32 & !3;

        let sample_rate = SampleRate::from_hz(self.sample_rate).ok_or(UploadError::BadSampleRate)?;
        let data_type = DataType::from_code(self.data_type).ok_or(UploadError::BadDataType)?;
        if data_type != DataType::required_for(slot) {
            return Err(UploadError::DataTypeMismatch);
        }

        Ok(SoundMetadata {
            slot,
            length,
            sample_rate,
            data_type,
        })
    }
}

impl From<SoundMetadata> for RawMetadata {
    fn from(m: SoundMetadata) -> Self {
        RawMetadata {
            slot: m.slot as i32,
            length: m.length as i32,
            sample_rate: m.sample_rate.hz() as i32,
            data_type: m.data_type.code(),
        }
    }
}
