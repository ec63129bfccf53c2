/// Payload bytes per NAND page.
pub const PAGE_SIZE: usize = 2048;

/// Spare (out-of-band) bytes per NAND page.
pub const SPARE_SIZE: usize = 64;

/// Payload plus spare, the number of bytes clocked per page transfer.
pub const PAGE_TOTAL_SIZE: usize = PAGE_SIZE + SPARE_SIZE;

/// Pages per erase block.
pub const PAGES_PER_BLOCK: u32 = 64;

/// Pages on a 2 Gbit part.
pub const PAGES_2GBIT: u32 = 131_072;

/// Pages on a 4 Gbit part.
pub const PAGES_4GBIT: u32 = 262_144;

/// 32-bit sample words per page, the size of one DMA buffer.
pub const PAGE_WORDS: usize = PAGE_SIZE / 4;

/// Pages in one sound slot region, independent of part size.
pub const PAGES_PER_SOUND: u32 = 4096;

/// Erase blocks in one sound slot region.
pub const BLOCKS_PER_SOUND: u32 = PAGES_PER_SOUND / PAGES_PER_BLOCK;

/// Bytes in the first-write window of an upload (metadata page plus the rest).
pub const PRELOAD_BYTES: usize = 32_768;

/// Pages covered by [`PRELOAD_BYTES`].
pub const PRELOAD_PAGES: u32 = (PRELOAD_BYTES / PAGE_SIZE) as u32;

/// Bytes per numbered upload data chunk.
pub const CHUNK_BYTES: usize = PRELOAD_BYTES;

/// Pages covered by one data chunk.
pub const CHUNK_PAGES: u32 = PRELOAD_PAGES;

/// Opaque per-slot user metadata size.
pub const USER_METADATA_SIZE: usize = PAGE_SIZE;

/// Size of the persisted metadata record in the first page's spare area.
pub const METADATA_RECORD_SIZE: usize = 16;

/// Shortest accepted sound, in sample words.
pub const MIN_SOUND_LENGTH: u32 = 16;

/// Slots 0 and 1 hold float envelope data and never play as audio.
pub const RESERVED_SLOTS: u32 = 2;

/// Ticks without a DMA-complete before the watchdog resets the board.
pub const DMA_TIMEOUT_TICKS: u32 = 20_000;

/// Idle filler length at 96 kHz, in words.
pub const FILLER_WORDS_96K: usize = 32;

/// Idle filler length at 192 kHz, in words.
pub const FILLER_WORDS_192K: usize = 64;

/// Ready-line polls before a synchronous flash operation gives up.
pub const BUSY_POLL_LIMIT: u32 = 100_000;

/// Status polls allowed for one non-blocking block erase.
pub const MAX_ERASE_POLLS: u32 = 100_000;

/// Highest tone frequency accepted by [`play_tone`](crate::playback::PlaybackEngine::play_tone).
pub const MAX_TONE_HZ: u32 = 40_000;
