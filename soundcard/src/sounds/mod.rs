//! Sound slots: metadata, flash layout, allocation and the boot cache.

pub mod allocator;
pub mod cache;
pub mod layout;
pub mod metadata;

pub use allocator::{PageChunk, ReadCursor, SoundAllocator};
pub use cache::{CacheEntry, SoundCache};
pub use layout::SlotLayout;
pub use metadata::{DataType, RawMetadata, SampleRate, SoundMetadata};
