//! # soundcard
//!
//! A `no_std` firmware core for a flash-backed sound card: sounds uploaded
//! by a host are stored in a raw SLC NAND chip and streamed to an audio DAC
//! through a double-buffered DMA, with a trigger-to-first-sample latency of
//! one buffer.
//!
//! ## Architecture
//!
//! | Layer | Module | Purpose |
//! |-------|--------|---------|
//! | Flash | [`flash`] | NAND command set, GPIO parallel bus, page/block driver |
//! | Storage | [`sounds`] | Slot layout, metadata record, allocator state machines, RAM cache |
//! | Playback | [`playback`] | DMA buffer flags, streaming state machine, watchdog, idle tone |
//! | Host | [`upload`] | Upload command sequencing and error codes |
//! | Glue | [`card`] | [`SoundCard`](card::SoundCard): one object for the main loop |
//! | Board | [`control`] | DMA, codec and reset traits the board implements |
//!
//! ## Quick start
//!
//! ```ignore
//! use soundcard::card::SoundCard;
//! use soundcard::flash::{FlashStorage, GpioNandBus};
//! use soundcard::playback::{DmaStatus, EngineConfig, PlaybackEngine};
//! use soundcard::sounds::SampleRate;
//!
//! static DMA_STATUS: DmaStatus = DmaStatus::new();
//!
//! let bus = GpioNandBus::new(pins, port, delay)?;
//! let engine = PlaybackEngine::new(
//!     &DMA_STATUS, dma, codec, reset, sound_on_pin,
//!     SampleRate::Hz96000, EngineConfig::default(),
//! );
//! let mut card: SoundCard<_, _, _, _, _, 16> = SoundCard::new(FlashStorage::new(bus), engine)?;
//! card.boot();
//!
//! loop {
//!     card.poll()?;
//! }
//!
//! // In the DMA-complete interrupt:
//! DMA_STATUS.complete(channel);
//! ```
//!
//! ## Features
//!
//! | Feature | Default | Enables |
//! |---------|---------|---------|
//! | `tone` | yes | Sine tone in the idle filler (requires `libm`) |
//! | `std` | no | `flash::sim::SimNand`, a simulated NAND chip for host tools |
//! | `defmt` | no | Logging through `defmt` |
//! | `log` | no | Logging through the `log` facade |
//!
//! ## Storage parameters
//!
//! - **Page:** 2048 + 64 bytes ([`constants::PAGE_SIZE`], [`constants::SPARE_SIZE`])
//! - **Slot:** 4096 pages = 8 MiB ([`constants::PAGES_PER_SOUND`])
//! - **Slots:** 32 on a 2 Gbit part, 64 on a 4 Gbit part
//! - **Sample rates:** 96 kHz and 192 kHz, 32-bit words

#![cfg_attr(not(any(test, feature = "std")), no_std)]

#[macro_use]
mod fmt;

pub mod constants;
pub mod error;
pub mod control;
pub mod flash;
pub mod sounds;
pub mod playback;
pub mod upload;
pub mod card;

pub use card::SoundCard;
pub use error::{FlashError, PlaybackError, TriggerError, UploadError};
