//! Real-time playback: DMA buffer flags, the streaming state machine and
//! the idle tone.

pub mod buffers;
pub mod engine;
#[cfg(feature = "tone")]
pub mod tone;

mod integration_tests;

pub use buffers::{DmaStatus, CHANNELS};
pub use engine::{EngineConfig, EngineState, PlaybackEngine, PlaybackEvent};
#[cfg(feature = "tone")]
pub use tone::{ToneGenerator, TONE_PEAK};
