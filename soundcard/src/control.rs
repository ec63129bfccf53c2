//! Collaborator traits implemented by the board support code.

use crate::sounds::SampleRate;

/// DMA channel index, 0 or 1.
pub type Channel = usize;

/// The audio serial DMA.
///
/// `submit` hands a buffer to a channel; the board's DMA-complete interrupt
/// then calls [`DmaStatus::complete`](crate::playback::DmaStatus::complete)
/// for the same channel once the words have been shifted out.
pub trait AudioDma {
    /// Error type for submission.
    type Error;

    /// Queue `words` for transmission on `channel`.
    fn submit(&mut self, channel: Channel, words: &[u32]) -> Result<(), Self::Error>;
}

/// Runtime control of the DAC.
pub trait AudioControl {
    /// Error type for control operations.
    type Error;

    /// Reprogram the DAC format and master clock for `rate`.
    fn set_sample_rate(&mut self, rate: SampleRate) -> Result<(), Self::Error>;
}

/// Whole-board reset. Used by the DMA watchdog and the host reset command.
pub trait SystemReset {
    /// Hold the DAC in reset and restart the MCU.
    ///
    /// Real implementations do not return. Test doubles record the call.
    fn reset(&mut self);
}
