//! Host stand-ins for the board peripherals.

use std::convert::Infallible;

use embedded_hal::digital::{ErrorType, OutputPin};
use soundcard::control::{AudioControl, AudioDma, Channel, SystemReset};
use soundcard::playback::DmaStatus;
use soundcard::sounds::SampleRate;

/// A DMA that finishes every buffer the moment it is queued.
pub struct HostDma<'a> {
    status: &'a DmaStatus,
    pub words_sent: u64,
    pub peak: i32,
}

impl<'a> HostDma<'a> {
    pub fn new(status: &'a DmaStatus) -> Self {
        HostDma {
            status,
            words_sent: 0,
            peak: 0,
        }
    }
}

impl AudioDma for HostDma<'_> {
    type Error = Infallible;

    fn submit(&mut self, channel: Channel, words: &[u32]) -> Result<(), Infallible> {
        self.words_sent += words.len() as u64;
        if let Some(p) = words.iter().map(|&w| (w as i32).saturating_abs()).max() {
            self.peak = self.peak.max(p);
        }
        self.status.complete(channel);
        Ok(())
    }
}

pub struct HostCodec;

impl AudioControl for HostCodec {
    type Error = Infallible;

    fn set_sample_rate(&mut self, rate: SampleRate) -> Result<(), Infallible> {
        tracing::info!("codec: MCLK reprogrammed for {} Hz", rate.hz());
        Ok(())
    }
}

pub struct HostReset;

impl SystemReset for HostReset {
    fn reset(&mut self) {
        tracing::error!("board: reset");
    }
}

/// Prints the sound-on line edges.
pub struct SoundOnLed;

impl ErrorType for SoundOnLed {
    type Error = Infallible;
}

impl OutputPin for SoundOnLed {
    fn set_low(&mut self) -> Result<(), Infallible> {
        tracing::info!("board: SOUND_ON low");
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        tracing::info!("board: SOUND_ON high");
        Ok(())
    }
}
