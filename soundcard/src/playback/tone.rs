//! Sine tone played through the idle filler buffers.
//!
//! A phase accumulator wraps at 32 bits = 360°. Frequency changes and stops
//! requested while the tone runs take effect at the next upward zero
//! crossing, so the output never jumps.

use core::f32::consts::TAU;

use crate::sounds::SampleRate;

/// Peak sample value: 24-bit full scale.
pub const TONE_PEAK: i32 = 0x7F_FFFF;

const PHASE_TO_RADIANS: f32 = TAU / 4_294_967_296.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    None,
    Increment(u32),
    Stop,
}

/// Stereo sine oscillator. Both channels carry the same sample.
pub struct ToneGenerator {
    /// Phase accumulator (wraps naturally at 32 bits = 360°).
    phase: u32,
    /// Phase increment per frame: `hz / rate * 2^32`. Zero when silent.
    increment: u32,
    pending: Pending,
    frequency: u32,
}

impl ToneGenerator {
    pub const fn new() -> Self {
        ToneGenerator {
            phase: 0,
            increment: 0,
            pending: Pending::None,
            frequency: 0,
        }
    }

    /// Whether [`fill`](Self::fill) currently produces a signal.
    pub fn is_running(&self) -> bool {
        self.increment != 0
    }

    /// Frequency last requested, in Hz. Zero after a stop.
    pub fn frequency(&self) -> u32 {
        self.frequency
    }

    /// Play `hz` at `rate`. A silent generator starts at once; a running one
    /// switches at its next zero crossing.
    pub fn start(&mut self, hz: u32, rate: SampleRate) {
        let increment = phase_increment(hz, rate);
        self.frequency = hz;
        if self.is_running() {
            self.pending = Pending::Increment(increment);
        } else {
            self.phase = 0;
            self.increment = increment;
            self.pending = Pending::None;
        }
    }

    /// Stop at the next zero crossing.
    pub fn stop(&mut self) {
        self.frequency = 0;
        if self.is_running() {
            self.pending = Pending::Stop;
        }
    }

    /// Silence immediately.
    pub fn silence(&mut self) {
        self.phase = 0;
        self.increment = 0;
        self.pending = Pending::None;
        self.frequency = 0;
    }

    /// Recompute the increment after the DAC rate changed.
    pub fn retune(&mut self, rate: SampleRate) {
        if self.frequency != 0 {
            let increment = phase_increment(self.frequency, rate);
            if self.is_running() {
                self.increment = increment;
            }
            if let Pending::Increment(_) = self.pending {
                self.pending = Pending::Increment(increment);
            }
        }
    }

    /// Write interleaved stereo frames into `out` (left at even indices,
    /// right at odd ones). A silent generator writes zeros.
    pub fn fill(&mut self, out: &mut [u32]) {
        for frame in out.chunks_mut(2) {
            let sample = if self.increment == 0 {
                0
            } else {
                let s = libm::sinf(self.phase as f32 * PHASE_TO_RADIANS);
                (s * TONE_PEAK as f32) as i32
            };
            frame.fill(sample as u32);
            self.advance();
        }
    }

    fn advance(&mut self) {
        if self.increment == 0 {
            return;
        }
        let (next, wrapped) = self.phase.overflowing_add(self.increment);
        self.phase = next;
        if !wrapped {
            return;
        }
        match self.pending {
            Pending::None => {}
            Pending::Increment(inc) => {
                self.phase = 0;
                self.increment = inc;
            }
            Pending::Stop => {
                self.phase = 0;
                self.increment = 0;
            }
        }
        self.pending = Pending::None;
    }
}

impl Default for ToneGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn phase_increment(hz: u32, rate: SampleRate) -> u32 {
    ((hz as u64) << 32).div_ceil(rate.hz() as u64).min(u32::MAX as u64) as u32
}
