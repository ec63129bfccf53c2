//! Per-channel DMA status shared between the DMA-complete interrupt and the
//! main loop.
//!
//! # Ownership contract
//!
//! - The interrupt only calls [`DmaStatus::complete`]: it flips the channel
//!   from HAS_DATA to EMPTY and clears the channel's idle counter.
//! - The main loop only calls [`DmaStatus::mark_filled`] (EMPTY → HAS_DATA)
//!   and [`DmaStatus::tick`].
//! - Buffer contents are never touched by the interrupt. A buffer is only
//!   rewritten by the main loop after its channel has been seen EMPTY.
//!
//! Each flag therefore has exactly one writer per transition, and the two
//! states strictly alternate.

use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use crate::control::Channel;
use crate::error::BufferStateError;

/// Number of DMA channels in the double buffer.
pub const CHANNELS: usize = 2;

const EMPTY: u8 = 0;
const HAS_DATA: u8 = 1;

/// Atomic buffer flags and watchdog counters of both channels.
pub struct DmaStatus {
    state: [AtomicU8; CHANNELS],
    /// Main-loop ticks since the channel's last DMA-complete.
    idle_ticks: [AtomicU32; CHANNELS],
}

impl DmaStatus {
    /// Both channels EMPTY, counters at zero. `const` so it can be a `static`
    /// visible to the interrupt handler.
    pub const fn new() -> Self {
        DmaStatus {
            state: [AtomicU8::new(EMPTY), AtomicU8::new(EMPTY)],
            idle_ticks: [AtomicU32::new(0), AtomicU32::new(0)],
        }
    }

    /// DMA-complete notification for `channel` (interrupt side).
    ///
    /// A completion on a channel that is already EMPTY only clears the
    /// counter.
    pub fn complete(&self, channel: Channel) {
        let Some(state) = self.state.get(channel) else {
            return;
        };
        self.idle_ticks[channel].store(0, Ordering::Relaxed);
        // Release pairs with the Acquire in `is_empty`: the main loop sees the
        // channel as free only after the DMA is done with its memory.
        let _ = state.compare_exchange(HAS_DATA, EMPTY, Ordering::Release, Ordering::Relaxed);
    }

    /// Hand `channel` to the DMA (main-loop side).
    pub fn mark_filled(&self, channel: Channel) -> Result<(), BufferStateError> {
        let state = self.state.get(channel).ok_or(BufferStateError { channel })?;
        state
            .compare_exchange(EMPTY, HAS_DATA, Ordering::AcqRel, Ordering::Relaxed)
            .map(|_| ())
            .map_err(|_| BufferStateError { channel })
    }

    /// Whether `channel` is free for a new buffer.
    pub fn is_empty(&self, channel: Channel) -> bool {
        self.state
            .get(channel)
            .is_some_and(|s| s.load(Ordering::Acquire) == EMPTY)
    }

    /// First EMPTY channel, lowest index first.
    pub fn first_empty(&self) -> Option<Channel> {
        (0..CHANNELS).find(|&ch| self.is_empty(ch))
    }

    /// Count one main-loop pass for `channel` and return the new count.
    pub fn tick(&self, channel: Channel) -> u32 {
        match self.idle_ticks.get(channel) {
            Some(t) => t.fetch_add(1, Ordering::Relaxed).wrapping_add(1),
            None => 0,
        }
    }

    pub fn idle_ticks(&self, channel: Channel) -> u32 {
        self.idle_ticks
            .get(channel)
            .map_or(0, |t| t.load(Ordering::Relaxed))
    }
}

impl Default for DmaStatus {
    fn default() -> Self {
        Self::new()
    }
}
