//! Double-buffered playback state machine.
//!
//! ```text
//! Standby --trigger--> Triggered --first page--> Primed --second page--> Streaming
//!    ^                                                                     |
//!    +------------------- both channels drained after last page ----------+
//! ```
//!
//! One [`tick`](PlaybackEngine::tick) per main-loop pass. A tick never waits
//! on the DMA: it only fills channels the interrupt has already released in
//! [`DmaStatus`]. The first two pages of a sound come from the
//! [`SoundCache`]; later pages are read from flash one per free channel.

use embedded_hal::digital::OutputPin;

use super::buffers::{DmaStatus, CHANNELS};
#[cfg(feature = "tone")]
use super::tone::ToneGenerator;
use crate::constants::{DMA_TIMEOUT_TICKS, PAGE_WORDS};
#[cfg(feature = "tone")]
use crate::constants::MAX_TONE_HZ;
use crate::control::{AudioControl, AudioDma, Channel, SystemReset};
use crate::error::{PlaybackError, TriggerError};
use crate::flash::NandBus;
use crate::sounds::{SampleRate, SoundAllocator, SoundCache, SoundMetadata};

/// Runtime knobs of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Ticks a channel may go without a DMA-complete before the board is
    /// reset.
    pub watchdog_ticks: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            watchdog_ticks: DMA_TIMEOUT_TICKS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EngineState {
    /// Idle: free channels get filler.
    Standby,
    /// A sound was accepted and waits for a free channel.
    Triggered,
    /// First page submitted.
    Primed,
    /// Both cached pages submitted, the rest comes from flash.
    Streaming,
}

/// Edges reported by [`PlaybackEngine::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PlaybackEvent {
    /// The first page of the sound in this slot went to the DMA.
    Started(u32),
    /// Every page of the sound in this slot has been played out.
    Finished(u32),
}

/// Streams sounds from the allocator to the audio DMA.
pub struct PlaybackEngine<'a, DMA, CODEC, RST, SIG> {
    status: &'a DmaStatus,
    dma: DMA,
    codec: CODEC,
    reset: RST,
    sound_on: SIG,
    config: EngineConfig,

    buffers: [[u32; PAGE_WORDS]; CHANNELS],
    /// Channel currently holds sound data rather than filler.
    carrying: [bool; CHANNELS],
    state: EngineState,
    active: Option<SoundMetadata>,
    produced: u32,
    rate: SampleRate,

    watchdog_enabled: bool,
    reset_issued: bool,
    #[cfg(feature = "tone")]
    tone: ToneGenerator,
}

impl<'a, DMA, CODEC, RST, SIG> PlaybackEngine<'a, DMA, CODEC, RST, SIG>
where
    DMA: AudioDma,
    CODEC: AudioControl,
    RST: SystemReset,
    SIG: OutputPin,
{
    /// `rate` is the rate the codec was configured with at boot.
    pub fn new(
        status: &'a DmaStatus,
        dma: DMA,
        codec: CODEC,
        reset: RST,
        sound_on: SIG,
        rate: SampleRate,
        config: EngineConfig,
    ) -> Self {
        PlaybackEngine {
            status,
            dma,
            codec,
            reset,
            sound_on,
            config,
            buffers: [[0; PAGE_WORDS]; CHANNELS],
            carrying: [false; CHANNELS],
            state: EngineState::Standby,
            active: None,
            produced: 0,
            rate,
            watchdog_enabled: true,
            reset_issued: false,
            #[cfg(feature = "tone")]
            tone: ToneGenerator::new(),
        }
    }

    // ── Commands ───────────────────────────────────────────────────────

    /// Start the sound in `slot` on a following tick.
    pub fn trigger<const N: usize>(&mut self, slot: u32, cache: &SoundCache<N>) -> Result<(), TriggerError> {
        let metadata = match cache.metadata(slot) {
            Some(m) if cache.is_playable(slot) => m,
            _ => return Err(TriggerError::NoSound(slot)),
        };
        if self.state != EngineState::Standby {
            return Err(TriggerError::Busy);
        }
        #[cfg(feature = "tone")]
        self.tone.silence();

        self.active = Some(metadata);
        self.produced = 0;
        self.state = EngineState::Triggered;
        info!("playback: slot {} triggered, {} words", slot, metadata.length);
        Ok(())
    }

    /// Play a sine tone through the idle filler.
    #[cfg(feature = "tone")]
    pub fn play_tone(&mut self, hz: u32) -> Result<(), TriggerError> {
        if hz == 0 || hz > MAX_TONE_HZ {
            return Err(TriggerError::BadFrequency(hz));
        }
        if self.state != EngineState::Standby {
            return Err(TriggerError::Busy);
        }
        self.tone.start(hz, self.rate);
        debug!("playback: tone at {} Hz", hz);
        Ok(())
    }

    /// Stop the idle tone at its next zero crossing. Sounds are not affected.
    pub fn stop(&mut self) {
        #[cfg(feature = "tone")]
        self.tone.stop();
    }

    /// Reset the board now. Later ticks do nothing.
    pub fn reset_board(&mut self) {
        if !self.reset_issued {
            self.reset_issued = true;
            self.reset.reset();
        }
    }

    /// Suspend or resume the DMA watchdog, e.g. around long host transfers
    /// that starve the main loop.
    pub fn set_watchdog_enabled(&mut self, enabled: bool) {
        self.watchdog_enabled = enabled;
    }

    // ── Tick ───────────────────────────────────────────────────────────

    /// One main-loop pass: run the watchdog, then refill every free channel.
    pub fn tick<B: NandBus, const N: usize>(
        &mut self,
        allocator: &mut SoundAllocator<B>,
        cache: &SoundCache<N>,
    ) -> Result<Option<PlaybackEvent>, PlaybackError> {
        if self.watchdog() {
            return Ok(None);
        }

        let mut event = None;
        if self.state == EngineState::Triggered {
            match self.status.first_empty() {
                Some(ch) => event = self.start(ch, allocator, cache)?,
                None => return Ok(None),
            }
        }
        if self.state == EngineState::Primed {
            if let Some(ch) = self.status.first_empty() {
                self.prime(ch, cache)?;
            }
        }
        match self.state {
            EngineState::Streaming => {
                if let Some(done) = self.stream(allocator)? {
                    event = Some(done);
                }
            }
            EngineState::Standby => self.feed_filler()?,
            EngineState::Triggered | EngineState::Primed => {}
        }
        Ok(event)
    }

    fn watchdog(&mut self) -> bool {
        if self.reset_issued {
            return true;
        }
        if !self.watchdog_enabled {
            return false;
        }
        for ch in 0..CHANNELS {
            let ticks = self.status.tick(ch);
            if ticks >= self.config.watchdog_ticks {
                error!("playback: DMA channel {} stalled for {} ticks, resetting", ch, ticks);
                self.reset_board();
                return true;
            }
        }
        false
    }

    /// Hand the cached first page to `ch`.
    fn start<B: NandBus, const N: usize>(
        &mut self,
        ch: Channel,
        allocator: &mut SoundAllocator<B>,
        cache: &SoundCache<N>,
    ) -> Result<Option<PlaybackEvent>, PlaybackError> {
        let Some(metadata) = self.active else {
            self.state = EngineState::Standby;
            return Ok(None);
        };
        let Some(entry) = cache.entry(metadata.slot) else {
            warn!("playback: slot {} left the cache before it started", metadata.slot);
            self.finish();
            return Ok(None);
        };

        if metadata.sample_rate != self.rate {
            self.codec
                .set_sample_rate(metadata.sample_rate)
                .map_err(|_| PlaybackError::Codec)?;
            self.rate = metadata.sample_rate;
            #[cfg(feature = "tone")]
            self.tone.retune(self.rate);
            info!("playback: codec switched to {} Hz", self.rate.hz());
        }

        let words = self.remaining_page_words();
        self.buffers[ch][..words].copy_from_slice(&entry.first[..words]);
        self.submit(ch, words)?;
        self.carrying[ch] = true;
        self.produced = words as u32;

        allocator.seek(metadata.slot, 2);
        self.sound_on.set_high().map_err(|_| PlaybackError::Signal)?;
        self.state = EngineState::Primed;
        Ok(Some(PlaybackEvent::Started(metadata.slot)))
    }

    /// Hand the cached second page to `ch`, or filler for a one-page sound.
    fn prime<const N: usize>(&mut self, ch: Channel, cache: &SoundCache<N>) -> Result<(), PlaybackError> {
        self.state = EngineState::Streaming;
        let words = self.remaining_page_words();
        if words == 0 {
            return self.submit_filler(ch);
        }
        let Some(entry) = self.active.and_then(|m| cache.entry(m.slot)) else {
            return self.submit_filler(ch);
        };
        self.buffers[ch][..words].copy_from_slice(&entry.second[..words]);
        self.submit(ch, words)?;
        self.carrying[ch] = true;
        self.produced += words as u32;
        Ok(())
    }

    /// Refill free channels from flash; report the end of the sound once
    /// every page has played out.
    fn stream<B: NandBus>(
        &mut self,
        allocator: &mut SoundAllocator<B>,
    ) -> Result<Option<PlaybackEvent>, PlaybackError> {
        for ch in 0..CHANNELS {
            if !self.status.is_empty(ch) {
                continue;
            }
            self.carrying[ch] = false;
            let words = self.remaining_page_words();
            if words == 0 {
                self.submit_filler(ch)?;
                continue;
            }
            allocator.read_next_page(&mut self.buffers[ch])?;
            self.submit(ch, words)?;
            self.carrying[ch] = true;
            self.produced += words as u32;
        }

        if self.remaining_page_words() == 0 && !self.carrying.iter().any(|&c| c) {
            let slot = self.active.map_or(0, |m| m.slot);
            self.finish();
            self.sound_on.set_low().map_err(|_| PlaybackError::Signal)?;
            info!("playback: slot {} finished", slot);
            return Ok(Some(PlaybackEvent::Finished(slot)));
        }
        Ok(None)
    }

    fn finish(&mut self) {
        self.active = None;
        self.carrying = [false; CHANNELS];
        self.state = EngineState::Standby;
    }

    fn feed_filler(&mut self) -> Result<(), PlaybackError> {
        for ch in 0..CHANNELS {
            if self.status.is_empty(ch) {
                self.submit_filler(ch)?;
            }
        }
        Ok(())
    }

    fn submit_filler(&mut self, ch: Channel) -> Result<(), PlaybackError> {
        let words = self.rate.filler_words();
        let filler = &mut self.buffers[ch][..words];
        #[cfg(feature = "tone")]
        self.tone.fill(filler);
        #[cfg(not(feature = "tone"))]
        filler.fill(0);
        self.submit(ch, words)
    }

    /// Flag first: the completion may fire before `submit` returns.
    fn submit(&mut self, ch: Channel, words: usize) -> Result<(), PlaybackError> {
        self.status.mark_filled(ch)?;
        self.dma
            .submit(ch, &self.buffers[ch][..words])
            .map_err(|_| PlaybackError::Dma)
    }

    /// Words of the next page still owed to the DMA.
    fn remaining_page_words(&self) -> usize {
        let length = self.active.map_or(0, |m| m.length);
        length.saturating_sub(self.produced).min(PAGE_WORDS as u32) as usize
    }

    // ── Accessors ──────────────────────────────────────────────────────

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Whether a sound is starting or playing. Tone output does not count.
    pub fn is_playing(&self) -> bool {
        self.state != EngineState::Standby
    }

    /// Sample words of the current sound handed to the DMA so far.
    pub fn frames_produced(&self) -> u32 {
        self.produced
    }

    /// Metadata of the sound being played.
    pub fn active(&self) -> Option<SoundMetadata> {
        self.active
    }

    /// Rate the codec currently runs at.
    pub fn sample_rate(&self) -> SampleRate {
        self.rate
    }

    #[cfg(feature = "tone")]
    pub fn tone_frequency(&self) -> u32 {
        self.tone.frequency()
    }

    pub fn watchdog_enabled(&self) -> bool {
        self.watchdog_enabled
    }

    pub fn reset_issued(&self) -> bool {
        self.reset_issued
    }

    pub fn config(&self) -> EngineConfig {
        self.config
    }

    pub fn dma(&self) -> &DMA {
        &self.dma
    }

    pub fn codec(&self) -> &CODEC {
        &self.codec
    }

    pub fn reset_line(&self) -> &RST {
        &self.reset
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::constants::PAGES_PER_SOUND;
    use crate::flash::sim::SimNand;
    use crate::flash::FlashStorage;
    use crate::sounds::DataType;
    use embedded_hal_mock::eh1::digital::{
        Mock as PinMock, State as PinState, Transaction as PinTransaction,
    };

    // ---------------------------------------------------------------
    // Test doubles
    // ---------------------------------------------------------------

    /// Records every submitted buffer.
    #[derive(Default)]
    pub(crate) struct RecordingDma {
        pub submissions: Vec<(Channel, Vec<u32>)>,
    }

    impl AudioDma for RecordingDma {
        type Error = ();

        fn submit(&mut self, channel: Channel, words: &[u32]) -> Result<(), ()> {
            self.submissions.push((channel, words.to_vec()));
            Ok(())
        }
    }

    #[derive(Default)]
    pub(crate) struct RecordingCodec {
        pub rates: Vec<SampleRate>,
    }

    impl AudioControl for RecordingCodec {
        type Error = ();

        fn set_sample_rate(&mut self, rate: SampleRate) -> Result<(), ()> {
            self.rates.push(rate);
            Ok(())
        }
    }

    #[derive(Default)]
    pub(crate) struct CountingReset {
        pub count: u32,
    }

    impl SystemReset for CountingReset {
        fn reset(&mut self) {
            self.count += 1;
        }
    }

    pub(crate) type TestEngine<'a> =
        PlaybackEngine<'a, RecordingDma, RecordingCodec, CountingReset, PinMock>;

    pub(crate) fn engine<'a>(status: &'a DmaStatus, sound_on: &PinMock) -> TestEngine<'a> {
        PlaybackEngine::new(
            status,
            RecordingDma::default(),
            RecordingCodec::default(),
            CountingReset::default(),
            sound_on.clone(),
            SampleRate::Hz96000,
            EngineConfig::default(),
        )
    }

    pub(crate) fn metadata(slot: u32, length: u32, rate: SampleRate) -> SoundMetadata {
        SoundMetadata {
            slot,
            length,
            sample_rate: rate,
            data_type: DataType::Int32,
        }
    }

    /// Store a sound whose word `i` of page `p` is `p << 16 | i`.
    pub(crate) fn store_sound(sim: &mut SimNand, meta: &SoundMetadata) {
        let base = meta.slot * PAGES_PER_SOUND;
        let pages = (meta.length as usize).div_ceil(PAGE_WORDS) as u32;
        for p in 0..pages {
            let mut data = [0u8; 2048];
            for (i, w) in data.chunks_exact_mut(4).enumerate() {
                w.copy_from_slice(&((p << 16) | i as u32).to_le_bytes());
            }
            let spare = if p == 0 { meta.to_spare() } else { [0u8; 64] };
            sim.write_raw(base + p, &data, &spare);
        }
    }

    pub(crate) fn complete_all(status: &DmaStatus) {
        for ch in 0..CHANNELS {
            status.complete(ch);
        }
    }

    fn booted(meta: &SoundMetadata) -> (SoundAllocator<SimNand>, SoundCache<8>) {
        let mut sim = SimNand::new_2gbit();
        store_sound(&mut sim, meta);
        let mut alloc = SoundAllocator::new(FlashStorage::new(sim)).unwrap();
        let mut cache = SoundCache::new();
        alloc.scan_into(&mut cache);
        (alloc, cache)
    }

    // ---------------------------------------------------------------
    // Tests
    // ---------------------------------------------------------------

    #[test]
    fn standby_feeds_filler_to_both_channels() {
        let status = DmaStatus::new();
        let pin = PinMock::new(&[]);
        let mut eng = engine(&status, &pin);
        let (mut alloc, cache) = booted(&metadata(5, 1000, SampleRate::Hz96000));

        assert_eq!(eng.tick(&mut alloc, &cache), Ok(None));
        let subs = &eng.dma().submissions;
        assert_eq!(subs.len(), 2);
        assert_eq!(subs[0].0, 0);
        assert_eq!(subs[1].0, 1);
        assert!(subs.iter().all(|(_, w)| w.len() == 32 && w.iter().all(|&x| x == 0)));

        // Nothing free, nothing submitted.
        eng.tick(&mut alloc, &cache).unwrap();
        assert_eq!(eng.dma().submissions.len(), 2);
        assert!(!eng.is_playing());
        pin.clone().done();
    }

    #[test]
    fn trigger_rejects_missing_reserved_and_busy() {
        let status = DmaStatus::new();
        let pin = PinMock::new(&[]);
        let mut eng = engine(&status, &pin);
        let (_alloc, mut cache) = booted(&metadata(5, 1000, SampleRate::Hz96000));
        cache.set(1, Some(SoundMetadata {
            data_type: DataType::Float32,
            ..metadata(1, 64, SampleRate::Hz96000)
        }));

        assert_eq!(eng.trigger(6, &cache), Err(TriggerError::NoSound(6)));
        assert_eq!(eng.trigger(1, &cache), Err(TriggerError::NoSound(1)));
        assert_eq!(eng.trigger(99, &cache), Err(TriggerError::NoSound(99)));
        assert_eq!(eng.trigger(5, &cache), Ok(()));
        assert_eq!(eng.state(), EngineState::Triggered);
        assert_eq!(eng.trigger(5, &cache), Err(TriggerError::Busy));
        pin.clone().done();
    }

    #[test]
    fn rate_change_reconfigures_codec_once() {
        let status = DmaStatus::new();
        let mut pin = PinMock::new(&[
            PinTransaction::set(PinState::High),
            PinTransaction::set(PinState::Low),
            PinTransaction::set(PinState::High),
        ]);
        let mut eng = engine(&status, &pin);
        let (mut alloc, cache) = booted(&metadata(3, 64, SampleRate::Hz192000));

        eng.trigger(3, &cache).unwrap();
        assert_eq!(eng.tick(&mut alloc, &cache), Ok(Some(PlaybackEvent::Started(3))));
        assert_eq!(eng.codec().rates, vec![SampleRate::Hz192000]);
        assert_eq!(eng.sample_rate(), SampleRate::Hz192000);

        complete_all(&status);
        assert_eq!(eng.tick(&mut alloc, &cache), Ok(Some(PlaybackEvent::Finished(3))));

        // Filler now follows the new rate.
        let (_, last) = eng.dma().submissions.last().unwrap();
        assert_eq!(last.len(), 64);

        eng.trigger(3, &cache).unwrap();
        complete_all(&status);
        eng.tick(&mut alloc, &cache).unwrap();
        assert_eq!(eng.codec().rates.len(), 1, "same rate, no reconfiguration");
        pin.done();
    }

    #[test]
    fn one_page_sound_gets_filler_behind_it() {
        let status = DmaStatus::new();
        let mut pin = PinMock::new(&[
            PinTransaction::set(PinState::High),
            PinTransaction::set(PinState::Low),
        ]);
        let mut eng = engine(&status, &pin);
        let (mut alloc, cache) = booted(&metadata(2, 100, SampleRate::Hz96000));
        let reads_before = alloc.flash().bus().stats().page_reads;

        eng.trigger(2, &cache).unwrap();
        eng.tick(&mut alloc, &cache).unwrap();
        let subs = &eng.dma().submissions;
        assert_eq!(subs[0].1.len(), 100);
        assert_eq!(subs[0].1[99], 99);
        assert_eq!(subs[1].1.len(), 32, "second channel gets filler");
        assert_eq!(eng.frames_produced(), 100);

        // The sound channel has not drained yet.
        status.complete(1);
        assert_eq!(eng.tick(&mut alloc, &cache), Ok(None));
        assert!(eng.is_playing());

        status.complete(0);
        assert_eq!(eng.tick(&mut alloc, &cache), Ok(Some(PlaybackEvent::Finished(2))));
        assert!(!eng.is_playing());
        assert_eq!(alloc.flash().bus().stats().page_reads, reads_before);
        pin.done();
    }

    #[test]
    fn triggered_waits_for_a_free_channel() {
        let status = DmaStatus::new();
        let mut pin = PinMock::new(&[PinTransaction::set(PinState::High)]);
        let mut eng = engine(&status, &pin);
        let (mut alloc, cache) = booted(&metadata(4, 2048, SampleRate::Hz96000));

        eng.tick(&mut alloc, &cache).unwrap();
        eng.trigger(4, &cache).unwrap();
        assert_eq!(eng.tick(&mut alloc, &cache), Ok(None));
        assert_eq!(eng.state(), EngineState::Triggered);

        status.complete(1);
        assert_eq!(eng.tick(&mut alloc, &cache), Ok(Some(PlaybackEvent::Started(4))));
        assert_eq!(eng.state(), EngineState::Primed);
        assert_eq!(eng.dma().submissions.last().unwrap().0, 1);

        status.complete(0);
        eng.tick(&mut alloc, &cache).unwrap();
        assert_eq!(eng.state(), EngineState::Streaming);
        assert_eq!(eng.frames_produced(), 1024);
        pin.done();
    }

    #[test]
    fn watchdog_resets_exactly_once() {
        let status = DmaStatus::new();
        let pin = PinMock::new(&[]);
        let mut eng = PlaybackEngine::new(
            &status,
            RecordingDma::default(),
            RecordingCodec::default(),
            CountingReset::default(),
            pin.clone(),
            SampleRate::Hz96000,
            EngineConfig { watchdog_ticks: 10 },
        );
        let (mut alloc, cache) = booted(&metadata(5, 1000, SampleRate::Hz96000));

        for _ in 0..9 {
            eng.tick(&mut alloc, &cache).unwrap();
        }
        assert_eq!(eng.reset_line().count, 0);
        for _ in 0..100 {
            eng.tick(&mut alloc, &cache).unwrap();
        }
        assert_eq!(eng.reset_line().count, 1);
        assert!(eng.reset_issued());
        pin.clone().done();
    }

    #[test]
    fn completions_keep_the_watchdog_quiet() {
        let status = DmaStatus::new();
        let pin = PinMock::new(&[]);
        let mut eng = engine(&status, &pin);
        let (mut alloc, cache) = booted(&metadata(5, 1000, SampleRate::Hz96000));

        for _ in 0..(DMA_TIMEOUT_TICKS + 5_000) {
            eng.tick(&mut alloc, &cache).unwrap();
            complete_all(&status);
        }
        assert_eq!(eng.reset_line().count, 0);
        pin.clone().done();
    }

    #[test]
    fn suspended_watchdog_does_not_count() {
        let status = DmaStatus::new();
        let pin = PinMock::new(&[]);
        let mut eng = engine(&status, &pin);
        let (mut alloc, cache) = booted(&metadata(5, 1000, SampleRate::Hz96000));

        eng.set_watchdog_enabled(false);
        for _ in 0..(DMA_TIMEOUT_TICKS + 10) {
            eng.tick(&mut alloc, &cache).unwrap();
        }
        assert_eq!(eng.reset_line().count, 0);
        assert_eq!(status.idle_ticks(0), 0);
        pin.clone().done();
    }

    #[cfg(feature = "tone")]
    #[test]
    fn tone_plays_in_filler_and_stops_on_trigger() {
        let status = DmaStatus::new();
        let pin = PinMock::new(&[]);
        let mut eng = engine(&status, &pin);
        let (mut alloc, cache) = booted(&metadata(5, 1000, SampleRate::Hz96000));

        assert_eq!(eng.play_tone(0), Err(TriggerError::BadFrequency(0)));
        assert_eq!(eng.play_tone(40_001), Err(TriggerError::BadFrequency(40_001)));
        eng.play_tone(1_000).unwrap();
        eng.tick(&mut alloc, &cache).unwrap();
        let (_, first) = &eng.dma().submissions[0];
        assert!(first.iter().any(|&w| w != 0));
        assert!(!eng.is_playing(), "tone is not playback");

        eng.trigger(5, &cache).unwrap();
        assert_eq!(eng.tone_frequency(), 0);
        assert_eq!(eng.play_tone(500), Err(TriggerError::Busy));
        pin.clone().done();
    }
}
