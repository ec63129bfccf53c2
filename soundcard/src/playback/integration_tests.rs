//! Integration tests driving the whole playback path in software.
//!
//! ```text
//! SimNand → FlashStorage → SoundAllocator → SoundCache
//!     → PlaybackEngine.tick() → RecordingDma → DmaStatus.complete()
//! ```
//!
//! The DMA is modelled as finishing every submitted buffer between two
//! ticks unless a test stalls it on purpose.

#[cfg(test)]
mod tests {
    use embedded_hal_mock::eh1::digital::{
        Mock as PinMock, State as PinState, Transaction as PinTransaction,
    };

    use crate::constants::{BUSY_POLL_LIMIT, FILLER_WORDS_96K, PAGES_PER_SOUND, PAGE_WORDS};
    use crate::error::TriggerError;
    use crate::flash::sim::SimNand;
    use crate::flash::FlashStorage;
    use crate::playback::engine::tests::{complete_all, engine, metadata, store_sound, TestEngine};
    use crate::playback::{DmaStatus, EngineState, PlaybackEvent};
    use crate::sounds::{RawMetadata, SampleRate, SoundAllocator, SoundCache, SoundMetadata};

    fn boot(sim: SimNand) -> (SoundAllocator<SimNand>, SoundCache<8>) {
        let mut alloc = SoundAllocator::new(FlashStorage::new(sim)).unwrap();
        let mut cache = SoundCache::new();
        alloc.scan_into(&mut cache);
        alloc.flash_mut().bus_mut().reset_stats();
        (alloc, cache)
    }

    fn sound_on_cycle() -> PinMock {
        PinMock::new(&[
            PinTransaction::set(PinState::High),
            PinTransaction::set(PinState::Low),
        ])
    }

    /// Tick with instant DMA completion until the sound finishes. Returns the
    /// events seen.
    fn play_out(
        eng: &mut TestEngine<'_>,
        status: &DmaStatus,
        alloc: &mut SoundAllocator<SimNand>,
        cache: &SoundCache<8>,
    ) -> Vec<PlaybackEvent> {
        let mut events = Vec::new();
        for _ in 0..10_000 {
            let event = eng.tick(alloc, cache).unwrap();
            complete_all(status);
            if let Some(e) = event {
                events.push(e);
                if let PlaybackEvent::Finished(_) = e {
                    return events;
                }
            }
        }
        panic!("sound never finished, events so far: {events:?}");
    }

    /// Concatenate every submitted buffer that is not idle filler.
    fn sound_words(eng: &TestEngine<'_>) -> Vec<u32> {
        eng.dma()
            .submissions
            .iter()
            .filter(|(_, w)| w.len() != FILLER_WORDS_96K)
            .flat_map(|(_, w)| w.iter().copied())
            .collect()
    }

    fn expected_words(length: u32) -> Vec<u32> {
        (0..length)
            .map(|n| ((n / PAGE_WORDS as u32) << 16) | (n % PAGE_WORDS as u32))
            .collect()
    }

    // ---------------------------------------------------------------
    // Short sound served entirely from the cache
    // ---------------------------------------------------------------
    #[test]
    fn thousand_word_sound_needs_no_streaming_reads() {
        let meta = metadata(5, 1000, SampleRate::Hz96000);
        let mut sim = SimNand::new_2gbit();
        store_sound(&mut sim, &meta);
        let (mut alloc, cache) = boot(sim);

        let status = DmaStatus::new();
        let mut pin = sound_on_cycle();
        let mut eng = engine(&status, &pin);

        eng.trigger(5, &cache).unwrap();
        let events = play_out(&mut eng, &status, &mut alloc, &cache);

        assert_eq!(events, vec![PlaybackEvent::Started(5), PlaybackEvent::Finished(5)]);
        assert_eq!(alloc.flash().bus().stats().page_reads, 0);
        assert_eq!(sound_words(&eng), expected_words(1000));
        assert_eq!(eng.frames_produced(), 1000);
        assert_eq!(eng.state(), EngineState::Standby);
        pin.done();
    }

    // ---------------------------------------------------------------
    // Longer sound streamed from flash
    // ---------------------------------------------------------------
    #[test]
    fn long_sound_reads_each_remaining_page_once() {
        let meta = metadata(3, 2500, SampleRate::Hz96000);
        let mut sim = SimNand::new_2gbit();
        store_sound(&mut sim, &meta);
        let (mut alloc, cache) = boot(sim);

        let status = DmaStatus::new();
        let mut pin = sound_on_cycle();
        let mut eng = engine(&status, &pin);

        eng.trigger(3, &cache).unwrap();
        play_out(&mut eng, &status, &mut alloc, &cache);

        // Five pages, two of them cached.
        assert_eq!(alloc.flash().bus().stats().page_reads, 3);
        assert_eq!(sound_words(&eng), expected_words(2500));
        pin.done();
    }

    #[test]
    fn sound_pages_alternate_between_channels() {
        let meta = metadata(4, 6 * 512, SampleRate::Hz96000);
        let mut sim = SimNand::new_2gbit();
        store_sound(&mut sim, &meta);
        let (mut alloc, cache) = boot(sim);

        let status = DmaStatus::new();
        let mut pin = sound_on_cycle();
        let mut eng = engine(&status, &pin);

        // Settle into idle first so the sound starts mid-stream.
        eng.tick(&mut alloc, &cache).unwrap();
        complete_all(&status);
        eng.trigger(4, &cache).unwrap();
        play_out(&mut eng, &status, &mut alloc, &cache);

        let channels: Vec<usize> = eng
            .dma()
            .submissions
            .iter()
            .filter(|(_, w)| w.len() == PAGE_WORDS)
            .map(|(ch, _)| *ch)
            .collect();
        assert_eq!(channels, vec![0, 1, 0, 1, 0, 1]);
        pin.done();
    }

    #[test]
    fn frames_produced_never_decreases() {
        let meta = metadata(6, 4000, SampleRate::Hz96000);
        let mut sim = SimNand::new_2gbit();
        store_sound(&mut sim, &meta);
        let (mut alloc, cache) = boot(sim);

        let status = DmaStatus::new();
        let mut pin = sound_on_cycle();
        let mut eng = engine(&status, &pin);

        eng.trigger(6, &cache).unwrap();
        let mut last = 0;
        while eng.is_playing() {
            eng.tick(&mut alloc, &cache).unwrap();
            // Only one channel drains per tick.
            status.complete(0);
            eng.tick(&mut alloc, &cache).unwrap();
            status.complete(1);
            assert!(eng.frames_produced() >= last);
            assert!(eng.frames_produced() <= meta.length);
            last = eng.frames_produced();
        }
        assert_eq!(last, 4000);
        pin.done();
    }

    #[test]
    fn second_trigger_while_playing_is_ignored() {
        let meta = metadata(5, 3000, SampleRate::Hz96000);
        let other = metadata(6, 1000, SampleRate::Hz96000);
        let mut sim = SimNand::new_2gbit();
        store_sound(&mut sim, &meta);
        store_sound(&mut sim, &other);
        let (mut alloc, cache) = boot(sim);

        let status = DmaStatus::new();
        let mut pin = sound_on_cycle();
        let mut eng = engine(&status, &pin);

        eng.trigger(5, &cache).unwrap();
        eng.tick(&mut alloc, &cache).unwrap();
        assert_eq!(eng.trigger(6, &cache), Err(TriggerError::Busy));
        assert_eq!(eng.trigger(5, &cache), Err(TriggerError::Busy));

        let events = play_out(&mut eng, &status, &mut alloc, &cache);
        assert_eq!(events, vec![PlaybackEvent::Finished(5)]);
        assert_eq!(sound_words(&eng), expected_words(3000));
        pin.done();
    }

    // ---------------------------------------------------------------
    // Trigger while an aborted upload's erase is still running
    // ---------------------------------------------------------------
    #[test]
    fn trigger_mid_erase_streams_once_erase_settles() {
        let meta = metadata(4, 3 * PAGE_WORDS as u32, SampleRate::Hz96000);
        let mut sim = SimNand::new_2gbit();
        sim.set_busy_polls(1, 2, 5_000);
        store_sound(&mut sim, &meta);
        let (mut alloc, cache) = boot(sim);

        // An upload to slot 9 issues its first erase, then gives way.
        assert!(alloc.prepare_region_check(9, 4 * PAGE_WORDS as u32));
        assert!(!alloc.prepare_region_erase_step().unwrap());
        alloc.abort_sequences();
        assert!(alloc.flash().erase_in_flight());

        let status = DmaStatus::new();
        let mut pin = sound_on_cycle();
        let mut eng = engine(&status, &pin);

        eng.trigger(4, &cache).unwrap();
        let events = play_out(&mut eng, &status, &mut alloc, &cache);

        assert_eq!(events, vec![PlaybackEvent::Started(4), PlaybackEvent::Finished(4)]);
        assert_eq!(sound_words(&eng), expected_words(3 * PAGE_WORDS as u32));
        let stats = alloc.flash().bus().stats();
        assert_eq!(stats.page_reads, 1);
        assert!(stats.ready_polls > 5_000);
        assert!(stats.ready_polls < BUSY_POLL_LIMIT);
        assert!(!alloc.flash().erase_in_flight());
        pin.done();
    }

    // ---------------------------------------------------------------
    // Invalid stored metadata
    // ---------------------------------------------------------------
    #[test]
    fn unsupported_stored_rate_leaves_slot_unplayable() {
        let mut sim = SimNand::new_2gbit();
        let raw = RawMetadata {
            slot: 5,
            length: 1000,
            sample_rate: 44_100,
            data_type: 0,
        };
        let mut spare = [0u8; 64];
        spare[..16].copy_from_slice(&raw.to_record());
        sim.write_raw(5 * PAGES_PER_SOUND, &[0x11; 2048], &spare);
        let (mut alloc, cache) = boot(sim);

        assert!(!cache.exists(5));

        let status = DmaStatus::new();
        let pin = PinMock::new(&[]);
        let mut eng = engine(&status, &pin);
        assert_eq!(eng.trigger(5, &cache), Err(TriggerError::NoSound(5)));
        for _ in 0..4 {
            assert_eq!(eng.tick(&mut alloc, &cache), Ok(None));
            complete_all(&status);
        }
        assert_eq!(eng.state(), EngineState::Standby);
        assert!(eng.dma().submissions.iter().all(|(_, w)| w.len() == FILLER_WORDS_96K));
        pin.clone().done();
    }

    // ---------------------------------------------------------------
    // Stalled DMA
    // ---------------------------------------------------------------
    #[test]
    fn dma_stall_mid_sound_resets_once() {
        let meta = metadata(7, 8000, SampleRate::Hz96000);
        let mut sim = SimNand::new_2gbit();
        store_sound(&mut sim, &meta);
        let (mut alloc, cache) = boot(sim);

        let status = DmaStatus::new();
        let pin = PinMock::new(&[PinTransaction::set(PinState::High)]);
        let mut eng = engine(&status, &pin);

        eng.trigger(7, &cache).unwrap();
        for _ in 0..3 {
            eng.tick(&mut alloc, &cache).unwrap();
            complete_all(&status);
        }
        assert_eq!(eng.state(), EngineState::Streaming);

        // The DMA stops answering.
        let threshold = eng.config().watchdog_ticks;
        for _ in 0..threshold * 2 {
            eng.tick(&mut alloc, &cache).unwrap();
        }
        assert_eq!(eng.reset_line().count, 1);
        assert!(eng.reset_issued());
        pin.clone().done();
    }

    #[test]
    fn cached_first_pages_match_flash() {
        let meta: SoundMetadata = metadata(2, 1024, SampleRate::Hz192000);
        let mut sim = SimNand::new_2gbit();
        store_sound(&mut sim, &meta);
        let (_alloc, cache) = boot(sim);

        let entry = cache.entry(2).unwrap();
        assert_eq!(entry.first[..], expected_words(512)[..]);
        assert_eq!(entry.second[7], (1 << 16) | 7);
        assert_eq!(cache.metadata(2), Some(meta));
    }
}
