//! Upload a sound into a simulated flash chip, then trigger and stream it.
//!
//! Run with `cargo run -p soundcard-demos --bin upload_and_play`.

mod board;

use std::error::Error;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use soundcard::constants::{CHUNK_BYTES, PRELOAD_BYTES, USER_METADATA_SIZE};
use soundcard::flash::sim::SimNand;
use soundcard::flash::FlashStorage;
use soundcard::playback::{DmaStatus, EngineConfig, PlaybackEngine, PlaybackEvent};
use soundcard::sounds::{RawMetadata, SampleRate};
use soundcard::upload::UploadPhase;
use soundcard::SoundCard;

use board::{HostCodec, HostDma, HostReset, SoundOnLed};

const SLOT: u32 = 5;
const LENGTH: u32 = 48_000;
const TONE_HZ: f32 = 440.0;

static DMA_STATUS: DmaStatus = DmaStatus::new();

/// A 440 Hz tone at 96 kHz, padded to whole chunks.
fn render_sound() -> Vec<u8> {
    let mut bytes = Vec::new();
    for n in 0..LENGTH {
        let t = n as f32 / 96_000.0;
        let sample = ((TONE_HZ * t * std::f32::consts::TAU).sin() * 4_000_000.0) as i32;
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    let padded = bytes.len().div_ceil(CHUNK_BYTES) * CHUNK_BYTES;
    bytes.resize(padded.max(PRELOAD_BYTES), 0);
    bytes
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("SOUNDCARD_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let engine = PlaybackEngine::new(
        &DMA_STATUS,
        HostDma::new(&DMA_STATUS),
        HostCodec,
        HostReset,
        SoundOnLed,
        SampleRate::Hz192000,
        EngineConfig::default(),
    );
    let mut card: SoundCard<_, _, _, _, _, 16> =
        SoundCard::new(FlashStorage::new(SimNand::new_2gbit()), engine)?;
    let unreadable = card.boot();
    if unreadable > 0 {
        tracing::warn!("{} slots unreadable at boot", unreadable);
    }

    // ── Upload ─────────────────────────────────────────────────────────
    let sound = render_sound();
    let mut chunks = sound.chunks_exact(CHUNK_BYTES);
    let preload: &[u8; PRELOAD_BYTES] = chunks.next().ok_or("empty sound")?.try_into()?;
    let mut user = [0u8; USER_METADATA_SIZE];
    user[..11].copy_from_slice(b"demo: 440Hz");

    let raw = RawMetadata {
        slot: SLOT as i32,
        length: LENGTH as i32,
        sample_rate: 96_000,
        data_type: 0,
    };
    card.set_watchdog_enabled(false);
    card.begin_upload(&raw, preload, &user)?;
    let mut polls = 0u32;
    loop {
        card.poll()?;
        polls += 1;
        match card.upload_phase() {
            UploadPhase::AwaitingData(index) => {
                let chunk: &[u8; CHUNK_BYTES] = chunks.next().ok_or("ran out of chunks")?.try_into()?;
                card.upload_data(index, chunk)?;
            }
            UploadPhase::Complete => break,
            UploadPhase::Failed(e) => return Err(e.into()),
            _ => {}
        }
    }
    card.set_watchdog_enabled(true);
    let stats = card.allocator().flash().bus().stats();
    tracing::info!(
        "upload done in {} polls: {} programs, {} erases",
        polls,
        stats.page_programs,
        stats.block_erases
    );

    // ── Playback ───────────────────────────────────────────────────────
    let reads_before = card.allocator().flash().bus().stats().page_reads;
    card.trigger(SLOT)?;
    loop {
        if let Some(PlaybackEvent::Finished(slot)) = card.poll()? {
            tracing::info!("slot {} finished", slot);
            break;
        }
    }
    let dma = card.engine().dma();
    let reads = card.allocator().flash().bus().stats().page_reads - reads_before;
    tracing::info!(
        "streamed {} words (peak {}), {} page reads from flash",
        dma.words_sent,
        dma.peak,
        reads
    );

    let mut blob = [0u8; USER_METADATA_SIZE];
    let info = card.sound_info(SLOT, &mut blob)?;
    tracing::info!(
        "existence mask {:#x}, user metadata {:?}",
        info.existence,
        String::from_utf8_lossy(&blob[..11])
    );
    Ok(())
}
