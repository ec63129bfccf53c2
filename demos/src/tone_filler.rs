//! Play the idle sine tone, change its pitch, then stop it.
//!
//! Run with `cargo run -p soundcard-demos --bin tone_filler`.

mod board;

use std::error::Error;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use soundcard::flash::sim::SimNand;
use soundcard::flash::FlashStorage;
use soundcard::playback::{DmaStatus, EngineConfig, PlaybackEngine, TONE_PEAK};
use soundcard::sounds::SampleRate;
use soundcard::SoundCard;

use board::{HostCodec, HostDma, HostReset, SoundOnLed};

static DMA_STATUS: DmaStatus = DmaStatus::new();

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
        SampleRate::Hz96000,
        EngineConfig::default(),
    );
    let mut card: SoundCard<_, _, _, _, _, 4> =
        SoundCard::new(FlashStorage::new(SimNand::new_2gbit()), engine)?;
    let unreadable = card.boot();
    if unreadable > 0 {
        tracing::warn!("{} slots unreadable at boot", unreadable);
    }

    for hz in [440, 1_000, 12_000] {
        card.play_tone(hz)?;
        for _ in 0..1_000 {
            card.poll()?;
        }
        tracing::info!(
            "{} Hz: {} words out, peak {:.1}% of full scale",
            hz,
            card.engine().dma().words_sent,
            card.engine().dma().peak as f32 * 100.0 / TONE_PEAK as f32
        );
    }

    card.stop();
    for _ in 0..10 {
        card.poll()?;
    }
    tracing::info!("tone stopped: {} Hz", card.engine().tone_frequency());

    if let Err(e) = card.play_tone(50_000) {
        tracing::warn!("rejected: {}", e);
    }
    Ok(())
}
