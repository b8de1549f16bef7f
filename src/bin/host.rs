//! Standalone host: runs the companion engine against the system speakers.
//!
//! Drives the coordinator at ~60 Hz on a single-threaded runtime until
//! Ctrl-C, then persists the session and tears down.

use anyhow::{Context, Result};
use solmate::app::persist::StateStore;
use solmate::app::AppCoordinator;
use solmate::audio::fallback::VoiceProfile;
use solmate::audio::sink::{AudioSink, CpalSink, VirtualSink};
use solmate::avatar::scene::HeadlessScene;
use solmate::config::CompanionConfig;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const TICK: Duration = Duration::from_millis(16);

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map_or_else(|| PathBuf::from("solmate.toml"), PathBuf::from);
    let mut config =
        CompanionConfig::load_or_default(&config_path).context("loading configuration")?;
    config.merge_remote(&reqwest::Client::new()).await;

    let sink: Box<dyn AudioSink> = match CpalSink::new(&config.audio) {
        Ok(sink) => Box::new(sink),
        Err(e) => {
            warn!("no audio output ({e}), running silent");
            Box::new(VirtualSink::new())
        }
    };
    let voices = vec![VoiceProfile::new("Samantha", "en-US")];
    let store = match StateStore::default_location() {
        Ok(store) => Some(store),
        Err(e) => {
            warn!("session persistence disabled: {e}");
            None
        }
    };

    let mut app = AppCoordinator::new(
        config,
        Box::new(HeadlessScene::new()),
        sink,
        voices,
        store,
    );
    app.start().await;
    // A host console has no first-click gate to wait for.
    app.user_interacted();

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal.cancel();
        }
    });

    info!("running; Ctrl-C to exit");
    let mut interval = tokio::time::interval(TICK);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last = Instant::now();
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let now = Instant::now();
                let dt = now.duration_since(last).as_secs_f32();
                last = now;
                app.tick(dt);
            }
            () = shutdown.cancelled() => break,
        }
    }

    app.shutdown();
    Ok(())
}
