use std::time::Duration;

use marquee_backgrounds::{BackgroundSelector, BackgroundService};
use marquee_events::Bus;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

// Default remote catalog of decorative images (Chromecast backgrounds set).
const DEFAULT_MANIFEST_URL: &str =
    "https://raw.githubusercontent.com/dconnolly/chromecast-backgrounds/master/backgrounds.json";

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let manifest_url =
        std::env::var("MARQUEE_BACKGROUNDS_URL").unwrap_or_else(|_| DEFAULT_MANIFEST_URL.into());
    let cycle = Duration::from_secs(env_u64("MARQUEE_BG_CYCLE_SECS", 30).max(1));

    let bus = Bus::new_with_replay(64, 32);
    let mut selector = BackgroundSelector::new(&bus);
    let service = BackgroundService::new(bus.clone(), manifest_url);
    let gate = service.ready_gate();
    let cancel = service.cancellation_token();
    let backend = tokio::spawn(async move { service.run().await });

    // Listeners are registered; release the backend.
    gate.ready();
    info!("background service started");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            result = selector.random_background() => match result {
                Ok(selection) => info!(path = %selection.path.display(), "rotated background"),
                Err(err) => warn!("no background available yet: {err}"),
            }
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = tokio::time::sleep(cycle) => {}
        }
    }

    cancel.cancel();
    if let Err(err) = backend.await {
        warn!("backend task join error: {err}");
    }
}
