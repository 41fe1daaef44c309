//! Shotwire consumer
//!
//! Connects to a screenshot producer and saves every frame as a PNG.
//!
//! Usage:
//!   shotwire
//!
//! Environment variables:
//!   SHOTWIRE_CONFIG       - JSON config file, applied before the variables below
//!   SHOTWIRE_HOST         - Producer host (default: 127.0.0.1)
//!   SHOTWIRE_PORT         - Producer port (default: 4444)
//!   SHOTWIRE_IDLE_DELAY_MS - Pause between frames (default: 1000)
//!   SHOTWIRE_RECONNECT    - "reconnect" or "fail_fast" (default: fail_fast)
//!   SHOTWIRE_OUTPUT_DIR   - Where PNGs are written (default: ./screenshots)
//!   RUST_LOG              - Log filter (default: shotwire=info)

use std::path::PathBuf;

use shotwire::sink::PngDirSink;
use shotwire::{Result, SessionBuilder, SessionConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Load the config file named by `SHOTWIRE_CONFIG`, then overlay the
/// `SHOTWIRE_*` variables.
fn load_config() -> Result<SessionConfig> {
    let mut config = match std::env::var_os("SHOTWIRE_CONFIG") {
        Some(path) => {
            info!("Loading config from {}", PathBuf::from(&path).display());
            SessionConfig::from_file(path)?
        }
        None => SessionConfig::default(),
    };
    config.apply_env()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("shotwire=info")),
        )
        .init();

    let config = load_config()?;
    let output_dir = std::env::var_os("SHOTWIRE_OUTPUT_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("screenshots"));

    info!("Shotwire starting");
    info!("  Producer: {}:{}", config.host, config.port);
    info!("  Idle delay: {:?}", config.idle_delay);
    info!("  Reconnect: {:?}", config.reconnect);
    info!("  Output: {}", output_dir.display());

    let sink = PngDirSink::create(&output_dir)?;
    let session = SessionBuilder::from_config(config).start(sink).await?;

    let stop = session.stop_signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping");
            stop.stop();
        }
    });

    let report = session.wait_for_shutdown().await?;
    info!(
        "Saved {} screenshots ({} empty frames skipped, {} dropped, {} bytes)",
        report.stats.frames_delivered,
        report.stats.empty_frames,
        report.stats.frames_dropped,
        report.stats.bytes_received
    );

    report.into_result().map(|_| ())
}
