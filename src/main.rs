//! # Dashcam
//!
//! Records fixed-length clips from the camera, tags them with GPS fixes and
//! uploads them to the remote archive.
//!
//! # Usage
//!
//! ```bash
//! dashcam [CONFIG_PATH]
//! ```
//!
//! The configuration path defaults to `config/default.toml`.
//!
//! # Shutdown
//!
//! On Ctrl+C the recorder finalizes the clip in progress before the other
//! loops are stopped, so no temporary file is left behind by a clean exit.

use anyhow::{Context, Result};
use tracing::info;

use dashcam::config::Config;
use dashcam::context::Pipeline;

/// Configuration file used when no path is given
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;

    let _log_guard = dashcam::logging::init(&config.logging).context("Failed to initialize logging")?;

    info!("Dashcam v{} starting...", env!("CARGO_PKG_VERSION"));
    info!(
        clips_root = %config.storage.clips_root.display(),
        clip_duration_s = config.storage.clip_duration_s,
        upload = config.upload.enabled,
        "Configuration loaded from {}",
        config_path
    );

    let pipeline = Pipeline::start(config).await.context("Failed to start pipeline")?;
    let context = pipeline.context();
    info!("Press Ctrl+C to exit");

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;
    info!("Received Ctrl+C, shutting down...");
    if let Ok(status) = context.status_json().await {
        info!("Final status: {}", status);
    }

    pipeline.shutdown().await;
    Ok(())
}
