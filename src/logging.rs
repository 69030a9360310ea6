//! # Logging
//!
//! Installs the global `tracing` subscriber: a console layer plus an
//! optional daily-rolling file layer. `RUST_LOG` overrides the configured
//! level.

use std::io;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::Result;

/// Build the level filter for `config`
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

/// Install the global subscriber
///
/// Returns the guard of the file writer when file output is enabled; it
/// must be held until exit or buffered lines are lost.
///
/// # Errors
///
/// Returns error if the log directory cannot be created or a global
/// subscriber is already installed.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let (file_layer, guard) = if config.log_dir.is_empty() {
        (None, None)
    } else {
        let dir = Path::new(&config.log_dir);
        std::fs::create_dir_all(dir)?;
        let appender = tracing_appender::rolling::daily(dir, &config.file_prefix);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = fmt::layer().with_writer(writer).with_ansi(false).with_target(true);
        (Some(layer), Some(guard))
    };

    tracing_subscriber::registry()
        .with(env_filter(config))
        .with(fmt::layer().with_target(true))
        .with(file_layer)
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

    Ok(guard)
}
