//! # Error Types
//!
//! Custom error types for the dashcam pipeline using `thiserror`.

use thiserror::Error;

/// Main error type for the dashcam pipeline
#[derive(Debug, Error)]
pub enum DashcamError {
    /// NMEA sentence errors
    #[error("NMEA error: {0}")]
    Nmea(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port errors
    #[error("Serial error: {0}")]
    Serial(String),

    /// None of the candidate serial devices could be opened
    #[error("No serial device found (tried: {0})")]
    SerialPortNotFound(String),

    /// Video sink errors
    #[error("Video sink error: {0}")]
    Sink(String),

    /// Remote archive errors
    #[error("Remote archive error: {0}")]
    Remote(String),

    /// JSON encoding errors (status, manifests, alerts)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Clip storage errors
    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<ssh2::Error> for DashcamError {
    fn from(err: ssh2::Error) -> Self {
        DashcamError::Remote(err.to_string())
    }
}

/// Result type alias for the dashcam pipeline
pub type Result<T> = std::result::Result<T, DashcamError>;
