//! # Telemetry Module
//!
//! GPS position sampling and its durable log.
//!
//! This module handles:
//! - Draining NMEA sentences from the positioning device
//! - Keeping the latest valid fix in a lock-free-for-the-writer slot
//! - Appending rate-limited rows to the per-day `gps_data.csv`
//! - Looking up the logged fix nearest to a given time

pub mod fix;
pub mod log;
pub mod sampler;

pub use fix::{TelemetryFix, TelemetryHandle};
pub use sampler::TelemetrySampler;
