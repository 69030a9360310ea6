//! # Dashcam Library
//!
//! Record, tag and archive dashcam clips on a small Linux device.
//!
//! This library provides the clip lifecycle pipeline: a segmenting recorder
//! writing day-bucketed clips, a GPS sampler keeping the latest fix and a
//! durable fix log, an upload worker moving finalized clips to a remote
//! archive, and a status aggregator with rate-limited alerts.

pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod health;
pub mod logging;
pub mod nmea;
pub mod recorder;
pub mod serial;
pub mod status;
pub mod telemetry;
pub mod upload;
