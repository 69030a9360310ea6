//! # Telemetry Fix
//!
//! The position record shared between the sampler and its readers.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::health::Liveness;
use crate::nmea::protocol::NmeaSentence;

/// A single position reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetryFix {
    /// Local wall-clock time the sentence was received
    pub timestamp: DateTime<Local>,
    pub latitude: f64,
    pub longitude: f64,
    /// Meters above mean sea level, when the receiver reports it
    pub altitude: Option<f64>,
    pub valid: bool,
}

impl TelemetryFix {
    /// Build a fix from a decoded sentence
    ///
    /// Returns `None` when the sentence carries no position. RMC sentences
    /// carry no altitude, so the altitude of `previous` is kept.
    pub fn from_sentence(
        sentence: &NmeaSentence,
        received_at: DateTime<Local>,
        previous: Option<&TelemetryFix>,
    ) -> Option<Self> {
        let (latitude, longitude) = sentence.position()?;
        let altitude = sentence
            .altitude()
            .or_else(|| previous.and_then(|fix| fix.altitude));

        Some(Self {
            timestamp: received_at,
            latitude,
            longitude,
            altitude,
            valid: sentence.is_valid_fix(),
        })
    }

    /// Whether the fix is younger than `max_age` at `now`
    pub fn is_fresh(&self, now: DateTime<Local>, max_age: Duration) -> bool {
        match (now - self.timestamp).to_std() {
            Ok(age) => age <= max_age,
            // Timestamp in the future (clock adjusted backwards): treat as fresh
            Err(_) => true,
        }
    }
}

/// Read side of the sampler: latest fix slot plus liveness
///
/// Cloning is cheap; every clone observes the same slot.
#[derive(Debug, Clone)]
pub struct TelemetryHandle {
    latest: watch::Receiver<Option<TelemetryFix>>,
    liveness: Arc<Liveness>,
    device_available: bool,
}

impl TelemetryHandle {
    pub(crate) fn new(
        latest: watch::Receiver<Option<TelemetryFix>>,
        liveness: Arc<Liveness>,
        device_available: bool,
    ) -> Self {
        Self {
            latest,
            liveness,
            device_available,
        }
    }

    /// Handle for a positioning device that could not be opened
    ///
    /// The slot stays empty forever and the sampler is never alive.
    pub fn unavailable() -> Self {
        let (_tx, rx) = watch::channel(None);
        Self::new(rx, Liveness::new(), false)
    }

    /// Most recent valid fix, if any
    pub fn latest(&self) -> Option<TelemetryFix> {
        *self.latest.borrow()
    }

    /// Whether the positioning device was opened at startup
    pub fn is_device_available(&self) -> bool {
        self.device_available
    }

    /// Whether the sampler loop is running
    pub fn is_sampler_alive(&self) -> bool {
        self.device_available && self.liveness.is_alive()
    }

    /// Whether a fix younger than `max_age` is available
    pub fn has_fresh_fix(&self, now: DateTime<Local>, max_age: Duration) -> bool {
        self.latest().is_some_and(|fix| fix.is_fresh(now, max_age))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::mocks::local;
    use crate::nmea::decoder::decode_sentence;

    const GGA: &str = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47";
    const RMC: &str = "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A";

    #[test]
    fn test_fix_from_gga() {
        let at = local(2024, 5, 1, 12, 0, 0);
        let fix = TelemetryFix::from_sentence(&decode_sentence(GGA).unwrap(), at, None).unwrap();
        assert_eq!(fix.timestamp, at);
        assert_eq!(fix.altitude, Some(545.4));
        assert!(fix.valid);
    }

    #[test]
    fn test_rmc_inherits_altitude() {
        let at = local(2024, 5, 1, 12, 0, 0);
        let gga = TelemetryFix::from_sentence(&decode_sentence(GGA).unwrap(), at, None).unwrap();
        let rmc = TelemetryFix::from_sentence(&decode_sentence(RMC).unwrap(), at, Some(&gga)).unwrap();
        assert_eq!(rmc.altitude, Some(545.4));
    }

    #[test]
    fn test_freshness() {
        let at = local(2024, 5, 1, 12, 0, 0);
        let fix = TelemetryFix::from_sentence(&decode_sentence(GGA).unwrap(), at, None).unwrap();
        let ten_s = Duration::from_secs(10);

        assert!(fix.is_fresh(local(2024, 5, 1, 12, 0, 10), ten_s));
        assert!(!fix.is_fresh(local(2024, 5, 1, 12, 0, 11), ten_s));
        assert!(fix.is_fresh(local(2024, 5, 1, 11, 59, 0), ten_s));
    }

    #[test]
    fn test_unavailable_handle() {
        let handle = TelemetryHandle::unavailable();
        assert!(!handle.is_device_available());
        assert!(!handle.is_sampler_alive());
        assert!(handle.latest().is_none());
        assert!(!handle.has_fresh_fix(local(2024, 5, 1, 12, 0, 0), Duration::from_secs(10)));
    }
}
