//! # Telemetry Sampler
//!
//! Drains the receiver line by line, keeps the latest valid fix in a watch
//! slot and appends rate-limited rows to the fix log.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::fix::{TelemetryFix, TelemetryHandle};
use super::log::FixLogWriter;
use crate::clock::Clock;
use crate::health::Liveness;
use crate::nmea::decoder::decode_sentence;
use crate::nmea::protocol::NMEA_START_DELIMITER;
use crate::serial::port_trait::LineSource;

/// Number of discarded lines between summary log messages
const LOG_INTERVAL_DISCARDS: u64 = 500;

/// Outcome of handling one line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    /// Not an NMEA sentence
    Noise,
    /// Looked like a sentence but failed to decode
    Malformed,
    /// Decoded, but the receiver has no usable fix
    NoFix,
    /// Latest fix slot updated
    Updated,
}

/// Sampler loop state
pub struct TelemetrySampler<S: LineSource> {
    source: S,
    slot: watch::Sender<Option<TelemetryFix>>,
    log: Option<FixLogWriter>,
    clock: Arc<dyn Clock>,
    liveness: Arc<Liveness>,
    read_backoff: Duration,
    discarded: u64,
}

impl<S: LineSource> TelemetrySampler<S> {
    /// Create a sampler and the handle its readers use
    ///
    /// # Arguments
    ///
    /// * `source` - Opened positioning device
    /// * `log` - Durable fix log, or `None` to keep fixes in memory only
    /// * `clock` - Wall clock stamping each fix
    /// * `read_backoff` - Pause after a failed read
    pub fn new(
        source: S,
        log: Option<FixLogWriter>,
        clock: Arc<dyn Clock>,
        read_backoff: Duration,
    ) -> (Self, TelemetryHandle) {
        let (slot, latest) = watch::channel(None);
        let liveness = Liveness::new();
        let handle = TelemetryHandle::new(latest, Arc::clone(&liveness), true);

        let sampler = Self {
            source,
            slot,
            log,
            clock,
            liveness,
            read_backoff,
            discarded: 0,
        };
        (sampler, handle)
    }

    /// Run until cancelled or the device stream ends
    ///
    /// Read errors and undecodable lines never stop the loop.
    pub async fn run(mut self, cancel: CancellationToken) {
        let _alive = self.liveness.enter();
        info!("Telemetry sampler started");

        loop {
            let read = tokio::select! {
                read = self.source.read_line() => read,
                _ = cancel.cancelled() => break,
            };

            match read {
                Ok(Some(line)) => {
                    self.handle_line(&line).await;
                }
                Ok(None) => {
                    warn!("Positioning device stream closed");
                    break;
                }
                Err(e) => {
                    warn!("Failed to read from positioning device: {}", e);
                    tokio::select! {
                        _ = tokio::time::sleep(self.read_backoff) => {}
                        _ = cancel.cancelled() => break,
                    }
                }
            }
        }

        info!("Telemetry sampler stopped");
    }

    /// Decode one line and update the slot and log
    pub async fn handle_line(&mut self, line: &str) -> LineOutcome {
        if !line.trim_start().starts_with(NMEA_START_DELIMITER) {
            self.record_discard();
            return LineOutcome::Noise;
        }

        let sentence = match decode_sentence(line) {
            Ok(sentence) => sentence,
            Err(e) => {
                debug!("Discarding sentence: {}", e);
                self.record_discard();
                return LineOutcome::Malformed;
            }
        };

        let previous = *self.slot.borrow();
        let fix = match TelemetryFix::from_sentence(&sentence, self.clock.now(), previous.as_ref()) {
            Some(fix) if fix.valid => fix,
            _ => return LineOutcome::NoFix,
        };

        self.slot.send_replace(Some(fix));
        self.liveness.beat();

        if let Some(log) = self.log.as_mut() {
            if let Err(e) = log.maybe_append(&fix).await {
                warn!("Failed to append to fix log: {}", e);
            }
        }

        LineOutcome::Updated
    }

    fn record_discard(&mut self) {
        self.discarded += 1;
        if self.discarded % LOG_INTERVAL_DISCARDS == 0 {
            info!("Discarded {} unusable lines from positioning device", self.discarded);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::mocks::{local, TokioClock};
    use crate::nmea::checksum::nmea_checksum;
    use crate::serial::port_trait::mocks::MockLineSource;
    use std::io;
    use tempfile::TempDir;

    const GGA: &str = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47";

    fn no_fix_gga() -> String {
        let body = "GNGGA,000000,,,,,0,00,99.9,,,,,,";
        format!("${}*{:02X}", body, nmea_checksum(body.as_bytes()))
    }

    fn sampler(
        source: MockLineSource,
        log: Option<FixLogWriter>,
    ) -> (TelemetrySampler<MockLineSource>, TelemetryHandle) {
        let clock = Arc::new(TokioClock::starting_at(local(2024, 5, 1, 12, 0, 0)));
        TelemetrySampler::new(source, log, clock, Duration::from_secs(1))
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_line_outcomes() {
        let (mut sampler, handle) = sampler(MockLineSource::new(), None);

        assert_eq!(sampler.handle_line("garbage").await, LineOutcome::Noise);
        assert_eq!(sampler.handle_line("$GPGGA,12*00").await, LineOutcome::Malformed);
        assert_eq!(sampler.handle_line(&no_fix_gga()).await, LineOutcome::NoFix);
        assert!(handle.latest().is_none());

        assert_eq!(sampler.handle_line(GGA).await, LineOutcome::Updated);
        let fix = handle.latest().unwrap();
        assert!((fix.latitude - 48.1173).abs() < 1e-4);
        assert_eq!(fix.timestamp, local(2024, 5, 1, 12, 0, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_fix_keeps_previous() {
        let (mut sampler, handle) = sampler(MockLineSource::new(), None);
        sampler.handle_line(GGA).await;
        sampler.handle_line(&no_fix_gga()).await;
        assert!(handle.latest().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_survives_noise_and_read_errors() {
        let source = MockLineSource::new();
        source.push_line("\u{fffd}\u{fffd}");
        source.push_line("$GPGGA,broken");
        source.push_error(io::ErrorKind::TimedOut);
        source.push_line(GGA);

        let (sampler, handle) = sampler(source, None);
        sampler.run(CancellationToken::new()).await;

        assert!(handle.latest().is_some());
        assert!(!handle.is_sampler_alive());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_logs_at_most_once_per_interval() {
        let dir = TempDir::new().unwrap();
        let source = MockLineSource::new();
        for _ in 0..10 {
            source.push_line(GGA);
        }

        let log = FixLogWriter::new(dir.path(), "gps_data.csv", Duration::from_secs(4));
        let (sampler, _handle) = sampler(source, Some(log));
        sampler.run(CancellationToken::new()).await;

        let contents = std::fs::read_to_string(dir.path().join("2024-05-01/gps_data.csv")).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancel() {
        let (reader, _writer) = tokio::io::duplex(64);
        let source = crate::serial::port_trait::ReaderLineSource::new(tokio::io::BufReader::new(reader));
        let clock = Arc::new(TokioClock::starting_at(local(2024, 5, 1, 12, 0, 0)));
        let (sampler, handle) = TelemetrySampler::new(source, None, clock, Duration::from_secs(1));

        let cancel = CancellationToken::new();
        let task = tokio::spawn(sampler.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(handle.is_sampler_alive());

        cancel.cancel();
        task.await.unwrap();
        assert!(!handle.is_sampler_alive());
    }
}
