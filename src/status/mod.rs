//! # Status Module
//!
//! Read-only health view of the pipeline plus the periodic alert monitor.
//!
//! This module handles:
//! - Host readings (storage, CPU temperature, memory)
//! - Aggregating loop liveness, telemetry availability and queue depth
//! - Rate-limited threshold alerts delivered to pluggable sinks

pub mod alerts;
pub mod host;

use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::health::Liveness;
use crate::recorder::{RecorderHandle, RecorderState};
use crate::telemetry::{TelemetryFix, TelemetryHandle};
use crate::upload::ClipQueue;
use alerts::{AlertPolicy, AlertSink};
use host::{HostProbe, HostReadings, MemoryStats, StorageStats};

/// Point-in-time view of the whole pipeline
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineStatus {
    pub generated_at: DateTime<Local>,
    pub recording: bool,
    pub recorder_state: RecorderState,
    pub recorder_alive: bool,
    pub sampler_alive: bool,
    /// A valid fix younger than the staleness limit is available
    pub telemetry_available: bool,
    pub latest_fix: Option<TelemetryFix>,
    /// Clips queued or in flight
    pub queue_depth: usize,
    pub uploader_alive: bool,
    pub storage: Option<StorageStats>,
    pub cpu_temperature_c: Option<f64>,
    pub memory: Option<MemoryStats>,
}

/// Collects a [`PipelineStatus`] from the loop handles
#[derive(Clone)]
pub struct StatusAggregator {
    recorder: RecorderHandle,
    telemetry: TelemetryHandle,
    queue: Arc<ClipQueue>,
    uploader: Arc<Liveness>,
    host: Arc<dyn HostProbe>,
    clips_root: PathBuf,
    clock: Arc<dyn Clock>,
    stale_after: Duration,
}

impl StatusAggregator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        recorder: RecorderHandle,
        telemetry: TelemetryHandle,
        queue: Arc<ClipQueue>,
        uploader: Arc<Liveness>,
        host: Arc<dyn HostProbe>,
        clips_root: impl Into<PathBuf>,
        clock: Arc<dyn Clock>,
        stale_after: Duration,
    ) -> Self {
        Self {
            recorder,
            telemetry,
            queue,
            uploader,
            host,
            clips_root: clips_root.into(),
            clock,
            stale_after,
        }
    }

    /// Host readings run on the blocking pool
    pub async fn snapshot(&self) -> PipelineStatus {
        let now = self.clock.now();
        let host = HostReadings::read(Arc::clone(&self.host), self.clips_root.clone()).await;

        PipelineStatus {
            generated_at: now,
            recording: self.recorder.is_recording(),
            recorder_state: self.recorder.state(),
            recorder_alive: self.recorder.is_alive(),
            sampler_alive: self.telemetry.is_sampler_alive(),
            telemetry_available: self.telemetry.has_fresh_fix(now, self.stale_after),
            latest_fix: self.telemetry.latest(),
            queue_depth: self.queue.depth(),
            uploader_alive: self.uploader.is_alive(),
            storage: host.storage,
            cpu_temperature_c: host.cpu_temperature,
            memory: host.memory,
        }
    }
}

/// Periodic threshold evaluation over status snapshots
pub struct AlertMonitor {
    status: StatusAggregator,
    policy: AlertPolicy,
    sinks: Vec<Box<dyn AlertSink>>,
    interval: Duration,
}

impl AlertMonitor {
    pub fn new(status: StatusAggregator, policy: AlertPolicy, sinks: Vec<Box<dyn AlertSink>>, interval: Duration) -> Self {
        Self {
            status,
            policy,
            sinks,
            interval,
        }
    }

    /// Evaluate once and deliver any raised alerts; returns how many fired
    pub async fn evaluate_once(&mut self) -> usize {
        let snapshot = self.status.snapshot().await;
        let events = self.policy.evaluate(
            snapshot.storage.as_ref(),
            snapshot.cpu_temperature_c,
            snapshot.generated_at,
            Instant::now(),
        );

        for event in &events {
            for sink in &self.sinks {
                if let Err(e) = sink.deliver(event).await {
                    warn!(kind = ?event.kind, "Failed to deliver alert: {}", e);
                }
            }
        }
        events.len()
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        info!(interval = ?self.interval, "Alert monitor started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.evaluate_once().await;
                }
                _ = cancel.cancelled() => break,
            }
        }

        debug!("Alert monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::alerts::{AlertEvent, AlertKind};
    use super::host::MockHostProbe;
    use super::*;
    use crate::clock::mocks::{local, TokioClock};
    use crate::error::Result;
    use crate::recorder::clip::ClipLayout;
    use crate::recorder::sink::mocks::MockSink;
    use crate::recorder::ClipRecorder;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct CollectingSink {
        events: Arc<Mutex<Vec<AlertEvent>>>,
    }

    #[async_trait]
    impl AlertSink for CollectingSink {
        async fn deliver(&self, event: &AlertEvent) -> Result<()> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    fn host(temp: f64) -> Arc<dyn HostProbe> {
        let mut host = MockHostProbe::new();
        host.expect_storage().returning(|_| {
            Ok(StorageStats {
                total_bytes: 1000,
                free_bytes: 500,
                used_bytes: 500,
            })
        });
        host.expect_cpu_temperature().returning(move || Some(temp));
        host.expect_memory().returning(|| None);
        Arc::new(host)
    }

    fn aggregator(host: Arc<dyn HostProbe>) -> StatusAggregator {
        let layout = ClipLayout::new("/clips", "h264", "TMP_");
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::starting_at(local(2024, 5, 1, 12, 0, 0)));
        let (_recorder, handle) = ClipRecorder::new(
            MockSink::new(),
            layout,
            Arc::clone(&clock),
            Duration::from_secs(10),
            Duration::from_secs(1),
        );
        StatusAggregator::new(
            handle,
            TelemetryHandle::unavailable(),
            Arc::new(ClipQueue::new()),
            Liveness::new(),
            host,
            "/clips",
            clock,
            Duration::from_secs(10),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_reports_idle_pipeline() {
        let status = aggregator(host(45.0));
        let queue = Arc::clone(&status.queue);
        queue.enqueue("/clips/2024-05-01/clip_2024-05-01_12-00-00.h264");

        let snapshot = status.snapshot().await;
        assert_eq!(snapshot.generated_at, local(2024, 5, 1, 12, 0, 0));
        assert!(!snapshot.recording);
        assert_eq!(snapshot.recorder_state, RecorderState::Idle);
        assert!(!snapshot.recorder_alive);
        assert!(!snapshot.sampler_alive);
        assert!(!snapshot.telemetry_available);
        assert_eq!(snapshot.queue_depth, 1);
        assert_eq!(snapshot.cpu_temperature_c, Some(45.0));
        assert_eq!(snapshot.storage.unwrap().free_ratio(), 0.5);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["recorder_state"], "idle");
        assert!(json["latest_fix"].is_null());
    }

    #[tokio::test(start_paused = true)]
    async fn test_continuous_over_temperature_alerts_once() {
        let sink = CollectingSink::default();
        let mut monitor = AlertMonitor::new(
            aggregator(host(80.0)),
            AlertPolicy::new(0.10, 65.0, Duration::from_secs(600)),
            vec![Box::new(sink.clone())],
            Duration::from_secs(30),
        );
        let cancel = CancellationToken::new();

        assert_eq!(monitor.evaluate_once().await, 1);
        let task = tokio::spawn(monitor.run(cancel.clone()));

        // Twenty evaluations inside one cooldown window
        tokio::time::sleep(Duration::from_secs(590)).await;
        cancel.cancel();
        task.await.unwrap();

        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, AlertKind::HighTemperature);
    }
}
