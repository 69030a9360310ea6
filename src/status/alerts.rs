//! # Alerts
//!
//! Threshold alerts with per-condition rate limiting. A condition fires when
//! it becomes active, then stays silent until it has cleared and at least
//! one cooldown has passed since the last alert.

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tracing::warn;

use super::host::StorageStats;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    LowDisk,
    HighTemperature,
}

/// One raised alert
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertEvent {
    pub kind: AlertKind,
    pub message: String,
    /// Reading that triggered the alert
    pub value: f64,
    pub threshold: f64,
    pub raised_at: DateTime<Local>,
}

/// Destination for raised alerts
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn deliver(&self, event: &AlertEvent) -> Result<()>;
}

/// Alert sink writing to the tracing log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn deliver(&self, event: &AlertEvent) -> Result<()> {
        warn!(kind = ?event.kind, value = event.value, threshold = event.threshold, "ALERT: {}", event.message);
        Ok(())
    }
}

/// Alert sink appending one JSON object per line to a file
#[derive(Debug, Clone)]
pub struct JsonlAlertSink {
    path: PathBuf,
}

impl JsonlAlertSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl AlertSink for JsonlAlertSink {
    async fn deliver(&self, event: &AlertEvent) -> Result<()> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        let mut file = OpenOptions::new().create(true).append(true).open(&self.path).await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Rate limiter for a single condition
#[derive(Debug, Clone)]
pub struct AlertGate {
    cooldown: Duration,
    armed: bool,
    last_fired: Option<Instant>,
}

impl AlertGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            armed: true,
            last_fired: None,
        }
    }

    /// Feed the current condition; returns `true` when an alert should fire
    pub fn evaluate(&mut self, active: bool, now: Instant) -> bool {
        if !active {
            self.armed = true;
            return false;
        }
        if !self.armed {
            return false;
        }
        if let Some(last) = self.last_fired {
            if now.duration_since(last) < self.cooldown {
                return false;
            }
        }

        self.armed = false;
        self.last_fired = Some(now);
        true
    }
}

/// Disk and temperature thresholds with one gate each
#[derive(Debug, Clone)]
pub struct AlertPolicy {
    disk_threshold: f64,
    temp_threshold: f64,
    disk: AlertGate,
    temperature: AlertGate,
}

impl AlertPolicy {
    /// # Arguments
    ///
    /// * `disk_threshold` - Alert when the free fraction drops below this
    /// * `temp_threshold` - Alert when the CPU temperature exceeds this (°C)
    /// * `cooldown` - Minimum spacing between two alerts of one kind
    pub fn new(disk_threshold: f64, temp_threshold: f64, cooldown: Duration) -> Self {
        Self {
            disk_threshold,
            temp_threshold,
            disk: AlertGate::new(cooldown),
            temperature: AlertGate::new(cooldown),
        }
    }

    /// Evaluate one set of readings; a missing reading counts as clear
    pub fn evaluate(
        &mut self,
        storage: Option<&StorageStats>,
        cpu_temperature: Option<f64>,
        raised_at: DateTime<Local>,
        now: Instant,
    ) -> Vec<AlertEvent> {
        let mut events = Vec::new();

        let free_ratio = storage.map(StorageStats::free_ratio);
        let low_disk = free_ratio.is_some_and(|ratio| ratio < self.disk_threshold);
        if self.disk.evaluate(low_disk, now) {
            let ratio = free_ratio.unwrap_or_default();
            events.push(AlertEvent {
                kind: AlertKind::LowDisk,
                message: format!(
                    "Low disk space: {:.1}% free (threshold {:.1}%)",
                    ratio * 100.0,
                    self.disk_threshold * 100.0
                ),
                value: ratio,
                threshold: self.disk_threshold,
                raised_at,
            });
        }

        let hot = cpu_temperature.is_some_and(|temp| temp > self.temp_threshold);
        if self.temperature.evaluate(hot, now) {
            let temp = cpu_temperature.unwrap_or_default();
            events.push(AlertEvent {
                kind: AlertKind::HighTemperature,
                message: format!(
                    "High CPU temperature: {:.1}°C (threshold {:.1}°C)",
                    temp, self.temp_threshold
                ),
                value: temp,
                threshold: self.temp_threshold,
                raised_at,
            });
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::mocks::local;
    use tempfile::TempDir;

    const COOLDOWN: Duration = Duration::from_secs(600);

    fn stats(free: u64) -> StorageStats {
        StorageStats {
            total_bytes: 100,
            free_bytes: free,
            used_bytes: 100 - free,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_fires_once_while_active() {
        let mut gate = AlertGate::new(COOLDOWN);
        assert!(gate.evaluate(true, Instant::now()));

        for _ in 0..10 {
            tokio::time::advance(Duration::from_secs(30)).await;
            assert!(!gate.evaluate(true, Instant::now()));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_rearms_after_clear_and_cooldown() {
        let mut gate = AlertGate::new(COOLDOWN);
        assert!(gate.evaluate(true, Instant::now()));

        // Clears and comes back within the cooldown: suppressed
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(!gate.evaluate(false, Instant::now()));
        assert!(!gate.evaluate(true, Instant::now()));

        // Still armed once the cooldown has passed
        tokio::time::advance(COOLDOWN).await;
        assert!(gate.evaluate(true, Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_does_not_rearm_without_clear() {
        let mut gate = AlertGate::new(COOLDOWN);
        assert!(gate.evaluate(true, Instant::now()));

        tokio::time::advance(COOLDOWN * 3).await;
        assert!(!gate.evaluate(true, Instant::now()));

        assert!(!gate.evaluate(false, Instant::now()));
        assert!(gate.evaluate(true, Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_policy_thresholds() {
        let mut policy = AlertPolicy::new(0.10, 65.0, COOLDOWN);
        let at = local(2024, 5, 1, 12, 0, 0);

        assert!(policy.evaluate(Some(&stats(50)), Some(40.0), at, Instant::now()).is_empty());
        // Exactly at the thresholds is not an alert
        assert!(policy.evaluate(Some(&stats(10)), Some(65.0), at, Instant::now()).is_empty());

        let events = policy.evaluate(Some(&stats(5)), Some(71.5), at, Instant::now());
        let kinds: Vec<_> = events.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![AlertKind::LowDisk, AlertKind::HighTemperature]);
        assert_eq!(events[1].value, 71.5);
        assert!(events[0].message.contains("5.0% free"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_policy_missing_readings_are_clear() {
        let mut policy = AlertPolicy::new(0.10, 65.0, COOLDOWN);
        let at = local(2024, 5, 1, 12, 0, 0);
        assert!(policy.evaluate(None, None, at, Instant::now()).is_empty());
    }

    #[tokio::test]
    async fn test_jsonl_sink_appends_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("alerts.jsonl");
        let sink = JsonlAlertSink::new(&path);
        let event = AlertEvent {
            kind: AlertKind::HighTemperature,
            message: "hot".to_string(),
            value: 70.0,
            threshold: 65.0,
            raised_at: local(2024, 5, 1, 12, 0, 0),
        };

        sink.deliver(&event).await.unwrap();
        sink.deliver(&event).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["kind"], "high_temperature");
        assert_eq!(parsed["threshold"], 65.0);
    }
}
