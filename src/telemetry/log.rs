//! # Fix Log
//!
//! Append-only CSV record of fixes, one file per day bucket:
//! `<clips_root>/<YYYY-MM-DD>/gps_data.csv` with rows
//! `<RFC 3339 timestamp>,<lat> <lon>`.
//!
//! The sampler is the only writer. The upload worker reads the files back to
//! join clips with the fix nearest to their start time.

use chrono::{DateTime, FixedOffset, Local, NaiveDate, SecondsFormat};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tracing::debug;

use super::fix::TelemetryFix;
use crate::error::Result;
use crate::recorder::clip::bucket_name;

/// A fix read back from the log
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LoggedFix {
    pub timestamp: DateTime<FixedOffset>,
    pub latitude: f64,
    pub longitude: f64,
}

/// Format one log row (without the trailing newline)
pub fn format_row(fix: &TelemetryFix) -> String {
    format!(
        "{},{:.6} {:.6}",
        fix.timestamp.to_rfc3339_opts(SecondsFormat::Secs, false),
        fix.latitude,
        fix.longitude
    )
}

/// Parse one log row; malformed rows yield `None`
pub fn parse_row(line: &str) -> Option<LoggedFix> {
    let (timestamp, position) = line.trim().split_once(',')?;
    let (lat, lon) = position.trim().split_once(' ')?;

    Some(LoggedFix {
        timestamp: DateTime::parse_from_rfc3339(timestamp).ok()?,
        latitude: lat.parse().ok()?,
        longitude: lon.trim().parse().ok()?,
    })
}

/// Rate-limited writer owned by the sampler
#[derive(Debug)]
pub struct FixLogWriter {
    root: PathBuf,
    file_name: String,
    interval: Duration,
    last_write: Option<Instant>,
}

impl FixLogWriter {
    /// # Arguments
    ///
    /// * `root` - Clips root holding the day buckets
    /// * `file_name` - Log file name inside each bucket
    /// * `interval` - Minimum spacing between two appended rows
    pub fn new(root: impl Into<PathBuf>, file_name: impl Into<String>, interval: Duration) -> Self {
        Self {
            root: root.into(),
            file_name: file_name.into(),
            interval,
            last_write: None,
        }
    }

    /// Log file for the bucket of `date`
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.root.join(bucket_name(date)).join(&self.file_name)
    }

    /// Append `fix` unless a row was written less than one interval ago
    ///
    /// Returns whether a row was written.
    pub async fn maybe_append(&mut self, fix: &TelemetryFix) -> Result<bool> {
        let now = Instant::now();
        if let Some(last) = self.last_write {
            if now.duration_since(last) < self.interval {
                return Ok(false);
            }
        }

        self.append(fix).await?;
        self.last_write = Some(now);
        Ok(true)
    }

    async fn append(&self, fix: &TelemetryFix) -> Result<()> {
        let path = self.path_for(fix.timestamp.date_naive());
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await?;
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&path).await?;
        let mut row = format_row(fix);
        row.push('\n');
        file.write_all(row.as_bytes()).await?;
        file.flush().await?;

        debug!(path = %path.display(), "Logged fix");
        Ok(())
    }
}

/// Find the logged fix nearest to `at` within `tolerance`
///
/// Reads the day files covering `[at - tolerance, at + tolerance]`, so a clip
/// started just before midnight still matches fixes logged after it.
/// Missing files mean no fixes for that day, not an error.
pub async fn nearest_logged_fix(
    root: &Path,
    file_name: &str,
    at: DateTime<Local>,
    tolerance: Duration,
) -> Result<Option<LoggedFix>> {
    let window = chrono::Duration::from_std(tolerance).unwrap_or_else(|_| chrono::Duration::days(1));
    let mut dates = vec![at.date_naive()];
    for edge in [at.checked_sub_signed(window), at.checked_add_signed(window)].into_iter().flatten() {
        if !dates.contains(&edge.date_naive()) {
            dates.push(edge.date_naive());
        }
    }

    let mut rows = Vec::new();
    for date in dates {
        let path = root.join(bucket_name(date)).join(file_name);
        match fs::read_to_string(&path).await {
            Ok(contents) => rows.extend(contents.lines().filter_map(parse_row)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        }
    }

    Ok(nearest_in(&rows, at, tolerance))
}

/// Pick the row closest in time to `at`, if within `tolerance`
pub fn nearest_in(rows: &[LoggedFix], at: DateTime<Local>, tolerance: Duration) -> Option<LoggedFix> {
    rows.iter()
        .filter_map(|row| {
            let distance = (row.timestamp.timestamp_millis() - at.timestamp_millis()).unsigned_abs();
            (distance <= tolerance.as_millis() as u64).then_some((distance, *row))
        })
        .min_by_key(|(distance, _)| *distance)
        .map(|(_, row)| row)
}
