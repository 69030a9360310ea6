//! # Day Rollover
//!
//! Detects the first cycle of each calendar day. The last seen date is kept
//! in a marker file under the clips root so a restart on the same day does
//! not announce that day again.

use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::warn;

use super::clip::{bucket_name, parse_bucket_name};

/// Marker file holding the last announced bucket date
pub const LAST_BUCKET_MARKER: &str = ".last_bucket";

/// Callback invoked once per new day with the date and its bucket directory
pub type RolloverHook = Arc<dyn Fn(NaiveDate, &Path) + Send + Sync>;

/// Last-seen-date tracker
#[derive(Debug)]
pub struct DayTracker {
    marker: PathBuf,
    last_seen: Option<NaiveDate>,
    loaded: bool,
}

impl DayTracker {
    /// Tracker for a clips root; the marker is read on the first observation
    pub fn new(root: &Path) -> Self {
        Self {
            marker: root.join(LAST_BUCKET_MARKER),
            last_seen: None,
            loaded: false,
        }
    }

    /// A missing or unreadable marker means no day has been announced yet
    async fn read_marker(&mut self) {
        self.last_seen = fs::read_to_string(&self.marker)
            .await
            .ok()
            .and_then(|contents| parse_bucket_name(contents.trim()));
        self.loaded = true;
    }

    pub fn last_seen(&self) -> Option<NaiveDate> {
        self.last_seen
    }

    /// Record `date`; returns `true` the first time a date is observed
    ///
    /// The marker is written before returning `true`. If that write fails the
    /// in-memory date still suppresses duplicates for this process.
    pub async fn observe(&mut self, date: NaiveDate) -> bool {
        if !self.loaded {
            self.read_marker().await;
        }
        if self.last_seen == Some(date) {
            return false;
        }

        self.last_seen = Some(date);
        if let Err(e) = fs::write(&self.marker, bucket_name(date)).await {
            warn!(marker = %self.marker.display(), "Failed to persist last bucket date: {}", e);
        }
        true
    }
}
