//! # Clip Layout
//!
//! Naming and placement of clips on disk:
//! `<clips_root>/<YYYY-MM-DD>/clip_<YYYY-MM-DD_HH-MM-SS>.<ext>`, with
//! in-progress files carrying the temporary prefix until finalized.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

use crate::config::StorageConfig;
use crate::error::Result;

/// Every clip name starts with this prefix
pub const CLIP_NAME_PREFIX: &str = "clip_";

/// Timestamp part of a clip name (second resolution)
pub const CLIP_TIME_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Day bucket directory name
pub const BUCKET_FORMAT: &str = "%Y-%m-%d";

/// Name of the day bucket directory for `date`
pub fn bucket_name(date: NaiveDate) -> String {
    date.format(BUCKET_FORMAT).to_string()
}

/// Parse a day bucket directory name
pub fn parse_bucket_name(name: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(name, BUCKET_FORMAT).ok()
}

/// Clip name for a segment started at `at`
pub fn clip_name(at: DateTime<Local>) -> String {
    format!("{}{}", CLIP_NAME_PREFIX, at.format(CLIP_TIME_FORMAT))
}

/// One recording segment planned by the recorder
#[derive(Debug, Clone, PartialEq)]
pub struct Clip {
    pub name: String,
    /// Day bucket directory
    pub dir: PathBuf,
    /// Path written while recording
    pub temp_path: PathBuf,
    /// Path published by the finalize rename
    pub final_path: PathBuf,
    pub started_at: DateTime<Local>,
    pub target_duration: Duration,
}

/// Metadata of a finalized clip on disk
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClipInfo {
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub created_at: DateTime<Local>,
}

/// Naming rules shared by the recorder, watcher and upload worker
#[derive(Debug, Clone)]
pub struct ClipLayout {
    root: PathBuf,
    extension: String,
    temp_prefix: String,
}

impl ClipLayout {
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>, temp_prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            extension: extension.into(),
            temp_prefix: temp_prefix.into(),
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(&config.clips_root, &config.extension, &config.temp_prefix)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Day bucket directory for `date`
    pub fn bucket_dir(&self, date: NaiveDate) -> PathBuf {
        self.root.join(bucket_name(date))
    }

    /// Plan the clip for a segment starting at `at`
    pub fn plan(&self, at: DateTime<Local>, target_duration: Duration) -> Clip {
        let name = clip_name(at);
        let dir = self.bucket_dir(at.date_naive());
        let file_name = format!("{}.{}", name, self.extension);

        Clip {
            temp_path: dir.join(format!("{}{}", self.temp_prefix, file_name)),
            final_path: dir.join(file_name),
            name,
            dir,
            started_at: at,
            target_duration,
        }
    }

    /// Creation time encoded in a finalized clip file name
    ///
    /// Returns `None` for in-progress files, other extensions and any name
    /// that is not a clip name. This is the single test the watcher uses to
    /// decide whether a file is ready for upload.
    pub fn finalized_clip_time(&self, file_name: &str) -> Option<DateTime<Local>> {
        if file_name.starts_with(&self.temp_prefix) {
            return None;
        }

        let stem = file_name
            .strip_suffix(&self.extension)?
            .strip_suffix('.')?
            .strip_prefix(CLIP_NAME_PREFIX)?;
        let naive = NaiveDateTime::parse_from_str(stem, CLIP_TIME_FORMAT).ok()?;
        Local.from_local_datetime(&naive).earliest()
    }

    /// Bucket directories present under the root, oldest first
    pub async fn list_buckets(&self) -> Result<Vec<(NaiveDate, PathBuf)>> {
        let mut buckets = Vec::new();
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(buckets),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let Some(date) = entry.file_name().to_str().and_then(parse_bucket_name) else {
                continue;
            };
            if entry.file_type().await?.is_dir() {
                buckets.push((date, entry.path()));
            }
        }

        buckets.sort();
        Ok(buckets)
    }

    /// Finalized clips in one bucket directory, oldest first
    pub async fn clips_in(&self, dir: &Path) -> Result<Vec<ClipInfo>> {
        let mut clips = Vec::new();
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(clips),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            let Some(created_at) = self.finalized_clip_time(name) else {
                continue;
            };
            let metadata = match entry.metadata().await {
                Ok(metadata) if metadata.is_file() => metadata,
                // Removed by the uploader between listing and stat
                _ => continue,
            };

            clips.push(ClipInfo {
                name: name.to_string(),
                path: entry.path(),
                size_bytes: metadata.len(),
                created_at,
            });
        }

        clips.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
        Ok(clips)
    }

    /// Finalized clips created within `[from, to]`, oldest first
    pub async fn list_clips(&self, from: DateTime<Local>, to: DateTime<Local>) -> Result<Vec<ClipInfo>> {
        let mut clips = Vec::new();
        if from > to {
            return Ok(clips);
        }

        for (date, dir) in self.list_buckets().await? {
            if date < from.date_naive() || date > to.date_naive() {
                continue;
            }
            clips.extend(
                self.clips_in(&dir)
                    .await?
                    .into_iter()
                    .filter(|clip| clip.created_at >= from && clip.created_at <= to),
            );
        }

        Ok(clips)
    }
}
