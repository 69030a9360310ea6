//! # Directory Watcher
//!
//! Polls the attached day buckets and enqueues every finalized clip that is
//! not already tracked. Disk state is authoritative: after a restart all
//! existing buckets are attached again and their clips re-enqueued.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::queue::ClipQueue;
use crate::error::Result;
use crate::recorder::clip::ClipLayout;
use crate::recorder::rollover::RolloverHook;

type Attached = Arc<Mutex<BTreeSet<PathBuf>>>;

fn lock(attached: &Attached) -> MutexGuard<'_, BTreeSet<PathBuf>> {
    attached.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cloneable handle for attaching directories from other tasks
#[derive(Debug, Clone)]
pub struct WatchHandle {
    attached: Attached,
    wake: Arc<Notify>,
}

impl WatchHandle {
    /// Start watching `dir`; returns `false` if it was already attached
    pub fn attach(&self, dir: &Path) -> bool {
        let added = lock(&self.attached).insert(dir.to_path_buf());
        if added {
            debug!("Watching {}", dir.display());
            self.wake.notify_one();
        }
        added
    }

    /// Rollover callback attaching each new day bucket
    pub fn rollover_hook(&self) -> RolloverHook {
        let handle = self.clone();
        Arc::new(move |_date, dir: &Path| {
            handle.attach(dir);
        })
    }

    pub fn attached(&self) -> Vec<PathBuf> {
        lock(&self.attached).iter().cloned().collect()
    }
}

pub struct DirectoryWatcher {
    layout: ClipLayout,
    queue: Arc<ClipQueue>,
    handle: WatchHandle,
    scan_interval: Duration,
}

impl DirectoryWatcher {
    pub fn new(layout: ClipLayout, queue: Arc<ClipQueue>, scan_interval: Duration) -> Self {
        Self {
            layout,
            queue,
            handle: WatchHandle {
                attached: Arc::default(),
                wake: Arc::new(Notify::new()),
            },
            scan_interval,
        }
    }

    pub fn handle(&self) -> WatchHandle {
        self.handle.clone()
    }

    /// Attach every bucket already on disk; returns how many were new
    pub async fn attach_existing(&self) -> Result<usize> {
        let mut added = 0;
        for (_, dir) in self.layout.list_buckets().await? {
            if self.handle.attach(&dir) {
                added += 1;
            }
        }
        Ok(added)
    }

    /// Enqueue untracked finalized clips from all attached buckets
    ///
    /// Returns the number of clips enqueued. A bucket that cannot be read
    /// is skipped until the next scan.
    pub async fn scan_once(&self) -> usize {
        let mut enqueued = 0;
        for dir in self.handle.attached() {
            let clips = match self.layout.clips_in(&dir).await {
                Ok(clips) => clips,
                Err(e) => {
                    warn!("Failed to scan {}: {}", dir.display(), e);
                    continue;
                }
            };
            for clip in clips {
                if self.queue.enqueue(clip.path) {
                    enqueued += 1;
                }
            }
        }

        if enqueued > 0 {
            debug!(enqueued, depth = self.queue.depth(), "Enqueued finalized clips");
        }
        enqueued
    }

    /// Scan until cancelled
    pub async fn run(self, cancel: CancellationToken) {
        match self.attach_existing().await {
            Ok(count) => info!("Directory watcher started with {} existing buckets", count),
            Err(e) => warn!("Failed to list existing buckets: {}", e),
        }

        while !cancel.is_cancelled() {
            self.scan_once().await;
            tokio::select! {
                _ = tokio::time::sleep(self.scan_interval) => {}
                _ = self.handle.wake.notified() => {}
                _ = cancel.cancelled() => {}
            }
        }

        debug!("Directory watcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn write(root: &Path, bucket: &str, name: &str) -> PathBuf {
        let dir = root.join(bucket);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, b"data").unwrap();
        path
    }

    fn watcher(root: &Path, queue: &Arc<ClipQueue>) -> DirectoryWatcher {
        DirectoryWatcher::new(ClipLayout::new(root, "h264", "TMP_"), Arc::clone(queue), Duration::from_secs(2))
    }

    #[tokio::test]
    async fn test_restart_recovers_existing_clips() {
        let dir = TempDir::new().unwrap();
        let old = write(dir.path(), "2024-04-30", "clip_2024-04-30_23-59-50.h264");
        let new = write(dir.path(), "2024-05-01", "clip_2024-05-01_00-00-00.h264");
        write(dir.path(), "2024-05-01", "TMP_clip_2024-05-01_00-00-10.h264");
        write(dir.path(), "2024-05-01", "gps_data.csv");
        write(dir.path(), "2024-05-01", "clip_2024-05-01_00-00-20.mp4");

        let queue = Arc::new(ClipQueue::new());
        let watcher = watcher(dir.path(), &queue);
        assert_eq!(watcher.attach_existing().await.unwrap(), 2);
        assert_eq!(watcher.scan_once().await, 2);

        assert_eq!(queue.pop().unwrap().path, old);
        assert_eq!(queue.pop().unwrap().path, new);
    }

    #[tokio::test]
    async fn test_tracked_clips_not_enqueued_twice() {
        let dir = TempDir::new().unwrap();
        let clip = write(dir.path(), "2024-05-01", "clip_2024-05-01_12-00-00.h264");

        let queue = Arc::new(ClipQueue::new());
        let watcher = watcher(dir.path(), &queue);
        watcher.attach_existing().await.unwrap();

        assert_eq!(watcher.scan_once().await, 1);
        assert_eq!(watcher.scan_once().await, 0);

        // In flight: still not enqueued again
        let task = queue.pop().unwrap();
        assert_eq!(watcher.scan_once().await, 0);
        queue.complete(&task.path);
        std::fs::remove_file(&clip).unwrap();
        assert_eq!(watcher.scan_once().await, 0);
    }

    #[tokio::test]
    async fn test_rollover_hook_attaches_bucket() {
        let dir = TempDir::new().unwrap();
        let queue = Arc::new(ClipQueue::new());
        let watcher = watcher(dir.path(), &queue);
        let hook = watcher.handle().rollover_hook();

        let bucket = dir.path().join("2024-05-02");
        hook(NaiveDate::from_ymd_opt(2024, 5, 2).unwrap(), &bucket);
        assert_eq!(watcher.handle().attached(), vec![bucket.clone()]);

        // Finalized after attach: picked up by the next scan
        write(dir.path(), "2024-05-02", "clip_2024-05-02_00-00-00.h264");
        assert_eq!(watcher.scan_once().await, 1);
        assert!(!watcher.handle().attach(&bucket));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_picks_up_new_clips() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "2024-05-01", "clip_2024-05-01_12-00-00.h264");

        let queue = Arc::new(ClipQueue::new());
        let watcher = watcher(dir.path(), &queue);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(watcher.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(queue.depth(), 1);

        write(dir.path(), "2024-05-01", "clip_2024-05-01_12-00-10.h264");
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(queue.depth(), 2);

        cancel.cancel();
        task.await.unwrap();
    }
}
