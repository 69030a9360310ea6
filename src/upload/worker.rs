//! # Upload Worker
//!
//! Single sequential consumer of the clip queue. For each clip:
//! probe the network, tag it with the nearest position fix, transfer it,
//! confirm it on the archive, then delete the local copy. Every failure
//! requeues the clip at the back; nothing is deleted unless the archive
//! holds the clip. Retry pauses only apply when no other clip is waiting.

use chrono::{DateTime, FixedOffset, Local};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::probe::ReachabilityProbe;
use super::queue::{ClipQueue, UploadTask};
use super::remote::{remote_join, RemoteArchive, RemoteSession};
use crate::clock::Clock;
use crate::config::Config;
use crate::error::{DashcamError, Result};
use crate::health::Liveness;
use crate::recorder::clip::{bucket_name, ClipLayout};
use crate::telemetry::log::{nearest_logged_fix, LoggedFix};
use crate::telemetry::TelemetryHandle;

/// Worker tuning taken from the `[upload]` and `[gps]` sections
#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub remote_dir: String,
    pub retry_delay: Duration,
    pub poll_interval: Duration,
    pub fix_tolerance: Duration,
    pub max_fix_wait_attempts: u32,
    pub write_sidecar: bool,
    /// Fix log file name inside each day bucket
    pub fix_log_file: String,
}

impl UploadSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            remote_dir: config.upload.remote_dir.clone(),
            retry_delay: Duration::from_millis(config.upload.retry_delay_ms),
            poll_interval: Duration::from_millis(config.upload.poll_interval_ms),
            fix_tolerance: Duration::from_secs(config.upload.fix_tolerance_s),
            max_fix_wait_attempts: config.upload.max_fix_wait_attempts,
            write_sidecar: config.upload.write_sidecar,
            fix_log_file: config.gps.log_file.clone(),
        }
    }
}

/// Metadata stored next to each archived clip
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClipManifest {
    pub clip: String,
    pub created_at: DateTime<Local>,
    pub size_bytes: u64,
    pub fix: Option<LoggedFix>,
}

/// What one worker step did
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// Queue was empty
    Idle,
    /// Archived and deleted locally
    Uploaded { path: PathBuf, tagged: bool },
    /// Local file vanished or is not a clip
    Dropped(PathBuf),
    /// Network down; requeued
    Unreachable(PathBuf),
    /// No fix yet; requeued to give the sampler time
    AwaitingFix(PathBuf),
    /// Transfer failed; requeued
    Failed { path: PathBuf, attempts: u32 },
    /// Archived but the local delete failed; requeued for the delete only
    DeleteFailed(PathBuf),
    /// Local copy of an archived clip removed on retry
    Removed(PathBuf),
}

pub struct UploadWorker {
    queue: Arc<ClipQueue>,
    archive: Arc<dyn RemoteArchive>,
    probe: Arc<dyn ReachabilityProbe>,
    telemetry: TelemetryHandle,
    layout: ClipLayout,
    clock: Arc<dyn Clock>,
    settings: UploadSettings,
    liveness: Arc<Liveness>,
}

impl UploadWorker {
    pub fn new(
        queue: Arc<ClipQueue>,
        archive: Arc<dyn RemoteArchive>,
        probe: Arc<dyn ReachabilityProbe>,
        telemetry: TelemetryHandle,
        layout: ClipLayout,
        clock: Arc<dyn Clock>,
        settings: UploadSettings,
    ) -> Self {
        Self {
            queue,
            archive,
            probe,
            telemetry,
            layout,
            clock,
            settings,
            liveness: Liveness::new(),
        }
    }

    pub fn liveness(&self) -> Arc<Liveness> {
        Arc::clone(&self.liveness)
    }

    /// Process the queue until cancelled
    ///
    /// A transfer in progress is completed before the token is observed.
    pub async fn run(self, cancel: CancellationToken) {
        let _alive = self.liveness.enter();
        info!(remote_dir = %self.settings.remote_dir, "Upload worker started");

        while !cancel.is_cancelled() {
            match self.step(&cancel).await {
                TaskOutcome::Idle => {}
                TaskOutcome::Uploaded { path, tagged } => {
                    info!(tagged, "Uploaded and removed {}", path.display());
                }
                TaskOutcome::Dropped(path) => debug!("Dropped {}", path.display()),
                TaskOutcome::Unreachable(path) => {
                    debug!("Network unreachable, deferred {}", path.display());
                }
                TaskOutcome::AwaitingFix(path) => debug!("Waiting for a fix for {}", path.display()),
                TaskOutcome::Failed { path, attempts } => {
                    warn!(attempts, "Upload of {} failed, requeued", path.display());
                }
                TaskOutcome::DeleteFailed(path) => {
                    warn!("Archived {} but could not remove it, requeued", path.display());
                }
                TaskOutcome::Removed(path) => info!("Removed archived clip {}", path.display()),
            }
            self.liveness.beat();
        }

        info!("Upload worker stopped");
    }

    /// Handle the task at the head of the queue
    pub async fn step(&self, cancel: &CancellationToken) -> TaskOutcome {
        let Some(mut task) = self.queue.pop() else {
            tokio::select! {
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
                _ = self.queue.notified() => {}
                _ = cancel.cancelled() => {}
            }
            return TaskOutcome::Idle;
        };

        let path = task.path.clone();
        match fs::try_exists(&path).await {
            Ok(true) => {}
            Ok(false) => {
                warn!("Queued clip no longer exists: {}", path.display());
                self.queue.complete(&path);
                return TaskOutcome::Dropped(path);
            }
            Err(e) => {
                // Cannot tell; treat like any other failed attempt
                warn!("Failed to check {}: {}", path.display(), e);
                return self.fail(task, cancel).await;
            }
        }

        if task.archived {
            return match remove_local(&path).await {
                Ok(()) => {
                    self.queue.complete(&path);
                    TaskOutcome::Removed(path)
                }
                Err(e) => {
                    warn!("Failed to remove {}: {}", path.display(), e);
                    self.requeue(task, cancel, self.settings.retry_delay).await;
                    TaskOutcome::DeleteFailed(path)
                }
            };
        }

        let Some(created_at) = clip_created_at(&self.layout, &path) else {
            warn!("Not a finalized clip, dropping: {}", path.display());
            self.queue.complete(&path);
            return TaskOutcome::Dropped(path);
        };

        if !self.probe.is_reachable().await {
            self.queue.requeue(task);
            pause(cancel, self.settings.retry_delay).await;
            return TaskOutcome::Unreachable(path);
        }

        let fix = self.find_fix(created_at).await;
        if fix.is_none() && self.fix_may_arrive(created_at) && task.fix_waits < self.settings.max_fix_wait_attempts {
            task.fix_waits += 1;
            self.requeue(task, cancel, self.settings.poll_interval).await;
            return TaskOutcome::AwaitingFix(path);
        }

        match self.transfer(&path, created_at, fix).await {
            Ok(size) => {
                debug!(size, "Archived {}", path.display());
                if let Err(e) = remove_local(&path).await {
                    warn!("Archived but failed to remove {}: {}", path.display(), e);
                    task.archived = true;
                    self.requeue(task, cancel, self.settings.retry_delay).await;
                    return TaskOutcome::DeleteFailed(path);
                }
                self.queue.complete(&path);
                TaskOutcome::Uploaded {
                    path,
                    tagged: fix.is_some(),
                }
            }
            Err(e) => {
                warn!("Transfer of {} failed: {}", path.display(), e);
                self.fail(task, cancel).await
            }
        }
    }

    /// Requeue a failed transfer
    async fn fail(&self, mut task: UploadTask, cancel: &CancellationToken) -> TaskOutcome {
        task.attempts += 1;
        let path = task.path.clone();
        let attempts = task.attempts;
        self.requeue(task, cancel, self.settings.retry_delay).await;
        TaskOutcome::Failed { path, attempts }
    }

    /// Put `task` at the back; pause only if nothing else is waiting
    async fn requeue(&self, task: UploadTask, cancel: &CancellationToken, delay: Duration) {
        self.queue.requeue(task);
        if self.queue.len() <= 1 {
            pause(cancel, delay).await;
        }
    }

    /// A live sampler can still log a fix inside the clip's tolerance window
    fn fix_may_arrive(&self, created_at: DateTime<Local>) -> bool {
        if !self.telemetry.is_sampler_alive() {
            return false;
        }
        let Ok(tolerance) = chrono::Duration::from_std(self.settings.fix_tolerance) else {
            return true;
        };
        self.clock.now() <= created_at + tolerance
    }

    /// Fix nearest to `at` within tolerance: day logs first, then the latest slot
    async fn find_fix(&self, at: DateTime<Local>) -> Option<LoggedFix> {
        let tolerance = self.settings.fix_tolerance;
        match nearest_logged_fix(self.layout.root(), &self.settings.fix_log_file, at, tolerance).await {
            Ok(Some(fix)) => return Some(fix),
            Ok(None) => {}
            Err(e) => debug!("Failed to read fix log: {}", e),
        }

        let latest = self.telemetry.latest()?;
        let distance = (latest.timestamp - at).num_milliseconds().unsigned_abs();
        (distance <= tolerance.as_millis() as u64).then(|| LoggedFix {
            timestamp: DateTime::<FixedOffset>::from(latest.timestamp),
            latitude: latest.latitude,
            longitude: latest.longitude,
        })
    }

    /// Upload one clip and confirm it; the session is closed on every path
    async fn transfer(&self, path: &Path, created_at: DateTime<Local>, fix: Option<LoggedFix>) -> Result<u64> {
        let mut session = self.archive.connect().await?;
        let result = self.transfer_with(session.as_mut(), path, created_at, fix).await;
        session.close().await;
        result
    }

    async fn transfer_with(
        &self,
        session: &mut dyn RemoteSession,
        path: &Path,
        created_at: DateTime<Local>,
        fix: Option<LoggedFix>,
    ) -> Result<u64> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| DashcamError::Storage(format!("Invalid clip path {}", path.display())))?;
        let remote_dir = remote_join(&self.settings.remote_dir, &bucket_name(created_at.date_naive()));

        session.ensure_dir(&remote_dir).await?;
        let size = session.put_file(path, &remote_join(&remote_dir, name)).await?;

        if self.settings.write_sidecar {
            let manifest = ClipManifest {
                clip: name.to_string(),
                created_at,
                size_bytes: size,
                fix,
            };
            let contents = serde_json::to_vec_pretty(&manifest)?;
            session
                .put_bytes(&contents, &remote_join(&remote_dir, &format!("{}.json", name)))
                .await?;
        }

        if !session.list(&remote_dir).await?.iter().any(|n| n == name) {
            return Err(DashcamError::Remote(format!("{} missing from {} after upload", name, remote_dir)));
        }
        Ok(size)
    }
}

fn clip_created_at(layout: &ClipLayout, path: &Path) -> Option<DateTime<Local>> {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| layout.finalized_clip_time(n))
}

/// Delete a local clip; already gone counts as deleted
async fn remove_local(path: &Path) -> io::Result<()> {
    match fs::remove_file(path).await {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        result => result,
    }
}

async fn pause(cancel: &CancellationToken, duration: Duration) {
    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        _ = cancel.cancelled() => {}
    }
}
