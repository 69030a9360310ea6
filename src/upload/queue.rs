//! # Clip Queue
//!
//! FIFO of clips waiting for upload. A path stays tracked from enqueue
//! until the worker completes it, so a clip that is queued or in flight is
//! never enqueued twice by the directory watcher.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio::time::Instant;

/// One clip waiting for upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTask {
    pub path: PathBuf,
    /// Failed transfer attempts so far
    pub attempts: u32,
    /// Times the task was requeued waiting for a position fix
    pub fix_waits: u32,
    /// Already on the archive; only the local delete is outstanding
    pub archived: bool,
    pub enqueued_at: Instant,
}

impl UploadTask {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            attempts: 0,
            fix_waits: 0,
            archived: false,
            enqueued_at: Instant::now(),
        }
    }
}

#[derive(Debug, Default)]
struct QueueInner {
    pending: VecDeque<UploadTask>,
    tracked: HashSet<PathBuf>,
}

/// Mutex-guarded upload queue with wake-up notification
#[derive(Debug, Default)]
pub struct ClipQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl ClipQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a clip at the back unless it is already tracked
    ///
    /// Returns `true` if the clip was added.
    pub fn enqueue(&self, path: impl Into<PathBuf>) -> bool {
        let path = path.into();
        {
            let mut inner = self.lock();
            if !inner.tracked.insert(path.clone()) {
                return false;
            }
            inner.pending.push_back(UploadTask::new(path));
        }
        self.notify.notify_one();
        true
    }

    /// Take the task at the head; it stays tracked until completed
    pub fn pop(&self) -> Option<UploadTask> {
        self.lock().pending.pop_front()
    }

    /// Put a popped task back at the tail
    pub fn requeue(&self, task: UploadTask) {
        self.lock().pending.push_back(task);
        self.notify.notify_one();
    }

    /// Stop tracking a task that was uploaded or dropped
    pub fn complete(&self, path: &Path) {
        self.lock().tracked.remove(path);
    }

    /// Tasks waiting in the queue (excluding one in flight)
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tasks queued or in flight
    pub fn depth(&self) -> usize {
        self.lock().tracked.len()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.lock().tracked.contains(path)
    }

    /// Resolve when new work may be available
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}
