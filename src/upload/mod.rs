//! # Upload Module
//!
//! Moves finalized clips off the device.
//!
//! This module handles:
//! - Discovering finalized clips in the day buckets
//! - Queueing them with per-path deduplication
//! - Probing reachability and tagging clips with position fixes
//! - Transferring to the remote archive and deleting local copies

pub mod probe;
pub mod queue;
pub mod remote;
pub mod sftp;
pub mod watcher;
pub mod worker;

pub use queue::{ClipQueue, UploadTask};
pub use watcher::{DirectoryWatcher, WatchHandle};
pub use worker::{TaskOutcome, UploadSettings, UploadWorker};
