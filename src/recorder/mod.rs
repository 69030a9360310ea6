//! # Recorder Module
//!
//! Turns a continuous camera feed into bounded-duration clips.
//!
//! This module handles:
//! - The `Idle → Recording → Finalizing → Idle` segment loop
//! - Day bucket directories and the once-per-day rollover hook
//! - Publishing clips with an atomic rename only after the sink stopped
//! - Honoring cancellation without ever skipping finalization

pub mod clip;
pub mod rollover;
pub mod sink;

use serde::Serialize;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::error::{DashcamError, Result};
use crate::health::Liveness;
use clip::{Clip, ClipLayout};
use rollover::{DayTracker, RolloverHook};
use sink::{SegmentConfig, VideoSink};

/// Recorder state machine position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecorderState {
    Idle,
    Recording,
    Finalizing,
}

/// Result of one completed cycle
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Clip published under its final name
    Finalized(Clip),
    /// Clip kept under its temporary name (stop or rename failed)
    Retained(Clip),
}

/// Read side of the recorder
#[derive(Debug, Clone)]
pub struct RecorderHandle {
    state: watch::Receiver<RecorderState>,
    liveness: Arc<Liveness>,
}

impl RecorderHandle {
    pub fn state(&self) -> RecorderState {
        *self.state.borrow()
    }

    pub fn is_recording(&self) -> bool {
        self.state() == RecorderState::Recording
    }

    pub fn is_alive(&self) -> bool {
        self.liveness.is_alive()
    }
}

/// Segment loop driving one video sink
pub struct ClipRecorder<S: VideoSink> {
    sink: S,
    layout: ClipLayout,
    clock: Arc<dyn Clock>,
    clip_duration: Duration,
    retry_backoff: Duration,
    record_interval: Option<Duration>,
    days: DayTracker,
    on_new_day: Option<RolloverHook>,
    state: watch::Sender<RecorderState>,
    liveness: Arc<Liveness>,
}

impl<S: VideoSink> ClipRecorder<S> {
    /// Create a recorder and the handle its observers use
    ///
    /// # Arguments
    ///
    /// * `sink` - Camera write sink
    /// * `layout` - Clip naming rules; its root must already exist
    /// * `clock` - Wall clock for names and day buckets
    /// * `clip_duration` - Target length of each clip
    /// * `retry_backoff` - Pause after a failed cycle
    pub fn new(
        sink: S,
        layout: ClipLayout,
        clock: Arc<dyn Clock>,
        clip_duration: Duration,
        retry_backoff: Duration,
    ) -> (Self, RecorderHandle) {
        let (state, state_rx) = watch::channel(RecorderState::Idle);
        let liveness = Liveness::new();
        let days = DayTracker::new(layout.root());
        let handle = RecorderHandle {
            state: state_rx,
            liveness: Arc::clone(&liveness),
        };

        let recorder = Self {
            sink,
            layout,
            clock,
            clip_duration,
            retry_backoff,
            record_interval: None,
            days,
            on_new_day: None,
            state,
            liveness,
        };
        (recorder, handle)
    }

    /// Register the callback fired once for every new day bucket
    pub fn on_new_day(mut self, hook: RolloverHook) -> Self {
        self.on_new_day = Some(hook);
        self
    }

    /// Start one clip per `interval` instead of recording back to back
    ///
    /// `None` keeps continuous recording.
    pub fn with_record_interval(mut self, interval: Option<Duration>) -> Self {
        self.record_interval = interval;
        self
    }

    /// Record clips until cancelled
    ///
    /// A failed cycle is logged and retried after the backoff; the loop
    /// itself never fails. With a record interval the recorder idles
    /// between clips; an open clip is always finalized first.
    pub async fn run(mut self, cancel: CancellationToken) {
        let _alive = self.liveness.enter();
        info!(
            duration = ?self.clip_duration,
            interval = ?self.record_interval,
            root = %self.layout.root().display(),
            "Clip recorder started"
        );

        let mut next_start = Instant::now();
        while !cancel.is_cancelled() {
            if self.record_interval.is_some() {
                tokio::select! {
                    _ = tokio::time::sleep_until(next_start) => {}
                    _ = cancel.cancelled() => break,
                }
            }

            let started = Instant::now();
            let outcome = self.run_cycle(&cancel).await;
            if outcome.is_ok() {
                if let Some(interval) = self.record_interval {
                    next_start = started + interval;
                }
            }

            match outcome {
                Ok(CycleOutcome::Finalized(clip)) => {
                    info!("Finished recording clip: {}", clip.name);
                }
                Ok(CycleOutcome::Retained(clip)) => {
                    warn!(path = %clip.temp_path.display(), "Clip retained under temporary name");
                }
                Err(e) => {
                    warn!("Recording cycle failed: {}; retrying in {:?}", e, self.retry_backoff);
                    tokio::select! {
                        _ = tokio::time::sleep(self.retry_backoff) => {}
                        _ = cancel.cancelled() => break,
                    }
                }
            }
            self.liveness.beat();
        }

        info!("Clip recorder stopped");
    }

    /// Run one `Idle → Recording → Finalizing → Idle` cycle
    ///
    /// # Errors
    ///
    /// Returns error if the bucket directory cannot be created or the sink
    /// fails to start; in both cases nothing was recorded.
    pub async fn run_cycle(&mut self, cancel: &CancellationToken) -> Result<CycleOutcome> {
        let now = self.clock.now();
        let clip = self.layout.plan(now, self.clip_duration);

        fs::create_dir_all(&clip.dir).await.map_err(|e| {
            DashcamError::Storage(format!("Failed to create bucket {}: {}", clip.dir.display(), e))
        })?;

        let today = now.date_naive();
        if self.days.observe(today).await {
            info!(bucket = %clip.dir.display(), "New day bucket");
            if let Some(hook) = &self.on_new_day {
                hook(today, &clip.dir);
            }
        }

        let segment = SegmentConfig {
            clip_name: clip.name.clone(),
            duration: self.clip_duration,
        };
        self.sink.start(&clip.temp_path, &segment).await?;
        self.state.send_replace(RecorderState::Recording);
        info!("Recording clip: {}", clip.name);

        tokio::select! {
            _ = tokio::time::sleep(self.clip_duration) => {}
            _ = cancel.cancelled() => {
                info!("Stop requested, finalizing clip: {}", clip.name);
            }
        }

        self.state.send_replace(RecorderState::Finalizing);
        let outcome = match self.sink.stop().await {
            Ok(()) => finalize(clip).await,
            Err(e) => {
                error!("Sink did not stop cleanly for {}: {}", clip.name, e);
                CycleOutcome::Retained(clip)
            }
        };
        self.state.send_replace(RecorderState::Idle);

        Ok(outcome)
    }
}

/// Publish a stopped clip by renaming it to its final name
///
/// An existing file at the final path is never overwritten.
async fn finalize(clip: Clip) -> CycleOutcome {
    match fs::try_exists(&clip.final_path).await {
        Ok(false) => {}
        Ok(true) => {
            error!(path = %clip.final_path.display(), "Final clip path already exists");
            return CycleOutcome::Retained(clip);
        }
        Err(e) => {
            error!(path = %clip.final_path.display(), "Failed to check final clip path: {}", e);
            return CycleOutcome::Retained(clip);
        }
    }

    match fs::rename(&clip.temp_path, &clip.final_path).await {
        Ok(()) => CycleOutcome::Finalized(clip),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            error!(path = %clip.temp_path.display(), "Sink produced no file");
            CycleOutcome::Retained(clip)
        }
        Err(e) => {
            error!(path = %clip.temp_path.display(), "Failed to finalize clip: {}", e);
            CycleOutcome::Retained(clip)
        }
    }
}
