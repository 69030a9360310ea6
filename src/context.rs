//! # Application Context
//!
//! Wires the recorder, sampler, watcher, upload worker and alert monitor
//! together and owns their cancellation. [`AppContext`] is the query surface
//! handed to callers instead of global state.

use chrono::{DateTime, Local};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::{DashcamError, Result};
use crate::recorder::clip::{ClipInfo, ClipLayout};
use crate::recorder::sink::{CommandSink, VideoSink};
use crate::recorder::ClipRecorder;
use crate::serial::port_trait::LineSource;
use crate::serial::GpsSerial;
use crate::status::alerts::{AlertPolicy, AlertSink, JsonlAlertSink, LogAlertSink};
use crate::status::host::{HostProbe, SysfsHostProbe};
use crate::status::{AlertMonitor, PipelineStatus, StatusAggregator};
use crate::telemetry::log::FixLogWriter;
use crate::telemetry::{TelemetryHandle, TelemetrySampler};
use crate::upload::probe::{ReachabilityProbe, TcpProbe};
use crate::upload::remote::RemoteArchive;
use crate::upload::sftp::SftpArchive;
use crate::upload::{ClipQueue, DirectoryWatcher, UploadSettings, UploadWorker};

/// File created and removed to check the clips root is writable
const WRITE_PROBE_FILE: &str = ".write_probe";

/// Read-only queries over a running pipeline
#[derive(Clone)]
pub struct AppContext {
    status: StatusAggregator,
    layout: ClipLayout,
}

impl AppContext {
    pub async fn status(&self) -> PipelineStatus {
        self.status.snapshot().await
    }

    pub async fn status_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.status().await)?)
    }

    /// Finalized clips created within `[from, to]`, oldest first
    pub async fn list_clips(&self, from: DateTime<Local>, to: DateTime<Local>) -> Result<Vec<ClipInfo>> {
        self.layout.list_clips(from, to).await
    }
}

/// External collaborators of the pipeline
pub struct Components<S: VideoSink> {
    pub sink: S,
    pub archive: Arc<dyn RemoteArchive>,
    pub probe: Arc<dyn ReachabilityProbe>,
    pub host: Arc<dyn HostProbe>,
    pub clock: Arc<dyn Clock>,
}

/// Running pipeline: task handles plus their cancellation tokens
pub struct Pipeline {
    context: AppContext,
    recorder_cancel: CancellationToken,
    cancel: CancellationToken,
    recorder: JoinHandle<()>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Pipeline {
    /// Start the pipeline with the production collaborators
    ///
    /// # Errors
    ///
    /// Returns error if the clips root cannot be created or is not writable.
    /// A positioning device that cannot be opened only degrades telemetry.
    pub async fn start(config: Config) -> Result<Self> {
        let gps = if config.gps.enabled {
            match GpsSerial::open(&config.gps.port, config.gps.baud_rate) {
                Ok(gps) => {
                    info!("Positioning device opened at {}", gps.device_path());
                    Some(gps)
                }
                Err(e) => {
                    warn!("Positioning device unavailable, continuing without telemetry: {}", e);
                    None
                }
            }
        } else {
            info!("Positioning disabled");
            None
        };

        let components = Components {
            sink: CommandSink::from_config(&config.camera),
            archive: Arc::new(SftpArchive::from_config(&config.upload)),
            probe: Arc::new(TcpProbe::new(
                config.upload.probe_target(),
                Duration::from_millis(config.upload.probe_timeout_ms),
            )),
            host: Arc::new(SysfsHostProbe::new(&config.status.thermal_zone)),
            clock: Arc::new(SystemClock),
        };

        Self::start_with(&config, components, gps).await
    }

    /// Start the pipeline with explicit collaborators
    ///
    /// # Errors
    ///
    /// Returns error if the clips root cannot be created or is not writable.
    pub async fn start_with<S, L>(config: &Config, components: Components<S>, gps: Option<L>) -> Result<Self>
    where
        S: VideoSink + 'static,
        L: LineSource + 'static,
    {
        ensure_storage_root(&config.storage.clips_root).await?;

        let Components {
            sink,
            archive,
            probe,
            host,
            clock,
        } = components;
        let layout = ClipLayout::from_config(&config.storage);
        let queue = Arc::new(ClipQueue::new());
        let recorder_cancel = CancellationToken::new();
        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        // Telemetry
        let telemetry = match gps {
            Some(source) => {
                let log = FixLogWriter::new(
                    layout.root(),
                    &config.gps.log_file,
                    Duration::from_millis(config.gps.log_interval_ms),
                );
                let (sampler, handle) = TelemetrySampler::new(
                    source,
                    Some(log),
                    Arc::clone(&clock),
                    Duration::from_millis(config.gps.reconnect_interval_ms),
                );
                tasks.push(("telemetry sampler", tokio::spawn(sampler.run(cancel.clone()))));
                handle
            }
            None => TelemetryHandle::unavailable(),
        };

        // Recorder, with the watcher attached to each new day bucket
        let watcher = DirectoryWatcher::new(
            layout.clone(),
            Arc::clone(&queue),
            Duration::from_millis(config.upload.scan_interval_ms),
        );
        let (recorder, recorder_handle) = ClipRecorder::new(
            sink,
            layout.clone(),
            Arc::clone(&clock),
            config.storage.clip_duration(),
            config.storage.sink_retry_backoff(),
        );
        let recorder = recorder.with_record_interval(config.storage.record_interval());
        let recorder = if config.upload.enabled {
            recorder.on_new_day(watcher.handle().rollover_hook())
        } else {
            recorder
        };
        let recorder = tokio::spawn(recorder.run(recorder_cancel.clone()));

        // Upload
        let worker = UploadWorker::new(
            Arc::clone(&queue),
            archive,
            probe,
            telemetry.clone(),
            layout.clone(),
            Arc::clone(&clock),
            UploadSettings::from_config(config),
        );
        let uploader = worker.liveness();
        if config.upload.enabled {
            tasks.push(("directory watcher", tokio::spawn(watcher.run(cancel.clone()))));
            tasks.push(("upload worker", tokio::spawn(worker.run(cancel.clone()))));
        } else {
            info!("Upload disabled; clips stay on local storage");
        }

        // Status and alerts
        let status = StatusAggregator::new(
            recorder_handle,
            telemetry,
            queue,
            uploader,
            host,
            layout.root(),
            clock,
            Duration::from_secs(config.gps.stale_after_s),
        );
        let mut sinks: Vec<Box<dyn AlertSink>> = vec![Box::new(LogAlertSink)];
        if let Some(path) = &config.status.alerts_file {
            sinks.push(Box::new(JsonlAlertSink::new(path)));
        }
        let monitor = AlertMonitor::new(
            status.clone(),
            AlertPolicy::new(
                config.status.disk_alert_threshold,
                config.status.cpu_temp_alert_threshold,
                Duration::from_secs(config.status.alert_cooldown_s),
            ),
            sinks,
            Duration::from_secs(config.status.eval_interval_s),
        );
        tasks.push(("alert monitor", tokio::spawn(monitor.run(cancel.clone()))));

        info!(root = %layout.root().display(), "Pipeline started");
        Ok(Self {
            context: AppContext { status, layout },
            recorder_cancel,
            cancel,
            recorder,
            tasks,
        })
    }

    pub fn context(&self) -> AppContext {
        self.context.clone()
    }

    /// Stop the recorder, wait for its last clip, then stop everything else
    pub async fn shutdown(self) {
        info!("Stopping recorder");
        self.recorder_cancel.cancel();
        if let Err(e) = self.recorder.await {
            warn!("Recorder task failed: {}", e);
        }

        self.cancel.cancel();
        for (name, task) in self.tasks {
            if let Err(e) = task.await {
                warn!("{} task failed: {}", name, e);
            }
        }
        info!("Pipeline stopped");
    }
}

/// Create the clips root and verify it accepts writes
///
/// # Errors
///
/// Returns [`DashcamError::Storage`] if the directory cannot be created or
/// a file cannot be written inside it.
pub async fn ensure_storage_root(root: &Path) -> Result<()> {
    fs::create_dir_all(root)
        .await
        .map_err(|e| DashcamError::Storage(format!("Cannot create clips root {}: {}", root.display(), e)))?;

    let probe = root.join(WRITE_PROBE_FILE);
    fs::write(&probe, b"")
        .await
        .map_err(|e| DashcamError::Storage(format!("Clips root {} is not writable: {}", root.display(), e)))?;
    if let Err(e) = fs::remove_file(&probe).await {
        warn!("Failed to remove {}: {}", probe.display(), e);
    }
    Ok(())
}
