//! # Video Sink
//!
//! The recorder treats the camera as an opaque write sink: start writing to
//! a path, stop writing. [`CommandSink`] drives an external capture program
//! (`rpicam-vid`, `ffmpeg`, ...) for each segment.

use async_trait::async_trait;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::config::{CameraConfig, DURATION_PLACEHOLDER, OUTPUT_PLACEHOLDER};
use crate::error::{DashcamError, Result};

/// Per-segment parameters handed to the sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentConfig {
    pub clip_name: String,
    pub duration: Duration,
}

/// Write sink for one camera
#[async_trait]
pub trait VideoSink: Send {
    /// Begin writing the stream to `destination`
    async fn start(&mut self, destination: &Path, segment: &SegmentConfig) -> Result<()>;

    /// Stop writing; once this returns the destination file is complete
    async fn stop(&mut self) -> Result<()>;
}

/// Sink that runs an external capture command per segment
///
/// The command is stopped with SIGINT so the encoder can flush its output,
/// and killed if it has not exited within the stop timeout.
pub struct CommandSink {
    program: String,
    args: Vec<String>,
    stop_timeout: Duration,
    child: Option<Child>,
}

impl std::fmt::Debug for CommandSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSink")
            .field("program", &self.program)
            .field("running", &self.child.is_some())
            .finish_non_exhaustive()
    }
}

impl CommandSink {
    pub fn new(program: impl Into<String>, args: Vec<String>, stop_timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            stop_timeout,
            child: None,
        }
    }

    pub fn from_config(config: &CameraConfig) -> Self {
        Self::new(
            &config.command,
            config.args.clone(),
            Duration::from_millis(config.stop_timeout_ms),
        )
    }

    /// Arguments with placeholders substituted for one segment
    pub fn expand_args(&self, destination: &Path, segment: &SegmentConfig) -> Vec<String> {
        let output = destination.to_string_lossy();
        let duration_ms = segment.duration.as_millis().to_string();
        self.args
            .iter()
            .map(|arg| {
                arg.replace(OUTPUT_PLACEHOLDER, &output)
                    .replace(DURATION_PLACEHOLDER, &duration_ms)
            })
            .collect()
    }
}

#[async_trait]
impl VideoSink for CommandSink {
    async fn start(&mut self, destination: &Path, segment: &SegmentConfig) -> Result<()> {
        if self.child.is_some() {
            return Err(DashcamError::Sink("Sink is already recording".to_string()));
        }

        let args = self.expand_args(destination, segment);
        debug!(program = %self.program, ?args, "Starting capture command");

        let child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DashcamError::Sink(format!("Failed to spawn {}: {}", self.program, e)))?;

        self.child = Some(child);
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        if let Some(pid) = child.id() {
            if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGINT) {
                debug!("Failed to interrupt capture command: {}", e);
            }
        }

        match tokio::time::timeout(self.stop_timeout, child.wait()).await {
            Ok(Ok(status)) => {
                debug!(%status, "Capture command exited");
                Ok(())
            }
            Ok(Err(e)) => Err(DashcamError::Sink(format!("Failed to wait for {}: {}", self.program, e))),
            Err(_) => {
                warn!("Capture command ignored SIGINT for {:?}, killing", self.stop_timeout);
                child
                    .kill()
                    .await
                    .map_err(|e| DashcamError::Sink(format!("Failed to kill {}: {}", self.program, e)))?;
                info!("Capture command killed");
                // Killed mid-write: the file may be truncated
                Err(DashcamError::Sink(format!("{} did not stop cleanly", self.program)))
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn segment() -> SegmentConfig {
        SegmentConfig {
            clip_name: "clip_2024-05-01_12-00-00".to_string(),
            duration: Duration::from_secs(10),
        }
    }

    #[test]
    fn test_expand_args() {
        let sink = CommandSink::new(
            "rpicam-vid",
            vec!["-t".into(), "{duration_ms}".into(), "-o".into(), "{output}".into()],
            Duration::from_secs(1),
        );
        let args = sink.expand_args(Path::new("/clips/TMP_a.h264"), &segment());
        assert_eq!(args, vec!["-t", "10000", "-o", "/clips/TMP_a.h264"]);
    }

    #[tokio::test]
    async fn test_command_sink_spawn_failure() {
        let mut sink = CommandSink::new("/nonexistent/capture-binary", vec![], Duration::from_secs(1));
        let result = sink.start(Path::new("/tmp/out.h264"), &segment()).await;
        assert!(matches!(result, Err(DashcamError::Sink(_))));
        assert!(sink.stop().await.is_ok());
    }

    #[tokio::test]
    async fn test_command_sink_start_stop() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("TMP_clip.h264");
        let mut sink = CommandSink::new(
            "sh",
            vec!["-c".into(), "echo frame > \"$0\"; exec sleep 30".into(), "{output}".into()],
            Duration::from_secs(5),
        );

        sink.start(&out, &segment()).await.unwrap();
        assert!(sink.start(&out, &segment()).await.is_err());
        tokio::time::sleep(Duration::from_millis(200)).await;

        sink.stop().await.unwrap();
        assert!(out.exists());
    }
}
