//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{DashcamError, Result};

/// Placeholder replaced with the clip destination in `camera.args`
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

/// Placeholder replaced with the segment length in `camera.args`
pub const DURATION_PLACEHOLDER: &str = "{duration_ms}";

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    pub camera: CameraConfig,
    pub gps: GpsConfig,
    pub upload: UploadConfig,
    pub status: StatusConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Clip storage configuration
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_clips_root")]
    pub clips_root: PathBuf,

    #[serde(default = "default_extension")]
    pub extension: String,

    #[serde(default = "default_temp_prefix")]
    pub temp_prefix: String,

    #[serde(default = "default_clip_duration_s")]
    pub clip_duration_s: u64,

    #[serde(default = "default_sink_retry_backoff_ms")]
    pub sink_retry_backoff_ms: u64,

    /// Period between clip starts; 0 records back to back
    #[serde(default)]
    pub record_interval_s: u64,
}

/// External capture command configuration
#[derive(Debug, Deserialize, Clone)]
pub struct CameraConfig {
    #[serde(default = "default_camera_command")]
    pub command: String,

    #[serde(default = "default_camera_args")]
    pub args: Vec<String>,

    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
}

/// Positioning device configuration
#[derive(Debug, Deserialize, Clone)]
pub struct GpsConfig {
    #[serde(default = "default_gps_enabled")]
    pub enabled: bool,

    #[serde(default = "default_gps_port")]
    pub port: String,

    #[serde(default = "default_gps_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_gps_log_interval_ms")]
    pub log_interval_ms: u64,

    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    #[serde(default = "default_stale_after_s")]
    pub stale_after_s: u64,

    #[serde(default = "default_gps_log_file")]
    pub log_file: String,
}

/// Remote archive and upload worker configuration
#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    #[serde(default = "default_upload_enabled")]
    pub enabled: bool,

    #[serde(default = "default_sftp_host")]
    pub host: String,

    #[serde(default = "default_sftp_port")]
    pub port: u16,

    #[serde(default = "default_sftp_user")]
    pub username: String,

    #[serde(default)]
    pub password: String,

    #[serde(default = "default_remote_dir")]
    pub remote_dir: String,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_probe_host")]
    pub probe_host: String,

    #[serde(default = "default_probe_port")]
    pub probe_port: u16,

    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval_ms: u64,

    #[serde(default = "default_fix_tolerance_s")]
    pub fix_tolerance_s: u64,

    #[serde(default = "default_max_fix_wait_attempts")]
    pub max_fix_wait_attempts: u32,

    #[serde(default = "default_write_sidecar")]
    pub write_sidecar: bool,
}

/// Health evaluation and alerting configuration
#[derive(Debug, Deserialize, Clone)]
pub struct StatusConfig {
    #[serde(default = "default_eval_interval_s")]
    pub eval_interval_s: u64,

    #[serde(default = "default_disk_alert_threshold")]
    pub disk_alert_threshold: f64,

    #[serde(default = "default_cpu_temp_alert_threshold")]
    pub cpu_temp_alert_threshold: f64,

    #[serde(default = "default_alert_cooldown_s")]
    pub alert_cooldown_s: u64,

    #[serde(default = "default_thermal_zone")]
    pub thermal_zone: PathBuf,

    #[serde(default)]
    pub alerts_file: Option<PathBuf>,
}

/// Log output configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for rolling log files; empty logs to stdout only
    #[serde(default)]
    pub log_dir: String,

    #[serde(default = "default_log_file_prefix")]
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_dir: String::new(),
            file_prefix: default_log_file_prefix(),
        }
    }
}

// Default value functions
fn default_clips_root() -> PathBuf { PathBuf::from("./clips") }
fn default_extension() -> String { "h264".to_string() }
fn default_temp_prefix() -> String { "TMP_".to_string() }
fn default_clip_duration_s() -> u64 { 10 }
fn default_sink_retry_backoff_ms() -> u64 { 2000 }

fn default_camera_command() -> String { "rpicam-vid".to_string() }
fn default_camera_args() -> Vec<String> {
    ["-t", "0", "--codec", "h264", "--width", "1920", "--height", "1080", "--framerate", "30", "-n", "-o", OUTPUT_PLACEHOLDER]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_stop_timeout_ms() -> u64 { 3000 }

fn default_gps_enabled() -> bool { true }
fn default_gps_port() -> String { "/dev/ttyACM0".to_string() }
fn default_gps_baud_rate() -> u32 { 9600 }
fn default_gps_log_interval_ms() -> u64 { 4000 }
fn default_reconnect_interval_ms() -> u64 { 1000 }
fn default_stale_after_s() -> u64 { 10 }
fn default_gps_log_file() -> String { "gps_data.csv".to_string() }

fn default_upload_enabled() -> bool { true }
fn default_sftp_host() -> String { "127.0.0.1".to_string() }
fn default_sftp_port() -> u16 { 22 }
fn default_sftp_user() -> String { "root".to_string() }
fn default_remote_dir() -> String { "/".to_string() }
fn default_connect_timeout_ms() -> u64 { 10000 }
fn default_probe_host() -> String { "8.8.8.8".to_string() }
fn default_probe_port() -> u16 { 53 }
fn default_probe_timeout_ms() -> u64 { 3000 }
fn default_retry_delay_ms() -> u64 { 10000 }
fn default_poll_interval_ms() -> u64 { 5000 }
fn default_scan_interval_ms() -> u64 { 2000 }
fn default_fix_tolerance_s() -> u64 { 30 }
fn default_max_fix_wait_attempts() -> u32 { 3 }
fn default_write_sidecar() -> bool { true }

fn default_eval_interval_s() -> u64 { 30 }
fn default_disk_alert_threshold() -> f64 { 0.10 }
fn default_cpu_temp_alert_threshold() -> f64 { 65.0 }
fn default_alert_cooldown_s() -> u64 { 600 }
fn default_thermal_zone() -> PathBuf { PathBuf::from("/sys/class/thermal/thermal_zone0/temp") }

fn default_log_level() -> String { "info".to_string() }
fn default_log_file_prefix() -> String { "dashcam.log".to_string() }

fn invalid(msg: impl std::fmt::Display) -> DashcamError {
    DashcamError::Config(toml::de::Error::custom(msg))
}

fn check_range_ms(name: &str, value: u64, max: u64) -> Result<()> {
    if value == 0 || value > max {
        return Err(invalid(format!("{} must be between 1 and {}", name, max)));
    }
    Ok(())
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use dashcam::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    fn validate(&self) -> Result<()> {
        // Storage
        if self.storage.clips_root.as_os_str().is_empty() {
            return Err(invalid("clips_root cannot be empty"));
        }

        if self.storage.extension.is_empty() || self.storage.extension.contains('.') {
            return Err(invalid("extension must be non-empty and given without a leading dot"));
        }

        if self.storage.temp_prefix.is_empty() {
            return Err(invalid("temp_prefix cannot be empty"));
        }

        if self.storage.clip_duration_s == 0 || self.storage.clip_duration_s > 3600 {
            return Err(invalid("clip_duration_s must be between 1 and 3600"));
        }

        check_range_ms("sink_retry_backoff_ms", self.storage.sink_retry_backoff_ms, 60_000)?;

        if self.storage.record_interval_s != 0
            && (self.storage.record_interval_s < self.storage.clip_duration_s
                || self.storage.record_interval_s > 86_400)
        {
            return Err(invalid("record_interval_s must be 0 or between clip_duration_s and 86400"));
        }

        // Camera
        if self.camera.command.is_empty() {
            return Err(invalid("camera command cannot be empty"));
        }

        if !self.camera.args.iter().any(|arg| arg.contains(OUTPUT_PLACEHOLDER)) {
            return Err(invalid(format!("camera args must contain the {} placeholder", OUTPUT_PLACEHOLDER)));
        }

        check_range_ms("stop_timeout_ms", self.camera.stop_timeout_ms, 60_000)?;

        // GPS
        if self.gps.enabled && self.gps.port.is_empty() {
            return Err(invalid("gps port cannot be empty when enabled"));
        }

        if ![4800, 9600, 19200, 38400, 57600, 115200].contains(&self.gps.baud_rate) {
            return Err(invalid("gps baud_rate must be one of: 4800, 9600, 19200, 38400, 57600, 115200"));
        }

        check_range_ms("gps log_interval_ms", self.gps.log_interval_ms, 60_000)?;
        check_range_ms("gps reconnect_interval_ms", self.gps.reconnect_interval_ms, 60_000)?;

        if self.gps.stale_after_s == 0 {
            return Err(invalid("gps stale_after_s must be greater than 0"));
        }

        if self.gps.log_file.is_empty() || self.gps.log_file.contains('/') {
            return Err(invalid("gps log_file must be a plain file name"));
        }

        // Upload
        if self.upload.enabled {
            if self.upload.host.is_empty() {
                return Err(invalid("upload host cannot be empty when enabled"));
            }
            if self.upload.remote_dir.is_empty() {
                return Err(invalid("upload remote_dir cannot be empty when enabled"));
            }
        }

        if self.upload.port == 0 || self.upload.probe_port == 0 {
            return Err(invalid("upload port and probe_port must be greater than 0"));
        }

        for (name, value) in [
            ("connect_timeout_ms", self.upload.connect_timeout_ms),
            ("probe_timeout_ms", self.upload.probe_timeout_ms),
            ("retry_delay_ms", self.upload.retry_delay_ms),
            ("poll_interval_ms", self.upload.poll_interval_ms),
            ("scan_interval_ms", self.upload.scan_interval_ms),
        ] {
            check_range_ms(name, value, 600_000)?;
        }

        if self.upload.fix_tolerance_s == 0 {
            return Err(invalid("fix_tolerance_s must be greater than 0"));
        }

        // Status
        if !(self.status.disk_alert_threshold > 0.0 && self.status.disk_alert_threshold < 1.0) {
            return Err(invalid("disk_alert_threshold must be between 0.0 and 1.0 (exclusive)"));
        }

        if !(self.status.cpu_temp_alert_threshold > 0.0 && self.status.cpu_temp_alert_threshold <= 150.0) {
            return Err(invalid("cpu_temp_alert_threshold must be between 0.0 and 150.0"));
        }

        if self.status.eval_interval_s == 0 {
            return Err(invalid("eval_interval_s must be greater than 0"));
        }

        if self.status.alert_cooldown_s == 0 {
            return Err(invalid("alert_cooldown_s must be greater than 0"));
        }

        // Logging
        if !["trace", "debug", "info", "warn", "error"].contains(&self.logging.level.as_str()) {
            return Err(invalid("logging level must be one of: trace, debug, info, warn, error"));
        }

        Ok(())
    }
}

impl StorageConfig {
    /// Target length of one recording cycle
    pub fn clip_duration(&self) -> Duration {
        Duration::from_secs(self.clip_duration_s)
    }

    /// Pause after a failed recording cycle
    pub fn sink_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.sink_retry_backoff_ms)
    }

    /// Period between clip starts, `None` for continuous recording
    pub fn record_interval(&self) -> Option<Duration> {
        (self.record_interval_s > 0).then(|| Duration::from_secs(self.record_interval_s))
    }
}

impl UploadConfig {
    /// `host:port` target of the reachability probe
    pub fn probe_target(&self) -> String {
        format!("{}:{}", self.probe_host, self.probe_port)
    }
}
