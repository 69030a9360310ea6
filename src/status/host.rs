//! # Host Readings
//!
//! Storage, CPU temperature and memory readings of the device.

use nix::sys::statvfs::statvfs;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::Result;

/// Totals of the filesystem holding the clips root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    pub total_bytes: u64,
    /// Bytes available to unprivileged writers
    pub free_bytes: u64,
    pub used_bytes: u64,
}

impl StorageStats {
    /// Free fraction in `[0, 1]`; an empty filesystem reports 0
    pub fn free_ratio(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.free_bytes as f64 / self.total_bytes as f64
    }
}

/// Memory totals in kB, as reported by `/proc/meminfo`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemoryStats {
    pub total_kb: u64,
    pub available_kb: u64,
}

/// Source of host readings
#[cfg_attr(test, mockall::automock)]
pub trait HostProbe: Send + Sync {
    fn storage(&self, path: &Path) -> Result<StorageStats>;

    /// CPU temperature in °C, if the platform exposes one
    fn cpu_temperature(&self) -> Option<f64>;

    fn memory(&self) -> Option<MemoryStats>;
}

/// One round of host readings; unavailable readings are `None`
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HostReadings {
    pub storage: Option<StorageStats>,
    pub cpu_temperature: Option<f64>,
    pub memory: Option<MemoryStats>,
}

impl HostReadings {
    /// Take every reading from `probe`; blocks on filesystem calls
    pub fn collect(probe: &dyn HostProbe, clips_root: &Path) -> Self {
        let storage = match probe.storage(clips_root) {
            Ok(stats) => Some(stats),
            Err(e) => {
                debug!("Failed to read storage stats: {}", e);
                None
            }
        };

        Self {
            storage,
            cpu_temperature: probe.cpu_temperature(),
            memory: probe.memory(),
        }
    }

    /// [`collect`](Self::collect) on the blocking pool
    pub async fn read(probe: Arc<dyn HostProbe>, clips_root: PathBuf) -> Self {
        let task = tokio::task::spawn_blocking(move || Self::collect(probe.as_ref(), &clips_root));
        task.await.unwrap_or_else(|e| {
            warn!("Host readings task failed: {}", e);
            Self::default()
        })
    }
}

/// Linux sysfs/procfs implementation
#[derive(Debug, Clone)]
pub struct SysfsHostProbe {
    thermal_zone: PathBuf,
    meminfo: PathBuf,
}

impl SysfsHostProbe {
    pub fn new(thermal_zone: impl Into<PathBuf>) -> Self {
        Self {
            thermal_zone: thermal_zone.into(),
            meminfo: PathBuf::from("/proc/meminfo"),
        }
    }
}

impl HostProbe for SysfsHostProbe {
    fn storage(&self, path: &Path) -> Result<StorageStats> {
        let stat = statvfs(path).map_err(io::Error::from)?;
        let fragment = stat.fragment_size() as u64;
        let total_bytes = stat.blocks() as u64 * fragment;
        let free_bytes = stat.blocks_available() as u64 * fragment;
        let used_bytes = total_bytes.saturating_sub(stat.blocks_free() as u64 * fragment);

        Ok(StorageStats {
            total_bytes,
            free_bytes,
            used_bytes,
        })
    }

    fn cpu_temperature(&self) -> Option<f64> {
        let contents = fs::read_to_string(&self.thermal_zone).ok()?;
        parse_millidegrees(&contents)
    }

    fn memory(&self) -> Option<MemoryStats> {
        let contents = fs::read_to_string(&self.meminfo).ok()?;
        parse_meminfo(&contents)
    }
}

/// Parse a sysfs thermal reading (millidegrees Celsius)
pub fn parse_millidegrees(contents: &str) -> Option<f64> {
    let millis: i64 = contents.trim().parse().ok()?;
    Some(millis as f64 / 1000.0)
}

/// Extract `MemTotal` and `MemAvailable` from `/proc/meminfo`
pub fn parse_meminfo(contents: &str) -> Option<MemoryStats> {
    let mut total_kb = None;
    let mut available_kb = None;

    for line in contents.lines() {
        if let Some(value) = line.strip_prefix("MemTotal:") {
            total_kb = parse_kb(value);
        } else if let Some(value) = line.strip_prefix("MemAvailable:") {
            available_kb = parse_kb(value);
        }
    }

    Some(MemoryStats {
        total_kb: total_kb?,
        available_kb: available_kb?,
    })
}

fn parse_kb(value: &str) -> Option<u64> {
    value.trim().trim_end_matches("kB").trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_free_ratio() {
        let stats = StorageStats {
            total_bytes: 1000,
            free_bytes: 250,
            used_bytes: 700,
        };
        assert_eq!(stats.free_ratio(), 0.25);

        let empty = StorageStats {
            total_bytes: 0,
            free_bytes: 0,
            used_bytes: 0,
        };
        assert_eq!(empty.free_ratio(), 0.0);
    }

    #[test]
    fn test_parse_millidegrees() {
        assert_eq!(parse_millidegrees("48312\n"), Some(48.312));
        assert_eq!(parse_millidegrees("-5000"), Some(-5.0));
        assert_eq!(parse_millidegrees("n/a"), None);
    }

    #[test]
    fn test_parse_meminfo() {
        let contents = "MemTotal:        3884420 kB\nMemFree:          217032 kB\nMemAvailable:    2715120 kB\n";
        assert_eq!(
            parse_meminfo(contents),
            Some(MemoryStats {
                total_kb: 3_884_420,
                available_kb: 2_715_120,
            })
        );
        assert_eq!(parse_meminfo("MemTotal: 100 kB\n"), None);
    }

    #[test]
    fn test_sysfs_probe_reads_files() {
        let dir = TempDir::new().unwrap();
        let zone = dir.path().join("temp");
        std::fs::write(&zone, "66000\n").unwrap();

        let probe = SysfsHostProbe::new(&zone);
        assert_eq!(probe.cpu_temperature(), Some(66.0));

        let stats = probe.storage(dir.path()).unwrap();
        assert!(stats.total_bytes > 0);
        assert!(stats.free_bytes <= stats.total_bytes);
    }

    #[tokio::test]
    async fn test_readings_off_the_runtime_tolerate_failures() {
        let mut probe = MockHostProbe::new();
        probe
            .expect_storage()
            .returning(|_| Err(io::Error::new(io::ErrorKind::NotFound, "gone").into()));
        probe.expect_cpu_temperature().returning(|| Some(52.5));
        probe.expect_memory().returning(|| None);

        let readings = HostReadings::read(Arc::new(probe), PathBuf::from("/clips")).await;
        assert_eq!(
            readings,
            HostReadings {
                storage: None,
                cpu_temperature: Some(52.5),
                memory: None,
            }
        );
    }

    #[test]
    fn test_missing_thermal_zone() {
        let probe = SysfsHostProbe::new("/nonexistent/thermal_zone0/temp");
        assert_eq!(probe.cpu_temperature(), None);
    }
}
