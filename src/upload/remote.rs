//! # Remote Archive
//!
//! Abstraction over the off-device store clips are archived to. The upload
//! worker opens one session per transfer and closes it on every path.

use async_trait::async_trait;
use std::path::Path;

use crate::error::Result;

/// Factory for remote sessions
#[async_trait]
pub trait RemoteArchive: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn RemoteSession>>;
}

/// One authenticated connection to the archive
///
/// Remote paths are `/`-separated strings regardless of the local platform.
#[async_trait]
pub trait RemoteSession: Send {
    /// Create `dir` and any missing parents
    async fn ensure_dir(&mut self, dir: &str) -> Result<()>;

    /// Copy a local file to `remote`, overwriting; returns bytes written
    async fn put_file(&mut self, local: &Path, remote: &str) -> Result<u64>;

    /// Write `contents` to `remote`, overwriting
    async fn put_bytes(&mut self, contents: &[u8], remote: &str) -> Result<()>;

    /// File names directly inside `dir`
    async fn list(&mut self, dir: &str) -> Result<Vec<String>>;

    async fn close(&mut self);
}

/// Join remote path segments with `/`, collapsing duplicate separators
pub fn remote_join(base: &str, name: &str) -> String {
    let base = base.trim_end_matches('/');
    let name = name.trim_start_matches('/');
    if base.is_empty() {
        format!("/{}", name)
    } else {
        format!("{}/{}", base, name)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_join() {
        assert_eq!(remote_join("/archive", "2024-05-01"), "/archive/2024-05-01");
        assert_eq!(remote_join("/archive/", "/2024-05-01"), "/archive/2024-05-01");
        assert_eq!(remote_join("/", "2024-05-01"), "/2024-05-01");
        assert_eq!(remote_join("relative", "a.h264"), "relative/a.h264");
    }
}
