//! # SFTP Archive
//!
//! [`RemoteArchive`] over SFTP with password authentication. libssh2 calls
//! block, so every call runs under `block_in_place` and needs the
//! multi-threaded runtime.

use async_trait::async_trait;
use ssh2::{Session, Sftp};
use std::fs::File;
use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;
use tokio::task::block_in_place;
use tracing::{debug, info};

use super::remote::{RemoteArchive, RemoteSession};
use crate::config::UploadConfig;
use crate::error::{DashcamError, Result};

/// Permissions for directories created on the archive
const REMOTE_DIR_MODE: i32 = 0o755;

/// Connection settings for the SFTP archive
#[derive(Clone)]
pub struct SftpArchive {
    host: String,
    port: u16,
    username: String,
    password: String,
    timeout: Duration,
}

impl std::fmt::Debug for SftpArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SftpArchive")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl SftpArchive {
    pub fn from_config(config: &UploadConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            username: config.username.clone(),
            password: config.password.clone(),
            timeout: Duration::from_millis(config.connect_timeout_ms),
        }
    }

    fn connect_blocking(&self) -> Result<SftpSession> {
        let addr = (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| DashcamError::Remote(format!("No address for {}", self.host)))?;

        let tcp = TcpStream::connect_timeout(&addr, self.timeout)?;
        let mut session = Session::new()?;
        session.set_tcp_stream(tcp);
        session.set_timeout(u32::try_from(self.timeout.as_millis()).unwrap_or(u32::MAX));
        session.handshake()?;
        session.userauth_password(&self.username, &self.password)?;
        if !session.authenticated() {
            return Err(DashcamError::Remote(format!(
                "Authentication failed for {}@{}",
                self.username, self.host
            )));
        }

        let sftp = session.sftp()?;
        info!("Connected to archive {}:{}", self.host, self.port);
        Ok(SftpSession { session, sftp })
    }
}

#[async_trait]
impl RemoteArchive for SftpArchive {
    async fn connect(&self) -> Result<Box<dyn RemoteSession>> {
        let session = block_in_place(|| self.connect_blocking())?;
        Ok(Box::new(session))
    }
}

/// Every ancestor of `dir` plus `dir` itself, shortest first
///
/// Relative directories stay relative to the login directory.
fn dir_prefixes(dir: &str) -> Vec<String> {
    let mut current = String::new();
    if dir.starts_with('/') {
        current.push('/');
    }

    let mut prefixes = Vec::new();
    for component in dir.split('/').filter(|c| !c.is_empty()) {
        if !current.is_empty() && !current.ends_with('/') {
            current.push('/');
        }
        current.push_str(component);
        prefixes.push(current.clone());
    }
    prefixes
}

/// Open SFTP channel plus the session that owns it
pub struct SftpSession {
    session: Session,
    sftp: Sftp,
}

impl SftpSession {
    fn ensure_dir_blocking(&self, dir: &str) -> Result<()> {
        for current in dir_prefixes(dir) {
            let path = Path::new(&current);

            if self.sftp.stat(path).is_ok() {
                continue;
            }
            debug!("Creating remote directory {}", current);
            if let Err(e) = self.sftp.mkdir(path, REMOTE_DIR_MODE) {
                // Lost a race with another client creating it
                if self.sftp.stat(path).is_err() {
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    fn put_file_blocking(&self, local: &Path, remote: &str) -> Result<u64> {
        let mut source = File::open(local)?;
        let mut target = self.sftp.create(Path::new(remote))?;
        let written = io::copy(&mut source, &mut target)?;
        Ok(written)
    }

    fn put_bytes_blocking(&self, contents: &[u8], remote: &str) -> Result<()> {
        let mut target = self.sftp.create(Path::new(remote))?;
        io::Write::write_all(&mut target, contents)?;
        Ok(())
    }

    fn list_blocking(&self, dir: &str) -> Result<Vec<String>> {
        let entries = self.sftp.readdir(Path::new(dir))?;
        Ok(entries
            .into_iter()
            .filter_map(|(path, _)| path.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect())
    }
}

#[async_trait]
impl RemoteSession for SftpSession {
    async fn ensure_dir(&mut self, dir: &str) -> Result<()> {
        block_in_place(|| self.ensure_dir_blocking(dir))
    }

    async fn put_file(&mut self, local: &Path, remote: &str) -> Result<u64> {
        block_in_place(|| self.put_file_blocking(local, remote))
    }

    async fn put_bytes(&mut self, contents: &[u8], remote: &str) -> Result<()> {
        block_in_place(|| self.put_bytes_blocking(contents, remote))
    }

    async fn list(&mut self, dir: &str) -> Result<Vec<String>> {
        block_in_place(|| self.list_blocking(dir))
    }

    async fn close(&mut self) {
        let result = block_in_place(|| self.session.disconnect(None, "upload complete", None));
        if let Err(e) = result {
            debug!("Archive disconnect failed: {}", e);
        }
    }
}
