//! Trait abstraction for line-oriented serial input to enable testing

use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::debug;

use crate::nmea::protocol::NMEA_MAX_LINE_LEN;

/// Trait for reading newline-terminated records from a device
#[async_trait]
pub trait LineSource: Send {
    /// Read the next line without its terminator
    ///
    /// Returns `Ok(None)` once the stream is closed. Bytes that are not
    /// valid UTF-8 are replaced rather than rejected so that line noise
    /// never aborts reading.
    async fn read_line(&mut self) -> io::Result<Option<String>>;
}

/// Adapter turning any buffered async reader into a [`LineSource`]
///
/// Lines longer than the limit are consumed up to their terminator and
/// returned empty, so a device at the wrong baud rate cannot grow the
/// buffer.
pub struct ReaderLineSource<R> {
    reader: R,
    buf: Vec<u8>,
    max_len: usize,
}

impl<R> ReaderLineSource<R> {
    pub fn new(reader: R) -> Self {
        Self::with_max_len(reader, NMEA_MAX_LINE_LEN)
    }

    /// # Arguments
    ///
    /// * `max_len` - Longest line kept, terminator excluded
    pub fn with_max_len(reader: R, max_len: usize) -> Self {
        Self {
            reader,
            buf: Vec::with_capacity(128),
            max_len,
        }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> LineSource for ReaderLineSource<R> {
    async fn read_line(&mut self) -> io::Result<Option<String>> {
        self.buf.clear();
        // Room for a trailing "\r\n"
        let limit = self.max_len + 2;
        let mut read_any = false;
        let mut discarded = 0usize;

        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                break;
            }
            read_any = true;

            let (used, done) = match available.iter().position(|&b| b == b'\n') {
                Some(end) => (end + 1, true),
                None => (available.len(), false),
            };
            if discarded == 0 && self.buf.len() + used <= limit {
                self.buf.extend_from_slice(&available[..used]);
            } else {
                discarded += self.buf.len() + used;
                self.buf.clear();
            }
            self.reader.consume(used);

            if done {
                break;
            }
        }

        if !read_any {
            return Ok(None);
        }
        if discarded > 0 {
            debug!("Discarded oversized line of at least {} bytes", discarded);
            return Ok(Some(String::new()));
        }

        let line = String::from_utf8_lossy(&self.buf);
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }
}
