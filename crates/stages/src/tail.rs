//! Incremental Line Sources
//!
//! Both kinds of progress source are read the same way: each call yields the
//! complete lines that appeared since the previous call.
//!
//! - [`ChannelTail`] - lines of a live stream, forwarded by the stage runner
//! - [`LogFileTail`] - a log file polled at a fixed interval; only bytes past
//!   the last read offset are read

use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;

/// A restartable sequence of new output lines.
#[async_trait]
pub trait LineSource: Send {
    /// Wait for the next batch of new lines. The batch may be empty for
    /// polled sources. `Ok(None)` means the source is exhausted.
    async fn next_lines(&mut self) -> io::Result<Option<Vec<String>>>;

    /// Read whatever arrived since the last call without waiting, including
    /// an unterminated trailing line.
    async fn drain(&mut self) -> io::Result<Vec<String>>;
}

// ============================================================================
// Channel Tail
// ============================================================================

/// Lines of a live stream delivered over a channel.
pub struct ChannelTail {
    rx: mpsc::UnboundedReceiver<String>,
}

impl ChannelTail {
    pub fn new(rx: mpsc::UnboundedReceiver<String>) -> Self {
        Self { rx }
    }
}

#[async_trait]
impl LineSource for ChannelTail {
    async fn next_lines(&mut self) -> io::Result<Option<Vec<String>>> {
        match self.rx.recv().await {
            Some(first) => {
                let mut lines = vec![first];
                while let Ok(line) = self.rx.try_recv() {
                    lines.push(line);
                }
                Ok(Some(lines))
            }
            None => Ok(None),
        }
    }

    async fn drain(&mut self) -> io::Result<Vec<String>> {
        let mut lines = Vec::new();
        while let Ok(line) = self.rx.try_recv() {
            lines.push(line);
        }
        Ok(lines)
    }
}

// ============================================================================
// Log File Tail
// ============================================================================

/// Polls a growing log file and yields the lines appended since the last poll.
///
/// The file may not exist yet; that reads as "no new lines". If the file
/// shrinks (rewritten by the tool) reading restarts from the beginning.
pub struct LogFileTail {
    path: PathBuf,
    interval: Duration,
    offset: u64,
    partial: Vec<u8>,
    polled: bool,
}

impl LogFileTail {
    pub fn new(path: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            path: path.into(),
            interval,
            offset: 0,
            partial: Vec::new(),
            polled: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes consumed so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    async fn read_new(&mut self) -> io::Result<Vec<String>> {
        let mut file = match File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let len = file.metadata().await?.len();
        if len < self.offset {
            self.offset = 0;
            self.partial.clear();
        }
        if len == self.offset {
            return Ok(Vec::new());
        }

        file.seek(SeekFrom::Start(self.offset)).await?;
        let mut buf = Vec::with_capacity((len - self.offset) as usize);
        file.take(len - self.offset).read_to_end(&mut buf).await?;
        self.offset += buf.len() as u64;
        self.partial.extend_from_slice(&buf);

        Ok(self.take_complete_lines())
    }

    fn take_complete_lines(&mut self) -> Vec<String> {
        let Some(last_newline) = self.partial.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };
        let rest = self.partial.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.partial, rest);
        split_lines(&complete)
    }
}

#[async_trait]
impl LineSource for LogFileTail {
    async fn next_lines(&mut self) -> io::Result<Option<Vec<String>>> {
        if self.polled {
            tokio::time::sleep(self.interval).await;
        }
        self.polled = true;
        self.read_new().await.map(Some)
    }

    async fn drain(&mut self) -> io::Result<Vec<String>> {
        let mut lines = self.read_new().await?;
        if !self.partial.is_empty() {
            let rest = std::mem::take(&mut self.partial);
            lines.extend(split_lines(&rest));
        }
        Ok(lines)
    }
}

fn split_lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(|line| line.trim_end_matches('\r').to_string())
        .collect()
}
