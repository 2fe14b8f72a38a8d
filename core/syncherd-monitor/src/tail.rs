//! Follows a growing log file.
//!
//! Behaves like `tail -F`: waits for the file to appear, starts at its end,
//! reopens it from the beginning when it is replaced or truncated, and
//! restarts after read errors. Lines are delivered whole; a trailing partial
//! line is held back until its newline arrives.

use std::io::{self, SeekFrom};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct TailConfig {
    pub path: PathBuf,
    /// Delay between checks once the end of the file is reached.
    pub poll_interval: Duration,
    /// Read existing content instead of starting at the end.
    pub from_start: bool,
    /// Capacity of the line channel.
    pub channel_capacity: usize,
}

impl TailConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            poll_interval: Duration::from_millis(250),
            from_start: false,
            channel_capacity: 1024,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_from_start(mut self, from_start: bool) -> Self {
        self.from_start = from_start;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }
}

enum Stop {
    /// The consumer dropped its receiver.
    ReceiverGone,
    /// The file was replaced, truncated or removed.
    Reopen,
}

/// Streams lines of a log file into a channel.
#[derive(Debug, Clone)]
pub struct LogTailer {
    config: TailConfig,
}

impl LogTailer {
    pub fn new(config: TailConfig) -> Self {
        Self { config }
    }

    /// Spawns the follower. The task ends on cancellation or when the
    /// receiver is dropped.
    pub fn spawn(self, cancel: CancellationToken) -> (mpsc::Receiver<String>, JoinHandle<()>) {
        self.spawn_with(cancel, None)
    }

    /// Like [`LogTailer::spawn`], but returns only once the follower is
    /// positioned: lines appended afterwards are guaranteed to be delivered.
    pub async fn spawn_positioned(
        self,
        cancel: CancellationToken,
    ) -> (mpsc::Receiver<String>, JoinHandle<()>) {
        let (ready_tx, ready_rx) = oneshot::channel();
        let follower = self.spawn_with(cancel, Some(ready_tx));
        // A dropped sender means the task ended before positioning.
        let _ = ready_rx.await;
        follower
    }

    fn spawn_with(
        self,
        cancel: CancellationToken,
        ready: Option<oneshot::Sender<()>>,
    ) -> (mpsc::Receiver<String>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        let handle = tokio::spawn(async move { self.follow_until(tx, cancel, ready).await });
        (rx, handle)
    }

    /// Follows the file until cancelled or the receiver is dropped.
    pub async fn run(&self, tx: mpsc::Sender<String>, cancel: CancellationToken) {
        self.follow_until(tx, cancel, None).await
    }

    async fn follow_until(
        &self,
        tx: mpsc::Sender<String>,
        cancel: CancellationToken,
        mut ready: Option<oneshot::Sender<()>>,
    ) {
        let path = self.config.path.display().to_string();
        info!(path = %path, "Streaming engine log file");
        let mut from_end = !self.config.from_start;

        loop {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return,
                outcome = self.follow(&tx, from_end, &mut ready) => outcome,
            };
            signal_ready(&mut ready);
            match outcome {
                Ok(Stop::ReceiverGone) => return,
                Ok(Stop::Reopen) => {
                    info!(path = %path, "Log file replaced, reopening");
                    from_end = false;
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!(path = %path, "Log file not present yet");
                    // A file that appears later is read from its beginning.
                    from_end = false;
                }
                Err(e) => warn!(path = %path, error = %e, "Log reader failed, restarting"),
            }

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    async fn follow(
        &self,
        tx: &mpsc::Sender<String>,
        from_end: bool,
        ready: &mut Option<oneshot::Sender<()>>,
    ) -> io::Result<Stop> {
        let file = File::open(&self.config.path).await?;
        let identity = file_identity(&file.metadata().await?);
        let mut reader = BufReader::new(file);
        let mut position = if from_end {
            reader.seek(SeekFrom::End(0)).await?
        } else {
            0
        };
        signal_ready(ready);

        let mut pending = Vec::new();
        loop {
            let read = reader.read_until(b'\n', &mut pending).await?;
            if read == 0 {
                tokio::time::sleep(self.config.poll_interval).await;
                match tokio::fs::metadata(&self.config.path).await {
                    Ok(meta) if file_identity(&meta) == identity && meta.len() >= position => {
                        continue;
                    }
                    Ok(_) => return Ok(Stop::Reopen),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Stop::Reopen),
                    Err(e) => return Err(e),
                }
            }

            position += read as u64;
            if pending.last() != Some(&b'\n') {
                continue;
            }
            let line = String::from_utf8_lossy(&pending)
                .trim_end_matches(['\n', '\r'])
                .to_string();
            pending.clear();
            if tx.send(line).await.is_err() {
                return Ok(Stop::ReceiverGone);
            }
        }
    }
}

fn signal_ready(ready: &mut Option<oneshot::Sender<()>>) {
    if let Some(ready) = ready.take() {
        let _ = ready.send(());
    }
}

#[cfg(unix)]
fn file_identity(meta: &std::fs::Metadata) -> Option<(u64, u64)> {
    use std::os::unix::fs::MetadataExt;
    Some((meta.dev(), meta.ino()))
}

#[cfg(not(unix))]
fn file_identity(_meta: &std::fs::Metadata) -> Option<(u64, u64)> {
    None
}
