//! Live following of a growing, rotatable log file.
//!
//! The follower opens the file at its current end and streams every line
//! appended afterwards through a bounded channel. At end of file it polls
//! the path to notice rotation:
//!
//! - a different file at the path (rename + create) is read from its start
//!   once the old file has been drained;
//! - a file shorter than the read offset (copytruncate) is re-read from 0;
//! - a missing path is waited for up to `missing_timeout`.
//!
//! A failure that ends the read loop is reported once on the error signal.

use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// The log file could not be opened at startup.
#[derive(Debug, Error)]
#[error("Failed to open log file {}: {source}", .path.display())]
pub struct OpenError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// Terminal failure of a running follower.
#[derive(Debug, Error)]
pub enum FollowError {
    #[error("Log file {} was removed and not recreated within {timeout:?}", .path.display())]
    Removed { path: PathBuf, timeout: Duration },

    #[error("Failed to read log file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// One line read from the followed file, without its terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub text: String,
    /// Byte offset of the line in the file it was read from.
    pub offset: u64,
}

/// Lines in the order they were appended.
pub type LineStream = mpsc::Receiver<LogLine>;

/// Receives the follower's terminal error, at most once.
pub type ErrorSignal = oneshot::Receiver<FollowError>;

/// Follower tuning.
#[derive(Debug, Clone)]
pub struct FollowerConfig {
    pub poll_interval: Duration,
    pub missing_timeout: Duration,
    pub channel_capacity: usize,
}

impl Default for FollowerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            missing_timeout: Duration::from_secs(30),
            channel_capacity: 1024,
        }
    }
}

/// Handle to a running follower task.
pub struct LogFollower {
    lines: LineStream,
    errors: ErrorSignal,
    task: JoinHandle<()>,
}

impl LogFollower {
    /// Open `path` at its end and start following it.
    ///
    /// Only content appended after this returns is produced.
    pub async fn start(path: impl AsRef<Path>, config: FollowerConfig) -> Result<Self, OpenError> {
        let path = path.as_ref().to_path_buf();
        let open_error = |source: io::Error| OpenError {
            path: path.clone(),
            source,
        };

        let mut file = File::open(&path).await.map_err(open_error)?;
        let identity = file_identity(&file.metadata().await.map_err(open_error)?);
        let offset = file
            .seek(SeekFrom::End(0))
            .await
            .map_err(open_error)?;

        info!(path = %path.display(), offset, "Following log file");

        let (line_tx, lines) = mpsc::channel(config.channel_capacity);
        let (error_tx, errors) = oneshot::channel();

        let reader = Reader {
            path,
            file: BufReader::new(file),
            identity,
            offset,
            line_start: offset,
            partial: Vec::new(),
            missing_since: None,
            config,
        };
        let task = tokio::spawn(reader.run(line_tx, error_tx));

        Ok(Self {
            lines,
            errors,
            task,
        })
    }

    /// Wait for the next line; `None` once the follower has stopped.
    pub async fn next_line(&mut self) -> Option<LogLine> {
        self.lines.recv().await
    }

    /// Whether the read loop has ended.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Split into the line stream and the terminal error signal.
    ///
    /// The read loop keeps running until the stream is dropped or it fails.
    pub fn into_parts(self) -> (LineStream, ErrorSignal) {
        (self.lines, self.errors)
    }
}

/// What the path currently refers to, compared with the open file.
enum PathState {
    Unchanged,
    Truncated,
    Replaced(File, Option<FileId>),
    Missing,
}

type FileId = (u64, u64);

#[cfg(unix)]
fn file_identity(meta: &std::fs::Metadata) -> Option<FileId> {
    use std::os::unix::fs::MetadataExt;
    Some((meta.dev(), meta.ino()))
}

#[cfg(not(unix))]
fn file_identity(_meta: &std::fs::Metadata) -> Option<FileId> {
    None
}

struct Reader {
    path: PathBuf,
    file: BufReader<File>,
    identity: Option<FileId>,
    /// Bytes consumed from the current file.
    offset: u64,
    /// Offset where the line being accumulated starts.
    line_start: u64,
    partial: Vec<u8>,
    missing_since: Option<Instant>,
    config: FollowerConfig,
}

impl Reader {
    async fn run(mut self, lines: mpsc::Sender<LogLine>, errors: oneshot::Sender<FollowError>) {
        match self.follow(&lines).await {
            Ok(()) => debug!(path = %self.path.display(), "Line consumer closed, follower stopped"),
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "Log follower failed");
                let _ = errors.send(e);
            }
        }
    }

    async fn follow(&mut self, lines: &mpsc::Sender<LogLine>) -> Result<(), FollowError> {
        loop {
            if !self.drain(lines).await? {
                return Ok(());
            }

            match self.path_state().await? {
                PathState::Unchanged | PathState::Missing => {
                    if lines.is_closed() {
                        return Ok(());
                    }
                    tokio::time::sleep(self.config.poll_interval).await;
                }
                PathState::Truncated => {
                    warn!(path = %self.path.display(), "Log file truncated, reading from start");
                    self.file.seek(SeekFrom::Start(0)).await.map_err(|e| self.io(e))?;
                    self.partial.clear();
                    self.offset = 0;
                    self.line_start = 0;
                }
                PathState::Replaced(file, identity) => {
                    // Whatever reached the old file before the switch.
                    if !self.drain(lines).await? {
                        return Ok(());
                    }
                    if !self.partial.is_empty() && !self.emit(lines).await {
                        return Ok(());
                    }

                    info!(path = %self.path.display(), "Log file rotated, following new file");
                    self.file = BufReader::new(file);
                    self.identity = identity;
                    self.offset = 0;
                    self.line_start = 0;
                }
            }
        }
    }

    /// Read and send complete lines until end of file.
    ///
    /// Returns `false` once the consumer has gone away.
    async fn drain(&mut self, lines: &mpsc::Sender<LogLine>) -> Result<bool, FollowError> {
        loop {
            let read = self
                .file
                .read_until(b'\n', &mut self.partial)
                .await
                .map_err(|e| self.io(e))?;

            if read == 0 {
                return Ok(true);
            }

            self.offset += read as u64;
            if self.partial.ends_with(b"\n") && !self.emit(lines).await {
                return Ok(false);
            }
        }
    }

    /// Send the accumulated bytes as one line.
    async fn emit(&mut self, lines: &mpsc::Sender<LogLine>) -> bool {
        let mut bytes = &self.partial[..];
        if let Some(stripped) = bytes.strip_suffix(b"\n") {
            bytes = stripped.strip_suffix(b"\r").unwrap_or(stripped);
        }

        let line = LogLine {
            text: String::from_utf8_lossy(bytes).into_owned(),
            offset: self.line_start,
        };
        self.partial.clear();
        self.line_start = self.offset;

        lines.send(line).await.is_ok()
    }

    async fn path_state(&mut self) -> Result<PathState, FollowError> {
        let meta = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return self.missing(),
            Err(e) => return Err(self.io(e)),
        };
        self.missing_since = None;

        let identity = file_identity(&meta);
        if identity.is_some() && identity != self.identity {
            return match File::open(&self.path).await {
                Ok(file) => {
                    // The identity of what was actually opened, in case of another swap.
                    let opened = file.metadata().await.map_err(|e| self.io(e))?;
                    Ok(PathState::Replaced(file, file_identity(&opened)))
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => self.missing(),
                Err(e) => Err(self.io(e)),
            };
        }

        if meta.len() < self.offset {
            return Ok(PathState::Truncated);
        }

        Ok(PathState::Unchanged)
    }

    fn missing(&mut self) -> Result<PathState, FollowError> {
        let since = *self.missing_since.get_or_insert_with(|| {
            warn!(path = %self.path.display(), "Log file missing, waiting for it to reappear");
            Instant::now()
        });

        if since.elapsed() >= self.config.missing_timeout {
            return Err(FollowError::Removed {
                path: self.path.clone(),
                timeout: self.config.missing_timeout,
            });
        }

        Ok(PathState::Missing)
    }

    fn io(&self, source: io::Error) -> FollowError {
        FollowError::Io {
            path: self.path.clone(),
            source,
        }
    }
}
