//! Tailer — one polling watcher task per path, all feeding one conduit.
//!
//! The tailer owns the conduit's closing: [`Tailer::stop`] halts every
//! watcher, waits for their final reads to be delivered, then closes the
//! conduit once.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use logwarp_core::{ConduitError, LineSink};
use thiserror::Error;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::cursor::FileCursor;

#[derive(Debug, Error)]
pub enum TailerError {
    #[error("poll interval must be greater than zero")]
    InvalidPollInterval,
}

pub struct TailerOptions {
    /// Conduit receiving every line read.
    pub lines: LineSink,
    /// How often each watcher checks its file for new data.
    pub poll_interval: Duration,
}

/// Per-path watcher state.
struct WatchSlot {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

pub struct Tailer {
    lines: LineSink,
    poll_interval: Duration,
    watches: Mutex<HashMap<PathBuf, WatchSlot>>,
    stopped: AtomicBool,
}

impl Tailer {
    pub fn new(options: TailerOptions) -> Result<Self, TailerError> {
        if options.poll_interval.is_zero() {
            return Err(TailerError::InvalidPollInterval);
        }
        Ok(Self {
            lines: options.lines,
            poll_interval: options.poll_interval,
            watches: Mutex::new(HashMap::new()),
            stopped: AtomicBool::new(false),
        })
    }

    /// Start watching `path`. Calling again for a watched path is a no-op.
    ///
    /// A file that exists now is read from its current end; one that appears
    /// later is read from its start. Open and read failures are logged by the
    /// watcher and retried on its next poll.
    pub async fn tail(&self, path: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        let mut watches = self.watches.lock().await;

        if self.stopped.load(Ordering::Acquire) {
            warn!(path = %path.display(), "tailer stopped; not watching");
            return;
        }
        if watches.contains_key(&path) {
            debug!(path = %path.display(), "already tailing");
            return;
        }

        let cursor = match FileCursor::open(&path, true).await {
            Ok(cursor) => Some(cursor),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(path = %path.display(), "file not present yet; waiting for it");
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to open file; will retry");
                None
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_watch(
            path.clone(),
            cursor,
            self.lines.clone(),
            self.poll_interval,
            shutdown_rx,
        ));

        info!(path = %path.display(), "tailing");
        watches.insert(path, WatchSlot {
            handle,
            shutdown_tx,
        });
    }

    /// Paths currently watched.
    pub async fn watched(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.watches.lock().await.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Stop every watcher and close the conduit once all their lines are
    /// delivered. Later calls are no-ops.
    pub async fn stop(&self) -> Result<(), ConduitError> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            debug!("tailer already stopped");
            return Ok(());
        }

        let slots: Vec<(PathBuf, WatchSlot)> = self.watches.lock().await.drain().collect();
        for (_, slot) in &slots {
            let _ = slot.shutdown_tx.send(true);
        }
        for (path, slot) in slots {
            if let Err(e) = slot.handle.await {
                error!(path = %path.display(), error = %e, "watcher task failed");
            }
        }

        info!("closing lines");
        self.lines.close()
    }
}

async fn run_watch(
    path: PathBuf,
    mut cursor: Option<FileCursor>,
    lines: LineSink,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if !poll_once(&path, &mut cursor, &lines).await {
                    break;
                }
            }
            _ = shutdown.changed() => {
                // Final read so lines already on disk are not lost.
                poll_once(&path, &mut cursor, &lines).await;
                let pending = cursor.as_ref().map_or(0, FileCursor::pending_bytes);
                if pending > 0 {
                    debug!(path = %path.display(), bytes = pending, "dropping unterminated fragment");
                }
                break;
            }
        }
    }
    debug!(path = %path.display(), "watcher stopped");
}

/// One poll of one path. Returns `false` once the conduit refuses lines.
async fn poll_once(path: &Path, cursor: &mut Option<FileCursor>, lines: &LineSink) -> bool {
    if let Some(current) = cursor.as_mut() {
        let replaced = match tokio::fs::metadata(path).await {
            Ok(meta) => !current.same_file(&meta),
            Err(e) if e.kind() == ErrorKind::NotFound => true,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "stat failed");
                false
            }
        };
        if replaced {
            // Drain what was appended to the old file before moving on.
            if !deliver(path, read_logged(path, current).await, lines) {
                return false;
            }
            info!(path = %path.display(), "file rotated or removed; reopening");
            *cursor = None;
        }
    }

    if cursor.is_none() {
        match FileCursor::open(path, false).await {
            Ok(c) => {
                info!(path = %path.display(), "file opened");
                *cursor = Some(c);
            }
            Err(e) if e.kind() == ErrorKind::NotFound => return true,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to open file; will retry");
                return true;
            }
        }
    }

    let Some(current) = cursor.as_mut() else {
        return true;
    };
    match current.check_truncation().await {
        Ok(true) => info!(path = %path.display(), "file truncated; reading from start"),
        Ok(false) => {}
        Err(e) => warn!(path = %path.display(), error = %e, "truncation check failed"),
    }
    deliver(path, read_logged(path, current).await, lines)
}

async fn read_logged(path: &Path, cursor: &mut FileCursor) -> Vec<String> {
    cursor.read_lines().await.unwrap_or_else(|e| {
        warn!(path = %path.display(), error = %e, "read failed");
        Vec::new()
    })
}

fn deliver(path: &Path, batch: Vec<String>, lines: &LineSink) -> bool {
    for line in batch {
        if lines.send(line).is_err() {
            warn!(path = %path.display(), "line conduit closed; stopping watcher");
            return false;
        }
    }
    true
}
