//! The shared line conduit between line producers and the program engine.
//!
//! A tokio unbounded channel normally closes when its last sender is
//! dropped. Producers here hold cloned [`LineSink`]s for as long as they
//! run, so closure is made explicit instead: every sink shares one slot
//! holding the real sender, and [`LineSink::close`] empties that slot.
//! Once closed, the [`LineStream`] yields the lines already queued and then
//! ends.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// Errors raised by conduit operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConduitError {
    #[error("line conduit is closed")]
    Closed,

    #[error("line conduit was already closed")]
    AlreadyClosed,
}

struct SinkInner {
    tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
    sent: AtomicUsize,
}

/// Writing end of the conduit.
#[derive(Clone)]
pub struct LineSink {
    inner: Arc<SinkInner>,
}

/// Reading end of the conduit.
pub struct LineStream {
    rx: mpsc::UnboundedReceiver<String>,
}

/// Create a new, open conduit.
pub fn conduit() -> (LineSink, LineStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sink = LineSink {
        inner: Arc::new(SinkInner {
            tx: Mutex::new(Some(tx)),
            sent: AtomicUsize::new(0),
        }),
    };
    (sink, LineStream { rx })
}

impl LineSink {
    fn slot(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<String>>> {
        // A panic while holding the lock cannot leave the slot half-written.
        self.inner.tx.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Push one line. Fails once the conduit is closed or the reader is gone.
    pub fn send(&self, line: String) -> Result<(), ConduitError> {
        let slot = self.slot();
        match slot.as_ref() {
            Some(tx) => {
                tx.send(line).map_err(|_| ConduitError::Closed)?;
                self.inner.sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            None => Err(ConduitError::Closed),
        }
    }

    /// Close the conduit. Only the first call succeeds.
    pub fn close(&self) -> Result<(), ConduitError> {
        match self.slot().take() {
            Some(tx) => {
                drop(tx);
                debug!(sent = self.sent(), "line conduit closed");
                Ok(())
            }
            None => Err(ConduitError::AlreadyClosed),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.slot().is_none()
    }

    /// Number of lines accepted since creation.
    pub fn sent(&self) -> usize {
        self.inner.sent.load(Ordering::Relaxed)
    }
}

impl LineStream {
    /// Receive the next line, or `None` once the conduit is closed and drained.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}
