//! Fire-once shutdown notification.
//!
//! Wraps a `watch` channel the way background loops already consume
//! shutdown (`tokio::select!` on `changed()`), and adds an atomic latch so
//! only the first [`ShutdownSignal::fire`] counts.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;

struct Inner {
    fired: AtomicBool,
    tx: watch::Sender<bool>,
}

/// Broadcast-once shutdown signal. Clones share the same latch.
#[derive(Clone)]
pub struct ShutdownSignal {
    inner: Arc<Inner>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                fired: AtomicBool::new(false),
                tx,
            }),
        }
    }

    /// Fire the signal. Returns `true` only for the call that fired it;
    /// every later call is a no-op.
    pub fn fire(&self) -> bool {
        if self.inner.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.inner.tx.send_replace(true);
        true
    }

    pub fn is_fired(&self) -> bool {
        self.inner.fired.load(Ordering::Acquire)
    }

    /// Wait until the signal fires. Returns immediately if it already has.
    pub async fn wait(&self) {
        let mut rx = self.inner.tx.subscribe();
        // The sender lives as long as `self`, so this cannot observe a closed channel.
        let _ = rx.wait_for(|fired| *fired).await;
    }

    /// A receiver for loops that select on `changed()`.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.tx.subscribe()
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn fires_once() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_fired());
        assert!(signal.fire());
        assert!(!signal.fire());
        assert!(!signal.clone().fire());
        assert!(signal.is_fired());
    }

    #[tokio::test]
    async fn wait_returns_after_fire() {
        let signal = ShutdownSignal::new();
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.wait().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        signal.fire();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn wait_after_fire_is_immediate() {
        let signal = ShutdownSignal::new();
        signal.fire();
        tokio::time::timeout(Duration::from_millis(100), signal.wait())
            .await
            .expect("already fired");
    }

    #[tokio::test]
    async fn subscribers_see_change() {
        let signal = ShutdownSignal::new();
        let mut rx = signal.subscribe();
        signal.fire();
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn concurrent_fires_have_one_winner() {
        let signal = ShutdownSignal::new();
        let mut handles = Vec::new();
        for _ in 0..32 {
            let signal = signal.clone();
            handles.push(tokio::spawn(async move { signal.fire() }));
        }
        let mut winners = 0;
        for h in handles {
            if h.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
