//! OS termination signals.
//!
//! **Unix:** `SIGINT` (Ctrl-C) and `SIGTERM` (systemd, Kubernetes).
//! **Elsewhere:** Ctrl-C via [`tokio::signal::ctrl_c`].

/// Completes when the process receives an interrupt or termination signal.
///
/// Returns `Err` if the signal handlers cannot be installed.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => {},
        _ = sigterm.recv() => {},
    }
    Ok(())
}

#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Duration;

    use tokio::signal::unix::{SignalKind, signal};

    use super::*;

    /// Deliver `signo` to this process until the waiter completes.
    async fn assert_wakes_on(kind: SignalKind, signo: libc::c_int) {
        // Registering a listener first replaces the default action, so a
        // delivery that lands before the waiter registers does not kill
        // the test process.
        let _listener = signal(kind).unwrap();
        let waiter = tokio::spawn(wait_for_shutdown_signal());

        tokio::time::timeout(Duration::from_secs(5), async {
            while !waiter.is_finished() {
                unsafe {
                    libc::kill(libc::getpid(), signo);
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("waiter never observed the signal");

        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn terminate_wakes_the_waiter() {
        assert_wakes_on(SignalKind::terminate(), libc::SIGTERM).await;
    }

    #[tokio::test]
    async fn interrupt_wakes_the_waiter() {
        assert_wakes_on(SignalKind::interrupt(), libc::SIGINT).await;
    }
}
