//! Coordinator — owns the line conduit and drives startup and shutdown.
//!
//! ```text
//!   one-shot:  files ──read──► LineSink ──► Loader ──► MetricsStore ──► stdout
//!   daemon:    Tailer ───────► LineSink ──► Loader ──► MetricsStore ──► HTTP / push
//! ```
//!
//! Teardown runs at most once no matter how many triggers arrive
//! (OS signals, HTTP quit requests, the one-shot path finishing). Every
//! caller of [`Coordinator::close`] waits for the single run and observes
//! its result.

use std::future::Future;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use axum::Router;
use logwarp_core::{ConduitError, LineSink, LineStream, ShutdownSignal, conduit};
use logwarp_metrics::{Exporter, MetricsStore};
use logwarp_tailer::{Tailer, TailerOptions};
use logwarp_vm::{Loader, LoaderError, LoaderOptions};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::http::control_router;
use crate::signals::wait_for_shutdown_signal;

/// Lifecycle of the coordinator's teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ShutdownState {
    Running = 0,
    ShuttingDown = 1,
    Closed = 2,
}

impl ShutdownState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Running,
            1 => Self::ShuttingDown,
            _ => Self::Closed,
        }
    }
}

pub struct Coordinator {
    config: Config,
    lines: LineSink,
    /// Consumer half of the conduit until the engine takes it.
    pending_lines: Option<LineStream>,
    store: MetricsStore,
    exporter: Exporter,
    tailer: Option<Tailer>,
    loader: Option<Loader>,
    quit: ShutdownSignal,
    close_once: OnceCell<Result<(), ConduitError>>,
    state: AtomicU8,
    teardowns: AtomicUsize,
}

impl Coordinator {
    pub fn new(config: Config) -> Self {
        let (lines, stream) = conduit();
        let store = MetricsStore::new();
        let exporter = Exporter::new(store.clone(), config.exporter.clone());

        Self {
            config,
            lines,
            pending_lines: Some(stream),
            store,
            exporter,
            tailer: None,
            loader: None,
            quit: ShutdownSignal::new(),
            close_once: OnceCell::new(),
            state: AtomicU8::new(ShutdownState::Running as u8),
            teardowns: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Construct the program engine and load the configured programs.
    /// Returns the number of programs that failed to load.
    pub async fn init_loader(&mut self) -> CoordinatorResult<usize> {
        let Some(lines) = self.pending_lines.take() else {
            return Err(LoaderError::AlreadyStarted.into());
        };

        let mut loader = Loader::new(LoaderOptions {
            store: self.store.clone(),
            lines,
            compile_only: self.config.compile_only,
            dump_bytecode: self.config.dump_bytecode,
            syslog_use_current_year: self.config.syslog_use_current_year,
        });
        let errors = loader.load_programs(&self.config.progs).await;
        self.loader = Some(loader);
        Ok(errors)
    }

    /// Write the instruction listings kept by `--dump-bytecode` to `out`.
    pub fn write_listings(&self, out: &mut impl Write) -> CoordinatorResult<()> {
        let Some(loader) = &self.loader else {
            return Ok(());
        };
        for listing in loader.listings() {
            writeln!(out, "{listing}").map_err(CoordinatorError::Output)?;
        }
        out.flush().map_err(CoordinatorError::Output)
    }

    /// Start the engine consuming the conduit.
    pub fn start_engine(&mut self) -> CoordinatorResult<()> {
        if let Some(loader) = self.loader.as_mut() {
            loader.start()?;
            info!(programs = ?loader.programs(), "program engine started");
        }
        Ok(())
    }

    /// Construct the tailer and start watching every configured path.
    pub async fn start_tailing(&mut self) -> CoordinatorResult<()> {
        let tailer = Tailer::new(TailerOptions {
            lines: self.lines.clone(),
            poll_interval: self.config.poll_interval,
        })?;
        for path in &self.config.logs {
            tailer.tail(path).await;
        }
        self.tailer = Some(tailer);
        Ok(())
    }

    // ── One-shot ───────────────────────────────────────────────

    /// Push every line of `path` onto the conduit. Returns the line count.
    pub async fn one_shot(&self, path: &Path) -> CoordinatorResult<usize> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|source| CoordinatorError::Open {
                path: path.to_path_buf(),
                source,
            })?;

        let mut reader = BufReader::new(file);
        let mut buf = Vec::new();
        let mut count = 0;
        loop {
            buf.clear();
            let n = reader
                .read_until(b'\n', &mut buf)
                .await
                .map_err(|source| CoordinatorError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
            if n == 0 {
                break;
            }
            if buf.last() == Some(&b'\n') {
                buf.pop();
                if buf.last() == Some(&b'\r') {
                    buf.pop();
                }
            }
            self.lines.send(String::from_utf8_lossy(&buf).into_owned())?;
            count += 1;
        }
        Ok(count)
    }

    /// Process every input, tear down, and write the final store as
    /// indented JSON to `out`.
    pub async fn run_one_shot(&self, out: &mut impl Write) -> CoordinatorResult<()> {
        for path in &self.config.logs {
            let lines = self.one_shot(path).await?;
            info!(path = %path.display(), lines, "processed log");
        }

        self.close().await?;

        let json = self.store.to_json_pretty().await?;
        writeln!(out, "{json}").map_err(CoordinatorError::Output)?;
        out.flush().map_err(CoordinatorError::Output)?;

        self.exporter.write_metrics().await;
        Ok(())
    }

    // ── Shutdown ───────────────────────────────────────────────

    /// Run the teardown exactly once. Concurrent and later callers wait for
    /// that run and get its result.
    pub async fn close(&self) -> Result<(), ConduitError> {
        self.close_once
            .get_or_init(|| self.teardown())
            .await
            .clone()
    }

    async fn teardown(&self) -> Result<(), ConduitError> {
        self.teardowns.fetch_add(1, Ordering::SeqCst);
        self.set_state(ShutdownState::ShuttingDown);
        info!("shutdown requested");

        let closed = match &self.tailer {
            Some(tailer) => tailer.stop().await,
            None => {
                info!("closing lines");
                self.lines.close()
            }
        };
        if let Err(e) = &closed {
            error!(error = %e, "failed to close lines");
        }

        if let Some(loader) = &self.loader {
            loader.wait_done().await;
            debug!("program engine drained");
        }

        self.set_state(ShutdownState::Closed);
        info!("shutdown complete");
        closed
    }

    fn set_state(&self, state: ShutdownState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn state(&self) -> ShutdownState {
        ShutdownState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// How many times the teardown body has run. At most one.
    #[cfg(test)]
    pub(crate) fn teardown_runs(&self) -> usize {
        self.teardowns.load(Ordering::SeqCst)
    }

    /// Signal fired by `POST /quitquitquit`.
    pub fn quit_signal(&self) -> &ShutdownSignal {
        &self.quit
    }

    pub fn store(&self) -> &MetricsStore {
        &self.store
    }

    pub fn lines(&self) -> &LineSink {
        &self.lines
    }

    pub fn tailer(&self) -> Option<&Tailer> {
        self.tailer.as_ref()
    }

    pub fn is_engine_done(&self) -> bool {
        self.loader.as_ref().is_some_and(Loader::is_done)
    }

    pub fn router(&self) -> Router {
        control_router(self.quit.clone(), &self.exporter)
    }

    // ── Daemon ─────────────────────────────────────────────────

    /// Serve HTTP on `listener` until an OS termination signal or an HTTP
    /// quit request, then tear down.
    pub async fn serve(&self, listener: TcpListener) -> CoordinatorResult<()> {
        self.serve_until(listener, wait_for_shutdown_signal()).await
    }

    /// Like [`serve`](Self::serve) with `os_trigger` standing in for the
    /// process signal handlers.
    ///
    /// Order after the first trigger: teardown, stop the server and push
    /// loop, then join both. The listening socket is released before this
    /// returns.
    pub async fn serve_until<F>(&self, listener: TcpListener, os_trigger: F) -> CoordinatorResult<()>
    where
        F: Future<Output = std::io::Result<()>>,
    {
        let addr = listener.local_addr().map_err(CoordinatorError::Server)?;
        let stop = ShutdownSignal::new();

        let router = self.router();
        let server_stop = stop.clone();
        let mut server: JoinHandle<std::io::Result<()>> = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { server_stop.wait().await })
                .await
        });
        info!(%addr, "HTTP server listening");

        let push = self.exporter.start_metric_push(stop.subscribe());

        let mut server_finished = false;
        let trigger = tokio::select! {
            res = os_trigger => match res {
                Ok(()) => {
                    info!("received termination signal, shutting down");
                    Ok(())
                }
                Err(e) => {
                    error!(error = %e, "signal handler failed, shutting down");
                    Err(CoordinatorError::Signal(e))
                }
            },
            _ = self.quit.wait() => {
                info!("received quit request, shutting down");
                Ok(())
            }
            res = &mut server => {
                server_finished = true;
                error!("HTTP server exited before shutdown was requested");
                Err(server_result(res).err().unwrap_or(CoordinatorError::ServerExited))
            }
        };

        let closed = self.close().await;

        stop.fire();
        let served = if server_finished {
            Ok(())
        } else {
            server_result(server.await)
        };
        if let Err(e) = &served {
            error!(error = %e, "HTTP server failed");
        }
        if let Some(push) = push {
            if let Err(e) = push.await {
                error!(error = %e, "metric push task failed");
            }
        }
        info!(%addr, "HTTP server stopped");

        trigger?;
        closed?;
        served
    }
}

fn server_result(
    res: Result<std::io::Result<()>, tokio::task::JoinError>,
) -> CoordinatorResult<()> {
    match res {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(CoordinatorError::Server(e)),
        Err(e) => Err(CoordinatorError::Server(std::io::Error::other(e))),
    }
}
