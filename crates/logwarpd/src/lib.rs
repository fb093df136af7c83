//! logwarpd — wires the tailer, program engine, and exporter into one
//! process.
//!
//! # Modes
//!
//! - **One-shot** (`--one-shot`): read every input to the end, print the
//!   final metrics as indented JSON, exit.
//! - **Daemon**: tail every input, serve `/`, `/json`, `/metrics`, and
//!   `/quitquitquit`, push to graphite/statsd if configured, run until
//!   SIGINT, SIGTERM, or `POST /quitquitquit`.
//!
//! `--compile-only` and `--dump-bytecode` stop after loading programs.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod http;
pub mod signals;

use std::io::Write;
use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::info;

pub use config::{Cli, Config, LogFormat, Mode};
pub use coordinator::{Coordinator, ShutdownState};
pub use error::{ConfigError, CoordinatorError, CoordinatorResult};

/// How a successful run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Programs were compiled only; `errors` failed to load.
    Compiled { errors: usize },
    /// One-shot processing finished and the metrics were written.
    OneShot,
    /// The daemon was told to stop and has torn down.
    Stopped,
}

/// Run the process to completion. One-shot JSON and `--dump-bytecode`
/// listings go to `out`.
pub async fn run(config: Config, out: &mut impl Write) -> CoordinatorResult<Outcome> {
    config.validate()?;

    let mut coordinator = Coordinator::new(config);
    let errors = coordinator.init_loader().await?;
    if coordinator.config().dump_bytecode {
        coordinator.write_listings(out)?;
    }
    if coordinator.config().compile_only_run() {
        return Ok(Outcome::Compiled { errors });
    }
    coordinator.start_engine()?;

    match coordinator.config().mode {
        Mode::OneShot => {
            coordinator.run_one_shot(out).await?;
            Ok(Outcome::OneShot)
        }
        Mode::Daemon => {
            coordinator.start_tailing().await?;

            let addr = SocketAddr::from(([0, 0, 0, 0], coordinator.config().port));
            let listener = TcpListener::bind(addr)
                .await
                .map_err(|source| CoordinatorError::Bind { addr, source })?;
            info!(%addr, "logwarpd starting");

            coordinator.serve(listener).await?;
            Ok(Outcome::Stopped)
        }
    }
}
