//! Daemon error types.

use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

/// Invalid process configuration. Always fatal, raised before any listener
/// is bound.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no program directory specified; use --progs")]
    MissingProgs,

    #[error("no logs specified to tail; use --logs")]
    MissingLogs,

    #[error("no logs to tail")]
    NoLogs,
}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to open log file {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read from {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("couldn't create a log tailer: {0}")]
    Tailer(#[from] logwarp_tailer::TailerError),

    #[error("program engine error: {0}")]
    Loader(#[from] logwarp_vm::LoaderError),

    #[error("line conduit fault: {0}")]
    Conduit(#[from] logwarp_core::ConduitError),

    #[error("failed to marshal metrics into json: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write metrics: {0}")]
    Output(#[source] std::io::Error),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to install signal handlers: {0}")]
    Signal(#[source] std::io::Error),

    #[error("HTTP server failed: {0}")]
    Server(#[source] std::io::Error),

    #[error("HTTP server exited unexpectedly")]
    ServerExited,
}

pub type CoordinatorResult<T> = Result<T, CoordinatorError>;
