//! Program engine error types.

use std::path::PathBuf;

use thiserror::Error;

/// A single problem found while compiling a program.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("syntax error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("metric {0} declared more than once")]
    DuplicateMetric(String),

    #[error("rule {rule}: unknown metric {metric}")]
    UnknownMetric { rule: usize, metric: String },

    #[error("rule {rule}: invalid pattern: {source}")]
    InvalidPattern {
        rule: usize,
        #[source]
        source: regex::Error,
    },

    #[error("rule {rule}: pattern has no capture named {capture}")]
    MissingCapture { rule: usize, capture: String },

    #[error("rule {rule}: {op} on {metric} needs a value capture")]
    MissingValue {
        rule: usize,
        op: &'static str,
        metric: String,
    },

    #[error("rule {rule}: inc on {metric} takes no value")]
    UnexpectedValue { rule: usize, metric: String },
}

/// Every problem found in one program.
#[derive(Debug, Error)]
#[error("{} compile error(s): {}", .0.len(), join(.0))]
pub struct CompileErrors(pub Vec<CompileError>);

fn join(errors: &[CompileError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}: {errors}", .path.display())]
    Compile { path: PathBuf, errors: CompileErrors },

    #[error("{}: {source}", .path.display())]
    Store {
        path: PathBuf,
        #[source]
        source: logwarp_metrics::StoreError,
    },

    #[error("program engine already started")]
    AlreadyStarted,
}

pub type LoaderResult<T> = Result<T, LoaderError>;
