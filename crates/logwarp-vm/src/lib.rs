//! logwarp-vm — the program engine.
//!
//! Programs are TOML documents of metric declarations and regex rules.
//! The [`Loader`] compiles them, registers their metrics in the
//! [`MetricsStore`](logwarp_metrics::MetricsStore), and runs one task per
//! program over the line conduit. Its done signal resolves once the
//! conduit is closed and every program has seen every line.

pub mod error;
pub mod loader;
pub mod program;
pub mod vm;

pub use error::{CompileError, CompileErrors, LoaderError};
pub use loader::{Loader, LoaderOptions, PROGRAM_EXTENSION};
pub use program::{Instr, MetricDecl, Program, compile};
pub use vm::{LineOutcome, parse_timestamp};
