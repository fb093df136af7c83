//! logwarp-tailer — follows log files and feeds their lines to the engine.
//!
//! Each tailed path gets its own polling watcher. Watchers survive missing
//! files, truncation, and rotation; they never close the conduit
//! themselves. Closing happens once, in [`Tailer::stop`].

mod cursor;
pub mod tailer;

pub use tailer::{Tailer, TailerError, TailerOptions};
