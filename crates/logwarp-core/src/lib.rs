//! logwarp-core — primitives shared by every logwarp subsystem.
//!
//! # Architecture
//!
//! ```text
//! Tailer / one-shot reader ──► LineSink ══ conduit ══► LineStream ──► Loader
//!                                  │
//!                                  └── close() exactly once, by the coordinator
//!
//! ShutdownSignal
//!   ├── fire()      ← HTTP quit handler, tests
//!   └── wait()      ← daemon wait, background task loops
//! ```

pub mod conduit;
pub mod shutdown;

pub use conduit::{ConduitError, LineSink, LineStream, conduit};
pub use shutdown::ShutdownSignal;
