//! Commands
//!
//! Handlers that front-ends (the CLI, or an HTTP or IPC layer) call into.

pub mod analysis;

pub use analysis::*;
