//! Data Models
//!
//! Contains the data structures shared by services and commands.

pub mod analysis;
pub mod config;
pub mod response;

pub use analysis::*;
pub use config::*;
pub use response::*;
