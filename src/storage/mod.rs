//! Storage Layer
//!
//! Configuration persistence. Job records are kept in memory by the
//! registry service and are not persisted.

pub mod config;

pub use config::ConfigService;
