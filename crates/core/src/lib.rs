//! Phylo Pipeline Core
//!
//! Shared types for the phylogenetic pipeline workspace. This crate has no
//! dependency on process execution, configuration or storage; the stage and
//! application crates build on top of it.
//!
//! ## Module Organization
//!
//! - `error` - Core error types (`CoreError`, `CoreResult`)
//! - `job` - Job record, workflow modes, tree tools and the typed updates
//!   that are allowed to change a job (`JobState`, `JobUpdate`, `Transition`)

pub mod error;
pub mod job;

// ── Error Types ────────────────────────────────────────────────────────
pub use error::{CoreError, CoreResult};

// ── Job Model ──────────────────────────────────────────────────────────
pub use job::{
    JobArtifacts, JobState, JobStatus, JobUpdate, MergeOutcome, ProgressTick, Transition,
    TreeTool, WorkflowMode, DEFAULT_OUTGROUP,
};
