//! Phylo Pipeline Stages
//!
//! Everything needed to run one external-tool invocation of the pipeline and
//! watch it while it runs:
//!
//! - `models` - Stage descriptors, actions and outcomes
//! - `milestone` - Ordered milestone tables and the per-stage match tracker
//! - `tail` - Incremental line sources over a live stream or a growing log file
//! - `monitor` - Concurrent progress monitor bound to one stage
//! - `runner` - Spawns the tool, streams its output, enforces the timeout
//!
//! Job state is not known here. Progress leaves this crate only through the
//! [`ProgressSink`] trait.

pub mod milestone;
pub mod models;
pub mod monitor;
pub mod runner;
pub mod tail;

// Re-export stage model types
pub use models::{ProgressSource, StageAction, StageDescriptor, StageKind, StageOutcome, ToolCommand};

// Re-export milestone types
pub use milestone::{Milestone, MilestoneTable, MilestoneTracker};

// Re-export monitor and runner
pub use monitor::{MonitorHandle, ProgressMonitor, ProgressSink};
pub use runner::{concatenate, RunnerConfig, StageRunner};

// Re-export line sources
pub use tail::{ChannelTail, LineSource, LogFileTail};
