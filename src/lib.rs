//! Phylo Pipeline
//!
//! Runs phylogenetic analyses as background jobs: alignment with MAFFT,
//! optional curation with trimAl, tree inference with FastTree or IQ-TREE,
//! with live progress parsed from the tools' own output.
//!
//! - `commands` - client-facing handlers returning `CommandResponse`
//! - `services` - job registry, workflow selection and orchestration
//! - `storage` - TOML configuration loading
//! - `models` - configuration, request and response types
//! - `utils` - errors and the per-job file layout

pub mod commands;
pub mod models;
pub mod services;
pub mod storage;
pub mod utils;

pub use models::analysis::{AnalysisRequest, ArtifactKind};
pub use models::config::PipelineConfig;
pub use models::response::CommandResponse;
pub use services::AnalysisService;
pub use utils::error::{AppError, AppResult};

pub use phylo_pipeline_core::{JobState, JobStatus, TreeTool, WorkflowMode};
