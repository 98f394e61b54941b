//! Stage Plans
//!
//! The fully resolved recipe for one analysis: the ordered stages, the
//! progress the job starts at, and where the final artifacts end up.

use std::path::PathBuf;

use phylo_pipeline_core::{TreeTool, WorkflowMode};
use phylo_pipeline_stages::{StageDescriptor, StageKind};

/// How the canonical tree file comes into existence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeSource {
    /// The tree stage writes the canonical file itself
    Direct,
    /// The tool writes elsewhere; the file is copied after the stage
    CopyFrom(PathBuf),
}

/// The tree a plan produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeOutput {
    pub tool: TreeTool,
    /// `results/<id>/tree.nwk`
    pub canonical: PathBuf,
    pub source: TreeSource,
}

/// Ordered stages plus everything the orchestrator needs around them.
#[derive(Debug, Clone)]
pub struct StagePlan {
    pub mode: WorkflowMode,
    /// Progress set when the job enters `processing`
    pub initial_progress: u8,
    /// Step label set when the job enters `processing`
    pub initial_step: String,
    pub stages: Vec<StageDescriptor>,
    /// Alignment reported as the job's aligned artifact
    pub alignment: PathBuf,
    pub tree: Option<TreeOutput>,
    /// Directory the tree stage and the renderer write into
    pub result_dir: PathBuf,
    pub outgroup: String,
}

impl StagePlan {
    /// Stage kinds in execution order
    pub fn stage_kinds(&self) -> Vec<StageKind> {
        self.stages.iter().map(|stage| stage.kind).collect()
    }

    /// Whether any stage spawns `program`
    pub fn runs_program(&self, program: &str) -> bool {
        self.stages.iter().any(|stage| stage.program() == Some(program))
    }

    pub fn builds_tree(&self) -> bool {
        self.tree.is_some()
    }
}
