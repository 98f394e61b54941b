//! Analysis Request Models
//!
//! What a client sends to start an analysis and what it may download
//! afterwards.

use std::fmt;
use std::str::FromStr;

use phylo_pipeline_core::TreeTool;
use serde::{Deserialize, Serialize};

use crate::utils::error::{AppError, AppResult};

/// Replicate count used when a request does not name one.
pub const DEFAULT_BOOTSTRAP: u32 = 1000;

/// Smallest replicate count IQ-TREE accepts for ultrafast bootstrap.
pub const MIN_ULTRAFAST_BOOTSTRAP: u32 = 1000;

/// Parameters of one analysis run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    /// Tree tool; `skip` stops after alignment
    #[serde(default)]
    pub tree_tool: TreeTool,
    /// Ultrafast bootstrap replicates for IQ-TREE; 0 disables bootstrap
    #[serde(default = "default_bootstrap")]
    pub bootstrap: u32,
}

fn default_bootstrap() -> u32 {
    DEFAULT_BOOTSTRAP
}

impl Default for AnalysisRequest {
    fn default() -> Self {
        Self {
            tree_tool: TreeTool::default(),
            bootstrap: DEFAULT_BOOTSTRAP,
        }
    }
}

impl AnalysisRequest {
    pub fn new(tree_tool: TreeTool) -> Self {
        Self {
            tree_tool,
            ..Self::default()
        }
    }

    pub fn with_bootstrap(mut self, bootstrap: u32) -> Self {
        self.bootstrap = bootstrap;
        self
    }

    /// Check parameters that do not depend on the job's files.
    pub fn validate(&self) -> AppResult<()> {
        if self.tree_tool == TreeTool::IqTree
            && self.bootstrap != 0
            && self.bootstrap < MIN_ULTRAFAST_BOOTSTRAP
        {
            return Err(AppError::validation(format!(
                "ultrafast bootstrap needs at least {} replicates (or 0 to disable), got {}",
                MIN_ULTRAFAST_BOOTSTRAP, self.bootstrap
            )));
        }
        Ok(())
    }

    /// Whether IQ-TREE will run with bootstrap replicates
    pub fn bootstrap_enabled(&self) -> bool {
        self.tree_tool == TreeTool::IqTree && self.bootstrap > 0
    }
}

/// Downloadable results of a completed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Tree,
    Alignment,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Tree => write!(f, "tree"),
            ArtifactKind::Alignment => write!(f, "alignment"),
        }
    }
}

impl FromStr for ArtifactKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tree" => Ok(ArtifactKind::Tree),
            "alignment" => Ok(ArtifactKind::Alignment),
            other => Err(AppError::validation(format!(
                "unknown file type '{}', expected 'tree' or 'alignment'",
                other
            ))),
        }
    }
}
