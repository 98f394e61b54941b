//! Job Model
//!
//! The polling record kept for every submitted job and the typed updates that
//! may change it. Monitors can only produce [`ProgressTick`]s; status changes
//! are [`Transition`]s issued by the orchestrator. [`JobState::apply`] is the
//! single merge policy both go through.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Outgroup used for rooting when the submitter does not provide one.
pub const DEFAULT_OUTGROUP: &str = "uncisetus";

// ============================================================================
// Enums
// ============================================================================

/// Lifecycle status of a job.
///
/// `Error` and `Completed` are terminal: once reached, the record never
/// changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Inputs are in place, no analysis started yet
    Uploaded,
    /// The pipeline is running
    Processing,
    /// A stage failed or timed out
    Error,
    /// All planned stages finished
    Completed,
}

impl JobStatus {
    /// Whether the status is write-once final.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Error | JobStatus::Completed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Uploaded => write!(f, "uploaded"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Error => write!(f, "error"),
            JobStatus::Completed => write!(f, "completed"),
        }
    }
}

/// Pipeline topology selected for a job.
///
/// Serialized as the bare numbers `1`, `2` and `3`, which is what callers
/// submit and poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum WorkflowMode {
    /// Mode 1: the submitted matrix is already aligned
    PreAligned,
    /// Mode 2: new sequences are added to an existing alignment
    Append,
    /// Mode 3: a raw matrix is aligned from scratch and curated
    RawCurate,
}

impl WorkflowMode {
    /// Numeric identifier of the mode.
    pub fn number(&self) -> u8 {
        match self {
            WorkflowMode::PreAligned => 1,
            WorkflowMode::Append => 2,
            WorkflowMode::RawCurate => 3,
        }
    }
}

impl TryFrom<u8> for WorkflowMode {
    type Error = CoreError;

    fn try_from(value: u8) -> CoreResult<Self> {
        match value {
            1 => Ok(WorkflowMode::PreAligned),
            2 => Ok(WorkflowMode::Append),
            3 => Ok(WorkflowMode::RawCurate),
            other => Err(CoreError::parse(format!("unknown workflow mode: {}", other))),
        }
    }
}

impl From<WorkflowMode> for u8 {
    fn from(mode: WorkflowMode) -> u8 {
        mode.number()
    }
}

impl FromStr for WorkflowMode {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        let value: u8 = s
            .trim()
            .parse()
            .map_err(|_| CoreError::parse(format!("unknown workflow mode: {}", s)))?;
        WorkflowMode::try_from(value)
    }
}

impl fmt::Display for WorkflowMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// Tree-building tool requested for the final stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TreeTool {
    /// No tree is built; the alignment is the final artifact
    #[default]
    Skip,
    /// FastTree, writes the tree to stdout
    FastTree,
    /// IQ-TREE, optionally with ultrafast bootstrap replication
    IqTree,
}

impl TreeTool {
    /// Human-readable tool name used in step messages and errors.
    pub fn display_name(&self) -> &'static str {
        match self {
            TreeTool::Skip => "none",
            TreeTool::FastTree => "FastTree",
            TreeTool::IqTree => "IQ-TREE",
        }
    }
}

impl FromStr for TreeTool {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "skip" | "none" => Ok(TreeTool::Skip),
            "fasttree" => Ok(TreeTool::FastTree),
            "iqtree" | "iq-tree" => Ok(TreeTool::IqTree),
            other => Err(CoreError::parse(format!("unknown tree tool: {}", other))),
        }
    }
}

impl fmt::Display for TreeTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TreeTool::Skip => write!(f, "skip"),
            TreeTool::FastTree => write!(f, "fasttree"),
            TreeTool::IqTree => write!(f, "iqtree"),
        }
    }
}

// ============================================================================
// Job Record
// ============================================================================

/// Final output files of a completed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobArtifacts {
    /// Final alignment (verbatim input matrix in mode 1)
    pub aligned_file: PathBuf,
    /// Canonical tree file, absent when tree building was skipped
    pub tree_file: Option<PathBuf>,
}

/// The record a caller polls for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobState {
    /// Job identifier
    pub job_id: String,
    /// Lifecycle status
    pub status: JobStatus,
    /// Progress percentage (0-100)
    pub progress: u8,
    /// Label of the current step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    /// Workflow mode chosen at upload time
    pub workflow_mode: WorkflowMode,
    /// Tip-name substring used by the renderer for rooting
    pub outgroup: String,
    /// Failure description, only in the `error` state
    #[serde(rename = "message", default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Final alignment path, only in the `completed` state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aligned_file: Option<PathBuf>,
    /// Canonical tree path, only in the `completed` state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tree_file: Option<PathBuf>,
    /// When the job was registered
    pub created_at: DateTime<Utc>,
    /// When an update was last applied
    pub updated_at: DateTime<Utc>,
}

/// Progress report from a stage monitor. Only ever raises progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressTick {
    pub percent: u8,
    pub step: String,
}

/// Status change issued by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// `uploaded -> processing` with the mode's initial progress
    Start { progress: u8, step: String },
    /// Progress/step floor between stages
    Advance { progress: u8, step: String },
    /// `processing -> completed`
    Complete(JobArtifacts),
    /// `processing -> error`
    Fail(String),
}

/// Any update that can be merged into a job record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobUpdate {
    Progress(ProgressTick),
    Transition(Transition),
}

impl From<ProgressTick> for JobUpdate {
    fn from(tick: ProgressTick) -> Self {
        JobUpdate::Progress(tick)
    }
}

impl From<Transition> for JobUpdate {
    fn from(transition: Transition) -> Self {
        JobUpdate::Transition(transition)
    }
}

/// Whether [`JobState::apply`] changed the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Applied,
    Ignored,
}

impl JobState {
    /// Create a freshly uploaded job.
    pub fn new(job_id: impl Into<String>, workflow_mode: WorkflowMode, outgroup: impl Into<String>) -> Self {
        let now = Utc::now();
        let outgroup = outgroup.into();
        Self {
            job_id: job_id.into(),
            status: JobStatus::Uploaded,
            progress: 0,
            step: None,
            workflow_mode,
            outgroup: if outgroup.trim().is_empty() {
                DEFAULT_OUTGROUP.to_string()
            } else {
                outgroup
            },
            error: None,
            aligned_file: None,
            tree_file: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the job reached `completed` or `error`.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Merge an update into the record.
    ///
    /// Terminal records ignore everything. Progress ticks and `Advance`
    /// floors only apply while processing and never lower progress. `Start`
    /// only applies to an uploaded job.
    pub fn apply(&mut self, update: impl Into<JobUpdate>) -> MergeOutcome {
        if self.is_terminal() {
            return MergeOutcome::Ignored;
        }

        let applied = match update.into() {
            JobUpdate::Progress(tick) => self.raise(JobStatus::Processing, tick.percent, tick.step),
            JobUpdate::Transition(Transition::Start { progress, step }) => {
                if self.status == JobStatus::Uploaded {
                    self.status = JobStatus::Processing;
                    self.progress = progress.min(100);
                    self.step = Some(step);
                    true
                } else {
                    false
                }
            }
            JobUpdate::Transition(Transition::Advance { progress, step }) => {
                self.raise(JobStatus::Processing, progress, step)
            }
            JobUpdate::Transition(Transition::Complete(artifacts)) => {
                if self.status == JobStatus::Processing {
                    self.status = JobStatus::Completed;
                    self.progress = 100;
                    self.step = Some("completed".to_string());
                    self.aligned_file = Some(artifacts.aligned_file);
                    self.tree_file = artifacts.tree_file;
                    true
                } else {
                    false
                }
            }
            JobUpdate::Transition(Transition::Fail(message)) => {
                if self.status == JobStatus::Processing {
                    self.status = JobStatus::Error;
                    self.error = Some(message);
                    true
                } else {
                    false
                }
            }
        };

        if applied {
            self.updated_at = Utc::now();
            MergeOutcome::Applied
        } else {
            MergeOutcome::Ignored
        }
    }

    fn raise(&mut self, required: JobStatus, percent: u8, step: String) -> bool {
        if self.status != required {
            return false;
        }
        self.progress = self.progress.max(percent.min(100));
        self.step = Some(step);
        true
    }
}
