//! Stage Model
//!
//! A stage is one step of a job's plan: usually one external-tool invocation,
//! or the in-process merge of input files. Descriptors are built once by the
//! workflow selector and never change afterwards.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::milestone::MilestoneTable;

// ============================================================================
// Enums
// ============================================================================

/// What a stage contributes to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Concatenate the raw matrix with optional user sequences
    Merge,
    /// Multiple sequence alignment
    Alignment,
    /// Alignment trimming
    Curation,
    /// Phylogenetic inference
    TreeBuilding,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageKind::Merge => write!(f, "merge"),
            StageKind::Alignment => write!(f, "alignment"),
            StageKind::Curation => write!(f, "curation"),
            StageKind::TreeBuilding => write!(f, "tree_building"),
        }
    }
}

/// Where the monitor reads a stage's progress from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressSource {
    /// The stage reports no progress
    None,
    /// The tool's live stderr stream
    Stderr,
    /// A log file the tool appends to while running
    LogFile(PathBuf),
}

// ============================================================================
// Actions
// ============================================================================

/// A single external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    /// Executable name or path
    pub program: String,
    /// Arguments in order
    pub args: Vec<String>,
    /// Working directory (inherits the current one when unset)
    pub working_dir: Option<PathBuf>,
    /// File the tool's stdout is streamed into
    pub stdout: Option<PathBuf>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            stdout: None,
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Stream stdout into `path`
    pub fn stdout_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdout = Some(path.into());
        self
    }

    /// Run inside `dir`
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// The command as a shell-like string, for logs.
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        if let Some(ref stdout) = self.stdout {
            line.push_str(" > ");
            line.push_str(&stdout.display().to_string());
        }
        line
    }
}

/// What running a stage means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageAction {
    /// Spawn an external tool
    Command(ToolCommand),
    /// Stream `inputs` in order into `output`
    Concatenate { inputs: Vec<PathBuf>, output: PathBuf },
}

// ============================================================================
// Descriptor
// ============================================================================

/// One step of a stage plan.
#[derive(Debug, Clone)]
pub struct StageDescriptor {
    /// Role of the stage
    pub kind: StageKind,
    /// Tool name shown in messages (e.g. "MAFFT")
    pub tool: String,
    /// What to run
    pub action: StageAction,
    /// Wall-clock ceiling
    pub timeout: Duration,
    /// Where progress is read from
    pub progress: ProgressSource,
    /// Milestones looked for in the progress source
    pub milestones: MilestoneTable,
    /// Step label while the stage runs
    pub step: String,
    /// Progress floor set when the stage starts
    pub start_progress: u8,
    /// Step label once the stage succeeded
    pub done_step: String,
    /// Progress floor set once the stage succeeded
    pub done_progress: u8,
}

impl StageDescriptor {
    /// Create a descriptor without progress reporting. The step labels
    /// default to the stage kind.
    pub fn new(kind: StageKind, tool: impl Into<String>, action: StageAction, timeout: Duration) -> Self {
        Self {
            kind,
            tool: tool.into(),
            action,
            timeout,
            progress: ProgressSource::None,
            milestones: MilestoneTable::empty(),
            step: kind.to_string(),
            start_progress: 0,
            done_step: kind.to_string(),
            done_progress: 0,
        }
    }

    /// Watch `source` for `milestones`.
    pub fn with_progress(mut self, source: ProgressSource, milestones: MilestoneTable) -> Self {
        self.progress = source;
        self.milestones = milestones;
        self
    }

    /// Set the step labels and progress floors around the stage.
    pub fn with_schedule(
        mut self,
        step: impl Into<String>,
        start_progress: u8,
        done_step: impl Into<String>,
        done_progress: u8,
    ) -> Self {
        self.step = step.into();
        self.start_progress = start_progress;
        self.done_step = done_step.into();
        self.done_progress = done_progress;
        self
    }

    /// The external program, if the stage spawns one.
    pub fn program(&self) -> Option<&str> {
        match &self.action {
            StageAction::Command(cmd) => Some(cmd.program.as_str()),
            StageAction::Concatenate { .. } => None,
        }
    }

    /// Whether progress will be monitored at all.
    pub fn is_monitored(&self) -> bool {
        !self.milestones.is_empty() && self.progress != ProgressSource::None
    }
}

// ============================================================================
// Outcome
// ============================================================================

/// Terminal result of running one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// Exit status zero
    Success,
    /// Nonzero exit; `tail` holds the last captured output lines
    ToolFailure { exit_code: Option<i32>, tail: String },
    /// Wall-clock limit exceeded; the process was killed
    Timeout { limit: Duration },
}

impl StageOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StageOutcome::Success)
    }
}
