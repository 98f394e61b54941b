//! Workflow Selector
//!
//! Turns a job's workflow mode, its uploaded files and an analysis request
//! into a [`StagePlan`]. All input validation happens here, before the job
//! leaves `uploaded`, so a rejected request leaves no trace on the job.
//!
//! Progress schedule per mode:
//!
//! | mode | start | merge | alignment | curation | tree |
//! |------|-------|-------|-----------|----------|------|
//! | 1 | 50 skipping_alignment | | | | 60..99 |
//! | 2 | 10 alignment | | 20..60 | | 60..99 |
//! | 3 | 5 merging_files | 5..10 | 15..55 | 57..60 | 60..99 |

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use phylo_pipeline_core::{JobState, TreeTool, WorkflowMode};
use phylo_pipeline_stages::{
    MilestoneTable, ProgressSource, StageAction, StageDescriptor, StageKind, ToolCommand,
};

use crate::models::analysis::AnalysisRequest;
use crate::models::config::{PipelineConfig, BOOTSTRAP_PLACEHOLDER};
use crate::services::pipeline::plan::{StagePlan, TreeOutput, TreeSource};
use crate::utils::error::{AppError, AppResult};
use crate::utils::paths::JobPaths;

/// Progress the tree stage starts from, whatever the mode.
const TREE_START: u8 = 60;
/// Progress once IQ-TREE exits successfully, before the tree is copied.
const IQTREE_DONE: u8 = 99;

/// Builds stage plans from configuration
#[derive(Debug, Clone)]
pub struct WorkflowSelector {
    config: Arc<PipelineConfig>,
}

impl WorkflowSelector {
    pub fn new(config: Arc<PipelineConfig>) -> Self {
        Self { config }
    }

    /// Validate inputs and build the plan for `job`.
    pub fn plan(&self, job: &JobState, paths: &JobPaths, request: &AnalysisRequest) -> AppResult<StagePlan> {
        request.validate()?;

        let mut plan = match job.workflow_mode {
            WorkflowMode::PreAligned => self.pre_aligned(paths)?,
            WorkflowMode::Append => self.append(paths)?,
            WorkflowMode::RawCurate => self.raw_curate(paths)?,
        };

        plan.outgroup = job.outgroup.clone();
        if let Some((stage, tree)) = self.tree_stage(&plan.alignment, paths, request) {
            plan.stages.push(stage);
            plan.tree = Some(tree);
        }

        tracing::debug!(
            job_id = %job.job_id,
            mode = %job.workflow_mode,
            stages = ?plan.stage_kinds(),
            "stage plan built"
        );
        Ok(plan)
    }

    /// Mode 1: the uploaded matrix is the alignment.
    fn pre_aligned(&self, paths: &JobPaths) -> AppResult<StagePlan> {
        let matrix = paths.aligned_matrix();
        require_input(&matrix, "aligned matrix")?;
        Ok(self.empty_plan(WorkflowMode::PreAligned, 50, "skipping_alignment", matrix, paths))
    }

    /// Mode 2: add new sequences to an existing alignment.
    fn append(&self, paths: &JobPaths) -> AppResult<StagePlan> {
        let existing = paths.existing_alignment();
        let new_sequences = paths.new_sequences();
        require_input(&existing, "existing alignment")?;
        require_input(&new_sequences, "new sequences")?;

        let aligner = &self.config.aligner;
        let alignment = paths.alignment();
        let stage = StageDescriptor::new(
            StageKind::Alignment,
            "MAFFT",
            StageAction::Command(
                ToolCommand::new(&aligner.program)
                    .args(aligner.add_args(&new_sequences, &existing))
                    .stdout_to(&alignment),
            ),
            Duration::from_secs(aligner.timeout_secs),
        )
        .with_progress(ProgressSource::Stderr, aligner.milestones.clone())
        .with_schedule("alignment", 20, "alignment_done", 60);

        let mut plan = self.empty_plan(WorkflowMode::Append, 10, "alignment", alignment, paths);
        plan.stages.push(stage);
        Ok(plan)
    }

    /// Mode 3: merge, align from scratch, then trim.
    fn raw_curate(&self, paths: &JobPaths) -> AppResult<StagePlan> {
        let raw = paths.raw_matrix();
        require_input(&raw, "raw matrix")?;

        let mut inputs = vec![raw];
        let user = paths.user_sequences();
        if has_content(&user) {
            inputs.push(user);
        }

        let merged = paths.merged();
        let raw_alignment = paths.raw_alignment();
        let alignment = paths.alignment();
        let aligner = &self.config.aligner;
        let curator = &self.config.curator;

        let merge = StageDescriptor::new(
            StageKind::Merge,
            "merge",
            StageAction::Concatenate {
                inputs,
                output: merged.clone(),
            },
            Duration::from_secs(aligner.timeout_secs),
        )
        .with_schedule("merging_files", 5, "merging_files", 10);

        let align = StageDescriptor::new(
            StageKind::Alignment,
            "MAFFT",
            StageAction::Command(
                ToolCommand::new(&aligner.program)
                    .args(aligner.align_args(&merged))
                    .stdout_to(&raw_alignment),
            ),
            Duration::from_secs(aligner.timeout_secs),
        )
        .with_progress(ProgressSource::Stderr, aligner.milestones.clone())
        .with_schedule("alignment", 15, "alignment_done", 55);

        let trim = StageDescriptor::new(
            StageKind::Curation,
            "trimAl",
            StageAction::Command(ToolCommand::new(&curator.program).args([
                "-in".to_string(),
                raw_alignment.display().to_string(),
                "-out".to_string(),
                alignment.display().to_string(),
                "-gt".to_string(),
                curator.gap_threshold.to_string(),
                "-cons".to_string(),
                curator.consistency_threshold.to_string(),
            ])),
            Duration::from_secs(curator.timeout_secs),
        )
        .with_schedule("trimming", 57, "trimming_done", 60);

        let mut plan = self.empty_plan(WorkflowMode::RawCurate, 5, "merging_files", alignment, paths);
        plan.stages.extend([merge, align, trim]);
        Ok(plan)
    }

    fn tree_stage(
        &self,
        alignment: &Path,
        paths: &JobPaths,
        request: &AnalysisRequest,
    ) -> Option<(StageDescriptor, TreeOutput)> {
        let canonical = paths.tree();
        match request.tree_tool {
            TreeTool::Skip => None,
            TreeTool::FastTree => {
                let fasttree = &self.config.fasttree;
                let mut command = ToolCommand::new(&fasttree.program);
                if fasttree.nucleotide {
                    command = command.arg("-nt");
                }
                let command = command
                    .arg(alignment.display().to_string())
                    .stdout_to(&canonical);
                // No milestones by default: progress plateaus until completion.
                let stage = StageDescriptor::new(
                    StageKind::TreeBuilding,
                    TreeTool::FastTree.display_name(),
                    StageAction::Command(command),
                    Duration::from_secs(fasttree.timeout_secs),
                )
                .with_progress(ProgressSource::Stderr, fasttree.milestones.clone())
                .with_schedule("tree_building", TREE_START, "tree_building", TREE_START);
                let tree = TreeOutput {
                    tool: TreeTool::FastTree,
                    canonical,
                    source: TreeSource::Direct,
                };
                Some((stage, tree))
            }
            TreeTool::IqTree => {
                let iqtree = &self.config.iqtree;
                let mut command = ToolCommand::new(&iqtree.program)
                    .arg("-s")
                    .arg(alignment.display().to_string());
                if request.bootstrap_enabled() {
                    command = command.arg("-B").arg(request.bootstrap.to_string());
                }
                let command = command
                    .arg("-T")
                    .arg(iqtree.threads.to_string())
                    .arg("-pre")
                    .arg(paths.iqtree_prefix().display().to_string());

                let stage = StageDescriptor::new(
                    StageKind::TreeBuilding,
                    TreeTool::IqTree.display_name(),
                    StageAction::Command(command),
                    Duration::from_secs(iqtree.timeout_secs),
                )
                .with_progress(
                    ProgressSource::LogFile(paths.iqtree_log()),
                    iqtree_milestones(&iqtree.milestones, request),
                )
                .with_schedule("tree_building", TREE_START, "tree_building", IQTREE_DONE);

                let source = if request.bootstrap_enabled() {
                    paths.iqtree_consensus()
                } else {
                    paths.iqtree_best_tree()
                };
                let tree = TreeOutput {
                    tool: TreeTool::IqTree,
                    canonical,
                    source: TreeSource::CopyFrom(source),
                };
                Some((stage, tree))
            }
        }
    }

    fn empty_plan(
        &self,
        mode: WorkflowMode,
        initial_progress: u8,
        initial_step: &str,
        alignment: PathBuf,
        paths: &JobPaths,
    ) -> StagePlan {
        StagePlan {
            mode,
            initial_progress,
            initial_step: initial_step.to_string(),
            stages: Vec::new(),
            alignment,
            tree: None,
            result_dir: paths.result_dir().to_path_buf(),
            outgroup: String::new(),
        }
    }
}

fn iqtree_milestones(table: &MilestoneTable, request: &AnalysisRequest) -> MilestoneTable {
    if request.bootstrap_enabled() {
        table.substitute(BOOTSTRAP_PLACEHOLDER, &request.bootstrap.to_string())
    } else {
        table.without_placeholder(BOOTSTRAP_PLACEHOLDER)
    }
}

fn has_content(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.len() > 0)
        .unwrap_or(false)
}

fn require_input(path: &Path, what: &str) -> AppResult<()> {
    if has_content(path) {
        Ok(())
    } else {
        Err(AppError::validation(format!(
            "{} is missing or empty: {}",
            what,
            path.display()
        )))
    }
}
