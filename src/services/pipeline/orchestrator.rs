//! Pipeline Orchestrator
//!
//! Drives one job's [`StagePlan`] in a background task: runs each stage,
//! moves progress between stages, finalizes the tree and records exactly one
//! terminal state. Nothing escapes the task; every failure ends as `error`
//! with a readable message.
//!
//! Rendering starts only after `completed` is recorded. The job never waits
//! on it and its outcome is only logged.

use std::sync::Arc;
use std::time::Duration;

use phylo_pipeline_core::{JobArtifacts, Transition};
use phylo_pipeline_stages::{ProgressSink, StageOutcome, StageRunner};
use tokio::task::JoinHandle;

use crate::services::pipeline::plan::{StagePlan, TreeOutput, TreeSource};
use crate::services::pipeline::render::{RenderRequest, TreeRenderer};
use crate::services::registry::{JobProgressSink, JobRegistry};
use crate::utils::error::{AppError, AppResult};

/// Executes stage plans against the job registry
pub struct PipelineOrchestrator {
    registry: Arc<JobRegistry>,
    runner: StageRunner,
    renderer: Arc<dyn TreeRenderer>,
    render_timeout: Duration,
}

impl PipelineOrchestrator {
    pub fn new(
        registry: Arc<JobRegistry>,
        runner: StageRunner,
        renderer: Arc<dyn TreeRenderer>,
        render_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            runner,
            renderer,
            render_timeout,
        }
    }

    /// Run `plan` for an already started job on a detached task.
    ///
    /// A panic inside the pipeline is caught here and recorded as an error,
    /// so the job can never stay in `processing` forever.
    pub fn spawn(self: Arc<Self>, job_id: String, plan: StagePlan) -> JoinHandle<()> {
        tokio::spawn(async move {
            let registry = self.registry.clone();
            let id = job_id.clone();
            let pipeline = tokio::spawn(async move { self.run(&id, plan).await });

            if let Err(e) = pipeline.await {
                tracing::error!(job_id = %job_id, "pipeline task aborted: {}", e);
                let message = AppError::internal(format!("pipeline task aborted: {}", e)).to_string();
                if let Err(e) = registry.merge(&job_id, Transition::Fail(message)) {
                    tracing::warn!(job_id = %job_id, "could not record failure: {}", e);
                }
            }
        })
    }

    /// Run `plan` to a terminal state.
    ///
    /// The render request of a completed job is handled after the terminal
    /// state is recorded.
    pub async fn run(&self, job_id: &str, plan: StagePlan) {
        let (transition, render) = match self.execute(job_id, &plan).await {
            Ok(artifacts) => {
                tracing::info!(
                    job_id,
                    tree = ?artifacts.tree_file,
                    "analysis completed"
                );
                let render = artifacts.tree_file.as_ref().map(|tree_file| RenderRequest {
                    tree_file: tree_file.clone(),
                    output_dir: plan.result_dir.clone(),
                    outgroup: plan.outgroup.clone(),
                    alignment_file: plan.alignment.clone(),
                });
                (Transition::Complete(artifacts), render)
            }
            Err(e) => {
                tracing::error!(job_id, "analysis failed: {}", e);
                (Transition::Fail(e.to_string()), None)
            }
        };

        if let Err(e) = self.registry.merge(job_id, transition) {
            tracing::warn!(job_id, "could not record terminal state: {}", e);
            return;
        }
        if let Some(request) = render {
            self.render(job_id, &request).await;
        }
    }

    async fn execute(&self, job_id: &str, plan: &StagePlan) -> AppResult<JobArtifacts> {
        tokio::fs::create_dir_all(&plan.result_dir).await?;
        let sink: Arc<dyn ProgressSink> = Arc::new(JobProgressSink::new(self.registry.clone(), job_id));

        for stage in &plan.stages {
            self.advance(job_id, stage.start_progress, &stage.step)?;

            match self.runner.run(stage, sink.clone()).await? {
                StageOutcome::Success => {
                    self.advance(job_id, stage.done_progress, &stage.done_step)?;
                }
                StageOutcome::ToolFailure { exit_code, tail } => {
                    return Err(AppError::tool_failure(&stage.tool, exit_code, tail));
                }
                StageOutcome::Timeout { limit } => {
                    return Err(AppError::timeout(&stage.tool, limit.as_secs()));
                }
            }
        }

        let tree_file = match plan.tree {
            Some(ref tree) => Some(finalize_tree(tree).await?),
            None => None,
        };

        Ok(JobArtifacts {
            aligned_file: plan.alignment.clone(),
            tree_file,
        })
    }

    fn advance(&self, job_id: &str, progress: u8, step: &str) -> AppResult<()> {
        self.registry.merge(
            job_id,
            Transition::Advance {
                progress,
                step: step.to_string(),
            },
        )?;
        Ok(())
    }

    async fn render(&self, job_id: &str, request: &RenderRequest) {
        match tokio::time::timeout(self.render_timeout, self.renderer.render(request)).await {
            Ok(Ok(())) => tracing::info!(job_id, "tree rendered"),
            Ok(Err(e)) => tracing::warn!(job_id, "tree rendering failed: {}", e),
            Err(_) => tracing::warn!(
                job_id,
                "tree rendering did not finish within {}s",
                self.render_timeout.as_secs()
            ),
        }
    }
}

/// Put the tree at its canonical path and check it is really there.
async fn finalize_tree(tree: &TreeOutput) -> AppResult<std::path::PathBuf> {
    if let TreeSource::CopyFrom(ref source) = tree.source {
        if !tokio::fs::try_exists(source).await.unwrap_or(false) {
            return Err(AppError::not_found(format!(
                "{} finished without writing {}",
                tree.tool.display_name(),
                source.display()
            )));
        }
        tokio::fs::copy(source, &tree.canonical).await?;
    }

    let written = tokio::fs::metadata(&tree.canonical)
        .await
        .map(|meta| meta.len() > 0)
        .unwrap_or(false);
    if !written {
        return Err(AppError::not_found(format!(
            "{} produced no tree at {}",
            tree.tool.display_name(),
            tree.canonical.display()
        )));
    }
    Ok(tree.canonical.clone())
}
