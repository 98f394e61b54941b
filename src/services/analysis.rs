//! Analysis Service
//!
//! Facade used by commands and the CLI. It owns the registry, the selector
//! and the orchestrator, and is the only place that starts background
//! pipelines.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use phylo_pipeline_core::{JobState, JobStatus, WorkflowMode};
use phylo_pipeline_stages::StageRunner;

use crate::models::analysis::{AnalysisRequest, ArtifactKind};
use crate::models::config::PipelineConfig;
use crate::services::pipeline::{
    NoopRenderer, PipelineOrchestrator, ScriptRenderer, TreeRenderer, WorkflowSelector,
};
use crate::services::registry::JobRegistry;
use crate::utils::error::{AppError, AppResult};
use crate::utils::paths::{inputs, JobPaths};

pub struct AnalysisService {
    config: Arc<PipelineConfig>,
    registry: Arc<JobRegistry>,
    selector: WorkflowSelector,
    orchestrator: Arc<PipelineOrchestrator>,
}

impl AnalysisService {
    /// Create a service whose renderer follows `config.renderer`.
    pub fn new(config: PipelineConfig) -> Self {
        let renderer: Arc<dyn TreeRenderer> = if config.renderer.enabled {
            Arc::new(ScriptRenderer::new(config.renderer.clone()))
        } else {
            Arc::new(NoopRenderer)
        };
        Self::with_renderer(config, renderer)
    }

    /// Create a service with a custom renderer.
    pub fn with_renderer(config: PipelineConfig, renderer: Arc<dyn TreeRenderer>) -> Self {
        let config = Arc::new(config);
        let registry = Arc::new(JobRegistry::new());
        let orchestrator = PipelineOrchestrator::new(
            registry.clone(),
            StageRunner::new(config.runner_config()),
            renderer,
            Duration::from_secs(config.renderer.timeout_secs),
        );
        Self {
            selector: WorkflowSelector::new(config.clone()),
            orchestrator: Arc::new(orchestrator),
            registry,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn registry(&self) -> Arc<JobRegistry> {
        self.registry.clone()
    }

    /// A fresh, unique job id
    pub fn new_job_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    pub fn job_paths(&self, job_id: &str) -> JobPaths {
        JobPaths::new(&self.config.uploads_dir, &self.config.results_dir, job_id)
    }

    /// Record a job whose input files have been placed in its upload
    /// directory. An empty outgroup selects the default one.
    pub fn register_upload(&self, job_id: &str, mode: WorkflowMode, outgroup: &str) -> AppResult<JobState> {
        if job_id.trim().is_empty() || job_id.contains(['/', '\\']) || job_id == ".." {
            return Err(AppError::validation(format!("invalid job id '{}'", job_id)));
        }
        self.job_paths(job_id).ensure_dirs()?;
        let job = self.registry.create(job_id, mode, outgroup)?;
        tracing::info!(job_id, mode = %mode, outgroup = %job.outgroup, "upload registered");
        Ok(job)
    }

    /// Copy the recognised input files from `from` into the upload
    /// directory of a registered job. Returns how many were copied.
    pub fn import_inputs(&self, job_id: &str, from: &Path) -> AppResult<usize> {
        self.registry.get(job_id)?;
        if !from.is_dir() {
            return Err(AppError::not_found(format!(
                "input directory {}",
                from.display()
            )));
        }

        let paths = self.job_paths(job_id);
        let mut copied = 0;
        for name in inputs::ALL {
            let source = from.join(name);
            if source.is_file() {
                std::fs::copy(&source, paths.input(name))?;
                copied += 1;
            }
        }
        tracing::debug!(job_id, copied, "inputs imported from {}", from.display());
        Ok(copied)
    }

    /// Validate the request, move the job to `processing` and start its
    /// pipeline in the background. Must be called inside a Tokio runtime.
    ///
    /// Returns the job as it is right after the start.
    pub fn start_analysis(&self, job_id: &str, request: AnalysisRequest) -> AppResult<JobState> {
        let job = self.registry.get(job_id)?;
        if job.status != JobStatus::Uploaded {
            return Err(AppError::conflict(format!(
                "job {} is already {}",
                job_id, job.status
            )));
        }

        let paths = self.job_paths(job_id);
        let plan = self.selector.plan(&job, &paths, &request)?;
        let started = self
            .registry
            .begin_processing(job_id, plan.initial_progress, &plan.initial_step)?;

        tracing::info!(
            job_id,
            mode = %job.workflow_mode,
            tree_tool = %request.tree_tool,
            bootstrap = request.bootstrap,
            "analysis started"
        );
        self.orchestrator.clone().spawn(job_id.to_string(), plan);
        Ok(started)
    }

    /// Current snapshot of a job
    pub fn status(&self, job_id: &str) -> AppResult<JobState> {
        self.registry.get(job_id)
    }

    /// Location of a downloadable artifact. Only completed jobs have any.
    pub fn artifact_path(&self, job_id: &str, kind: ArtifactKind) -> AppResult<PathBuf> {
        let job = self.registry.get(job_id)?;
        if job.status != JobStatus::Completed {
            return Err(AppError::validation(format!(
                "job {} is {}, artifacts are only available once completed",
                job_id, job.status
            )));
        }

        let path = match kind {
            ArtifactKind::Tree => job.tree_file,
            ArtifactKind::Alignment => job.aligned_file,
        };
        match path {
            Some(path) if path.is_file() => Ok(path),
            Some(path) => Err(AppError::not_found(format!(
                "{} file {}",
                kind,
                path.display()
            ))),
            None => Err(AppError::not_found(format!("job {} has no {} file", job_id, kind))),
        }
    }

    /// Poll until the job is terminal or `limit` elapses.
    pub async fn wait_until_terminal(
        &self,
        job_id: &str,
        poll_interval: Duration,
        limit: Duration,
    ) -> AppResult<JobState> {
        let wait = async {
            loop {
                let job = self.registry.get(job_id)?;
                if job.is_terminal() {
                    return Ok::<JobState, AppError>(job);
                }
                tokio::time::sleep(poll_interval).await;
            }
        };
        tokio::time::timeout(limit, wait).await.map_err(|_| {
            AppError::timeout(format!("job {}", job_id), limit.as_secs())
        })?
    }

    /// Drop terminal jobs older than the configured retention, together
    /// with their upload and result directories.
    pub async fn prune_expired(&self) -> AppResult<Vec<String>> {
        let Some(retention) = self.config.retention() else {
            return Ok(Vec::new());
        };
        let max_age = chrono::Duration::from_std(retention)
            .map_err(|e| AppError::config(format!("retention out of range: {}", e)))?;

        let removed = self.registry.prune_terminal(max_age);
        for job_id in &removed {
            let paths = self.job_paths(job_id);
            for dir in [paths.upload_dir(), paths.result_dir()] {
                match tokio::fs::remove_dir_all(dir).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => tracing::warn!(job_id = %job_id, "could not remove {}: {}", dir.display(), e),
                }
            }
        }
        Ok(removed)
    }
}
