//! Job Registry
//!
//! Process-wide map from job id to [`JobState`]. Every write goes through
//! [`JobState::apply`] while the entry's shard lock is held, so concurrent
//! writers (the orchestrator and a stage's progress monitor) never lose or
//! reorder an update, and readers always see a whole record.

use std::sync::Arc;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use phylo_pipeline_core::{
    JobState, JobStatus, JobUpdate, MergeOutcome, ProgressTick, Transition, WorkflowMode,
};
use phylo_pipeline_stages::ProgressSink;

use crate::utils::error::{AppError, AppResult};

/// In-memory job store
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: DashMap<String, JobState>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly uploaded job. Fails if the id is taken.
    pub fn create(&self, job_id: &str, mode: WorkflowMode, outgroup: &str) -> AppResult<JobState> {
        match self.jobs.entry(job_id.to_string()) {
            Entry::Occupied(_) => Err(AppError::conflict(format!("job {} already exists", job_id))),
            Entry::Vacant(slot) => {
                let state = JobState::new(job_id, mode, outgroup);
                slot.insert(state.clone());
                tracing::debug!(job_id, mode = %mode, "job registered");
                Ok(state)
            }
        }
    }

    /// Snapshot of a job
    pub fn get(&self, job_id: &str) -> AppResult<JobState> {
        self.jobs
            .get(job_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::not_found(format!("job {}", job_id)))
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.jobs.contains_key(job_id)
    }

    /// Merge an update into a job. Updates the record refuses (terminal
    /// jobs, progress decreases) are reported as [`MergeOutcome::Ignored`].
    pub fn merge(&self, job_id: &str, update: impl Into<JobUpdate>) -> AppResult<MergeOutcome> {
        let mut entry = self
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| AppError::not_found(format!("job {}", job_id)))?;
        let update = update.into();
        let outcome = entry.apply(update.clone());
        if outcome == MergeOutcome::Ignored {
            tracing::trace!(job_id, status = %entry.status, ?update, "update ignored");
        }
        Ok(outcome)
    }

    /// Move an uploaded job to `processing` in one step.
    ///
    /// This is the only way into `processing`, so at most one caller can
    /// start an analysis for a given job.
    pub fn begin_processing(&self, job_id: &str, progress: u8, step: &str) -> AppResult<JobState> {
        let mut entry = self
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| AppError::not_found(format!("job {}", job_id)))?;
        if entry.status != JobStatus::Uploaded {
            return Err(AppError::conflict(format!(
                "job {} is already {}",
                job_id, entry.status
            )));
        }
        entry.apply(Transition::Start {
            progress,
            step: step.to_string(),
        });
        Ok(entry.value().clone())
    }

    /// Remove terminal jobs last updated more than `max_age` ago.
    /// Returns the removed ids.
    pub fn prune_terminal(&self, max_age: chrono::Duration) -> Vec<String> {
        let cutoff = Utc::now() - max_age;
        let mut removed = Vec::new();
        self.jobs.retain(|job_id, job| {
            let expired = job.is_terminal() && job.updated_at <= cutoff;
            if expired {
                removed.push(job_id.clone());
            }
            !expired
        });
        if !removed.is_empty() {
            tracing::info!("pruned {} expired job(s)", removed.len());
        }
        removed
    }

    /// Ids of all known jobs
    pub fn job_ids(&self) -> Vec<String> {
        self.jobs.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

// ============================================================================
// Progress Sink
// ============================================================================

/// Routes monitor reports for one job into the registry.
pub struct JobProgressSink {
    registry: Arc<JobRegistry>,
    job_id: String,
}

impl JobProgressSink {
    pub fn new(registry: Arc<JobRegistry>, job_id: impl Into<String>) -> Self {
        Self {
            registry,
            job_id: job_id.into(),
        }
    }
}

impl ProgressSink for JobProgressSink {
    fn report(&self, percent: u8, step: &str) {
        let tick = ProgressTick {
            percent,
            step: step.to_string(),
        };
        if let Err(e) = self.registry.merge(&self.job_id, tick) {
            tracing::warn!(job_id = %self.job_id, "dropping progress report: {}", e);
        }
    }
}
