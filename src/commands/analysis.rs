//! Analysis Commands
//!
//! Entry points for clients: register uploads, start analyses, poll status
//! and locate artifacts. Failures are reported inside the response envelope.

use std::path::PathBuf;

use phylo_pipeline_core::{JobState, TreeTool, WorkflowMode};

use crate::models::analysis::{AnalysisRequest, ArtifactKind, DEFAULT_BOOTSTRAP};
use crate::models::response::CommandResponse;
use crate::services::AnalysisService;

// ============================================================================
// Upload Commands
// ============================================================================

/// Register a job whose files are already in its upload directory
pub async fn register_upload(
    service: &AnalysisService,
    job_id: String,
    workflow_mode: u8,
    outgroup: Option<String>,
) -> Result<CommandResponse<JobState>, String> {
    let mode = match WorkflowMode::try_from(workflow_mode) {
        Ok(mode) => mode,
        Err(e) => return Ok(CommandResponse::err(e.to_string())),
    };
    let outgroup = outgroup.unwrap_or_default();
    Ok(service.register_upload(&job_id, mode, &outgroup).into())
}

// ============================================================================
// Analysis Commands
// ============================================================================

/// Start the analysis of an uploaded job
pub async fn start_analysis(
    service: &AnalysisService,
    job_id: String,
    tree_tool: Option<String>,
    bootstrap: Option<u32>,
) -> Result<CommandResponse<JobState>, String> {
    let tree_tool = match tree_tool.as_deref().unwrap_or("skip").parse::<TreeTool>() {
        Ok(tool) => tool,
        Err(e) => return Ok(CommandResponse::err(e.to_string())),
    };
    let request = AnalysisRequest::new(tree_tool).with_bootstrap(bootstrap.unwrap_or(DEFAULT_BOOTSTRAP));
    Ok(service.start_analysis(&job_id, request).into())
}

/// Current status of a job
pub async fn get_job_status(
    service: &AnalysisService,
    job_id: String,
) -> Result<CommandResponse<JobState>, String> {
    Ok(service.status(&job_id).into())
}

/// Path of a completed job's tree or alignment
pub async fn get_artifact_path(
    service: &AnalysisService,
    job_id: String,
    file_type: String,
) -> Result<CommandResponse<PathBuf>, String> {
    let kind = match file_type.parse::<ArtifactKind>() {
        Ok(kind) => kind,
        Err(e) => return Ok(CommandResponse::err(e.to_string())),
    };
    Ok(service.artifact_path(&job_id, kind).into())
}
