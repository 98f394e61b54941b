//! Command Integration Tests
//!
//! The response envelope returned to clients.

use phylo_pipeline::commands::analysis::{
    get_artifact_path, get_job_status, register_upload, start_analysis,
};
use phylo_pipeline::utils::paths::inputs;
use phylo_pipeline::JobStatus;

use crate::support::*;

#[tokio::test]
async fn test_command_flow() {
    let harness = Harness::new();
    let (service, _) = harness.service();
    let job_id = "cmd-job".to_string();
    let paths = service.job_paths(&job_id);
    paths.ensure_dirs().unwrap();
    std::fs::write(paths.aligned_matrix(), EXISTING).unwrap();

    let registered = register_upload(&service, job_id.clone(), 1, Some("outer".to_string()))
        .await
        .unwrap();
    assert!(registered.success);
    assert_eq!(registered.data.unwrap().outgroup, "outer");

    let early = get_artifact_path(&service, job_id.clone(), "alignment".to_string())
        .await
        .unwrap();
    assert!(!early.success);
    assert!(early.error.unwrap().starts_with("Validation error"));

    let started = start_analysis(&service, job_id.clone(), Some("fasttree".to_string()), None)
        .await
        .unwrap();
    assert!(started.success, "{:?}", started.error);

    let (job, _) = follow(&service, &job_id).await;
    assert_eq!(job.status, JobStatus::Completed);

    let status = get_job_status(&service, job_id.clone()).await.unwrap();
    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json["data"]["status"], "completed");
    assert_eq!(json["data"]["progress"], 100);

    let tree = get_artifact_path(&service, job_id.clone(), "tree".to_string())
        .await
        .unwrap();
    assert_eq!(tree.data, Some(paths.tree()));
    assert!(inputs::ALL.contains(&"aligned_matrix.fasta"));
}

#[tokio::test]
async fn test_command_errors_in_envelope() {
    let harness = Harness::new();
    let (service, _) = harness.service();

    let bad_mode = register_upload(&service, "j".to_string(), 7, None).await.unwrap();
    assert!(!bad_mode.success);

    let unknown = get_job_status(&service, "nope".to_string()).await.unwrap();
    assert!(!unknown.success);
    assert!(unknown.error.unwrap().starts_with("Not found"));

    let bad_tool = start_analysis(&service, "nope".to_string(), Some("raxml".to_string()), None)
        .await
        .unwrap();
    assert!(!bad_tool.success);

    let bad_type = get_artifact_path(&service, "nope".to_string(), "svg".to_string())
        .await
        .unwrap();
    assert!(!bad_type.success);
}
