//! Pipeline Integration Tests
//!
//! Full jobs through registry, selector, orchestrator and stage runner,
//! with shell scripts in place of MAFFT, trimAl, FastTree and IQ-TREE.

use std::fs;
use std::time::{Duration, Instant};

use phylo_pipeline::utils::paths::inputs;
use phylo_pipeline::{
    AnalysisRequest, AnalysisService, AppError, ArtifactKind, JobStatus, TreeTool, WorkflowMode,
};

use crate::support::*;

// ============================================================================
// Successful Runs
// ============================================================================

#[tokio::test]
async fn test_append_mode_with_fasttree() {
    let mut harness = Harness::new();
    harness.config.fasttree.program =
        harness.tool("FastTree", &fasttree_script(&harness.marker("fasttree"), 1.0));
    let (service, renderer) = harness.service();
    let job_id = harness.upload(
        &service,
        2,
        &[(inputs::EXISTING_ALIGNMENT, EXISTING), (inputs::NEW_SEQUENCES, NEW)],
    );

    let started = service
        .start_analysis(&job_id, AnalysisRequest::new(TreeTool::FastTree))
        .unwrap();
    assert_eq!(started.status, JobStatus::Processing);
    assert_eq!(started.progress, 10);
    assert_eq!(started.step.as_deref(), Some("alignment"));

    let (job, seen) = follow(&service, &job_id).await;
    assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error);
    assert_eq!(job.progress, 100);
    assert_non_decreasing(&seen);
    // FastTree reports nothing, so progress sits at 60 while it runs.
    assert!(seen.contains(&60), "{:?}", seen);
    assert_eq!(seen.last(), Some(&100));

    let paths = service.job_paths(&job_id);
    let alignment = fs::read_to_string(paths.alignment()).unwrap();
    assert_eq!(alignment, format!("{}{}", EXISTING, NEW));
    let tree = fs::read_to_string(paths.tree()).unwrap();
    assert!(tree.starts_with("(seq_a"));

    let mafft_args = fs::read_to_string(harness.marker("mafft")).unwrap();
    assert!(mafft_args.contains("--add"));
    assert!(mafft_args.contains("--reorder"));

    let requests = renderer.wait_for(1).await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].tree_file, paths.tree());
    assert_eq!(requests[0].outgroup, "uncisetus");
    assert_eq!(requests[0].alignment_file, paths.alignment());

    assert_eq!(
        service.artifact_path(&job_id, ArtifactKind::Tree).unwrap(),
        paths.tree()
    );
    assert_eq!(
        service.artifact_path(&job_id, ArtifactKind::Alignment).unwrap(),
        paths.alignment()
    );
}

#[tokio::test]
async fn test_pre_aligned_skip_runs_no_tools() {
    let harness = Harness::new();
    let (service, renderer) = harness.service();
    let job_id = harness.upload(&service, 1, &[(inputs::ALIGNED_MATRIX, EXISTING)]);

    let started = service
        .start_analysis(&job_id, AnalysisRequest::new(TreeTool::Skip))
        .unwrap();
    assert_eq!(started.progress, 50);
    assert_eq!(started.step.as_deref(), Some("skipping_alignment"));

    let (job, _) = follow(&service, &job_id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.aligned_file, Some(service.job_paths(&job_id).aligned_matrix()));
    assert!(job.tree_file.is_none());

    assert!(!harness.ran("mafft"));
    assert!(!harness.ran("fasttree"));
    assert!(renderer.requests().is_empty());
    assert!(matches!(
        service.artifact_path(&job_id, ArtifactKind::Tree),
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_append_mode_skip_tree() {
    let harness = Harness::new();
    let (service, renderer) = harness.service();
    let job_id = harness.upload(
        &service,
        2,
        &[(inputs::EXISTING_ALIGNMENT, EXISTING), (inputs::NEW_SEQUENCES, NEW)],
    );

    service
        .start_analysis(&job_id, AnalysisRequest::new(TreeTool::Skip))
        .unwrap();
    let (job, seen) = follow(&service, &job_id).await;
    assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error);
    assert_eq!(job.progress, 100);
    assert_non_decreasing(&seen);

    let paths = service.job_paths(&job_id);
    assert_eq!(job.aligned_file, Some(paths.alignment()));
    assert!(job.tree_file.is_none());
    assert!(!paths.tree().exists());
    assert_eq!(
        fs::read_to_string(paths.alignment()).unwrap(),
        format!("{}{}", EXISTING, NEW)
    );

    assert!(harness.ran("mafft"));
    assert!(!harness.ran("fasttree"));
    assert!(!harness.ran("iqtree"));
    assert!(renderer.requests().is_empty());
    assert_eq!(
        service.artifact_path(&job_id, ArtifactKind::Alignment).unwrap(),
        paths.alignment()
    );
    assert!(matches!(
        service.artifact_path(&job_id, ArtifactKind::Tree),
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_pre_aligned_fasttree_progress() {
    let mut harness = Harness::new();
    harness.config.fasttree.program =
        harness.tool("FastTree", &fasttree_script(&harness.marker("fasttree"), 1.0));
    let (service, renderer) = harness.service();
    let job_id = harness.upload(&service, 1, &[(inputs::ALIGNED_MATRIX, EXISTING)]);

    service
        .start_analysis(&job_id, AnalysisRequest::new(TreeTool::FastTree))
        .unwrap();
    let (job, seen) = follow(&service, &job_id).await;
    assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error);
    assert_eq!(seen, vec![50, 60, 100]);

    let paths = service.job_paths(&job_id);
    assert_eq!(job.tree_file, Some(paths.tree()));
    assert!(!harness.ran("mafft"));
    assert_eq!(renderer.wait_for(1).await[0].alignment_file, paths.aligned_matrix());
}

#[tokio::test]
async fn test_raw_mode_with_iqtree_bootstrap() {
    let harness = Harness::new();
    let (service, renderer) = harness.service();
    let job_id = harness.upload(&service, 3, &[(inputs::RAW_MATRIX, RAW)]);

    let request = AnalysisRequest::new(TreeTool::IqTree).with_bootstrap(1000);
    let started = service.start_analysis(&job_id, request).unwrap();
    assert_eq!(started.progress, 5);
    assert_eq!(started.step.as_deref(), Some("merging_files"));

    let (job, seen) = follow(&service, &job_id).await;
    assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error);
    assert_non_decreasing(&seen);
    // At least one log milestone is seen between the tree start and the end.
    assert!(
        seen.iter().any(|p| [65, 73, 81, 89, 95, 99].contains(p)),
        "{:?}",
        seen
    );

    let paths = service.job_paths(&job_id);
    assert_eq!(fs::read(paths.merged()).unwrap(), RAW.as_bytes());
    assert!(harness.ran("trimal"));

    let tree = fs::read_to_string(paths.tree()).unwrap();
    assert!(tree.starts_with("(consensus_a"), "{}", tree);

    let iqtree_args = fs::read_to_string(harness.marker("iqtree")).unwrap();
    assert!(iqtree_args.contains("-B 1000"));
    assert!(iqtree_args.contains("-T 2"));
    assert_eq!(renderer.wait_for(1).await.len(), 1);
}

#[tokio::test]
async fn test_raw_mode_merges_user_sequences() {
    let harness = Harness::new();
    let (service, _) = harness.service();
    let job_id = harness.upload(
        &service,
        3,
        &[(inputs::RAW_MATRIX, ">r1\nACGT"), (inputs::USER_SEQUENCES, NEW)],
    );

    service
        .start_analysis(&job_id, AnalysisRequest::new(TreeTool::Skip))
        .unwrap();
    let (job, _) = follow(&service, &job_id).await;
    assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error);

    let merged = fs::read_to_string(service.job_paths(&job_id).merged()).unwrap();
    assert_eq!(merged, format!(">r1\nACGT\n{}", NEW));
    assert!(!harness.ran("iqtree"));
}

#[tokio::test]
async fn test_iqtree_without_bootstrap_uses_best_tree() {
    let harness = Harness::new();
    let (service, _) = harness.service();
    let job_id = harness.upload(&service, 1, &[(inputs::ALIGNED_MATRIX, EXISTING)]);

    let request = AnalysisRequest::new(TreeTool::IqTree).with_bootstrap(0);
    service.start_analysis(&job_id, request).unwrap();
    let (job, _) = follow(&service, &job_id).await;
    assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error);

    let tree = fs::read_to_string(service.job_paths(&job_id).tree()).unwrap();
    assert!(tree.starts_with("(best_a"));
    let args = fs::read_to_string(harness.marker("iqtree")).unwrap();
    assert!(!args.contains("-B"));
}

// ============================================================================
// Rejected Requests
// ============================================================================

#[tokio::test]
async fn test_missing_input_rejected_before_start() {
    let harness = Harness::new();
    let (service, _) = harness.service();
    let job_id = harness.upload(&service, 2, &[(inputs::NEW_SEQUENCES, NEW)]);

    let err = service
        .start_analysis(&job_id, AnalysisRequest::new(TreeTool::FastTree))
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let job = service.status(&job_id).unwrap();
    assert_eq!(job.status, JobStatus::Uploaded);
    assert_eq!(job.progress, 0);
    assert!(!harness.ran("mafft"));
}

#[tokio::test]
async fn test_second_start_conflicts() {
    let harness = Harness::new();
    let (service, _) = harness.service();
    let job_id = harness.upload(&service, 1, &[(inputs::ALIGNED_MATRIX, EXISTING)]);

    service.start_analysis(&job_id, AnalysisRequest::default()).unwrap();
    assert!(matches!(
        service.start_analysis(&job_id, AnalysisRequest::default()),
        Err(AppError::Conflict(_))
    ));

    follow(&service, &job_id).await;
    assert!(matches!(
        service.start_analysis(&job_id, AnalysisRequest::default()),
        Err(AppError::Conflict(_))
    ));
}

#[tokio::test]
async fn test_escaping_job_id_creates_nothing() {
    let harness = Harness::new();
    let (service, _) = harness.service();
    let inputs_dir = harness.temp.path().join("incoming");
    fs::create_dir_all(&inputs_dir).unwrap();
    fs::write(inputs_dir.join(inputs::ALIGNED_MATRIX), EXISTING).unwrap();

    let job_id = "../escaped";
    assert!(matches!(
        service.register_upload(job_id, WorkflowMode::PreAligned, ""),
        Err(AppError::Validation(_))
    ));
    assert!(matches!(
        service.import_inputs(job_id, &inputs_dir),
        Err(AppError::NotFound(_))
    ));
    assert!(!harness.temp.path().join("escaped").exists());
    assert!(!service.job_paths(job_id).upload_dir().exists());
}

#[tokio::test]
async fn test_import_inputs_copies_known_files() {
    let harness = Harness::new();
    let (service, _) = harness.service();
    let inputs_dir = harness.temp.path().join("incoming");
    fs::create_dir_all(&inputs_dir).unwrap();
    fs::write(inputs_dir.join(inputs::ALIGNED_MATRIX), EXISTING).unwrap();
    fs::write(inputs_dir.join("notes.txt"), "ignored").unwrap();

    let job_id = AnalysisService::new_job_id();
    service.register_upload(&job_id, WorkflowMode::PreAligned, "").unwrap();
    assert_eq!(service.import_inputs(&job_id, &inputs_dir).unwrap(), 1);

    let paths = service.job_paths(&job_id);
    assert_eq!(fs::read_to_string(paths.aligned_matrix()).unwrap(), EXISTING);
    assert!(!paths.input("notes.txt").exists());
}

#[tokio::test]
async fn test_unknown_job() {
    let harness = Harness::new();
    let (service, _) = harness.service();
    assert!(matches!(service.status("missing"), Err(AppError::NotFound(_))));
    assert!(matches!(
        service.start_analysis("missing", AnalysisRequest::default()),
        Err(AppError::NotFound(_))
    ));
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_tree_tool_failure_reports_output() {
    let mut harness = Harness::new();
    harness.config.fasttree.program = harness.tool(
        "FastTree",
        &failing_script(&harness.marker("fasttree"), "ERROR: invalid alignment"),
    );
    let (service, renderer) = harness.service();
    let job_id = harness.upload(
        &service,
        2,
        &[(inputs::EXISTING_ALIGNMENT, EXISTING), (inputs::NEW_SEQUENCES, NEW)],
    );

    service
        .start_analysis(&job_id, AnalysisRequest::new(TreeTool::FastTree))
        .unwrap();
    let (job, _) = follow(&service, &job_id).await;

    assert_eq!(job.status, JobStatus::Error);
    let message = job.error.unwrap();
    assert!(message.contains("FastTree"), "{}", message);
    assert!(message.contains("ERROR: invalid alignment"), "{}", message);
    assert!(job.progress < 100);
    assert!(renderer.requests().is_empty());
    assert!(matches!(
        service.artifact_path(&job_id, ArtifactKind::Alignment),
        Err(AppError::Validation(_))
    ));
}

#[tokio::test]
async fn test_alignment_timeout_stops_pipeline() {
    let mut harness = Harness::new();
    harness.config.aligner.program = harness.tool("mafft", &sleeping_script(&harness.marker("mafft"), 30));
    harness.config.aligner.timeout_secs = 1;
    let (service, _) = harness.service();
    let job_id = harness.upload(
        &service,
        2,
        &[(inputs::EXISTING_ALIGNMENT, EXISTING), (inputs::NEW_SEQUENCES, NEW)],
    );

    let started = Instant::now();
    service
        .start_analysis(&job_id, AnalysisRequest::new(TreeTool::FastTree))
        .unwrap();
    let (job, _) = follow(&service, &job_id).await;

    assert!(started.elapsed() < Duration::from_secs(15));
    assert_eq!(job.status, JobStatus::Error);
    let message = job.error.unwrap();
    assert!(message.starts_with("Timeout"), "{}", message);
    assert!(message.contains("MAFFT"), "{}", message);
    assert!(!harness.ran("fasttree"));
}

#[tokio::test]
async fn test_missing_executable_is_reported() {
    let mut harness = Harness::new();
    harness.config.aligner.program = harness
        .temp
        .path()
        .join("tools/no-such-mafft")
        .display()
        .to_string();
    let (service, _) = harness.service();
    let job_id = harness.upload(
        &service,
        2,
        &[(inputs::EXISTING_ALIGNMENT, EXISTING), (inputs::NEW_SEQUENCES, NEW)],
    );

    service
        .start_analysis(&job_id, AnalysisRequest::new(TreeTool::Skip))
        .unwrap();
    let (job, _) = follow(&service, &job_id).await;
    assert_eq!(job.status, JobStatus::Error);
    assert!(job.error.unwrap().contains("not found"));
}

#[tokio::test]
async fn test_renderer_failure_does_not_fail_job() {
    let mut harness = Harness::new();
    harness.config.renderer.enabled = true;
    harness.config.renderer.program = "sh".to_string();
    harness.config.renderer.args = vec!["-c".to_string(), "echo broken >&2; exit 2".to_string()];
    let service = AnalysisService::new(harness.config.clone());
    let job_id = harness.upload(&service, 1, &[(inputs::ALIGNED_MATRIX, EXISTING)]);

    service
        .start_analysis(&job_id, AnalysisRequest::new(TreeTool::FastTree))
        .unwrap();
    let (job, _) = follow(&service, &job_id).await;
    assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error);
    assert!(job.tree_file.is_some());
}

#[tokio::test]
async fn test_slow_renderer_does_not_delay_completion() {
    let mut harness = Harness::new();
    harness.config.renderer.enabled = true;
    harness.config.renderer.program = "sh".to_string();
    harness.config.renderer.args = vec!["-c".to_string(), "sleep 10".to_string()];
    let service = AnalysisService::new(harness.config.clone());
    let job_id = harness.upload(&service, 1, &[(inputs::ALIGNED_MATRIX, EXISTING)]);

    let started = Instant::now();
    service
        .start_analysis(&job_id, AnalysisRequest::new(TreeTool::FastTree))
        .unwrap();
    let (job, _) = follow(&service, &job_id).await;
    assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error);
    assert_eq!(job.progress, 100);
    assert!(started.elapsed() < Duration::from_secs(5));
}

// ============================================================================
// Retention
// ============================================================================

#[tokio::test]
async fn test_prune_expired_removes_job_and_files() {
    let mut harness = Harness::new();
    harness.config.retention_secs = 1;
    let (service, _) = harness.service();
    let job_id = harness.upload(&service, 1, &[(inputs::ALIGNED_MATRIX, EXISTING)]);
    let waiting = harness.upload(&service, 1, &[(inputs::ALIGNED_MATRIX, EXISTING)]);

    service.start_analysis(&job_id, AnalysisRequest::default()).unwrap();
    service
        .wait_until_terminal(&job_id, Duration::from_millis(10), Duration::from_secs(10))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1200)).await;
    let removed = service.prune_expired().await.unwrap();
    assert_eq!(removed, vec![job_id.clone()]);
    assert!(matches!(service.status(&job_id), Err(AppError::NotFound(_))));
    assert!(!service.job_paths(&job_id).upload_dir().exists());
    assert_eq!(service.status(&waiting).unwrap().status, JobStatus::Uploaded);
}
