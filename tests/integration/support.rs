//! Shared fixtures: a temporary job area and shell scripts standing in for
//! the external tools.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use phylo_pipeline::services::pipeline::{RenderRequest, TreeRenderer};
use phylo_pipeline::{AnalysisService, AppResult, JobState, PipelineConfig};
use tempfile::TempDir;

pub const EXISTING: &str = ">seq_a\nACGT-ACGT\n>seq_b\nACGTTACGT\n";
pub const NEW: &str = ">seq_new\nACGTACGA\n";
pub const RAW: &str = ">r1\nACGTACGT\n>r2\nACGAACGT\n>r3\nACGTACCT\n";

pub struct Harness {
    pub temp: TempDir,
    pub config: PipelineConfig,
}

impl Harness {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let tools = temp.path().join("tools");
        fs::create_dir_all(&tools).unwrap();

        let mut config = PipelineConfig::default();
        config.uploads_dir = temp.path().join("uploads");
        config.results_dir = temp.path().join("results");
        config.log_poll_interval_ms = 20;
        config.monitor_join_timeout_ms = 500;
        config.drain_timeout_ms = 2000;
        config.renderer.enabled = false;

        let mut harness = Self { temp, config };
        harness.config.aligner.program = harness.tool("mafft", &mafft_script(&harness.marker("mafft")));
        harness.config.curator.program = harness.tool("trimal", &trimal_script(&harness.marker("trimal")));
        harness.config.fasttree.program =
            harness.tool("FastTree", &fasttree_script(&harness.marker("fasttree"), 0.0));
        harness.config.iqtree.program = harness.tool("iqtree2", &iqtree_script(&harness.marker("iqtree")));
        harness
    }

    /// Write an executable script and return its path.
    pub fn tool(&self, name: &str, body: &str) -> String {
        let path = self.temp.path().join("tools").join(name);
        fs::write(&path, body).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    /// File a fake tool creates when it runs; holds its arguments.
    pub fn marker(&self, tool: &str) -> PathBuf {
        self.temp.path().join(format!("{}.ran", tool))
    }

    pub fn ran(&self, tool: &str) -> bool {
        self.marker(tool).exists()
    }

    pub fn service(&self) -> (AnalysisService, Arc<RecordingRenderer>) {
        let renderer = Arc::new(RecordingRenderer::new());
        let service = AnalysisService::with_renderer(self.config.clone(), renderer.clone());
        (service, renderer)
    }

    /// Register a job after writing `files` into its upload directory.
    pub fn upload(&self, service: &AnalysisService, mode: u8, files: &[(&str, &str)]) -> String {
        let job_id = AnalysisService::new_job_id();
        let paths = service.job_paths(&job_id);
        paths.ensure_dirs().unwrap();
        for (name, content) in files {
            fs::write(paths.input(name), content).unwrap();
        }
        service
            .register_upload(&job_id, mode.try_into().unwrap(), "")
            .unwrap();
        job_id
    }
}

/// Poll a job until it is terminal, collecting every progress value seen.
pub async fn follow(service: &AnalysisService, job_id: &str) -> (JobState, Vec<u8>) {
    let mut seen: Vec<u8> = Vec::new();
    for _ in 0..3000 {
        let job = service.status(job_id).unwrap();
        if seen.last() != Some(&job.progress) {
            seen.push(job.progress);
        }
        if job.is_terminal() {
            return (job, seen);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {} did not finish", job_id);
}

pub fn assert_non_decreasing(values: &[u8]) {
    assert!(
        values.windows(2).all(|w| w[0] <= w[1]),
        "progress went backwards: {:?}",
        values
    );
}

// ============================================================================
// Recording Renderer
// ============================================================================

/// Records render requests instead of producing figures.
#[derive(Default)]
pub struct RecordingRenderer {
    requests: Mutex<Vec<RenderRequest>>,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<RenderRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Rendering runs after the job is completed, so give it a moment.
    pub async fn wait_for(&self, count: usize) -> Vec<RenderRequest> {
        for _ in 0..500 {
            let requests = self.requests();
            if requests.len() >= count {
                return requests;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.requests()
    }
}

#[async_trait]
impl TreeRenderer for RecordingRenderer {
    async fn render(&self, request: &RenderRequest) -> AppResult<()> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(())
    }
}

// ============================================================================
// Fake Tools
// ============================================================================

pub fn mafft_script(marker: &Path) -> String {
    format!(
        r#"#!/bin/sh
echo "$@" > "{marker}"
echo "nthread = 8" >&2
echo "generating a scoring matrix for nucleotide (dist=200) ... done" >&2
echo "Making a distance matrix .." >&2
echo "Making a distance matrix .." >&2
echo "Constructing a UPGMA tree (efffree=0) ..." >&2
echo "Progressive alignment 1/2..." >&2
add=""
last=""
while [ $# -gt 0 ]; do
  case "$1" in
    --add) add="$2"; shift 2 ;;
    --thread|--ep) shift 2 ;;
    *) last="$1"; shift ;;
  esac
done
cat "$last"
if [ -n "$add" ]; then cat "$add"; fi
"#,
        marker = marker.display()
    )
}

pub fn trimal_script(marker: &Path) -> String {
    format!(
        r#"#!/bin/sh
echo "$@" > "{marker}"
input=""
output=""
while [ $# -gt 0 ]; do
  case "$1" in
    -in) input="$2"; shift 2 ;;
    -out) output="$2"; shift 2 ;;
    *) shift ;;
  esac
done
cp "$input" "$output"
"#,
        marker = marker.display()
    )
}

pub fn fasttree_script(marker: &Path, sleep_secs: f32) -> String {
    format!(
        r#"#!/bin/sh
echo "$@" > "{marker}"
echo "FastTree Version 2.1.11" >&2
sleep {sleep_secs}
echo "(seq_a:0.1,seq_b:0.2,seq_new:0.3);"
"#,
        marker = marker.display(),
        sleep_secs = sleep_secs
    )
}

pub fn failing_script(marker: &Path, message: &str) -> String {
    format!(
        r#"#!/bin/sh
echo "$@" > "{marker}"
echo "{message}" >&2
exit 1
"#,
        marker = marker.display(),
        message = message
    )
}

pub fn sleeping_script(marker: &Path, secs: u32) -> String {
    format!(
        r#"#!/bin/sh
echo "$@" > "{marker}"
sleep {secs}
"#,
        marker = marker.display(),
        secs = secs
    )
}

pub fn iqtree_script(marker: &Path) -> String {
    format!(
        r#"#!/bin/sh
echo "$@" > "{marker}"
pre=""
boot=""
while [ $# -gt 0 ]; do
  case "$1" in
    -pre) pre="$2"; shift 2 ;;
    -B) boot="$2"; shift 2 ;;
    *) shift ;;
  esac
done
log="$pre.log"
echo "IQ-TREE multicore version 2.2.0" > "$log"
if [ -n "$boot" ]; then
  echo "Generating $boot samples for ultrafast bootstrap (seed: 1)..." >> "$log"
  sleep 0.2
fi
echo "|             INITIALIZING CANDIDATE TREE SET                  |" >> "$log"
sleep 0.2
echo "|             OPTIMIZING CANDIDATE TREE SET                    |" >> "$log"
sleep 0.2
echo "|                FINALIZING TREE SEARCH                        |" >> "$log"
sleep 0.2
echo "(best_a:0.1,best_b:0.2);" > "$pre.treefile"
if [ -n "$boot" ]; then
  echo "Computing bootstrap consensus tree..." >> "$log"
  echo "(consensus_a:0.1,consensus_b:0.2);" > "$pre.contree"
fi
"#,
        marker = marker.display()
    )
}
