//! Pipeline Configuration Models
//!
//! Directory roots, timing knobs and one section per external tool. Every
//! field has a default, so an empty TOML document is a valid configuration.
//! Milestone tables live here rather than in code because their patterns
//! depend on the installed tool versions.

use std::path::{Path, PathBuf};
use std::time::Duration;

use phylo_pipeline_stages::{Milestone, MilestoneTable, RunnerConfig};
use serde::{Deserialize, Serialize};

use crate::utils::error::{AppError, AppResult};

/// Placeholder in IQ-TREE milestone patterns replaced by the replicate count.
pub const BOOTSTRAP_PLACEHOLDER: &str = "{bootstrap}";

/// Top-level configuration, read from `config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Root of per-job upload directories
    pub uploads_dir: PathBuf,
    /// Root of per-job result directories
    pub results_dir: PathBuf,
    /// How often tool log files are polled for milestones
    pub log_poll_interval_ms: u64,
    /// How long a stopped progress monitor may take to finish
    pub monitor_join_timeout_ms: u64,
    /// How long to wait for output pumps after a tool exits
    pub drain_timeout_ms: u64,
    /// Captured output lines quoted in failure messages
    pub output_tail_lines: usize,
    /// Terminal jobs older than this are pruned; 0 keeps them forever
    pub retention_secs: u64,
    pub aligner: AlignerConfig,
    pub curator: CuratorConfig,
    pub fasttree: FastTreeConfig,
    pub iqtree: IqTreeConfig,
    pub renderer: RendererConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            uploads_dir: PathBuf::from("uploads"),
            results_dir: PathBuf::from("results"),
            log_poll_interval_ms: 2000,
            monitor_join_timeout_ms: 1000,
            drain_timeout_ms: 10_000,
            output_tail_lines: 40,
            retention_secs: 0,
            aligner: AlignerConfig::default(),
            curator: CuratorConfig::default(),
            fasttree: FastTreeConfig::default(),
            iqtree: IqTreeConfig::default(),
            renderer: RendererConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> AppResult<Self> {
        let config: PipelineConfig = toml::from_str(content)?;
        config.validate().map_err(AppError::validation)?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn load(path: &Path) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.uploads_dir.as_os_str().is_empty() || self.results_dir.as_os_str().is_empty() {
            return Err("uploads_dir and results_dir must not be empty".to_string());
        }
        if self.log_poll_interval_ms == 0 {
            return Err("log_poll_interval_ms must be greater than 0".to_string());
        }
        if self.output_tail_lines == 0 {
            return Err("output_tail_lines must be greater than 0".to_string());
        }

        for (section, program, timeout) in [
            ("aligner", &self.aligner.program, self.aligner.timeout_secs),
            ("curator", &self.curator.program, self.curator.timeout_secs),
            ("fasttree", &self.fasttree.program, self.fasttree.timeout_secs),
            ("iqtree", &self.iqtree.program, self.iqtree.timeout_secs),
        ] {
            if program.trim().is_empty() {
                return Err(format!("[{}] program must not be empty", section));
            }
            if timeout == 0 {
                return Err(format!("[{}] timeout_secs must be greater than 0", section));
            }
        }

        if self.aligner.threads == 0 || self.iqtree.threads == 0 {
            return Err("thread counts must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.curator.gap_threshold) {
            return Err(format!(
                "[curator] gap_threshold must be within 0..=1, got {}",
                self.curator.gap_threshold
            ));
        }
        if self.curator.consistency_threshold > 100 {
            return Err("[curator] consistency_threshold cannot exceed 100".to_string());
        }
        if self.renderer.enabled {
            if self.renderer.program.trim().is_empty() {
                return Err("[renderer] program must not be empty".to_string());
            }
            if self.renderer.timeout_secs == 0 {
                return Err("[renderer] timeout_secs must be greater than 0".to_string());
            }
        }

        Ok(())
    }

    /// Settings the stage runner needs
    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            log_poll_interval: Duration::from_millis(self.log_poll_interval_ms),
            monitor_join_timeout: Duration::from_millis(self.monitor_join_timeout_ms),
            drain_timeout: Duration::from_millis(self.drain_timeout_ms),
            tail_lines: self.output_tail_lines,
        }
    }

    /// Age after which terminal jobs are pruned, if pruning is enabled
    pub fn retention(&self) -> Option<Duration> {
        (self.retention_secs > 0).then(|| Duration::from_secs(self.retention_secs))
    }
}

/// Builds a default table. Default tables are ascending by construction; an
/// invalid one degrades to "no progress" instead of failing startup.
fn default_table(entries: &[(&str, u8)]) -> MilestoneTable {
    let milestones = entries
        .iter()
        .map(|(pattern, percent)| Milestone::new(*pattern, *percent))
        .collect();
    MilestoneTable::new(milestones).unwrap_or_else(|e| {
        tracing::warn!("invalid built-in milestone table: {}", e);
        MilestoneTable::empty()
    })
}

// ============================================================================
// Tool Sections
// ============================================================================

/// MAFFT settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignerConfig {
    pub program: String,
    pub threads: u32,
    /// Output sequences in aligned order (`--reorder`)
    pub reorder: bool,
    /// Fix sequence direction (`--adjustdirection`)
    pub adjust_direction: bool,
    /// Offset value (`--ep`)
    pub ep: f64,
    /// Keep the existing alignment's length when adding (`--keeplength`)
    pub keep_length: bool,
    /// Write a compact insertion map when adding (`--compactmapout`)
    pub compact_map_out: bool,
    pub timeout_secs: u64,
    /// Matched against stderr
    pub milestones: MilestoneTable,
}

impl Default for AlignerConfig {
    fn default() -> Self {
        Self {
            program: "mafft".to_string(),
            threads: 8,
            reorder: true,
            adjust_direction: true,
            ep: 0.0,
            keep_length: false,
            compact_map_out: false,
            timeout_secs: 14_400,
            milestones: default_table(&[
                ("generating a scoring matrix", 25),
                ("Making a distance matrix", 35),
                ("Constructing a UPGMA tree", 45),
                ("Progressive alignment", 55),
            ]),
        }
    }
}

impl AlignerConfig {
    /// Flags shared by every MAFFT invocation
    pub fn common_args(&self) -> Vec<String> {
        let mut args = vec!["--thread".to_string(), self.threads.to_string()];
        if self.reorder {
            args.push("--reorder".to_string());
        }
        if self.adjust_direction {
            args.push("--adjustdirection".to_string());
        }
        args.push("--ep".to_string());
        args.push(self.ep.to_string());
        args
    }

    /// Flags for adding `new_sequences` to an existing alignment
    pub fn add_args(&self, new_sequences: &Path, existing: &Path) -> Vec<String> {
        let mut args = self.common_args();
        if self.keep_length {
            args.push("--keeplength".to_string());
        }
        if self.compact_map_out {
            args.push("--compactmapout".to_string());
        }
        args.push("--add".to_string());
        args.push(new_sequences.display().to_string());
        args.push(existing.display().to_string());
        args
    }

    /// Flags for aligning raw sequences from scratch
    pub fn align_args(&self, input: &Path) -> Vec<String> {
        let mut args = self.common_args();
        args.push("--auto".to_string());
        args.push(input.display().to_string());
        args
    }
}

/// trimAl settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CuratorConfig {
    pub program: String,
    /// Minimum fraction of non-gap positions per column (`-gt`)
    pub gap_threshold: f64,
    /// Minimum percentage of the alignment to conserve (`-cons`)
    pub consistency_threshold: u32,
    pub timeout_secs: u64,
}

impl Default for CuratorConfig {
    fn default() -> Self {
        Self {
            program: "trimal".to_string(),
            gap_threshold: 0.8,
            consistency_threshold: 60,
            timeout_secs: 600,
        }
    }
}

/// FastTree settings. FastTree prints nothing usable for progress, so the
/// default table is empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FastTreeConfig {
    pub program: String,
    /// Nucleotide model (`-nt`)
    pub nucleotide: bool,
    pub timeout_secs: u64,
    /// Matched against stderr
    pub milestones: MilestoneTable,
}

impl Default for FastTreeConfig {
    fn default() -> Self {
        Self {
            program: "FastTree".to_string(),
            nucleotide: true,
            timeout_secs: 7200,
            milestones: MilestoneTable::empty(),
        }
    }
}

/// IQ-TREE settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IqTreeConfig {
    pub program: String,
    pub threads: u32,
    pub timeout_secs: u64,
    /// Matched against `<prefix>.log`; `{bootstrap}` is replaced by the
    /// replicate count, and patterns using it are dropped when bootstrap is off
    pub milestones: MilestoneTable,
}

impl Default for IqTreeConfig {
    fn default() -> Self {
        Self {
            program: "iqtree".to_string(),
            threads: 2,
            timeout_secs: 7200,
            milestones: default_table(&[
                ("Generating {bootstrap} samples for ultrafast bootstrap", 65),
                ("INITIALIZING CANDIDATE TREE SET", 73),
                ("OPTIMIZING CANDIDATE TREE SET", 81),
                ("FINALIZING TREE SEARCH", 89),
                ("Computing bootstrap consensus tree", 95),
            ]),
        }
    }
}

/// Tree renderer settings. The renderer is invoked as
/// `program args.. <tree> <output_dir> <outgroup> <alignment>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub enabled: bool,
    pub program: String,
    pub args: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            program: "python3".to_string(),
            args: vec!["tree_set_svg_edit/tree_set_cli.py".to_string()],
            timeout_secs: 300,
        }
    }
}
