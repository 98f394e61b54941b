//! Path Utilities
//!
//! Resolution of the application directory and the per-job file layout.
//! Every file a job reads or writes is named here, so the workflow selector,
//! the orchestrator and the artifact lookup agree on one layout.

use std::path::{Path, PathBuf};

use crate::utils::error::{AppError, AppResult};

/// Get the user's home directory
pub fn home_dir() -> AppResult<PathBuf> {
    dirs::home_dir().ok_or_else(|| AppError::config("Could not determine home directory"))
}

/// Get the application directory (~/.phylo-pipeline/)
pub fn app_dir() -> AppResult<PathBuf> {
    Ok(home_dir()?.join(".phylo-pipeline"))
}

/// Get the default config file path (~/.phylo-pipeline/config.toml)
pub fn config_path() -> AppResult<PathBuf> {
    Ok(app_dir()?.join("config.toml"))
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_dir(path: &Path) -> AppResult<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

// ============================================================================
// Job Layout
// ============================================================================

/// Input file names a client places in a job's upload directory.
pub mod inputs {
    /// Mode 1: an already aligned matrix
    pub const ALIGNED_MATRIX: &str = "aligned_matrix.fasta";
    /// Mode 2: the existing alignment new sequences are added to
    pub const EXISTING_ALIGNMENT: &str = "existing_alignment.fasta";
    /// Mode 2: unaligned sequences to add
    pub const NEW_SEQUENCES: &str = "new_sequences.fasta";
    /// Mode 3: raw, unaligned matrix
    pub const RAW_MATRIX: &str = "raw_matrix.fasta";
    /// Mode 3: optional extra sequences
    pub const USER_SEQUENCES: &str = "user_sequences.fasta";

    /// Every recognised input name.
    pub const ALL: [&str; 5] = [
        ALIGNED_MATRIX,
        EXISTING_ALIGNMENT,
        NEW_SEQUENCES,
        RAW_MATRIX,
        USER_SEQUENCES,
    ];
}

/// Upload and result locations of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPaths {
    job_id: String,
    upload_dir: PathBuf,
    result_dir: PathBuf,
}

impl JobPaths {
    pub fn new(uploads_root: &Path, results_root: &Path, job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            upload_dir: uploads_root.join(job_id),
            result_dir: results_root.join(job_id),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn result_dir(&self) -> &Path {
        &self.result_dir
    }

    /// Path of a client-supplied input file
    pub fn input(&self, name: &str) -> PathBuf {
        self.upload_dir.join(name)
    }

    pub fn aligned_matrix(&self) -> PathBuf {
        self.input(inputs::ALIGNED_MATRIX)
    }

    pub fn existing_alignment(&self) -> PathBuf {
        self.input(inputs::EXISTING_ALIGNMENT)
    }

    pub fn new_sequences(&self) -> PathBuf {
        self.input(inputs::NEW_SEQUENCES)
    }

    pub fn raw_matrix(&self) -> PathBuf {
        self.input(inputs::RAW_MATRIX)
    }

    pub fn user_sequences(&self) -> PathBuf {
        self.input(inputs::USER_SEQUENCES)
    }

    /// Mode 3 merge output
    pub fn merged(&self) -> PathBuf {
        self.upload_dir.join("merged.fasta")
    }

    /// Mode 3 alignment before curation
    pub fn raw_alignment(&self) -> PathBuf {
        self.upload_dir.join("aligned_raw.fasta")
    }

    /// Final alignment produced by modes 2 and 3
    pub fn alignment(&self) -> PathBuf {
        self.upload_dir.join("aligned.fasta")
    }

    /// Canonical tree artifact
    pub fn tree(&self) -> PathBuf {
        self.result_dir.join("tree.nwk")
    }

    /// Output prefix handed to IQ-TREE
    pub fn iqtree_prefix(&self) -> PathBuf {
        self.result_dir.join("iqtree")
    }

    pub fn iqtree_log(&self) -> PathBuf {
        self.result_dir.join("iqtree.log")
    }

    /// Bootstrap consensus tree
    pub fn iqtree_consensus(&self) -> PathBuf {
        self.result_dir.join("iqtree.contree")
    }

    /// Maximum-likelihood tree
    pub fn iqtree_best_tree(&self) -> PathBuf {
        self.result_dir.join("iqtree.treefile")
    }

    /// Create the upload and result directories
    pub fn ensure_dirs(&self) -> AppResult<()> {
        ensure_dir(&self.upload_dir)?;
        ensure_dir(&self.result_dir)?;
        Ok(())
    }
}
