//! Phylo Pipeline command line
//!
//! `run` performs one analysis on a directory of input files and prints the
//! final job record as JSON. `check-config` validates a configuration file.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::Level;

use phylo_pipeline::storage::ConfigService;
use phylo_pipeline::{AnalysisRequest, AnalysisService, JobStatus, TreeTool, WorkflowMode};

#[derive(Parser)]
#[command(name = "phylo-pipeline", version, about = "Phylogenetic analysis pipeline")]
struct Cli {
    /// Configuration file (defaults to ~/.phylo-pipeline/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one analysis to completion
    Run {
        /// Directory holding the input FASTA files
        #[arg(long)]
        job_dir: PathBuf,

        /// Workflow mode: 1 pre-aligned, 2 append to alignment, 3 raw + curation
        #[arg(long, default_value = "2")]
        mode: WorkflowMode,

        /// Tree tool: skip, fasttree or iqtree
        #[arg(long, default_value = "skip")]
        tree_tool: TreeTool,

        /// IQ-TREE ultrafast bootstrap replicates (0 disables)
        #[arg(long, default_value_t = 1000)]
        bootstrap: u32,

        /// Outgroup used when rendering the tree
        #[arg(long, default_value = "")]
        outgroup: String,

        /// Job id (a random one is generated by default)
        #[arg(long)]
        job_id: Option<String>,
    },
    /// Validate configuration and print the effective values
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
        tracing_subscriber::EnvFilter::new(format!("phylo_pipeline={level},phylo_pipeline_stages={level}"))
    });
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = ConfigService::load(cli.config.as_deref())
        .context("failed to load configuration")?
        .into_config();

    match cli.command {
        Command::CheckConfig => {
            let rendered = toml::to_string_pretty(&config).context("failed to render configuration")?;
            println!("{}", rendered);
            Ok(())
        }
        Command::Run {
            job_dir,
            mode,
            tree_tool,
            bootstrap,
            outgroup,
            job_id,
        } => {
            let service = AnalysisService::new(config);
            let job_id = job_id.unwrap_or_else(AnalysisService::new_job_id);

            service.register_upload(&job_id, mode, &outgroup)?;
            let copied = service
                .import_inputs(&job_id, &job_dir)
                .with_context(|| format!("failed to stage inputs from {}", job_dir.display()))?;
            tracing::info!(job_id = %job_id, "staged {} input file(s)", copied);

            let request = AnalysisRequest::new(tree_tool).with_bootstrap(bootstrap);
            service.start_analysis(&job_id, request)?;

            let job = follow(&service, &job_id).await?;
            println!("{}", serde_json::to_string_pretty(&job)?);
            if job.status == JobStatus::Error {
                bail!(job.error.unwrap_or_else(|| "analysis failed".to_string()));
            }
            service.prune_expired().await?;
            Ok(())
        }
    }
}

/// Log progress changes until the job is terminal.
async fn follow(service: &AnalysisService, job_id: &str) -> Result<phylo_pipeline::JobState> {
    let mut last = None;
    loop {
        let job = service.status(job_id)?;
        let current = (job.progress, job.step.clone());
        if last.as_ref() != Some(&current) {
            tracing::info!(
                progress = job.progress,
                step = job.step.as_deref().unwrap_or("-"),
                "{}",
                job.status
            );
            last = Some(current);
        }
        if job.is_terminal() {
            return Ok(job);
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}
