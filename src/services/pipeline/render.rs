//! Tree Rendering
//!
//! Rendering turns a finished tree into figures. It is a side effect of a
//! successful job: the orchestrator logs a failed render and moves on.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::models::config::RendererConfig;
use crate::utils::error::{AppError, AppResult};

/// Everything a renderer is told about a finished job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    pub tree_file: PathBuf,
    pub output_dir: PathBuf,
    pub outgroup: String,
    pub alignment_file: PathBuf,
}

/// Produces figures for a finished tree
#[async_trait]
pub trait TreeRenderer: Send + Sync {
    async fn render(&self, request: &RenderRequest) -> AppResult<()>;
}

/// Runs an external rendering script.
#[derive(Debug, Clone)]
pub struct ScriptRenderer {
    config: RendererConfig,
}

impl ScriptRenderer {
    pub fn new(config: RendererConfig) -> Self {
        Self { config }
    }

    fn build_args(&self, request: &RenderRequest) -> Vec<String> {
        let mut args = self.config.args.clone();
        args.push(request.tree_file.display().to_string());
        args.push(request.output_dir.display().to_string());
        args.push(request.outgroup.clone());
        args.push(request.alignment_file.display().to_string());
        args
    }
}

#[async_trait]
impl TreeRenderer for ScriptRenderer {
    async fn render(&self, request: &RenderRequest) -> AppResult<()> {
        let args = self.build_args(request);
        tracing::debug!("render: {} {}", self.config.program, args.join(" "));

        let output = Command::new(&self.config.program)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                AppError::command(format!(
                    "failed to start renderer '{}': {}",
                    self.config.program, e
                ))
            })?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(10).collect();
            let tail: Vec<&str> = tail.into_iter().rev().collect();
            Err(AppError::tool_failure("renderer", output.status.code(), tail.join("\n")))
        }
    }
}

/// Renderer used when rendering is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRenderer;

#[async_trait]
impl TreeRenderer for NoopRenderer {
    async fn render(&self, request: &RenderRequest) -> AppResult<()> {
        tracing::debug!("rendering disabled, skipping {}", request.tree_file.display());
        Ok(())
    }
}
