//! Stage Runner
//!
//! Runs one stage descriptor to a terminal [`StageOutcome`]:
//!
//! 1. Start the progress monitor bound to the stage (if it has milestones)
//! 2. Spawn the tool with stdout streamed into the destination file and
//!    stderr pumped line by line into a bounded tail (and to the monitor)
//! 3. Wait for exit up to the stage timeout, killing the tool and every
//!    process it started on expiry
//! 4. Stop the monitor with a bounded join and classify the exit
//!
//! Output is never buffered whole in memory; alignments can run for hours
//! and produce large files.

use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use phylo_pipeline_core::{CoreError, CoreResult};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::models::{ProgressSource, StageAction, StageDescriptor, StageOutcome, ToolCommand};
use crate::monitor::{MonitorHandle, ProgressMonitor, ProgressSink};
use crate::tail::{ChannelTail, LogFileTail};

/// Stage runner configuration
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Poll interval for log-file progress sources
    pub log_poll_interval: Duration,
    /// Bounded wait when stopping a monitor
    pub monitor_join_timeout: Duration,
    /// Bounded wait for output pumps after the tool exited
    pub drain_timeout: Duration,
    /// Number of output lines kept for failure messages
    pub tail_lines: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            log_poll_interval: Duration::from_secs(2),
            monitor_join_timeout: Duration::from_secs(1),
            drain_timeout: Duration::from_secs(10),
            tail_lines: 40,
        }
    }
}

/// Runs stage descriptors.
#[derive(Debug, Clone, Default)]
pub struct StageRunner {
    config: RunnerConfig,
}

impl StageRunner {
    /// Create a runner with the given configuration
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    /// Get the runner configuration
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run a stage to completion.
    ///
    /// Tool failures and timeouts are outcomes, not errors. `Err` means the
    /// stage could not be run at all (missing executable, unwritable output).
    pub async fn run(&self, stage: &StageDescriptor, sink: Arc<dyn ProgressSink>) -> CoreResult<StageOutcome> {
        let started = Instant::now();
        tracing::info!(stage = %stage.kind, tool = %stage.tool, "stage started");

        let outcome = match &stage.action {
            StageAction::Command(cmd) => self.run_command(stage, cmd, sink).await?,
            StageAction::Concatenate { inputs, output } => {
                match tokio::time::timeout(stage.timeout, concatenate(inputs, output)).await {
                    Ok(result) => {
                        result?;
                        StageOutcome::Success
                    }
                    Err(_) => StageOutcome::Timeout { limit: stage.timeout },
                }
            }
        };

        tracing::info!(
            stage = %stage.kind,
            tool = %stage.tool,
            elapsed_ms = started.elapsed().as_millis() as u64,
            success = outcome.is_success(),
            "stage finished"
        );
        Ok(outcome)
    }

    async fn run_command(
        &self,
        stage: &StageDescriptor,
        cmd: &ToolCommand,
        sink: Arc<dyn ProgressSink>,
    ) -> CoreResult<StageOutcome> {
        tracing::debug!(stage = %stage.kind, "{}", cmd.command_line());

        // Create the destination up front so an unwritable path fails before spawning.
        let destination = match cmd.stdout {
            Some(ref path) => Some(File::create(path).await.map_err(|e| {
                CoreError::command(format!("cannot create {}: {}", path.display(), e))
            })?),
            None => None,
        };

        let (stream_tx, monitor) = self.start_monitor(stage, sink);

        let mut command = Command::new(&cmd.program);
        command
            .args(&cmd.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Wrappers such as `mafft` do their work in child binaries; a group
        // of their own lets a timeout reach all of them.
        #[cfg(unix)]
        command.process_group(0);
        if let Some(ref dir) = cmd.working_dir {
            command.current_dir(dir);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                if let Some(monitor) = monitor {
                    monitor.stop(self.config.monitor_join_timeout).await;
                }
                return Err(spawn_error(&stage.tool, &cmd.program, e));
            }
        };

        let stdout_task: Option<JoinHandle<io::Result<OutputTail>>> = child.stdout.take().map(|stdout| {
            let capacity = self.config.tail_lines;
            match destination {
                Some(file) => tokio::spawn(copy_to_file(stdout, file)),
                None => tokio::spawn(pump_lines(stdout, None, capacity)),
            }
        });
        let stderr_task: Option<JoinHandle<io::Result<OutputTail>>> = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(pump_lines(stderr, stream_tx, self.config.tail_lines)));

        let status = match tokio::time::timeout(stage.timeout, child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                if let Some(monitor) = monitor {
                    monitor.stop(self.config.monitor_join_timeout).await;
                }
                return Err(CoreError::command(format!(
                    "failed to wait for {}: {}",
                    stage.tool, e
                )));
            }
            Err(_) => {
                tracing::warn!(
                    stage = %stage.kind,
                    tool = %stage.tool,
                    "timed out after {}s, killing",
                    stage.timeout.as_secs()
                );
                kill_tool(&mut child, &stage.tool).await;
                None
            }
        };

        let stdout = self.collect(stdout_task).await;
        let stderr = self.collect(stderr_task).await;

        if let Some(monitor) = monitor {
            let reported = monitor.stop(self.config.monitor_join_timeout).await;
            tracing::debug!(stage = %stage.kind, milestones = reported.len(), "monitor stopped");
        }

        let Some(status) = status else {
            return Ok(StageOutcome::Timeout { limit: stage.timeout });
        };

        // A destination that could not be fully written is not a usable result.
        let stdout = stdout?;
        let stderr = stderr?;

        if status.success() {
            return Ok(StageOutcome::Success);
        }

        let tail = if stderr.is_empty() {
            stdout.into_text()
        } else {
            stderr.into_text()
        };
        Ok(StageOutcome::ToolFailure {
            exit_code: status.code(),
            tail,
        })
    }

    fn start_monitor(
        &self,
        stage: &StageDescriptor,
        sink: Arc<dyn ProgressSink>,
    ) -> (Option<mpsc::UnboundedSender<String>>, Option<MonitorHandle>) {
        if !stage.is_monitored() {
            return (None, None);
        }

        match &stage.progress {
            ProgressSource::None => (None, None),
            ProgressSource::Stderr => {
                let (tx, rx) = mpsc::unbounded_channel();
                let handle = ProgressMonitor::spawn(
                    Box::new(ChannelTail::new(rx)),
                    stage.milestones.tracker(),
                    sink,
                    stage.step.clone(),
                );
                (Some(tx), Some(handle))
            }
            ProgressSource::LogFile(path) => {
                let handle = ProgressMonitor::spawn(
                    Box::new(LogFileTail::new(path, self.config.log_poll_interval)),
                    stage.milestones.tracker(),
                    sink,
                    stage.step.clone(),
                );
                (None, Some(handle))
            }
        }
    }

    /// Wait for an output pump, giving up after the drain timeout. A pump
    /// still running at that point (a grandchild holding the pipe open) is
    /// aborted and contributes an empty tail.
    async fn collect(&self, task: Option<JoinHandle<io::Result<OutputTail>>>) -> CoreResult<OutputTail> {
        let Some(mut task) = task else {
            return Ok(OutputTail::new(0));
        };
        match tokio::time::timeout(self.config.drain_timeout, &mut task).await {
            Ok(Ok(result)) => result.map_err(CoreError::from),
            Ok(Err(e)) => Err(CoreError::internal(format!("output pump failed: {}", e))),
            Err(_) => {
                task.abort();
                Ok(OutputTail::new(0))
            }
        }
    }
}

/// Kill a timed out tool. On unix the whole process group goes first, then
/// the direct child is killed and reaped.
async fn kill_tool(child: &mut Child, tool: &str) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            tracing::warn!(tool, "failed to kill process group {}: {}", pid, e);
        }
    }
    if let Err(e) = child.kill().await {
        tracing::warn!(tool, "failed to kill timed out process: {}", e);
    }
}

fn spawn_error(tool: &str, program: &str, e: io::Error) -> CoreError {
    if e.kind() == io::ErrorKind::NotFound {
        CoreError::command(format!("{} executable '{}' not found in PATH", tool, program))
    } else {
        CoreError::command(format!("failed to start {}: {}", tool, e))
    }
}

// ============================================================================
// Output Capture
// ============================================================================

/// Last lines of a captured stream.
#[derive(Debug, Default)]
struct OutputTail {
    lines: VecDeque<String>,
    capacity: usize,
}

impl OutputTail {
    fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.min(256)),
            capacity,
        }
    }

    fn push(&mut self, line: String) {
        if self.capacity == 0 {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    fn is_empty(&self) -> bool {
        self.lines.iter().all(|l| l.trim().is_empty())
    }

    fn into_text(self) -> String {
        Vec::from(self.lines).join("\n")
    }
}

async fn copy_to_file<R>(mut reader: R, mut file: File) -> io::Result<OutputTail>
where
    R: AsyncRead + Unpin,
{
    tokio::io::copy(&mut reader, &mut file).await?;
    file.flush().await?;
    Ok(OutputTail::new(0))
}

async fn pump_lines<R>(
    reader: R,
    forward: Option<mpsc::UnboundedSender<String>>,
    capacity: usize,
) -> io::Result<OutputTail>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut tail = OutputTail::new(capacity);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf)
            .trim_end_matches(['\n', '\r'])
            .to_string();
        if let Some(ref tx) = forward {
            // The monitor may already be done; the tail is still wanted.
            let _ = tx.send(line.clone());
        }
        tail.push(line);
    }

    Ok(tail)
}

// ============================================================================
// Merge
// ============================================================================

/// Stream `inputs` in order into `output` and return the bytes written.
///
/// Content is copied as-is. A newline is inserted between two inputs only
/// when the earlier one does not end with one, so records never fuse.
pub async fn concatenate(inputs: &[PathBuf], output: &Path) -> CoreResult<u64> {
    let mut out = File::create(output).await?;
    let mut written = 0u64;
    let mut last_byte: Option<u8> = None;
    let mut buf = vec![0u8; 64 * 1024];

    for input in inputs {
        if matches!(last_byte, Some(b) if b != b'\n') {
            out.write_all(b"\n").await?;
            written += 1;
        }

        let mut file = File::open(input).await.map_err(|e| {
            CoreError::command(format!("cannot read merge input {}: {}", input.display(), e))
        })?;
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            out.write_all(&buf[..n]).await?;
            written += n as u64;
            last_byte = Some(buf[n - 1]);
        }
    }

    out.flush().await?;
    Ok(written)
}
