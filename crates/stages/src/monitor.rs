//! Progress Monitor
//!
//! One monitor runs per active stage. It consumes a [`LineSource`], feeds
//! every new line to the stage's milestone tracker and reports each newly
//! matched milestone through a [`ProgressSink`]. The runner stops it with a
//! cancellation token once the tool has exited; stopping performs one last
//! drain of the source so output written just before exit still counts.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::milestone::MilestoneTracker;
use crate::tail::LineSource;

/// Receiver of progress reports. The only way a monitor touches job state.
pub trait ProgressSink: Send + Sync {
    /// A milestone worth `percent` was reached during step `step`.
    fn report(&self, percent: u8, step: &str);
}

/// Spawns monitors.
pub struct ProgressMonitor;

impl ProgressMonitor {
    /// Start a monitor task on the current runtime.
    pub fn spawn(
        source: Box<dyn LineSource>,
        tracker: MilestoneTracker,
        sink: Arc<dyn ProgressSink>,
        step: impl Into<String>,
    ) -> MonitorHandle {
        let cancel = CancellationToken::new();
        let task = MonitorTask {
            source,
            tracker,
            sink,
            step: step.into(),
            reported: Vec::new(),
        };
        let token = cancel.clone();
        let handle = tokio::spawn(async move { task.run(token).await });

        MonitorHandle { cancel, task: handle }
    }
}

/// Handle to a running monitor.
pub struct MonitorHandle {
    cancel: CancellationToken,
    task: JoinHandle<Vec<u8>>,
}

impl MonitorHandle {
    /// Token observed by the monitor at each suspension point.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether the monitor task has already returned.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the monitor and wait at most `join_timeout` for it.
    ///
    /// Returns the percentages it reported, in order. A monitor that does
    /// not finish in time is aborted and reports nothing.
    pub async fn stop(self, join_timeout: Duration) -> Vec<u8> {
        self.cancel.cancel();
        let mut task = self.task;
        match tokio::time::timeout(join_timeout, &mut task).await {
            Ok(Ok(reported)) => reported,
            Ok(Err(e)) => {
                tracing::warn!("progress monitor task failed: {}", e);
                Vec::new()
            }
            Err(_) => {
                tracing::warn!(
                    "progress monitor did not stop within {}ms, aborting",
                    join_timeout.as_millis()
                );
                task.abort();
                Vec::new()
            }
        }
    }
}

struct MonitorTask {
    source: Box<dyn LineSource>,
    tracker: MilestoneTracker,
    sink: Arc<dyn ProgressSink>,
    step: String,
    reported: Vec<u8>,
}

impl MonitorTask {
    async fn run(mut self, cancel: CancellationToken) -> Vec<u8> {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                next = self.source.next_lines() => Some(next),
            };

            match next {
                None => {
                    match self.source.drain().await {
                        Ok(lines) => self.observe(&lines),
                        Err(e) => tracing::debug!(step = %self.step, "final monitor read failed: {}", e),
                    }
                    break;
                }
                Some(Ok(Some(lines))) => self.observe(&lines),
                Some(Ok(None)) => break,
                Some(Err(e)) => {
                    // Log files are rewritten by some tools; the next poll retries.
                    tracing::warn!(step = %self.step, "progress source read failed: {}", e);
                }
            }

            if self.tracker.is_exhausted() {
                break;
            }
        }

        self.reported
    }

    fn observe(&mut self, lines: &[String]) {
        for line in lines {
            for percent in self.tracker.observe(line) {
                tracing::debug!(step = %self.step, percent, "milestone reached");
                self.sink.report(percent, &self.step);
                self.reported.push(percent);
            }
        }
    }
}
