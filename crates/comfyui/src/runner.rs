//! Submit-and-poll execution of a single workflow.
//!
//! [`JobRunner::run`] posts the workflow to `/prompt` and then polls
//! `/history/{prompt_id}` until the prompt reaches a terminal state or
//! the execution deadline elapses.  Transport-level poll failures are
//! transient: they are retried up to a configured number of consecutive
//! attempts before the job is failed.
//!
//! The deadline aborts only the poll loop.  The server keeps executing
//! the abandoned prompt; the long-lived process is never torn down here.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use rpw_core::config::JobConfig;
use rpw_core::workflow;

use crate::api::ComfyUIApi;
use crate::history::{lookup_entry, HistoryEntry, JobStatus};

/// File extensions considered job outputs by the fallback scan.
const OUTPUT_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "gif", "mp4", "webm"];

/// Errors from running one workflow.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// The server rejected the workflow (or the submit call failed).
    #[error("Workflow submission failed: {0}")]
    Submission(String),

    /// No terminal state before the execution deadline.
    #[error("Workflow execution timed out after {waited_secs}s")]
    PollTimeout { waited_secs: u64 },

    /// Polling failed repeatedly at the transport level.
    #[error("History polling failed {attempts} times in a row: {last_error}")]
    PollTransport { attempts: u32, last_error: String },

    /// ComfyUI reported an execution error.
    #[error("Workflow execution failed: {0}")]
    Execution(String),
}

/// A workflow that reached terminal success.
#[derive(Debug)]
pub struct CompletedJob {
    pub prompt_id: String,
    pub entry: HistoryEntry,
    /// Wall-clock time the job was submitted; lower bound for the
    /// fallback output scan.
    pub started_at: SystemTime,
}

/// Drives one workflow from submission to a terminal state.
pub struct JobRunner<'a> {
    api: &'a ComfyUIApi,
    config: &'a JobConfig,
}

impl<'a> JobRunner<'a> {
    pub fn new(api: &'a ComfyUIApi, config: &'a JobConfig) -> Self {
        Self { api, config }
    }

    /// Submit the workflow and poll until it completes.
    pub async fn run(&self, workflow_graph: &serde_json::Value) -> Result<CompletedJob, RunnerError> {
        let client_id = uuid::Uuid::new_v4().to_string();
        let started_at = SystemTime::now();

        tracing::info!(
            client_id = %client_id,
            nodes = workflow::node_count(workflow_graph),
            save_nodes = workflow::save_node_ids(workflow_graph).len(),
            "Submitting workflow",
        );

        let submitted = self
            .api
            .submit_workflow(workflow_graph, &client_id)
            .await
            .map_err(|e| RunnerError::Submission(e.to_string()))?;

        tracing::info!(
            prompt_id = %submitted.prompt_id,
            queue_position = submitted.number,
            "Workflow queued",
        );

        let entry = self.poll_until_terminal(&submitted.prompt_id).await?;

        Ok(CompletedJob {
            prompt_id: submitted.prompt_id,
            entry,
            started_at,
        })
    }

    // ---- private helpers ----

    /// Poll the history endpoint until a terminal state or the deadline.
    async fn poll_until_terminal(&self, prompt_id: &str) -> Result<HistoryEntry, RunnerError> {
        let deadline = Duration::from_secs(self.config.execution_timeout_secs);
        let interval = Duration::from_secs(self.config.poll_interval_secs.max(1));
        let start = Instant::now();
        let mut consecutive_failures: u32 = 0;

        loop {
            match self.api.get_history(prompt_id).await {
                Ok(history) => {
                    consecutive_failures = 0;

                    if let Some(entry) = lookup_entry(&history, prompt_id) {
                        match entry.status() {
                            JobStatus::Completed => {
                                tracing::info!(prompt_id, "Workflow completed");
                                return Ok(entry);
                            }
                            JobStatus::Failed => {
                                let message = entry.error_message();
                                tracing::error!(prompt_id, error = %message, "Workflow failed");
                                return Err(RunnerError::Execution(message));
                            }
                            _ => {
                                tracing::debug!(
                                    prompt_id,
                                    elapsed_secs = start.elapsed().as_secs(),
                                    "Workflow still running",
                                );
                            }
                        }
                    } else {
                        tracing::debug!(prompt_id, "Workflow not yet in history");
                    }
                }
                Err(e) => {
                    consecutive_failures += 1;
                    tracing::warn!(
                        prompt_id,
                        attempt = consecutive_failures,
                        error = %e,
                        "History poll failed",
                    );
                    if consecutive_failures > self.config.poll_max_transport_errors {
                        return Err(RunnerError::PollTransport {
                            attempts: consecutive_failures,
                            last_error: e.to_string(),
                        });
                    }
                }
            }

            let elapsed = start.elapsed();
            if elapsed >= deadline {
                return Err(RunnerError::PollTimeout {
                    waited_secs: elapsed.as_secs(),
                });
            }

            // Never sleep past the deadline; the timeout property is
            // "ceiling plus at most one poll interval".
            tokio::time::sleep(interval.min(deadline - elapsed)).await;
        }
    }
}

impl CompletedJob {
    /// Resolve the job's output files on disk.
    ///
    /// Primary source is the history entry's image references, resolved
    /// against `output_dir` and filtered to files that actually exist.
    /// When that yields nothing (some custom save nodes do not report
    /// their files), falls back to scanning `output_dir` for outputs
    /// written after the job started.
    pub fn collect_artifacts(&self, output_dir: &Path) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = Vec::new();

        for image in self.entry.output_images() {
            let path = output_dir.join(image.relative_path());
            if path.is_file() {
                paths.push(path);
            } else {
                tracing::warn!(path = %path.display(), "Referenced output file missing on disk");
            }
        }

        if paths.is_empty() {
            tracing::info!(
                output_dir = %output_dir.display(),
                "No referenced outputs found, scanning for recent files",
            );
            paths = scan_recent_outputs(output_dir, self.started_at);
        }

        paths
    }
}

/// Files in `dir` with an output extension, modified at or after `since`.
///
/// Non-recursive; results are sorted by file name for determinism.
pub fn scan_recent_outputs(dir: &Path, since: SystemTime) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut paths: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| OUTPUT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        })
        .filter(|path| {
            std::fs::metadata(path)
                .and_then(|m| m.modified())
                .map(|mtime| mtime >= since)
                .unwrap_or(false)
        })
        .collect();

    paths.sort();
    paths
}
