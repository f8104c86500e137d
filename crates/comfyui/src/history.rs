//! Typed view of the ComfyUI `/history/{prompt_id}` response.
//!
//! The history endpoint returns `{"<prompt_id>": {"status": {...},
//! "outputs": {"<node_id>": {"images": [...]}, ...}}}`.  This module
//! extracts the terminal state and the generated files from that shape;
//! unknown fields are ignored so new ComfyUI versions don't break
//! polling.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Lifecycle state of one job, derived from the history endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Submitted but no history entry yet.
    Queued,
    /// History entry exists but has no terminal status.
    Running,
    /// Terminal: the workflow finished successfully.
    Completed,
    /// Terminal: ComfyUI reported an execution error.
    Failed,
    /// Terminal: the worker's execution deadline elapsed first.
    TimedOut,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::TimedOut)
    }
}

/// One prompt's history record.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub status: Option<HistoryStatus>,
    /// Output data per node id.  A `BTreeMap` keeps artifact ordering
    /// deterministic across polls.
    #[serde(default)]
    pub outputs: BTreeMap<String, NodeOutput>,
}

/// The `status` object of a history record.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryStatus {
    #[serde(default)]
    pub status_str: Option<String>,
    #[serde(default)]
    pub completed: Option<bool>,
    /// Raw event log: an array of `[name, data]` pairs.
    #[serde(default)]
    pub messages: serde_json::Value,
}

/// Output block of a single node.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeOutput {
    #[serde(default)]
    pub images: Vec<ImageRef>,
}

/// A generated file as referenced by a save node.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ImageRef {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    /// ComfyUI's output category (`output`, `temp`, ...).
    #[serde(rename = "type", default)]
    pub kind: String,
}

impl ImageRef {
    /// Path of the file relative to the ComfyUI output directory.
    pub fn relative_path(&self) -> PathBuf {
        if self.subfolder.is_empty() {
            PathBuf::from(&self.filename)
        } else {
            PathBuf::from(&self.subfolder).join(&self.filename)
        }
    }
}

/// Extract the history entry for `prompt_id` from a raw history response.
///
/// Returns `None` while the prompt has not yet entered the history
/// (still queued or running its first nodes).
pub fn lookup_entry(history: &serde_json::Value, prompt_id: &str) -> Option<HistoryEntry> {
    let raw = history.get(prompt_id)?;
    match serde_json::from_value(raw.clone()) {
        Ok(entry) => Some(entry),
        Err(e) => {
            tracing::warn!(prompt_id, error = %e, "Malformed history entry");
            None
        }
    }
}

impl HistoryEntry {
    /// Derive the job status from this entry.
    ///
    /// `status.completed == true` or `status_str == "success"` is
    /// terminal success; `status_str == "error"` is terminal failure;
    /// anything else means the prompt is still executing.
    pub fn status(&self) -> JobStatus {
        let Some(status) = &self.status else {
            return JobStatus::Running;
        };

        if status.completed == Some(true) {
            return JobStatus::Completed;
        }

        match status.status_str.as_deref() {
            Some("success") => JobStatus::Completed,
            Some("error") => JobStatus::Failed,
            _ => JobStatus::Running,
        }
    }

    /// Best-effort error description for a failed entry.
    ///
    /// Scans the status message log for an `execution_error` event and
    /// returns its exception message; falls back to a generic string.
    pub fn error_message(&self) -> String {
        let messages = self
            .status
            .as_ref()
            .map(|s| &s.messages)
            .and_then(|m| m.as_array());

        if let Some(messages) = messages {
            for entry in messages {
                let Some(pair) = entry.as_array() else {
                    continue;
                };
                if pair.first().and_then(|n| n.as_str()) != Some("execution_error") {
                    continue;
                }
                let Some(data) = pair.get(1) else { continue };

                let exception = data
                    .get("exception_message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("unknown error");
                let node = data
                    .get("node_id")
                    .and_then(|n| n.as_str())
                    .unwrap_or("unknown");
                return format!("node {node}: {exception}");
            }
        }

        "workflow execution failed".to_string()
    }

    /// All image references across output nodes, in node-id order.
    pub fn output_images(&self) -> Vec<&ImageRef> {
        self.outputs
            .values()
            .flat_map(|node| node.images.iter())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn success_history() -> serde_json::Value {
        json!({
            "abc-123": {
                "prompt": [1, "abc-123", {}, {}, ["9"]],
                "status": {
                    "status_str": "success",
                    "completed": true,
                    "messages": [
                        ["execution_start", {"prompt_id": "abc-123"}],
                        ["execution_success", {"prompt_id": "abc-123"}]
                    ]
                },
                "outputs": {
                    "9": {
                        "images": [
                            {"filename": "ComfyUI_00001_.png", "subfolder": "", "type": "output"}
                        ]
                    }
                }
            }
        })
    }

    #[test]
    fn lookup_finds_entry_by_prompt_id() {
        let history = success_history();
        assert!(lookup_entry(&history, "abc-123").is_some());
        assert!(lookup_entry(&history, "other-id").is_none());
    }

    #[test]
    fn success_entry_is_completed() {
        let entry = lookup_entry(&success_history(), "abc-123").unwrap();
        assert_eq!(entry.status(), JobStatus::Completed);
        assert!(entry.status().is_terminal());
    }

    #[test]
    fn error_entry_is_failed_with_message() {
        let history = json!({
            "abc-123": {
                "status": {
                    "status_str": "error",
                    "completed": false,
                    "messages": [
                        ["execution_start", {"prompt_id": "abc-123"}],
                        ["execution_error", {
                            "prompt_id": "abc-123",
                            "node_id": "3",
                            "exception_type": "RuntimeError",
                            "exception_message": "CUDA out of memory"
                        }]
                    ]
                },
                "outputs": {}
            }
        });

        let entry = lookup_entry(&history, "abc-123").unwrap();
        assert_eq!(entry.status(), JobStatus::Failed);
        assert_eq!(entry.error_message(), "node 3: CUDA out of memory");
    }

    #[test]
    fn entry_without_status_is_running() {
        let history = json!({
            "abc-123": { "outputs": {} }
        });
        let entry = lookup_entry(&history, "abc-123").unwrap();
        assert_eq!(entry.status(), JobStatus::Running);
        assert!(!entry.status().is_terminal());
    }

    #[test]
    fn unknown_status_str_is_running() {
        let history = json!({
            "abc-123": {
                "status": { "status_str": "in_progress", "completed": false, "messages": [] }
            }
        });
        let entry = lookup_entry(&history, "abc-123").unwrap();
        assert_eq!(entry.status(), JobStatus::Running);
    }

    #[test]
    fn failed_entry_without_error_event_gets_generic_message() {
        let history = json!({
            "abc-123": {
                "status": { "status_str": "error", "messages": [] }
            }
        });
        let entry = lookup_entry(&history, "abc-123").unwrap();
        assert_eq!(entry.error_message(), "workflow execution failed");
    }

    #[test]
    fn output_images_are_flattened_in_node_order() {
        let history = json!({
            "abc-123": {
                "status": { "status_str": "success", "completed": true, "messages": [] },
                "outputs": {
                    "12": { "images": [ {"filename": "b.png"} ] },
                    "09": { "images": [ {"filename": "a.png"}, {"filename": "a2.png"} ] },
                    "15": { "images": [] }
                }
            }
        });

        let entry = lookup_entry(&history, "abc-123").unwrap();
        let names: Vec<&str> = entry
            .output_images()
            .iter()
            .map(|i| i.filename.as_str())
            .collect();
        assert_eq!(names, vec!["a.png", "a2.png", "b.png"]);
    }

    #[test]
    fn relative_path_honors_subfolder() {
        let flat = ImageRef {
            filename: "out.png".into(),
            subfolder: String::new(),
            kind: "output".into(),
        };
        assert_eq!(flat.relative_path(), PathBuf::from("out.png"));

        let nested = ImageRef {
            filename: "out.png".into(),
            subfolder: "batch1".into(),
            kind: "output".into(),
        };
        assert_eq!(nested.relative_path(), PathBuf::from("batch1/out.png"));
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(JobStatus::TimedOut).unwrap(),
            json!("timed_out")
        );
    }
}
