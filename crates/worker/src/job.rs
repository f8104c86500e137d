//! Job request and response payloads.
//!
//! The shapes follow the serverless platform conventions: a request is
//! `{"id": ..., "input": {"workflow": {...}}}`, and heartbeat probes
//! arrive as `{"type": "heartbeat"}`.  Responses carry per-artifact
//! results plus a flat `links` list for older clients.

use serde::{Deserialize, Serialize};

use rpw_comfyui::history::JobStatus;
use rpw_core::error::JobError;
use rpw_storage::StorageKind;

/// One incoming job request.
#[derive(Debug, Clone, Deserialize)]
pub struct JobRequest {
    /// Platform-assigned job id; generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    /// Event type; only `"heartbeat"` is special-cased.
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub input: Option<JobInput>,
}

impl JobRequest {
    pub fn is_heartbeat(&self) -> bool {
        self.kind.as_deref() == Some("heartbeat")
    }

    /// The workflow graph, if the request carries one.
    pub fn workflow(&self) -> Option<&serde_json::Value> {
        self.input.as_ref()?.workflow.as_ref()
    }
}

/// The `input` object of a job request.
#[derive(Debug, Clone, Deserialize)]
pub struct JobInput {
    #[serde(default)]
    pub workflow: Option<serde_json::Value>,
}

/// Persistence outcome for one output file.
#[derive(Debug, Serialize)]
pub struct ArtifactResult {
    /// Original output file name.
    pub filename: String,
    /// S3 URL (presigned or public), when uploaded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Volume copy path, when copied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Backend of the primary location; absent when nothing succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageKind>,
    /// Failure detail: partial (one backend down) or total.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
}

impl ArtifactResult {
    /// Primary location of this artifact, if any backend succeeded.
    pub fn location(&self) -> Option<String> {
        self.url.clone().or_else(|| self.path.clone())
    }
}

/// Successful job response.
#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub id: String,
    pub status: JobStatus,
    pub prompt_id: String,
    /// Per-artifact results, in output order.
    pub images: Vec<ArtifactResult>,
    /// Flat list of primary locations (backwards-compatible field).
    pub links: Vec<String>,
    /// Number of artifacts that were persisted on at least one backend.
    pub total_images: usize,
    /// Primary storage backend of this worker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageKind>,
}

/// Failed job response.
#[derive(Debug, Serialize)]
pub struct JobErrorResponse {
    pub id: String,
    pub status: JobStatus,
    pub error: JobError,
}

/// Heartbeat acknowledgement.
#[derive(Debug, Serialize)]
pub struct HeartbeatResponse {
    pub status: &'static str,
}

/// Everything `/run` can answer with.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum RunOutcome {
    Heartbeat(HeartbeatResponse),
    Completed(JobResponse),
    Failed(JobErrorResponse),
}

impl RunOutcome {
    pub fn heartbeat() -> Self {
        Self::Heartbeat(HeartbeatResponse { status: "ok" })
    }

    /// Build a failure outcome; poll timeouts are tagged `timed_out`.
    pub fn failed(id: String, error: JobError) -> Self {
        let status = match error.kind {
            rpw_core::error::JobErrorKind::PollTimeout => JobStatus::TimedOut,
            _ => JobStatus::Failed,
        };
        Self::Failed(JobErrorResponse { id, status, error })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpw_core::error::JobErrorKind;
    use serde_json::json;

    #[test]
    fn heartbeat_request_is_detected() {
        let request: JobRequest = serde_json::from_value(json!({"type": "heartbeat"})).unwrap();
        assert!(request.is_heartbeat());
        assert!(request.workflow().is_none());
    }

    #[test]
    fn workflow_is_extracted_from_input() {
        let request: JobRequest = serde_json::from_value(json!({
            "id": "job-1",
            "input": { "workflow": { "3": { "class_type": "KSampler", "inputs": {} } } }
        }))
        .unwrap();

        assert!(!request.is_heartbeat());
        assert!(request.workflow().is_some());
        assert_eq!(request.id.as_deref(), Some("job-1"));
    }

    #[test]
    fn request_without_input_has_no_workflow() {
        let request: JobRequest = serde_json::from_value(json!({"id": "job-1"})).unwrap();
        assert!(request.workflow().is_none());
    }

    #[test]
    fn heartbeat_serializes_to_status_ok() {
        let json = serde_json::to_value(RunOutcome::heartbeat()).unwrap();
        assert_eq!(json, json!({"status": "ok"}));
    }

    #[test]
    fn poll_timeout_failure_is_tagged_timed_out() {
        let outcome = RunOutcome::failed(
            "job-1".into(),
            JobError::new(JobErrorKind::PollTimeout, "deadline elapsed"),
        );
        let json = serde_json::to_value(outcome).unwrap();
        assert_eq!(json["status"], json!("timed_out"));
        assert_eq!(json["error"]["kind"], json!("poll_timeout"));
    }

    #[test]
    fn other_failures_are_tagged_failed() {
        let outcome = RunOutcome::failed(
            "job-1".into(),
            JobError::new(JobErrorKind::Submission, "rejected"),
        );
        let json = serde_json::to_value(outcome).unwrap();
        assert_eq!(json["status"], json!("failed"));
    }

    #[test]
    fn artifact_location_prefers_url() {
        let artifact = ArtifactResult {
            filename: "a.png".into(),
            url: Some("https://example/a.png".into()),
            path: Some("/volume/a.png".into()),
            storage: Some(StorageKind::S3),
            error: None,
        };
        assert_eq!(artifact.location().as_deref(), Some("https://example/a.png"));
    }
}
