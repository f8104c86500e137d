//! Job-level error taxonomy.
//!
//! Every failure surfaced in a job response carries a [`JobErrorKind`]
//! plus a human-readable message.  Transient poll failures are retried
//! inside the runner and only become [`JobErrorKind::PollTransport`]
//! once the retry budget is exhausted.

use serde::Serialize;

/// Classification of job failures, serialized into the response payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorKind {
    /// The request payload was malformed (e.g. no workflow present).
    InvalidInput,

    /// ComfyUI did not become reachable within the startup timeout.
    StartupTimeout,

    /// ComfyUI rejected the workflow at submission time.
    Submission,

    /// The workflow did not reach a terminal state before the deadline.
    PollTimeout,

    /// Status polling kept failing at the transport level.
    PollTransport,

    /// ComfyUI reported an execution error for the workflow.
    Execution,

    /// The S3 upload for an artifact failed.
    StorageUpload,

    /// The volume fallback copy for an artifact failed.
    StorageFallback,

    /// Every configured storage backend failed for an artifact.
    Storage,
}

impl JobErrorKind {
    /// Stable string form, matching the serialized representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::StartupTimeout => "startup_timeout",
            Self::Submission => "submission",
            Self::PollTimeout => "poll_timeout",
            Self::PollTransport => "poll_transport",
            Self::Execution => "execution",
            Self::StorageUpload => "storage_upload",
            Self::StorageFallback => "storage_fallback",
            Self::Storage => "storage",
        }
    }
}

impl std::fmt::Display for JobErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error carried in a job response.
#[derive(Debug, Clone, Serialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct JobError {
    /// Machine-readable failure class.
    pub kind: JobErrorKind,
    /// Human-readable description.
    pub message: String,
}

impl JobError {
    pub fn new(kind: JobErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_value(JobErrorKind::PollTimeout).unwrap();
        assert_eq!(json, serde_json::json!("poll_timeout"));
    }

    #[test]
    fn as_str_matches_serialized_form() {
        for kind in [
            JobErrorKind::InvalidInput,
            JobErrorKind::StartupTimeout,
            JobErrorKind::Submission,
            JobErrorKind::PollTimeout,
            JobErrorKind::PollTransport,
            JobErrorKind::Execution,
            JobErrorKind::StorageUpload,
            JobErrorKind::StorageFallback,
            JobErrorKind::Storage,
        ] {
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, serde_json::json!(kind.as_str()));
        }
    }

    #[test]
    fn display_includes_kind_and_message() {
        let err = JobError::new(JobErrorKind::Submission, "node 3 has no class_type");
        assert_eq!(err.to_string(), "submission: node 3 has no class_type");
    }
}
