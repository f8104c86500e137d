//! Backend selection and best-effort dual persistence.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use rpw_core::config::StorageConfig;

use crate::s3::S3Uploader;
use crate::volume::{detect_volume_base, VolumeWriter};

/// Which backend an artifact's primary location lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    S3,
    Volume,
}

impl StorageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::S3 => "s3",
            Self::Volume => "volume",
        }
    }
}

impl std::fmt::Display for StorageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of persisting one artifact.
///
/// At least one of `url` / `volume_path` is set.  A backend that was
/// configured but failed leaves its error message behind; the artifact
/// still counts as persisted as long as the other backend succeeded.
#[derive(Debug)]
pub struct PersistedArtifact {
    /// The local file this artifact was created from.
    pub source: PathBuf,
    /// S3 URL (presigned or public), when the upload succeeded.
    pub url: Option<String>,
    /// Path of the volume copy, when the copy succeeded.
    pub volume_path: Option<PathBuf>,
    /// Backend of the primary location (`url` wins over `volume_path`).
    pub storage: StorageKind,
    /// Upload failure detail, if the S3 backend was configured and failed.
    pub upload_error: Option<String>,
    /// Copy failure detail, if the volume backend was configured and failed.
    pub fallback_error: Option<String>,
}

impl PersistedArtifact {
    /// The primary location: the URL when available, else the volume path.
    pub fn location(&self) -> String {
        match (&self.url, &self.volume_path) {
            (Some(url), _) => url.clone(),
            (None, Some(path)) => path.display().to_string(),
            (None, None) => String::new(),
        }
    }
}

/// Errors from persisting an artifact.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Neither backend is configured.
    #[error("No storage backend configured")]
    Unconfigured,

    /// Every configured backend failed for this artifact.
    #[error("All storage backends failed for {artifact}: {details}")]
    AllBackendsFailed { artifact: String, details: String },
}

/// Persists artifacts to the configured backends.
///
/// Resolved once per process; both backends may be active at the same
/// time (dual write).
pub struct StorageClient {
    s3: Option<S3Uploader>,
    volume: Option<VolumeWriter>,
}

impl StorageClient {
    /// Resolve backends from configuration.
    ///
    /// The S3 backend exists iff a bucket is configured.  The volume
    /// backend always resolves: detection waits for the serverless
    /// mount and falls back to the workspace path.
    pub async fn from_config(config: &StorageConfig) -> Self {
        let s3 = match &config.s3 {
            Some(s3_config) => Some(S3Uploader::from_config(s3_config).await),
            None => None,
        };

        let base = detect_volume_base(
            config.volume_path.as_deref(),
            Duration::from_secs(config.volume_wait_timeout_secs),
        )
        .await;

        Self {
            s3,
            volume: Some(VolumeWriter::new(base)),
        }
    }

    /// Build a client from explicit backends (used by tests).
    pub fn with_backends(s3: Option<S3Uploader>, volume: Option<VolumeWriter>) -> Self {
        Self { s3, volume }
    }

    /// Primary backend tag for response payloads.
    pub fn primary_kind(&self) -> Option<StorageKind> {
        if self.s3.is_some() {
            Some(StorageKind::S3)
        } else if self.volume.is_some() {
            Some(StorageKind::Volume)
        } else {
            None
        }
    }

    /// Root of the volume backend, when one is configured.
    pub fn volume_root(&self) -> Option<&Path> {
        self.volume.as_ref().map(|v| v.root())
    }

    /// Persist one artifact to every configured backend, best-effort.
    ///
    /// The upload and the fallback copy are attempted independently; a
    /// failure of one does not block the other.  Only when every
    /// configured backend fails is an error returned.
    pub async fn persist(
        &self,
        local_path: &Path,
        job_id: &str,
    ) -> Result<PersistedArtifact, StorageError> {
        if self.s3.is_none() && self.volume.is_none() {
            return Err(StorageError::Unconfigured);
        }

        let mut url = None;
        let mut upload_error = None;
        if let Some(s3) = &self.s3 {
            match s3.persist_file(local_path, job_id).await {
                Ok(location) => url = Some(location),
                Err(e) => {
                    tracing::warn!(
                        artifact = %local_path.display(),
                        error = %e,
                        "S3 upload failed, relying on volume fallback",
                    );
                    upload_error = Some(e.to_string());
                }
            }
        }

        let mut volume_path = None;
        let mut fallback_error = None;
        if let Some(volume) = &self.volume {
            match volume.copy_output(local_path).await {
                Ok(dest) => volume_path = Some(dest),
                Err(e) => {
                    tracing::warn!(
                        artifact = %local_path.display(),
                        error = %e,
                        "Volume copy failed",
                    );
                    fallback_error = Some(e.to_string());
                }
            }
        }

        let storage = match (&url, &volume_path) {
            (Some(_), _) => StorageKind::S3,
            (None, Some(_)) => StorageKind::Volume,
            (None, None) => {
                let details = [&upload_error, &fallback_error]
                    .into_iter()
                    .flatten()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join("; ");
                return Err(StorageError::AllBackendsFailed {
                    artifact: local_path.display().to_string(),
                    details,
                });
            }
        };

        Ok(PersistedArtifact {
            source: local_path.to_path_buf(),
            url,
            volume_path,
            storage,
            upload_error,
            fallback_error,
        })
    }
}
