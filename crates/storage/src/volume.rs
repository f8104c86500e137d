//! Network-volume detection and fallback copies.
//!
//! Serverless workers see the shared volume at `/runpod-volume`; pods
//! mount it under `/workspace`.  The mount can appear a few seconds
//! after container start, so detection waits for it with a bounded
//! poll before falling back.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Serverless mount point of the network volume.
pub const RUNPOD_VOLUME: &str = "/runpod-volume";

/// Fallback base when no network volume is mounted.
pub const WORKSPACE: &str = "/workspace";

/// Subdirectory of the volume that receives output copies.
const OUTPUT_SUBDIR: &str = "comfyui/output";

/// Interval between mount-point existence checks.
const WAIT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Errors from the volume backend.
#[derive(Debug, thiserror::Error)]
pub enum VolumeError {
    #[error("Failed to copy artifact to volume: {0}")]
    Copy(#[from] std::io::Error),
}

/// Wait until `path` exists, up to `timeout`.  Returns whether it does.
pub async fn wait_for_path(path: &Path, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        if path.exists() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return path.exists();
        }
        tokio::time::sleep(WAIT_POLL_INTERVAL).await;
    }
}

/// Resolve the volume base directory.
///
/// An explicit override wins.  Otherwise wait up to `wait_timeout` for
/// the serverless mount at [`RUNPOD_VOLUME`], falling back to
/// [`WORKSPACE`].
pub async fn detect_volume_base(override_path: Option<&Path>, wait_timeout: Duration) -> PathBuf {
    if let Some(path) = override_path {
        tracing::info!(base = %path.display(), "Using configured volume base");
        return path.to_path_buf();
    }

    let runpod = Path::new(RUNPOD_VOLUME);
    if wait_for_path(runpod, wait_timeout).await {
        tracing::info!(base = RUNPOD_VOLUME, "Detected serverless network volume");
        runpod.to_path_buf()
    } else {
        tracing::info!(base = WORKSPACE, "No network volume detected, using workspace");
        PathBuf::from(WORKSPACE)
    }
}

/// Copies artifacts into the volume's output directory.
pub struct VolumeWriter {
    root: PathBuf,
}

impl VolumeWriter {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Volume base this writer copies under.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory that receives the copies.
    pub fn output_dir(&self) -> PathBuf {
        self.root.join(OUTPUT_SUBDIR)
    }

    /// Copy one artifact onto the volume and return the destination.
    ///
    /// The destination name carries a timestamp so outputs from
    /// different jobs never collide.
    pub async fn copy_output(&self, local_path: &Path) -> Result<PathBuf, VolumeError> {
        let dir = self.output_dir();
        tokio::fs::create_dir_all(&dir).await?;

        let timestamp = chrono::Utc::now().timestamp();
        let dest = dir.join(volume_file_name(timestamp, local_path));
        let bytes = tokio::fs::copy(local_path, &dest).await?;

        tracing::debug!(
            dest = %dest.display(),
            size_bytes = bytes,
            "Copied artifact to volume",
        );
        Ok(dest)
    }
}

/// Destination file name for a volume copy: `comfyui-{timestamp}-{file}`.
pub fn volume_file_name(timestamp: i64, local_path: &Path) -> String {
    let file_name = local_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("output");
    format!("comfyui-{timestamp}-{file_name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_carries_timestamp_and_original_name() {
        let name = volume_file_name(1700000000, Path::new("/out/ComfyUI_00001_.png"));
        assert_eq!(name, "comfyui-1700000000-ComfyUI_00001_.png");
    }

    #[tokio::test]
    async fn wait_for_existing_path_returns_immediately() {
        let dir = tempfile::tempdir().unwrap();
        assert!(wait_for_path(dir.path(), Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn wait_for_missing_path_gives_up_after_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("never-appears");
        let start = std::time::Instant::now();

        assert!(!wait_for_path(&missing, Duration::from_millis(100)).await);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn explicit_override_skips_detection() {
        let dir = tempfile::tempdir().unwrap();
        let base = detect_volume_base(Some(dir.path()), Duration::from_secs(0)).await;
        assert_eq!(base, dir.path());
    }

    #[tokio::test]
    async fn copy_creates_output_dir_and_preserves_content() {
        let volume = tempfile::tempdir().unwrap();
        let source_dir = tempfile::tempdir().unwrap();
        let source = source_dir.path().join("img.png");
        std::fs::write(&source, b"image-bytes").unwrap();

        let writer = VolumeWriter::new(volume.path().to_path_buf());
        let dest = writer.copy_output(&source).await.unwrap();

        assert!(dest.starts_with(writer.output_dir()));
        assert_eq!(std::fs::read(&dest).unwrap(), b"image-bytes");
        let name = dest.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("comfyui-"));
        assert!(name.ends_with("-img.png"));
    }

    #[tokio::test]
    async fn copy_of_missing_source_fails() {
        let volume = tempfile::tempdir().unwrap();
        let writer = VolumeWriter::new(volume.path().to_path_buf());

        let result = writer.copy_output(Path::new("/no/such/file.png")).await;
        assert!(result.is_err());
    }
}
