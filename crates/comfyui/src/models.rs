//! Network-volume model setup.
//!
//! Serverless containers ship without model weights; those live on the
//! shared network volume.  Before the server first starts, the local
//! `ComfyUI/models` path is replaced with a symlink to the volume's
//! model directory so the server finds the weights at its usual
//! location.  Failure here is non-fatal: the server simply starts
//! without volume models.

use std::path::{Path, PathBuf};

use crate::api::ComfyUIApi;

/// Candidate model directories on the volume, in priority order.
pub const VOLUME_MODEL_DIRS: &[&str] = &["ComfyUI/models", "models", "comfyui_models"];

/// Model subdirectories reported in the setup summary.
const MODEL_SUBDIRS: &[&str] = &[
    "checkpoints",
    "vae",
    "loras",
    "unet",
    "clip",
    "clip_vision",
    "text_encoders",
    "diffusion_models",
];

/// File extensions counted as model weights.
const MODEL_EXTENSIONS: &[&str] = &["safetensors", "ckpt"];

/// Node class whose model list is refreshed after linking.
const REFRESH_CLASS: &str = "CheckpointLoaderSimple";

/// Errors from linking volume models into the server directory.
#[derive(Debug, thiserror::Error)]
pub enum ModelSetupError {
    /// None of the candidate directories exist on the volume.
    #[error("No model directory found on the volume (searched {searched:?})")]
    NoModelsOnVolume { searched: Vec<PathBuf> },

    /// A filesystem operation failed.
    #[error("Model directory setup failed: {0}")]
    Io(#[from] std::io::Error),

    /// Symlinks are unavailable on this platform.
    #[error("Volume model links are not supported on this platform")]
    Unsupported,
}

/// Outcome of a successful model link.
#[derive(Debug)]
pub struct ModelSetupReport {
    /// The volume directory the link points at.
    pub models_dir: PathBuf,
    /// Model subdirectories that actually contain weight files.
    pub populated_subdirs: Vec<String>,
}

/// Link the volume's model directory into `{comfy_dir}/models`.
///
/// Idempotent: an existing symlink that already points at the volume is
/// kept.  A stale symlink, a plain file, or a local models directory in
/// the way is removed first.
pub fn link_volume_models(
    volume_base: &Path,
    comfy_dir: &Path,
) -> Result<ModelSetupReport, ModelSetupError> {
    let source = find_volume_models(volume_base)?;
    let link = comfy_dir.join("models");

    std::fs::create_dir_all(comfy_dir)?;

    if replace_existing(&link, &source)? {
        create_symlink(&source, &link)?;
        tracing::info!(
            link = %link.display(),
            target = %source.display(),
            "Linked volume models",
        );
    } else {
        tracing::debug!(link = %link.display(), "Volume model link already in place");
    }

    let populated_subdirs = populated_subdirs(&link);
    if populated_subdirs.is_empty() {
        tracing::warn!(target = %source.display(), "Volume models linked but no weight files found");
    } else {
        tracing::info!(subdirs = ?populated_subdirs, "Volume models available");
    }

    Ok(ModelSetupReport {
        models_dir: source,
        populated_subdirs,
    })
}

/// Ask the server to re-enumerate model files after a link change.
///
/// Best-effort: a failed refresh is logged, not escalated — the next
/// cold start picks the models up anyway.
pub async fn refresh_models(api: &ComfyUIApi) -> bool {
    match api.refresh_object_info(REFRESH_CLASS).await {
        Ok(()) => {
            tracing::info!("Model refresh triggered");
            true
        }
        Err(e) => {
            tracing::warn!(error = %e, "Model refresh failed");
            false
        }
    }
}

// ---- private helpers ----

/// Locate the model directory on the volume.
fn find_volume_models(volume_base: &Path) -> Result<PathBuf, ModelSetupError> {
    let candidates: Vec<PathBuf> = VOLUME_MODEL_DIRS
        .iter()
        .map(|dir| volume_base.join(dir))
        .collect();

    candidates
        .iter()
        .find(|path| path.is_dir())
        .cloned()
        .ok_or(ModelSetupError::NoModelsOnVolume {
            searched: candidates,
        })
}

/// Clear whatever occupies the link path.
///
/// Returns `true` when a new symlink must be created, `false` when a
/// correct link is already in place.
fn replace_existing(link: &Path, source: &Path) -> Result<bool, ModelSetupError> {
    let Ok(metadata) = std::fs::symlink_metadata(link) else {
        return Ok(true); // nothing there yet
    };

    if metadata.is_symlink() {
        // A broken symlink fails to canonicalize and is removed below.
        let points_at_source = match (link.canonicalize(), source.canonicalize()) {
            (Ok(actual), Ok(expected)) => actual == expected,
            _ => false,
        };
        if points_at_source {
            return Ok(false);
        }
        tracing::info!(link = %link.display(), "Removing stale model symlink");
        std::fs::remove_file(link)?;
    } else if metadata.is_dir() {
        tracing::info!(link = %link.display(), "Removing local models directory");
        std::fs::remove_dir_all(link)?;
    } else {
        std::fs::remove_file(link)?;
    }

    Ok(true)
}

#[cfg(unix)]
fn create_symlink(source: &Path, link: &Path) -> Result<(), ModelSetupError> {
    std::os::unix::fs::symlink(source, link)?;
    Ok(())
}

#[cfg(not(unix))]
fn create_symlink(_source: &Path, _link: &Path) -> Result<(), ModelSetupError> {
    Err(ModelSetupError::Unsupported)
}

/// Model subdirectories under `models_dir` that contain weight files.
fn populated_subdirs(models_dir: &Path) -> Vec<String> {
    MODEL_SUBDIRS
        .iter()
        .filter(|sub| {
            let dir = models_dir.join(sub);
            std::fs::read_dir(dir)
                .map(|entries| {
                    entries.flatten().any(|entry| {
                        entry
                            .path()
                            .extension()
                            .and_then(|ext| ext.to_str())
                            .map(|ext| MODEL_EXTENSIONS.contains(&ext))
                            .unwrap_or(false)
                    })
                })
                .unwrap_or(false)
        })
        .map(|sub| sub.to_string())
        .collect()
}
