//! Worker configuration loaded from environment variables.
//!
//! All knobs have defaults suitable for the standard serverless image
//! (ComfyUI vendored under `/workspace/ComfyUI`, worker API on port
//! 8000).  Override via environment variables; `.env` files are loaded
//! by the binary before [`WorkerConfig::from_env`] runs.

use std::path::PathBuf;

/// Values accepted as `true` by boolean environment variables.
///
/// Matches the conventions of the deployment scripts: `1`, `true`,
/// `yes`, `on` (case-insensitive).  Everything else is `false`.
pub fn is_truthy(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn bool_env(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(value) => is_truthy(&value),
        Err(_) => default,
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: &str) -> T
where
    T::Err: std::fmt::Display,
{
    let value = env_or(key, default);
    value
        .parse()
        .unwrap_or_else(|e| panic!("{key} must be a valid value: {e}"))
}

/// Top-level worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub server: ServerConfig,
    pub comfyui: ComfyUIConfig,
    pub job: JobConfig,
    pub storage: StorageConfig,
}

impl WorkerConfig {
    /// Load the full configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            server: ServerConfig::from_env(),
            comfyui: ComfyUIConfig::from_env(),
            job: JobConfig::from_env(),
            storage: StorageConfig::from_env(),
        }
    }
}

/// HTTP surface of the worker itself.
///
/// | Env Var | Default   |
/// |---------|-----------|
/// | `HOST`  | `0.0.0.0` |
/// | `PORT`  | `8000`    |
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            host: env_or("HOST", "0.0.0.0"),
            port: parse_env("PORT", "8000"),
        }
    }
}

/// Location and startup parameters of the vendored ComfyUI server.
///
/// | Env Var                        | Default                           |
/// |--------------------------------|-----------------------------------|
/// | `COMFYUI_HOST`                 | `127.0.0.1`                       |
/// | `COMFYUI_PORT`                 | `8188`                            |
/// | `COMFYUI_COMMAND`              | `python`                          |
/// | `COMFYUI_MAIN_SCRIPT`          | `/workspace/ComfyUI/main.py`      |
/// | `COMFYUI_DIR`                  | `/workspace/ComfyUI`              |
/// | `COMFYUI_OUTPUT_DIR`           | `/workspace/ComfyUI/output`       |
/// | `COMFYUI_EXTRA_ARGS`           | `--normalvram --preview-method auto --verbose --cache-lru 3` |
/// | `COMFYUI_STARTUP_TIMEOUT_SECS` | `60`                              |
/// | `COMFYUI_STARTUP_POLL_SECS`    | `2`                               |
/// | `COMFYUI_REFRESH_MODELS`       | `true`                            |
#[derive(Debug, Clone)]
pub struct ComfyUIConfig {
    /// Address ComfyUI listens on (also passed as `--listen`).
    pub host: String,
    pub port: u16,
    /// Interpreter used to launch the server.
    pub command: String,
    /// Entry-point script handed to the interpreter.
    pub main_script: PathBuf,
    /// Working directory for the child process.
    pub working_dir: PathBuf,
    /// Directory ComfyUI writes generated files into.
    pub output_dir: PathBuf,
    /// Additional startup arguments, whitespace-separated in the env var.
    pub extra_args: Vec<String>,
    /// Ceiling on the readiness wait after spawning.
    pub startup_timeout_secs: u64,
    /// Interval between readiness probes.
    pub startup_poll_interval_secs: u64,
    /// Trigger a model rescan after volume models are linked in.
    pub refresh_models: bool,
}

impl ComfyUIConfig {
    pub fn from_env() -> Self {
        let extra_args = env_or(
            "COMFYUI_EXTRA_ARGS",
            "--normalvram --preview-method auto --verbose --cache-lru 3",
        )
        .split_whitespace()
        .map(str::to_string)
        .collect();

        Self {
            host: env_or("COMFYUI_HOST", "127.0.0.1"),
            port: parse_env("COMFYUI_PORT", "8188"),
            command: env_or("COMFYUI_COMMAND", "python"),
            main_script: PathBuf::from(env_or("COMFYUI_MAIN_SCRIPT", "/workspace/ComfyUI/main.py")),
            working_dir: PathBuf::from(env_or("COMFYUI_DIR", "/workspace/ComfyUI")),
            output_dir: PathBuf::from(env_or("COMFYUI_OUTPUT_DIR", "/workspace/ComfyUI/output")),
            extra_args,
            startup_timeout_secs: parse_env("COMFYUI_STARTUP_TIMEOUT_SECS", "60"),
            startup_poll_interval_secs: parse_env("COMFYUI_STARTUP_POLL_SECS", "2"),
            refresh_models: bool_env("COMFYUI_REFRESH_MODELS", true),
        }
    }

    /// Base HTTP URL of the ComfyUI API, e.g. `http://127.0.0.1:8188`.
    pub fn api_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Per-job execution parameters.
///
/// | Env Var                    | Default |
/// |----------------------------|---------|
/// | `WORKFLOW_TIMEOUT_SECS`    | `1200`  |
/// | `WORKFLOW_POLL_SECS`       | `5`     |
/// | `POLL_MAX_TRANSPORT_ERRORS`| `3`     |
/// | `RANDOMIZE_SEEDS`          | `true`  |
/// | `DEBUG_LOG_URLS`           | `false` |
/// | `CLEANUP_OUTPUTS`          | `false` |
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Overall ceiling for one workflow execution.  Video workflows run
    /// for tens of minutes, so the default is generous.
    pub execution_timeout_secs: u64,
    /// Interval between history polls.
    pub poll_interval_secs: u64,
    /// Consecutive transport failures tolerated before giving up.
    pub poll_max_transport_errors: u32,
    /// Replace recognized seed inputs with fresh random values.
    pub randomize_seeds: bool,
    /// Log persisted URLs/paths at info level (they may be sensitive).
    pub debug_log_urls: bool,
    /// Delete local output files after they have been persisted.
    pub cleanup_outputs: bool,
}

impl JobConfig {
    pub fn from_env() -> Self {
        Self {
            execution_timeout_secs: parse_env("WORKFLOW_TIMEOUT_SECS", "1200"),
            poll_interval_secs: parse_env("WORKFLOW_POLL_SECS", "5"),
            poll_max_transport_errors: parse_env("POLL_MAX_TRANSPORT_ERRORS", "3"),
            randomize_seeds: bool_env("RANDOMIZE_SEEDS", true),
            debug_log_urls: bool_env("DEBUG_LOG_URLS", false),
            cleanup_outputs: bool_env("CLEANUP_OUTPUTS", false),
        }
    }
}

/// S3-compatible upload target.
///
/// Enabled when `S3_BUCKET` is set.  Explicit credentials are optional:
/// without them the ambient AWS credential chain (instance role, shared
/// config) is used.
///
/// | Env Var                  | Default     |
/// |--------------------------|-------------|
/// | `S3_BUCKET`              | *(unset)*   |
/// | `S3_REGION`              | `us-east-1` |
/// | `S3_ENDPOINT_URL`        | *(unset)*   |
/// | `S3_ACCESS_KEY_ID`       | *(unset)*   |
/// | `S3_SECRET_ACCESS_KEY`   | *(unset)*   |
/// | `S3_PUBLIC_BASE_URL`     | *(unset)*   |
/// | `S3_KEY_PREFIX`          | `outputs`   |
/// | `S3_PRESIGN_EXPIRY_SECS` | `3600`      |
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for S3-compatible providers; path-style
    /// addressing is always used.
    pub endpoint_url: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// When set, object URLs are `{public_base_url}/{key}` instead of
    /// presigned GETs.
    pub public_base_url: Option<String>,
    pub key_prefix: String,
    pub presign_expiry_secs: u64,
}

impl S3Config {
    /// Returns `None` when no bucket is configured.
    pub fn from_env() -> Option<Self> {
        let bucket = std::env::var("S3_BUCKET").ok()?;
        if bucket.trim().is_empty() {
            return None;
        }

        Some(Self {
            bucket,
            region: env_or("S3_REGION", "us-east-1"),
            endpoint_url: std::env::var("S3_ENDPOINT_URL").ok(),
            access_key_id: std::env::var("S3_ACCESS_KEY_ID").ok(),
            secret_access_key: std::env::var("S3_SECRET_ACCESS_KEY").ok(),
            public_base_url: std::env::var("S3_PUBLIC_BASE_URL").ok(),
            key_prefix: env_or("S3_KEY_PREFIX", "outputs"),
            presign_expiry_secs: parse_env("S3_PRESIGN_EXPIRY_SECS", "3600"),
        })
    }
}

/// Storage backend selection, resolved once per process.
///
/// | Env Var                  | Default           |
/// |--------------------------|-------------------|
/// | `NETWORK_VOLUME_PATH`    | *(autodetected)*  |
/// | `NETWORK_VOLUME_TIMEOUT` | `15`              |
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub s3: Option<S3Config>,
    /// Explicit volume root.  When unset, the worker waits for
    /// `/runpod-volume` to appear and falls back to `/workspace`.
    pub volume_path: Option<PathBuf>,
    /// How long to wait for the network volume mount at startup.
    pub volume_wait_timeout_secs: u64,
}

impl StorageConfig {
    pub fn from_env() -> Self {
        Self {
            s3: S3Config::from_env(),
            volume_path: std::env::var("NETWORK_VOLUME_PATH").ok().map(PathBuf::from),
            volume_wait_timeout_secs: parse_env("NETWORK_VOLUME_TIMEOUT", "15"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthy_values() {
        assert!(is_truthy("1"));
        assert!(is_truthy("true"));
        assert!(is_truthy("TRUE"));
        assert!(is_truthy("yes"));
        assert!(is_truthy("On"));
    }

    #[test]
    fn falsy_values() {
        assert!(!is_truthy("0"));
        assert!(!is_truthy("false"));
        assert!(!is_truthy("no"));
        assert!(!is_truthy("off"));
        assert!(!is_truthy(""));
        assert!(!is_truthy("enabled"));
    }

    #[test]
    fn api_url_formats_host_and_port() {
        let config = ComfyUIConfig {
            host: "127.0.0.1".into(),
            port: 8188,
            command: "python".into(),
            main_script: "/workspace/ComfyUI/main.py".into(),
            working_dir: "/workspace/ComfyUI".into(),
            output_dir: "/workspace/ComfyUI/output".into(),
            extra_args: vec![],
            startup_timeout_secs: 60,
            startup_poll_interval_secs: 2,
            refresh_models: true,
        };
        assert_eq!(config.api_url(), "http://127.0.0.1:8188");
    }
}
