//! S3-compatible artifact uploads.
//!
//! Supports plain AWS as well as S3-compatible providers via a custom
//! endpoint URL; path-style addressing is always enabled for the
//! latter's benefit.  Object URLs are presigned GETs unless a public
//! base URL is configured.

use std::path::Path;
use std::time::Duration;

use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;

use rpw_core::config::S3Config;

/// Errors from the S3 backend.
#[derive(Debug, thiserror::Error)]
pub enum S3Error {
    /// The local artifact file could not be read.
    #[error("Failed to read artifact: {0}")]
    Read(String),

    /// The PUT request failed.
    #[error("S3 upload failed: {0}")]
    Upload(String),

    /// Presigned URL generation failed.
    #[error("Failed to presign object URL: {0}")]
    Presign(String),
}

/// Uploads job outputs to one bucket.
pub struct S3Uploader {
    client: aws_sdk_s3::Client,
    bucket: String,
    key_prefix: String,
    public_base_url: Option<String>,
    presign_expiry: Duration,
}

impl S3Uploader {
    /// Build the uploader from configuration.
    ///
    /// With explicit credentials a client is constructed directly; without
    /// them the ambient AWS chain (instance role, shared config) is used.
    pub async fn from_config(config: &S3Config) -> Self {
        let region = aws_sdk_s3::config::Region::new(config.region.clone());

        let conf = match (&config.access_key_id, &config.secret_access_key) {
            (Some(key), Some(secret)) => {
                let credentials = aws_credential_types::Credentials::new(
                    key.clone(),
                    secret.clone(),
                    None,
                    None,
                    "worker-env",
                );
                let mut builder = aws_sdk_s3::config::Builder::new()
                    .behavior_version(aws_config::BehaviorVersion::latest())
                    .region(region)
                    .credentials_provider(credentials)
                    .force_path_style(true);
                if let Some(url) = &config.endpoint_url {
                    builder = builder.endpoint_url(url);
                }
                builder.build()
            }
            _ => {
                let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
                    .region(region)
                    .load()
                    .await;
                let mut builder =
                    aws_sdk_s3::config::Builder::from(&shared).force_path_style(true);
                if let Some(url) = &config.endpoint_url {
                    builder = builder.endpoint_url(url);
                }
                builder.build()
            }
        };

        tracing::info!(
            bucket = %config.bucket,
            region = %config.region,
            endpoint = config.endpoint_url.as_deref().unwrap_or("<default>"),
            "S3 uploader configured",
        );

        Self {
            client: aws_sdk_s3::Client::from_conf(conf),
            bucket: config.bucket.clone(),
            key_prefix: config.key_prefix.clone(),
            public_base_url: config.public_base_url.clone(),
            presign_expiry: Duration::from_secs(config.presign_expiry_secs),
        }
    }

    /// Bucket this uploader writes to.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Upload one artifact and return its URL.
    ///
    /// The key is namespaced by job id and timestamp so repeated jobs
    /// never overwrite each other's outputs.
    pub async fn persist_file(&self, local_path: &Path, job_id: &str) -> Result<String, S3Error> {
        let timestamp = chrono::Utc::now().timestamp();
        let key = object_key(&self.key_prefix, job_id, timestamp, local_path);
        self.upload(local_path, &key).await?;
        self.object_url(&key).await
    }

    /// PUT the file under the given key.
    pub async fn upload(&self, local_path: &Path, key: &str) -> Result<(), S3Error> {
        let body = ByteStream::from_path(local_path)
            .await
            .map_err(|e| S3Error::Read(e.to_string()))?;

        let content_type = mime_guess::from_path(local_path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| S3Error::Upload(format!("{}", DisplayErrorContext(&e))))?;

        tracing::debug!(bucket = %self.bucket, key, "Uploaded artifact to S3");
        Ok(())
    }

    /// Public or presigned URL for an uploaded key.
    pub async fn object_url(&self, key: &str) -> Result<String, S3Error> {
        if let Some(base) = &self.public_base_url {
            return Ok(format!("{}/{}", base.trim_end_matches('/'), key));
        }

        let presigning = PresigningConfig::expires_in(self.presign_expiry)
            .map_err(|e| S3Error::Presign(e.to_string()))?;

        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| S3Error::Presign(format!("{}", DisplayErrorContext(&e))))?;

        Ok(request.uri().to_string())
    }
}

/// Object key for one artifact: `{prefix}/{job_id}/{timestamp}-{file}`.
pub fn object_key(prefix: &str, job_id: &str, timestamp: i64, local_path: &Path) -> String {
    let file_name = local_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("output");
    let prefix = prefix.trim_matches('/');

    if prefix.is_empty() {
        format!("{job_id}/{timestamp}-{file_name}")
    } else {
        format!("{prefix}/{job_id}/{timestamp}-{file_name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn test_s3_config() -> S3Config {
        S3Config {
            bucket: "render-outputs".into(),
            region: "us-east-1".into(),
            endpoint_url: Some("http://127.0.0.1:9000".into()),
            access_key_id: Some("test-key".into()),
            secret_access_key: Some("test-secret".into()),
            public_base_url: None,
            key_prefix: "outputs".into(),
            presign_expiry_secs: 3600,
        }
    }

    #[tokio::test]
    async fn public_base_url_replaces_presigning() {
        let mut config = test_s3_config();
        config.public_base_url = Some("https://cdn.example.com/".into());
        let uploader = S3Uploader::from_config(&config).await;

        let url = uploader.object_url("outputs/job/1-a.png").await.unwrap();
        assert_eq!(url, "https://cdn.example.com/outputs/job/1-a.png");
    }

    #[tokio::test]
    async fn presigned_url_targets_the_configured_bucket_and_endpoint() {
        // Presigning is pure signature math; no server is contacted.
        let uploader = S3Uploader::from_config(&test_s3_config()).await;

        let url = uploader.object_url("outputs/job/1-a.png").await.unwrap();
        assert!(url.starts_with("http://127.0.0.1:9000/render-outputs/outputs/job/1-a.png"));
        assert!(url.contains("X-Amz-Signature="));
    }

    #[test]
    fn key_is_namespaced_by_prefix_job_and_timestamp() {
        let key = object_key(
            "outputs",
            "job-42",
            1700000000,
            &PathBuf::from("/workspace/ComfyUI/output/ComfyUI_00001_.png"),
        );
        assert_eq!(key, "outputs/job-42/1700000000-ComfyUI_00001_.png");
    }

    #[test]
    fn key_prefix_slashes_are_normalized() {
        let key = object_key("/outputs/", "job", 1, &PathBuf::from("a.png"));
        assert_eq!(key, "outputs/job/1-a.png");
    }

    #[test]
    fn empty_prefix_is_omitted() {
        let key = object_key("", "job", 1, &PathBuf::from("a.png"));
        assert_eq!(key, "job/1-a.png");
    }

    #[test]
    fn key_uses_file_name_only() {
        let key = object_key("outputs", "job", 1, &PathBuf::from("/deep/nested/dir/a.png"));
        assert_eq!(key, "outputs/job/1-a.png");
    }
}
