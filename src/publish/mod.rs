//! Artifact publisher: turn a produced file into a time-limited download link.
//!
//! Three steps, in order, each aborting the rest on failure:
//! 1. ensure the bucket exists (creating it, or confirming we already own it),
//! 2. upload the file,
//! 3. mint a presigned GET link that forces a "save as" download.
//!
//! Failures come back as a `PublishError` whose `code()` is stored on the job
//! row: 1 client construction, 2 bucket provisioning, 3 upload, 4 link.

pub mod s3;
pub mod sigv4;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::StorageConfig;
use crate::error::PublishError;

pub use s3::{ObjectStorage, S3Client};

/// How `ensure_bucket` found the bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketStatus {
    Created,
    AlreadyOwned,
}

/// A published artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishOutcome {
    pub url: String,
    pub bytes: u64,
}

/// Publishes artifacts to object storage.
///
/// Client construction errors are kept and reported as code 1 on every
/// publish, so they land on the job row instead of stopping the worker.
pub struct ArtifactPublisher {
    storage: Result<Arc<dyn ObjectStorage>, String>,
    link_ttl: Duration,
}

impl ArtifactPublisher {
    pub fn new(storage: Arc<dyn ObjectStorage>, link_ttl: Duration) -> Self {
        Self {
            storage: Ok(storage),
            link_ttl,
        }
    }

    /// Build an `S3Client` for the configured endpoint.
    pub fn from_config(config: &StorageConfig, link_ttl: Duration) -> Self {
        let storage = match S3Client::new(config) {
            Ok(client) => Ok(Arc::new(client) as Arc<dyn ObjectStorage>),
            Err(e) => {
                warn!(error = %e, "Object storage client unavailable; publishes will fail");
                Err(e.to_string())
            }
        };
        Self { storage, link_ttl }
    }

    fn storage(&self) -> Result<&Arc<dyn ObjectStorage>, PublishError> {
        self.storage
            .as_ref()
            .map_err(|e| PublishError::ClientConstruction(e.clone()))
    }

    /// Create the bucket, or confirm we already own it.
    pub async fn ensure_bucket(
        &self,
        bucket: &str,
        location: &str,
    ) -> Result<BucketStatus, PublishError> {
        let storage = self.storage()?;

        match storage.make_bucket(bucket, location).await {
            Ok(()) => {
                info!(bucket, "Created bucket");
                Ok(BucketStatus::Created)
            }
            Err(create_err) => match storage.bucket_exists(bucket).await {
                Ok(true) => {
                    info!(bucket, "Bucket already owned");
                    Ok(BucketStatus::AlreadyOwned)
                }
                Ok(false) => Err(PublishError::BucketProvisioning(create_err.to_string())),
                Err(check_err) => Err(PublishError::BucketProvisioning(format!(
                    "{create_err}; ownership check failed: {check_err}"
                ))),
            },
        }
    }

    /// Upload a local file as `object`.
    pub async fn upload_artifact(
        &self,
        bucket: &str,
        object: &str,
        path: &Path,
        content_type: &str,
    ) -> Result<u64, PublishError> {
        let bytes = self
            .storage()?
            .put_object(bucket, object, path, content_type)
            .await
            .map_err(|e| PublishError::Upload(e.to_string()))?;

        info!(bucket, object, bytes, "Uploaded artifact");
        Ok(bytes)
    }

    /// Presigned link that downloads `object` as `disposition_filename`.
    pub async fn mint_retrieval_link(
        &self,
        bucket: &str,
        object: &str,
        ttl: Duration,
        disposition_filename: &str,
    ) -> Result<String, PublishError> {
        let mut params = HashMap::new();
        params.insert(
            "response-content-disposition".to_string(),
            content_disposition(disposition_filename),
        );

        let url = self
            .storage()?
            .presign_get(bucket, object, ttl, &params)
            .await
            .map_err(|e| PublishError::LinkGeneration(e.to_string()))?;

        info!(bucket, object, ttl_secs = ttl.as_secs(), "Generated retrieval link");
        Ok(url)
    }

    /// Run all three steps for one file.
    pub async fn publish(
        &self,
        bucket: &str,
        location: &str,
        object: &str,
        path: &Path,
        content_type: &str,
    ) -> Result<PublishOutcome, PublishError> {
        self.ensure_bucket(bucket, location).await?;
        let bytes = self.upload_artifact(bucket, object, path, content_type).await?;
        let url = self
            .mint_retrieval_link(bucket, object, self.link_ttl, object)
            .await?;
        Ok(PublishOutcome { url, bytes })
    }
}

/// `attachment; filename="<name>"`, with quotes and backslashes escaped.
pub fn content_disposition(filename: &str) -> String {
    let escaped = filename.replace('\\', "\\\\").replace('"', "\\\"");
    format!("attachment; filename=\"{escaped}\"")
}

/// Content type from a file extension, `application/octet-stream` otherwise.
pub fn guess_content_type(path: &Path) -> &'static str {
    mime_guess::from_path(path)
        .first_raw()
        .unwrap_or("application/octet-stream")
}
