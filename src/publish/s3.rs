//! S3-compatible object storage over HTTP (MinIO and friends).
//!
//! Path-style addressing: `{endpoint}/{bucket}/{object}`. No timeout is set
//! on the client; a stalled endpoint blocks until the transport gives up.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Method, StatusCode, Url};
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::config::StorageConfig;
use crate::error::{PublishError, StorageError};
use crate::publish::sigv4::{Signer, UNSIGNED_PAYLOAD, canonical_uri, sha256_hex};

/// Longest expiry SigV4 allows for a presigned URL.
pub const MAX_PRESIGN_EXPIRY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Region with no `LocationConstraint` body on bucket creation.
const DEFAULT_REGION: &str = "us-east-1";

/// Object-storage capability used by the publisher.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Create a bucket. Fails if it exists, even when owned by the caller.
    async fn make_bucket(&self, bucket: &str, location: &str) -> Result<(), StorageError>;

    /// Whether the bucket exists and is accessible with our credentials.
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StorageError>;

    /// Upload a local file. Returns the number of bytes written.
    async fn put_object(
        &self,
        bucket: &str,
        object: &str,
        path: &Path,
        content_type: &str,
    ) -> Result<u64, StorageError>;

    /// Presigned GET URL valid for `expiry`, with extra response overrides.
    async fn presign_get(
        &self,
        bucket: &str,
        object: &str,
        expiry: Duration,
        params: &HashMap<String, String>,
    ) -> Result<String, StorageError>;
}

/// HTTP client for an S3-compatible endpoint.
pub struct S3Client {
    http: reqwest::Client,
    endpoint: String,
    host: String,
    signer: Signer,
}

impl S3Client {
    /// Build a client. Failures map to publish error code 1.
    pub fn new(config: &StorageConfig) -> Result<Self, PublishError> {
        config
            .validate()
            .map_err(|e| PublishError::ClientConstruction(e.to_string()))?;

        let endpoint = config.endpoint_url();
        let url = Url::parse(&endpoint).map_err(|e| {
            PublishError::ClientConstruction(format!("Invalid endpoint {endpoint}: {e}"))
        })?;
        let host = host_header(&url).ok_or_else(|| {
            PublishError::ClientConstruction(format!("Endpoint {endpoint} has no host"))
        })?;

        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| PublishError::ClientConstruction(e.to_string()))?;

        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            host,
            signer: Signer::new(
                config.access_key.clone(),
                config.secret_key.clone(),
                config.region.clone(),
            ),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send a small in-memory request with a hashed payload.
    async fn send(
        &self,
        method: Method,
        uri: &str,
        body: Vec<u8>,
    ) -> Result<reqwest::Response, StorageError> {
        let payload_hash = sha256_hex(&body);
        self.send_signed(method, uri, reqwest::Body::from(body), &payload_hash, None)
            .await
    }

    /// Sign and send a request and return the response, whatever its status.
    async fn send_signed(
        &self,
        method: Method,
        uri: &str,
        body: reqwest::Body,
        payload_hash: &str,
        object: Option<(&str, u64)>,
    ) -> Result<reqwest::Response, StorageError> {
        let headers = self
            .signer
            .sign_request(method.as_str(), &self.host, uri, payload_hash, Utc::now());

        let mut request = self
            .http
            .request(method, format!("{}{uri}", self.endpoint))
            .body(body);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        if let Some((content_type, length)) = object {
            request = request
                .header(reqwest::header::CONTENT_TYPE, content_type)
                .header(reqwest::header::CONTENT_LENGTH, length);
        }

        Ok(request.send().await?)
    }
}

/// `Host` header value for a URL: host, plus the port when it is not the
/// scheme default.
fn host_header(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

/// Pull `<Code>` and `<Message>` out of an S3 XML error body.
fn error_message(body: &str) -> String {
    fn tag<'a>(body: &'a str, name: &str) -> Option<&'a str> {
        let open = format!("<{name}>");
        let close = format!("</{name}>");
        let start = body.find(&open)? + open.len();
        let end = body[start..].find(&close)? + start;
        Some(&body[start..end])
    }

    match (tag(body, "Code"), tag(body, "Message")) {
        (Some(code), Some(message)) => format!("{code}: {message}"),
        (Some(code), None) => code.to_string(),
        _ => body.chars().take(200).collect(),
    }
}

async fn status_error(operation: &'static str, response: reqwest::Response) -> StorageError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    StorageError::Status {
        operation,
        status,
        message: error_message(&body),
    }
}

#[async_trait]
impl ObjectStorage for S3Client {
    async fn make_bucket(&self, bucket: &str, location: &str) -> Result<(), StorageError> {
        let body = if location.is_empty() || location == DEFAULT_REGION {
            Vec::new()
        } else {
            format!(
                "<CreateBucketConfiguration xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">\
                 <LocationConstraint>{location}</LocationConstraint>\
                 </CreateBucketConfiguration>"
            )
            .into_bytes()
        };

        let uri = canonical_uri(bucket, None);
        let response = self.send(Method::PUT, &uri, body).await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(status_error("MakeBucket", response).await)
        }
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StorageError> {
        let uri = canonical_uri(bucket, None);
        let response = self.send(Method::HEAD, &uri, Vec::new()).await?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(status_error("BucketExists", response).await),
        }
    }

    async fn put_object(
        &self,
        bucket: &str,
        object: &str,
        path: &Path,
        content_type: &str,
    ) -> Result<u64, StorageError> {
        let io_error = |source| StorageError::Io {
            path: path.display().to_string(),
            source,
        };
        let file = tokio::fs::File::open(path).await.map_err(io_error)?;
        let size = file.metadata().await.map_err(io_error)?.len();

        // Streamed from disk; the payload is not hashed.
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let uri = canonical_uri(bucket, Some(object));
        let response = self
            .send_signed(
                Method::PUT,
                &uri,
                body,
                UNSIGNED_PAYLOAD,
                Some((content_type, size)),
            )
            .await?;
        if response.status().is_success() {
            debug!(bucket, object, bytes = size, "Object stored");
            Ok(size)
        } else {
            Err(status_error("PutObject", response).await)
        }
    }

    async fn presign_get(
        &self,
        bucket: &str,
        object: &str,
        expiry: Duration,
        params: &HashMap<String, String>,
    ) -> Result<String, StorageError> {
        if expiry.as_secs() == 0 || expiry > MAX_PRESIGN_EXPIRY {
            return Err(StorageError::InvalidExpiry(expiry));
        }

        let uri = canonical_uri(bucket, Some(object));
        let extra: Vec<(String, String)> = params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let query =
            self.signer
                .presign_query(&self.host, &uri, expiry.as_secs(), &extra, Utc::now());

        Ok(format!("{}{uri}?{query}", self.endpoint))
    }
}
