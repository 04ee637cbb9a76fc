//! Cloud Storage client
//!
//! Talks to Cloud Storage through its S3-interoperable XML API using HMAC keys,
//! so the regular `aws-sdk-s3` client can be used with a custom endpoint.
//!
//! # Tracing
//!
//! | Operation | Span Name | Attributes |
//! |-----------|-----------|------------|
//! | HeadBucket | `gcs.resolve_bucket` | bucket |
//! | GetObject | `gcs.get_blob` | bucket, key, bytes |
//! | PutObject (file) | `gcs.upload_file` | bucket, key, path, bytes |
//! | PutObject (bytes) | `gcs.upload_bytes` | bucket, key, bytes |

use super::{
    content_type_for, BlobHandle, BucketHandle, CredentialsProvider, ObjectStore, StorageError,
};
use crate::config::StorageConfig;
use crate::metrics;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Builder as S3ConfigBuilder, RequestChecksumCalculation};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use std::path::Path;
use std::time::Instant;

/// Cloud Storage XML API endpoint
pub const GCS_INTEROP_ENDPOINT: &str = "https://storage.googleapis.com";

/// Object store backed by Cloud Storage
pub struct GcsStore {
    client: Client,
    endpoint: String,
}

impl GcsStore {
    /// Build a client from the `storage` configuration section
    pub async fn new(config: &StorageConfig) -> Result<Self, StorageError> {
        let creds = CredentialsProvider::resolve(config)
            .map_err(|e| StorageError::Configuration(e.to_string()))?;
        let endpoint = config
            .endpoint
            .clone()
            .unwrap_or_else(|| GCS_INTEROP_ENDPOINT.to_string());

        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .credentials_provider(aws_credential_types::Credentials::new(
                creds.access_key_id(),
                creds.secret_access_key(),
                None,
                None,
                "connector-gcs",
            ))
            .load()
            .await;

        // The XML API rejects the SDK's default trailing checksums
        let s3_config = S3ConfigBuilder::from(&sdk_config)
            .endpoint_url(&endpoint)
            .force_path_style(true)
            .request_checksum_calculation(RequestChecksumCalculation::WhenRequired)
            .build();

        tracing::info!(endpoint = %endpoint, region = %config.region, "Cloud Storage client initialized");

        Ok(Self {
            client: Client::from_conf(s3_config),
            endpoint,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ObjectStore for GcsStore {
    #[tracing::instrument(name = "gcs.resolve_bucket", skip(self), err)]
    async fn resolve_bucket(&self, name: &str) -> Result<BucketHandle, StorageError> {
        match self.client.head_bucket().bucket(name).send().await {
            Ok(_) => Ok(BucketHandle::new(name)),
            Err(e) => {
                if e.as_service_error().map(|se| se.is_not_found()).unwrap_or(false) {
                    Err(StorageError::BucketNotFound(name.to_string()))
                } else {
                    Err(StorageError::Request(DisplayErrorContext(&e).to_string()))
                }
            }
        }
    }

    #[tracing::instrument(
        name = "gcs.get_blob",
        skip(self),
        fields(gcs.bucket = %bucket.name(), gcs.bytes = tracing::field::Empty),
        err
    )]
    async fn get_blob(
        &self,
        bucket: &BucketHandle,
        key: &str,
    ) -> Result<Option<Bytes>, StorageError> {
        let output = match self
            .client
            .get_object()
            .bucket(bucket.name())
            .key(key)
            .send()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                if e.as_service_error().map(|se| se.is_no_such_key()).unwrap_or(false) {
                    return Ok(None);
                }
                return Err(StorageError::Request(DisplayErrorContext(&e).to_string()));
            }
        };

        let data = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Request(e.to_string()))?
            .into_bytes();
        tracing::Span::current().record("gcs.bytes", data.len());
        Ok(Some(data))
    }

    #[tracing::instrument(
        name = "gcs.upload_file",
        skip(self),
        fields(gcs.bucket = %blob.bucket(), gcs.key = %blob.key(), upload.bytes = tracing::field::Empty),
        err
    )]
    async fn upload_file(&self, blob: &BlobHandle, path: &Path) -> Result<u64, StorageError> {
        let size = match tokio::fs::metadata(path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::LocalFileMissing(path.display().to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        tracing::Span::current().record("upload.bytes", size);

        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| StorageError::Request(e.to_string()))?;

        let start = Instant::now();
        let result = self
            .client
            .put_object()
            .bucket(blob.bucket())
            .key(blob.key())
            .body(body)
            .content_type(content_type_for(path))
            .send()
            .await;
        metrics::record_upload_duration(blob.bucket(), start.elapsed().as_secs_f64());

        match result {
            Ok(_) => {
                metrics::record_upload_bytes(size);
                Ok(size)
            }
            Err(e) => Err(StorageError::Request(DisplayErrorContext(&e).to_string())),
        }
    }

    #[tracing::instrument(
        name = "gcs.upload_bytes",
        skip(self, content),
        fields(gcs.bucket = %blob.bucket(), gcs.key = %blob.key(), upload.bytes = content.len()),
        err
    )]
    async fn upload_bytes(
        &self,
        blob: &BlobHandle,
        content: Bytes,
        content_type: &str,
    ) -> Result<(), StorageError> {
        self.client
            .put_object()
            .bucket(blob.bucket())
            .key(blob.key())
            .body(ByteStream::from(content))
            .content_type(content_type)
            .cache_control("no-cache")
            .send()
            .await
            .map_err(|e| StorageError::Request(DisplayErrorContext(&e).to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_custom_endpoint() {
        let config = StorageConfig {
            endpoint: Some("http://localhost:4443".into()),
            region: "auto".into(),
            access_key: Some("test-access".into()),
            secret_key: Some("test-secret".into()),
        };
        let store = GcsStore::new(&config).await.unwrap();
        assert_eq!(store.endpoint(), "http://localhost:4443");
    }

    #[tokio::test]
    async fn test_default_endpoint() {
        let config = StorageConfig {
            endpoint: None,
            region: "auto".into(),
            access_key: Some("test-access".into()),
            secret_key: Some("test-secret".into()),
        };
        let store = GcsStore::new(&config).await.unwrap();
        assert_eq!(store.endpoint(), GCS_INTEROP_ENDPOINT);
    }
}
