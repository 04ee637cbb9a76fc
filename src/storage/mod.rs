//! Storage client adapter
//!
//! A thin, mockable interface over an object-storage backend.
//!
//! # Implementations
//!
//! - [`GcsStore`] - Cloud Storage through its S3-interoperable XML API
//! - [`MemoryStore`] - in-process store with failure injection, for tests and dry runs
//!
//! # Error semantics
//!
//! Every operation may fail with a [`StorageError`]. Uploaders treat those as
//! transient and retry on their next poll; only bucket resolution during
//! connector setup is fatal.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::Path;
use thiserror::Error;

mod credentials;
mod gcs;
mod memory;

pub use credentials::{Credentials, CredentialsError, CredentialsProvider};
pub use gcs::{GcsStore, GCS_INTEROP_ENDPOINT};
pub use memory::MemoryStore;

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Bucket not found or not accessible: {0}")]
    BucketNotFound(String),

    #[error("Request error: {0}")]
    Request(String),

    #[error("Local file missing: {0}")]
    LocalFileMissing(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// A resolved bucket
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketHandle {
    name: String,
}

impl BucketHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Address an object in this bucket; the object is created on first write
    pub fn blob(&self, key: &str) -> BlobHandle {
        BlobHandle {
            bucket: self.name.clone(),
            key: key.trim_start_matches('/').to_string(),
        }
    }
}

/// An object address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobHandle {
    bucket: String,
    key: String,
}

impl BlobHandle {
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl std::fmt::Display for BlobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "gs://{}/{}", self.bucket, self.key)
    }
}

/// Object storage operations used by uploaders and the manifest publisher
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Resolve and verify access to a bucket
    async fn resolve_bucket(&self, name: &str) -> Result<BucketHandle, StorageError>;

    /// Read an object, `None` when it does not exist
    async fn get_blob(
        &self,
        bucket: &BucketHandle,
        key: &str,
    ) -> Result<Option<Bytes>, StorageError>;

    /// Upload a local file, returning the number of bytes written
    async fn upload_file(&self, blob: &BlobHandle, path: &Path) -> Result<u64, StorageError>;

    /// Upload an in-memory payload
    async fn upload_bytes(
        &self,
        blob: &BlobHandle,
        content: Bytes,
        content_type: &str,
    ) -> Result<(), StorageError>;
}

/// Join a blob path prefix and a file name into an object key
pub fn blob_key(prefix: &str, file_name: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        file_name.to_string()
    } else {
        format!("{prefix}/{file_name}")
    }
}

/// Content type for an uploaded file, by extension
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("mp4") | Some("m4s") => "video/mp4",
        Some("ts") => "video/mp2t",
        Some("mkv") => "video/x-matroska",
        Some("m3u8") => "application/vnd.apple.mpegurl",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_key() {
        assert_eq!(blob_key("videos/day1", "a.mp4"), "videos/day1/a.mp4");
        assert_eq!(blob_key("/videos/", "a.mp4"), "videos/a.mp4");
        assert_eq!(blob_key("", "a.mp4"), "a.mp4");
    }

    #[test]
    fn test_blob_handle_display() {
        let bucket = BucketHandle::new("b");
        let blob = bucket.blob("/x/y.jpg");
        assert_eq!(blob.key(), "x/y.jpg");
        assert_eq!(blob.to_string(), "gs://b/x/y.jpg");
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for(Path::new("a.MP4")), "video/mp4");
        assert_eq!(content_type_for(Path::new("a.jpeg")), "image/jpeg");
        assert_eq!(content_type_for(Path::new("m.json")), "application/json");
        assert_eq!(content_type_for(Path::new("noext")), "application/octet-stream");
    }
}
