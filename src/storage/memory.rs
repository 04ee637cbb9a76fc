//! In-process object store
//!
//! Keeps objects in memory. Used by the test suites and by `--dry-run`.
//! Buckets must be created before they resolve, and uploads can be made to
//! fail on demand to exercise retry and abandonment paths.

use super::{BlobHandle, BucketHandle, ObjectStore, StorageError};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Default)]
pub struct MemoryStore {
    buckets: Mutex<HashSet<String>>,
    objects: Mutex<BTreeMap<(String, String), Bytes>>,
    fail_uploads: AtomicBool,
    upload_attempts: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with the given buckets already created
    pub fn with_buckets<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = Self::new();
        store.buckets.lock().extend(names.into_iter().map(Into::into));
        store
    }

    pub fn create_bucket(&self, name: &str) {
        self.buckets.lock().insert(name.to_string());
    }

    /// Make every subsequent upload fail (or succeed again)
    pub fn set_fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    /// Number of upload calls, failed ones included
    pub fn upload_attempts(&self) -> usize {
        self.upload_attempts.load(Ordering::SeqCst)
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.objects
            .lock()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// Seed an object without going through the upload path
    pub fn insert_object(&self, bucket: &str, key: &str, content: impl Into<Bytes>) {
        self.objects
            .lock()
            .insert((bucket.to_string(), key.to_string()), content.into());
    }

    /// Keys stored in a bucket, sorted
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.objects
            .lock()
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect()
    }

    fn check_upload(&self, blob: &BlobHandle) -> Result<(), StorageError> {
        self.upload_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(StorageError::Request(format!("injected failure for {blob}")));
        }
        if !self.buckets.lock().contains(blob.bucket()) {
            return Err(StorageError::BucketNotFound(blob.bucket().to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn resolve_bucket(&self, name: &str) -> Result<BucketHandle, StorageError> {
        if self.buckets.lock().contains(name) {
            Ok(BucketHandle::new(name))
        } else {
            Err(StorageError::BucketNotFound(name.to_string()))
        }
    }

    async fn get_blob(
        &self,
        bucket: &BucketHandle,
        key: &str,
    ) -> Result<Option<Bytes>, StorageError> {
        Ok(self.object(bucket.name(), key))
    }

    async fn upload_file(&self, blob: &BlobHandle, path: &Path) -> Result<u64, StorageError> {
        self.check_upload(blob)?;
        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::LocalFileMissing(path.display().to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let size = data.len() as u64;
        self.insert_object(blob.bucket(), blob.key(), data);
        Ok(size)
    }

    async fn upload_bytes(
        &self,
        blob: &BlobHandle,
        content: Bytes,
        _content_type: &str,
    ) -> Result<(), StorageError> {
        self.check_upload(blob)?;
        self.insert_object(blob.bucket(), blob.key(), content);
        Ok(())
    }
}
