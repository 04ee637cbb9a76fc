//! Uploaders
//!
//! An uploader owns one local directory and one destination: on every cycle it
//! asks its [`CandidateSource`] which files are ready, uploads each under
//! `{blob_prefix}/{file name}`, deletes the local copy on success and finally
//! publishes the manifest if anything new was uploaded.
//!
//! Two candidate sources exist:
//!
//! - [`SegmentCandidates`]: finalized segment files reported by the connector
//! - [`DirectoryCandidates`]: every file in a watched directory, guarded by
//!   `.lock` markers
//!
//! Failed uploads are retried on later cycles. With a timeout configured, a
//! file that has been failing for longer than the timeout is abandoned: it is
//! left on disk and never attempted again.

pub mod candidates;
pub mod directory;
pub mod segment;

pub use candidates::{CandidateSource, Claim};
pub use directory::{lock_path, DirectoryCandidates, LOCK_SUFFIX};
pub use segment::{PendingSender, SegmentCandidates};

use crate::manifest::ManifestPublisher;
use crate::metrics;
use crate::storage::{blob_key, BucketHandle, ObjectStore, StorageError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Static settings of one uploader
#[derive(Debug, Clone)]
pub struct UploaderSettings {
    /// Label used in logs and metrics, e.g. `output-0`
    pub name: String,
    pub bucket: BucketHandle,
    /// Rendered object key prefix, without leading or trailing `/`
    pub blob_prefix: String,
    /// Delay between cycles
    pub interval: Duration,
    /// Abandon files still failing after this long; `None` retries forever
    pub timeout: Option<Duration>,
}

/// What happened to one file during a cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded { name: String, bytes: u64 },
    /// Upload failed, will be retried
    Failed,
    /// Locked by another writer
    Skipped,
    /// The file disappeared before it could be uploaded
    Vanished,
    /// Failing for longer than the timeout, given up
    Abandoned,
}

impl UploadOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadOutcome::Uploaded { .. } => "uploaded",
            UploadOutcome::Failed => "failed",
            UploadOutcome::Skipped => "skipped",
            UploadOutcome::Vanished => "vanished",
            UploadOutcome::Abandoned => "abandoned",
        }
    }
}

/// Summary of one cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// File names uploaded, in upload order
    pub uploaded: Vec<String>,
    pub bytes: u64,
    pub failed: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
    pub vanished: Vec<PathBuf>,
    pub abandoned: Vec<PathBuf>,
    pub manifest_published: bool,
}

impl CycleReport {
    fn record(&mut self, path: PathBuf, outcome: UploadOutcome) {
        match outcome {
            UploadOutcome::Uploaded { name, bytes } => {
                self.uploaded.push(name);
                self.bytes += bytes;
            }
            UploadOutcome::Failed => self.failed.push(path),
            UploadOutcome::Skipped => self.skipped.push(path),
            UploadOutcome::Vanished => self.vanished.push(path),
            UploadOutcome::Abandoned => self.abandoned.push(path),
        }
    }

    /// Nothing was attempted
    pub fn is_idle(&self) -> bool {
        self.uploaded.is_empty()
            && self.failed.is_empty()
            && self.skipped.is_empty()
            && self.vanished.is_empty()
            && self.abandoned.is_empty()
    }
}

/// Poll/upload/publish loop over a candidate source
pub struct Uploader<C> {
    settings: UploaderSettings,
    candidates: C,
    store: Arc<dyn ObjectStore>,
    manifest: Option<ManifestPublisher>,
    first_eligible: HashMap<PathBuf, Instant>,
}

impl<C: CandidateSource> Uploader<C> {
    pub fn new(settings: UploaderSettings, candidates: C, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            settings,
            candidates,
            store,
            manifest: None,
            first_eligible: HashMap::new(),
        }
    }

    /// Publish a manifest after every cycle that uploaded something
    pub fn with_manifest(mut self, publisher: ManifestPublisher) -> Self {
        self.manifest = Some(publisher);
        self
    }

    pub fn settings(&self) -> &UploaderSettings {
        &self.settings
    }

    pub fn candidates(&self) -> &C {
        &self.candidates
    }

    pub fn manifest(&self) -> Option<&ManifestPublisher> {
        self.manifest.as_ref()
    }

    /// Files given up on (or uploaded but not deletable)
    pub fn is_ignored(&self, path: &Path) -> bool {
        self.candidates.is_ignored(path)
    }

    /// Run cycles until `cancel` fires.
    ///
    /// Cancellation is observed between cycles and during the sleep; a cycle
    /// in progress finishes first. Names still waiting for the manifest get
    /// one last publish attempt on the way out; no new files are uploaded.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!(
            uploader = %self.settings.name,
            kind = self.candidates.kind(),
            bucket = %self.settings.bucket.name(),
            prefix = %self.settings.blob_prefix,
            interval_secs = self.settings.interval.as_secs_f64(),
            "Uploader started"
        );

        while !cancel.is_cancelled() {
            let report = self.run_cycle().await;
            if !report.is_idle() {
                tracing::debug!(
                    uploader = %self.settings.name,
                    uploaded = report.uploaded.len(),
                    failed = report.failed.len(),
                    skipped = report.skipped.len(),
                    abandoned = report.abandoned.len(),
                    "Cycle finished"
                );
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.settings.interval) => {}
            }
        }

        self.flush_manifest().await;

        tracing::info!(
            uploader = %self.settings.name,
            pending = self.candidates.pending(),
            "Uploader stopped"
        );
    }

    /// One pass: upload every ready file, then publish the manifest
    #[tracing::instrument(
        name = "uploader.cycle",
        skip(self),
        fields(uploader = %self.settings.name)
    )]
    pub async fn run_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::default();

        let selected = self.candidates.select().await;

        for path in selected {
            let outcome = self.handle_file(&path).await;
            metrics::record_file_outcome(&self.settings.name, outcome.as_str());
            report.record(path, outcome);
        }

        if let Some(publisher) = self.manifest.as_mut() {
            if !report.uploaded.is_empty() || !publisher.unpublished().is_empty() {
                match publisher.publish(self.store.as_ref(), &report.uploaded).await {
                    Ok(_) => report.manifest_published = true,
                    Err(e) => {
                        metrics::record_error("manifest_publish");
                        tracing::warn!(
                            error = %e,
                            pending = publisher.unpublished().len(),
                            "Manifest publish failed, will retry next cycle"
                        );
                    }
                }
            }
        }

        metrics::set_pending_files(&self.settings.name, self.candidates.pending());
        report
    }

    /// Publish names a failed publish left behind, without uploading anything
    async fn flush_manifest(&mut self) {
        let Some(publisher) = self.manifest.as_mut() else {
            return;
        };
        if publisher.unpublished().is_empty() {
            return;
        }
        match publisher.publish(self.store.as_ref(), &[]).await {
            Ok(_) => tracing::info!(uploader = %self.settings.name, "Manifest flushed on stop"),
            Err(e) => {
                metrics::record_error("manifest_publish");
                tracing::warn!(
                    uploader = %self.settings.name,
                    error = %e,
                    lost = publisher.unpublished().len(),
                    "Final manifest publish failed"
                );
            }
        }
    }

    async fn handle_file(&mut self, path: &Path) -> UploadOutcome {
        match self.candidates.claim(path).await {
            Claim::Claimed => {}
            Claim::Locked => {
                tracing::debug!(path = %path.display(), "File is locked, skipping");
                return UploadOutcome::Skipped;
            }
            Claim::Vanished => {
                self.forget(path);
                return UploadOutcome::Vanished;
            }
        }

        let outcome = self.upload_claimed(path).await;
        self.candidates.release(path).await;
        outcome
    }

    async fn upload_claimed(&mut self, path: &Path) -> UploadOutcome {
        let first_seen = *self
            .first_eligible
            .entry(path.to_path_buf())
            .or_insert_with(Instant::now);

        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            self.forget(path);
            return UploadOutcome::Vanished;
        };
        let blob = self
            .settings
            .bucket
            .blob(&blob_key(&self.settings.blob_prefix, &name));

        match self.store.upload_file(&blob, path).await {
            Ok(bytes) => {
                tracing::info!(path = %path.display(), blob = %blob, bytes, "Uploaded");
                self.forget(path);
                self.remove_local(path).await;
                UploadOutcome::Uploaded { name, bytes }
            }
            Err(StorageError::LocalFileMissing(_)) => {
                tracing::debug!(path = %path.display(), "File vanished before upload");
                self.forget(path);
                UploadOutcome::Vanished
            }
            Err(e) => {
                metrics::record_error("upload");
                let failing_for = first_seen.elapsed();
                match self.settings.timeout {
                    Some(timeout) if failing_for > timeout => {
                        tracing::error!(
                            path = %path.display(),
                            blob = %blob,
                            error = %e,
                            failing_secs = failing_for.as_secs_f64(),
                            "Upload timed out, abandoning file"
                        );
                        self.first_eligible.remove(path);
                        self.candidates.ignore(path);
                        UploadOutcome::Abandoned
                    }
                    _ => {
                        tracing::warn!(
                            path = %path.display(),
                            blob = %blob,
                            error = %e,
                            "Upload failed, will retry"
                        );
                        UploadOutcome::Failed
                    }
                }
            }
        }
    }

    async fn remove_local(&mut self, path: &Path) {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                // Keep it out of later cycles so it is not uploaded twice
                tracing::warn!(path = %path.display(), error = %e, "Uploaded file could not be deleted");
                metrics::record_error("delete");
                self.candidates.ignore(path);
            }
        }
    }

    fn forget(&mut self, path: &Path) {
        self.first_eligible.remove(path);
        self.candidates.forget(path);
    }
}
