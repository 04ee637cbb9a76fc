//! Connector orchestration
//!
//! Wires one segment uploader per configured output, plus an optional
//! directory uploader, to the object store and runs them as tokio tasks.
//!
//! # Example
//!
//! ```no_run
//! use connector_gcs::config::ConfigLoader;
//! use connector_gcs::connector::Connector;
//! use connector_gcs::storage::MemoryStore;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = ConfigLoader::load("connector.yaml")?.normalize()?;
//! let mut connector = Connector::new(config, Arc::new(MemoryStore::new()));
//! connector.setup().await?;
//!
//! let dir = connector.output_dir(0).expect("one output");
//! connector.notify_segment_closed(0, dir.join("clip_0001.mp4"))?;
//!
//! connector.shutdown(Duration::from_secs(5)).await;
//! # Ok(())
//! # }
//! ```

use crate::config::{ConfigError, NormalizedConfig, OutputLocator, DEFAULT_IMAGE_PREFIX};
use crate::manifest::{ManifestError, ManifestPublisher, ManifestSpec};
use crate::storage::{blob_key, BucketHandle, ObjectStore, StorageError};
use crate::uploader::{
    CandidateSource, DirectoryCandidates, PendingSender, SegmentCandidates, Uploader,
    UploaderSettings,
};
use chrono::Local;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Connector errors
#[derive(Error, Debug)]
pub enum ConnectorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No output with index {0}")]
    UnknownOutput(usize),

    #[error("Uploader for output {0} has stopped")]
    UploaderStopped(usize),

    #[error("Connector already started")]
    AlreadyStarted,
}

struct OutputSlot {
    dir: PathBuf,
    pending: PendingSender,
}

struct Worker {
    name: String,
    handle: JoinHandle<()>,
}

/// Owns the uploaders for one connector instance
pub struct Connector {
    config: NormalizedConfig,
    store: Arc<dyn ObjectStore>,
    cancel: CancellationToken,
    outputs: Vec<OutputSlot>,
    workers: Vec<Worker>,
    started: bool,
}

impl Connector {
    pub fn new(config: NormalizedConfig, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            config,
            store,
            cancel: CancellationToken::new(),
            outputs: Vec::new(),
            workers: Vec::new(),
            started: false,
        }
    }

    pub fn config(&self) -> &NormalizedConfig {
        &self.config
    }

    fn label(&self) -> &str {
        self.config.id.as_deref().unwrap_or("connector")
    }

    /// Local directory the upstream sink writes segments of output `index` to
    pub fn output_dir(&self, index: usize) -> Option<PathBuf> {
        (index < self.config.outputs.len())
            .then(|| self.config.workdir_path().join(format!("output_{index}")))
    }

    /// Number of running uploader tasks
    pub fn uploader_count(&self) -> usize {
        self.workers.len()
    }

    /// Resolve buckets, load the manifest template and start the uploaders.
    ///
    /// Any failure here is fatal. Uploaders are only spawned once every step
    /// has succeeded, so a failed setup leaves nothing running and may be retried.
    pub async fn setup(&mut self) -> Result<(), ConnectorError> {
        if self.started {
            return Err(ConnectorError::AlreadyStarted);
        }

        let mut buckets: HashMap<String, BucketHandle> = HashMap::new();
        for output in &self.config.outputs {
            if !buckets.contains_key(&output.bucket) {
                let handle = self.store.resolve_bucket(&output.bucket).await?;
                buckets.insert(output.bucket.clone(), handle);
            }
        }

        let manifest = match self.config.manifest_locator()? {
            Some(locator) => Some(
                ManifestSpec::load(&locator, self.config.manifest_field_path(), self.store.as_ref())
                    .await?,
            ),
            None => None,
        };

        let now = Local::now();
        let mut outputs = Vec::with_capacity(self.config.outputs.len());
        let mut segment_uploaders = Vec::with_capacity(self.config.outputs.len());

        for (index, locator) in self.config.outputs.iter().enumerate() {
            let dir = self.config.workdir_path().join(format!("output_{index}"));
            tokio::fs::create_dir_all(&dir).await?;

            let interval = locator
                .segment_interval()?
                .unwrap_or(self.config.poll_interval);
            let settings = UploaderSettings {
                name: format!("output-{index}"),
                bucket: bucket_for(&buckets, locator)?,
                blob_prefix: locator.blob_prefix_at(now),
                interval,
                timeout: self.config.timeout_duration(),
            };
            let (candidates, pending) =
                SegmentCandidates::new(&dir, locator.file_prefix(), Some(interval));

            tracing::info!(
                connector = %self.label(),
                output = %locator,
                dir = %dir.display(),
                file_prefix = %candidates.prefix(),
                "Output configured"
            );

            segment_uploaders.push(self.build_uploader(settings, candidates, manifest.as_ref()));
            outputs.push(OutputSlot { dir, pending });
        }

        let mut image_uploader = None;
        if let Some(image_dir) = self.config.image_dir() {
            // Directory uploads go to the first output's bucket
            let first = self.config.outputs.first().ok_or_else(|| {
                ConfigError::ValidationError("must specify at least one output".into())
            })?;
            let blob_prefix = match self.config.image_blob_prefix() {
                Some(prefix) => prefix.to_string(),
                None => blob_key(&first.blob_prefix_at(now), DEFAULT_IMAGE_PREFIX),
            };
            if !tokio::fs::metadata(&image_dir).await.is_ok_and(|m| m.is_dir()) {
                tracing::warn!(dir = %image_dir.display(), "Image directory does not exist yet");
            }
            let settings = UploaderSettings {
                name: "images".to_string(),
                bucket: bucket_for(&buckets, first)?,
                blob_prefix,
                interval: self.config.poll_interval,
                timeout: self.config.timeout_duration(),
            };
            image_uploader = Some(self.build_uploader(
                settings,
                DirectoryCandidates::new(image_dir),
                manifest.as_ref(),
            ));
        }

        // Everything fallible is done; only now start the tasks
        let mut workers: Vec<Worker> = segment_uploaders
            .into_iter()
            .map(|uploader| self.spawn(uploader))
            .collect();
        workers.extend(image_uploader.map(|uploader| self.spawn(uploader)));

        tracing::info!(
            connector = %self.label(),
            uploaders = workers.len(),
            manifest = manifest.is_some(),
            "Connector started"
        );

        self.outputs = outputs;
        self.workers = workers;
        self.started = true;
        Ok(())
    }

    fn build_uploader<C: CandidateSource>(
        &self,
        settings: UploaderSettings,
        candidates: C,
        manifest: Option<&ManifestSpec>,
    ) -> Uploader<C> {
        let publisher = manifest.map(|spec| {
            let target = settings
                .bucket
                .blob(&blob_key(&settings.blob_prefix, spec.file_name()));
            ManifestPublisher::new(spec.clone(), target, settings.name.clone())
        });

        let uploader = Uploader::new(settings, candidates, self.store.clone());
        match publisher {
            Some(publisher) => uploader.with_manifest(publisher),
            None => uploader,
        }
    }

    fn spawn<C: CandidateSource + 'static>(&self, uploader: Uploader<C>) -> Worker {
        let name = uploader.settings().name.clone();
        let handle = tokio::spawn(uploader.run(self.cancel.child_token()));
        Worker { name, handle }
    }

    /// Hand a finalized segment of output `index` to its uploader
    pub fn notify_segment_closed(
        &self,
        index: usize,
        path: impl Into<PathBuf>,
    ) -> Result<(), ConnectorError> {
        let slot = self
            .outputs
            .get(index)
            .ok_or(ConnectorError::UnknownOutput(index))?;
        let path = path.into();
        tracing::debug!(output = index, path = %path.display(), "Segment closed");
        slot.pending
            .send(path)
            .map_err(|_| ConnectorError::UploaderStopped(index))
    }

    /// Directory of a started output, `None` before setup
    pub fn active_output_dir(&self, index: usize) -> Option<&Path> {
        self.outputs.get(index).map(|slot| slot.dir.as_path())
    }

    /// Stop all uploaders, waiting at most `grace` before aborting them.
    ///
    /// Returns the number of uploaders that had to be aborted.
    pub async fn shutdown(&mut self, grace: Duration) -> usize {
        self.cancel.cancel();
        self.outputs.clear();

        let deadline = tokio::time::Instant::now() + grace;
        let joins = self.workers.drain(..).map(|mut worker| async move {
            match tokio::time::timeout_at(deadline, &mut worker.handle).await {
                Ok(Ok(())) => false,
                Ok(Err(e)) => {
                    tracing::warn!(uploader = %worker.name, error = %e, "Uploader task failed");
                    false
                }
                Err(_) => {
                    tracing::warn!(uploader = %worker.name, "Uploader did not stop in time, aborting");
                    worker.handle.abort();
                    true
                }
            }
        });
        let aborted = futures::future::join_all(joins)
            .await
            .into_iter()
            .filter(|aborted| *aborted)
            .count();

        tracing::info!(connector = %self.label(), aborted, "Connector stopped");
        aborted
    }
}

impl Drop for Connector {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn bucket_for(
    buckets: &HashMap<String, BucketHandle>,
    locator: &OutputLocator,
) -> Result<BucketHandle, ConnectorError> {
    buckets
        .get(&locator.bucket)
        .cloned()
        .ok_or_else(|| StorageError::BucketNotFound(locator.bucket.clone()).into())
}
