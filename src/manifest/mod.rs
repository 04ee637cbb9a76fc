//! Manifest merging and publishing
//!
//! A manifest is a caller-defined JSON document with one list-valued field,
//! addressed by a dotted path such as `data.files`, that accumulates the names
//! of uploaded files.
//!
//! # Example
//!
//! ```
//! use connector_gcs::manifest::merge_filenames;
//! use serde_json::json;
//!
//! let template = json!({"some": {"nested": {"structure": 123}}});
//! let names = vec!["a.mp4".to_string(), "b.mp4".to_string()];
//! let merged = merge_filenames(Some(&template), "some.nested.files", &names).unwrap();
//! assert_eq!(
//!     merged,
//!     json!({"some": {"nested": {"structure": 123, "files": ["a.mp4", "b.mp4"]}}})
//! );
//! ```

use crate::config::ManifestLocator;
use crate::metrics;
use crate::storage::{BlobHandle, BucketHandle, ObjectStore, StorageError};
use bytes::Bytes;
use serde_json::{Map, Value};
use thiserror::Error;

const MANIFEST_CONTENT_TYPE: &str = "application/json";

/// Manifest errors
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Invalid manifest field path '{0}'")]
    InvalidFieldPath(String),

    #[error("Invalid manifest JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to read manifest: {0}")]
    Io(#[from] std::io::Error),

    #[error("Manifest storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Split a dotted field path, rejecting empty components
fn parse_field_path(field_path: &str) -> Result<Vec<&str>, ManifestError> {
    let segments: Vec<&str> = field_path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(ManifestError::InvalidFieldPath(field_path.to_string()));
    }
    Ok(segments)
}

/// Merge `names` into the list at `field_path` of a copy of `template`.
///
/// Missing intermediate objects are created; an existing list keeps its
/// entries and order. Without a template a fresh document is built.
pub fn merge_filenames(
    template: Option<&Value>,
    field_path: &str,
    names: &[String],
) -> Result<Value, ManifestError> {
    let segments = parse_field_path(field_path)?;
    let Some((leaf, parents)) = segments.split_last() else {
        return Err(ManifestError::InvalidFieldPath(field_path.to_string()));
    };

    let mut root = match template {
        Some(Value::Object(map)) => map.clone(),
        Some(other) => {
            tracing::warn!(kind = json_kind(other), "Manifest template is not an object, starting fresh");
            Map::new()
        }
        None => Map::new(),
    };

    let mut node = &mut root;
    for segment in parents {
        let entry = node
            .entry(*segment)
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            tracing::warn!(
                field = %segment,
                kind = json_kind(entry),
                "Replacing non-object manifest field"
            );
            *entry = Value::Object(Map::new());
        }
        node = entry
            .as_object_mut()
            .ok_or_else(|| ManifestError::InvalidFieldPath(field_path.to_string()))?;
    }

    let list = node.entry(*leaf).or_insert_with(|| Value::Array(Vec::new()));
    if !list.is_array() {
        tracing::warn!(field = %leaf, kind = json_kind(list), "Replacing non-list manifest field");
        *list = Value::Array(Vec::new());
    }
    if let Value::Array(items) = list {
        items.extend(names.iter().cloned().map(Value::String));
    }

    Ok(Value::Object(root))
}

/// Serialize a manifest document as pretty-printed UTF-8 JSON
pub fn serialize(document: &Value) -> Result<Bytes, ManifestError> {
    Ok(Bytes::from(serde_json::to_vec_pretty(document)?))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Where the manifest template comes from
#[derive(Debug, Clone)]
pub enum ManifestSource {
    Local(std::path::PathBuf),
    Remote { bucket: BucketHandle, key: String },
}

/// Manifest source, field path and the template loaded at startup
#[derive(Debug, Clone)]
pub struct ManifestSpec {
    source: ManifestSource,
    file_name: String,
    field_path: String,
    template: Option<Value>,
}

impl ManifestSpec {
    /// Load the template once. A missing remote object means "no template";
    /// an unreadable local file is an error.
    pub async fn load(
        locator: &ManifestLocator,
        field_path: &str,
        store: &dyn ObjectStore,
    ) -> Result<Self, ManifestError> {
        parse_field_path(field_path)?;
        let file_name = locator.file_name();

        let (source, template) = match locator {
            ManifestLocator::Local(path) => {
                let text = tokio::fs::read_to_string(path).await?;
                let template: Value = serde_json::from_str(&text)?;
                (ManifestSource::Local(path.clone()), Some(template))
            }
            ManifestLocator::Remote { bucket, key } => {
                let bucket = store.resolve_bucket(bucket).await?;
                let template = match store.get_blob(&bucket, key).await? {
                    Some(bytes) => Some(serde_json::from_slice(&bytes)?),
                    None => {
                        tracing::info!(bucket = %bucket.name(), key = %key, "No remote manifest yet, starting fresh");
                        None
                    }
                };
                (
                    ManifestSource::Remote {
                        bucket,
                        key: key.clone(),
                    },
                    template,
                )
            }
        };

        Ok(Self {
            source,
            file_name,
            field_path: field_path.to_string(),
            template,
        })
    }

    /// Build a spec from an already loaded template
    pub fn new(
        source: ManifestSource,
        field_path: &str,
        template: Option<Value>,
    ) -> Result<Self, ManifestError> {
        parse_field_path(field_path)?;
        let file_name = match &source {
            ManifestSource::Local(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "manifest.json".to_string()),
            ManifestSource::Remote { key, .. } => {
                key.rsplit('/').next().unwrap_or(key).to_string()
            }
        };
        Ok(Self {
            source,
            file_name,
            field_path: field_path.to_string(),
            template,
        })
    }

    pub fn source(&self) -> &ManifestSource {
        &self.source
    }

    pub fn field_path(&self) -> &str {
        &self.field_path
    }

    pub fn template(&self) -> Option<&Value> {
        self.template.as_ref()
    }

    /// Bare file name of the manifest, used as the published object name for local sources
    pub fn file_name(&self) -> &str {
        &self.file_name
    }
}

/// Per-uploader manifest state.
///
/// Remote manifests are re-read right before every merge and written back to
/// the same object. Local manifests keep the merged document in memory, so the
/// list accumulates across cycles, and are published to `target`.
pub struct ManifestPublisher {
    spec: ManifestSpec,
    target: BlobHandle,
    current: Option<Value>,
    unpublished: Vec<String>,
    label: String,
}

impl ManifestPublisher {
    /// `local_target` is used only when the source is a local file
    pub fn new(spec: ManifestSpec, local_target: BlobHandle, label: impl Into<String>) -> Self {
        let target = match spec.source() {
            ManifestSource::Remote { bucket, key } => bucket.blob(key),
            ManifestSource::Local(_) => local_target,
        };
        Self {
            current: spec.template.clone(),
            spec,
            target,
            unpublished: Vec::new(),
            label: label.into(),
        }
    }

    pub fn target(&self) -> &BlobHandle {
        &self.target
    }

    /// Names uploaded but not yet written to the manifest
    pub fn unpublished(&self) -> &[String] {
        &self.unpublished
    }

    /// Last document successfully published (or the template)
    pub fn current(&self) -> Option<&Value> {
        self.current.as_ref()
    }

    /// Merge `uploaded` (plus anything left over from a failed publish) and write it.
    ///
    /// On failure the names are kept and retried on the next call.
    #[tracing::instrument(
        name = "manifest.publish",
        skip(self, store, uploaded),
        fields(uploader = %self.label, target = %self.target, files = uploaded.len()),
        err
    )]
    pub async fn publish(
        &mut self,
        store: &dyn ObjectStore,
        uploaded: &[String],
    ) -> Result<Value, ManifestError> {
        self.unpublished.extend(uploaded.iter().cloned());

        let result = self.merge_and_write(store).await;
        metrics::record_manifest_publish(&self.label, result.is_ok());

        let merged = result?;
        tracing::info!(
            files = self.unpublished.len(),
            field = %self.spec.field_path,
            "Manifest published"
        );
        self.unpublished.clear();
        self.current = Some(merged.clone());
        Ok(merged)
    }

    async fn merge_and_write(&self, store: &dyn ObjectStore) -> Result<Value, ManifestError> {
        let base = match self.spec.source() {
            ManifestSource::Remote { bucket, key } => match store.get_blob(bucket, key).await? {
                Some(bytes) => Some(serde_json::from_slice(&bytes)?),
                None => self.current.clone(),
            },
            ManifestSource::Local(_) => self.current.clone(),
        };

        let merged = merge_filenames(base.as_ref(), &self.spec.field_path, &self.unpublished)?;
        store
            .upload_bytes(&self.target, serialize(&merged)?, MANIFEST_CONTENT_TYPE)
            .await?;
        Ok(merged)
    }
}
