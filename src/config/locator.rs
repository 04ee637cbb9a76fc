//! Output and manifest locators
//!
//! Parses `gs://bucket/path/file-template[!option=value...]` output targets and
//! `file://`, plain-path or `gs://` manifest sources.

use super::{seconds_to_duration, ConfigError};
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The only scheme accepted for outputs and remote manifests
pub const GCS_SCHEME: &str = "gs://";

const FILE_SCHEME: &str = "file://";

/// A validated `gs://` output target.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputLocator {
    /// Locator text without options, scheme included
    pub output: String,
    pub bucket: String,
    /// Object key template, e.g. `videos/clip_%Y-%m-%d.mp4`
    pub key: String,
    /// Options given after `!`, e.g. `segtime=1`
    pub options: BTreeMap<String, String>,
}

impl OutputLocator {
    /// Parse and validate an output locator.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let raw = raw.trim();
        let mut parts = raw.split('!');
        let output = parts.next().unwrap_or_default();

        let rest = output.strip_prefix(GCS_SCHEME).ok_or_else(|| {
            ConfigError::ValidationError(format!(
                "can only specify {GCS_SCHEME} outputs, got '{raw}'"
            ))
        })?;
        let (bucket, key) = split_bucket_key(rest).ok_or_else(|| {
            ConfigError::ValidationError(format!(
                "output must have both bucket and a path/file name, got '{raw}'"
            ))
        })?;
        if key.ends_with('/') {
            return Err(ConfigError::ValidationError(format!(
                "output '{raw}' must end with a file name"
            )));
        }

        let mut options = BTreeMap::new();
        for opt in parts.filter(|p| !p.is_empty()) {
            let (name, value) = opt.split_once('=').unwrap_or((opt, "true"));
            options.insert(name.trim().to_string(), value.trim().to_string());
        }

        let locator = Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
            output: output.to_string(),
            options,
        };
        // Reject a malformed segtime at load time rather than at setup
        locator.segment_interval()?;
        Ok(locator)
    }

    /// Directory part of the key template (empty when the key has no `/`).
    pub fn blob_prefix_template(&self) -> &str {
        self.key.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
    }

    /// File name part of the key template.
    pub fn filename_template(&self) -> &str {
        self.key.rsplit_once('/').map(|(_, f)| f).unwrap_or(&self.key)
    }

    /// Segment duration from the `segtime` option (minutes).
    pub fn segment_interval(&self) -> Result<Option<Duration>, ConfigError> {
        let Some(raw) = self.options.get("segtime") else {
            return Ok(None);
        };
        let minutes: f64 = raw.parse().map_err(|_| {
            ConfigError::ValidationError(format!(
                "invalid segtime '{}' in output '{}'",
                raw, self.output
            ))
        })?;
        if !minutes.is_finite() || minutes <= 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "segtime must be positive in output '{}'",
                self.output
            )));
        }
        seconds_to_duration(minutes * 60.0, "segtime").map(Some)
    }

    /// Blob path prefix with strftime placeholders rendered.
    pub fn blob_prefix_at(&self, now: DateTime<Local>) -> String {
        render_template(self.blob_prefix_template(), now)
            .trim_matches('/')
            .to_string()
    }

    /// Prefix shared by every local segment name of this output.
    ///
    /// For a template with placeholders this is the literal text before the
    /// first `%` (`clip_%Y-%m-%d.mp4` gives `clip_`), so names rendered at any
    /// time still match. Otherwise it is the file name without its extension.
    pub fn file_prefix(&self) -> String {
        let template = self.filename_template();
        match template.split_once('%') {
            Some((literal, _)) => literal.to_string(),
            None => Path::new(template)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| template.to_string()),
        }
    }
}

impl fmt::Display for OutputLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.output)?;
        for (name, value) in &self.options {
            write!(f, "!{name}={value}")?;
        }
        Ok(())
    }
}

/// Where the manifest template lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestLocator {
    Local(PathBuf),
    Remote { bucket: String, key: String },
}

impl ManifestLocator {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let raw = raw.trim();
        if let Some(rest) = raw.strip_prefix(GCS_SCHEME) {
            let (bucket, key) = split_bucket_key(rest).ok_or_else(|| {
                ConfigError::ValidationError(format!(
                    "manifest '{raw}' must specify a bucket and an object key"
                ))
            })?;
            return Ok(Self::Remote {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }
        if let Some(path) = raw.strip_prefix(FILE_SCHEME) {
            return Ok(Self::Local(PathBuf::from(path)));
        }
        if raw.contains("://") {
            return Err(ConfigError::ValidationError(format!(
                "manifest '{raw}' must be a local path, {FILE_SCHEME} or {GCS_SCHEME} locator"
            )));
        }
        Ok(Self::Local(PathBuf::from(raw)))
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote { .. })
    }

    /// Bare file name of the manifest object.
    pub fn file_name(&self) -> String {
        match self {
            Self::Local(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "manifest.json".to_string()),
            Self::Remote { key, .. } => key.rsplit('/').next().unwrap_or(key).to_string(),
        }
    }
}

fn split_bucket_key(rest: &str) -> Option<(&str, &str)> {
    let (bucket, key) = rest.split_once('/')?;
    if bucket.is_empty() || key.is_empty() {
        return None;
    }
    Some((bucket, key))
}

/// Render strftime placeholders; a template chrono cannot parse is used verbatim.
fn render_template(template: &str, now: DateTime<Local>) -> String {
    if !template.contains('%') {
        return template.to_string();
    }
    if StrftimeItems::new(template).any(|item| matches!(item, Item::Error)) {
        return template.to_string();
    }
    now.format_with_items(StrftimeItems::new(template)).to_string()
}
