//! Configuration module for the Cloud Storage connector
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion, and normalizes the raw values into the
//! validated form the connector is built from.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

mod loader;
mod locator;

pub use loader::ConfigLoader;
pub use locator::{ManifestLocator, OutputLocator, GCS_SCHEME};

/// Scratch directory used when `workdir` is absent or empty
pub const DEFAULT_WORKDIR: &str = "connector_workdir";

/// Manifest field used when `manifest_field` is absent or empty
pub const DEFAULT_MANIFEST_FIELD: &str = "files";

/// Folder under the first output's blob prefix used for directory uploads when `image_prefix` is absent
pub const DEFAULT_IMAGE_PREFIX: &str = "images";

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in a string.
///
/// Supports two syntaxes:
/// - `${VAR_NAME}` - Simple expansion, keeps placeholder if var not found
/// - `${VAR_NAME:-default}` - Expansion with default value
///
/// # Examples
///
/// ```ignore
/// std::env::set_var("MY_VAR", "value");
/// let result = expand_env_vars("prefix-${MY_VAR}-suffix");
/// assert_eq!(result, "prefix-value-suffix");
/// ```
fn expand_env_vars(s: &str) -> String {
    let re = match regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}") {
        Ok(re) => re,
        Err(_) => return s.to_string(),
    };

    re.replace_all(s, |cap: &regex_lite::Captures<'_>| {
        match std::env::var(&cap[1]) {
            Ok(val) => val,
            Err(_) => match cap.get(2) {
                Some(default) => default.as_str().to_string(),
                // No env var and no default. Keep the original placeholder.
                None => cap[0].to_string(),
            },
        }
    })
    .into_owned()
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// A value given either as a single string or a list of strings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Self::One(s) => vec![s.clone()],
            Self::Many(v) => v.clone(),
        }
    }
}

impl From<&str> for OneOrMany {
    fn from(s: &str) -> Self {
        Self::One(s.to_string())
    }
}

impl From<Vec<&str>> for OneOrMany {
    fn from(v: Vec<&str>) -> Self {
        Self::Many(v.into_iter().map(String::from).collect())
    }
}

/// Seconds given as a number or a numeric string (`"60.5"`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Seconds {
    Number(f64),
    Text(String),
}

impl Seconds {
    fn to_duration(&self) -> Result<Duration, ConfigError> {
        let secs = match self {
            Self::Number(n) => *n,
            Self::Text(s) => s.trim().parse::<f64>().map_err(|_| {
                ConfigError::ValidationError(format!("timeout '{s}' is not a number"))
            })?,
        };
        if !secs.is_finite() || secs < 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "timeout must be a non-negative number of seconds, got {secs}"
            )));
        }
        seconds_to_duration(secs, "timeout")
    }
}

/// Convert float seconds, rejecting values a `Duration` cannot hold.
pub(crate) fn seconds_to_duration(secs: f64, field: &str) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(secs).map_err(|_| {
        ConfigError::ValidationError(format!("{field} of {secs} seconds is out of range"))
    })
}

/// Raw configuration as written in the YAML file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub outputs: Option<OneOrMany>,
    #[serde(default)]
    pub sources: Option<OneOrMany>,
    #[serde(default)]
    pub workdir: Option<String>,
    #[serde(default)]
    pub timeout: Option<Seconds>,
    #[serde(default)]
    pub manifest: Option<String>,
    #[serde(default)]
    pub manifest_field: Option<String>,
    #[serde(default)]
    pub image_directory: Option<String>,
    #[serde(default)]
    pub image_prefix: Option<String>,
    #[serde(default)]
    pub poll_interval_secs: Option<f64>,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.normalize().map(|_| ())
    }

    /// Validate and convert into the form uploaders are built from.
    ///
    /// String fields are kept verbatim (empty strings included); they are
    /// only interpreted by the accessors on [`NormalizedConfig`].
    pub fn normalize(&self) -> Result<NormalizedConfig, ConfigError> {
        let outputs = self.outputs.as_ref().map(OneOrMany::to_vec).unwrap_or_default();
        if outputs.iter().all(|o| o.trim().is_empty()) {
            return Err(ConfigError::ValidationError(
                "must specify at least one output".into(),
            ));
        }
        let sources = self.sources.as_ref().map(OneOrMany::to_vec).unwrap_or_default();
        if sources.iter().all(|s| s.trim().is_empty()) {
            return Err(ConfigError::ValidationError(
                "must specify at least one source".into(),
            ));
        }

        let outputs = outputs
            .iter()
            .filter(|o| !o.trim().is_empty())
            .map(|o| OutputLocator::parse(o))
            .collect::<Result<Vec<_>, _>>()?;

        let timeout = self.timeout.as_ref().map(Seconds::to_duration).transpose()?;

        let poll_interval = match self.poll_interval_secs {
            None => default_poll_interval(),
            Some(secs) if secs.is_finite() && secs > 0.0 => {
                seconds_to_duration(secs, "poll_interval_secs")?
            }
            Some(secs) => {
                return Err(ConfigError::ValidationError(format!(
                    "poll_interval_secs must be positive, got {secs}"
                )))
            }
        };

        // Parse now so a bad manifest locator fails at startup
        if let Some(manifest) = self.manifest.as_deref().filter(|m| !m.is_empty()) {
            ManifestLocator::parse(manifest)?;
        }

        Ok(NormalizedConfig {
            id: self.id.clone(),
            outputs,
            sources: sources.into_iter().filter(|s| !s.trim().is_empty()).collect(),
            workdir: self.workdir.clone(),
            timeout,
            manifest: self.manifest.clone(),
            manifest_field: self.manifest_field.clone(),
            image_directory: self.image_directory.clone(),
            image_prefix: self.image_prefix.clone(),
            poll_interval,
            storage: self.storage.clone(),
            metrics: self.metrics.clone(),
            logging: self.logging.clone(),
        })
    }
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}

/// Validated configuration
#[derive(Debug, Clone)]
pub struct NormalizedConfig {
    pub id: Option<String>,
    pub outputs: Vec<OutputLocator>,
    pub sources: Vec<String>,
    pub workdir: Option<String>,
    /// Abandonment threshold
    pub timeout: Option<Duration>,
    pub manifest: Option<String>,
    pub manifest_field: Option<String>,
    pub image_directory: Option<String>,
    pub image_prefix: Option<String>,
    pub poll_interval: Duration,
    pub storage: StorageConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
}

impl NormalizedConfig {
    pub fn workdir_path(&self) -> PathBuf {
        match self.workdir.as_deref() {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => PathBuf::from(DEFAULT_WORKDIR),
        }
    }

    pub fn timeout_duration(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn manifest_locator(&self) -> Result<Option<ManifestLocator>, ConfigError> {
        self.manifest
            .as_deref()
            .filter(|m| !m.is_empty())
            .map(ManifestLocator::parse)
            .transpose()
    }

    pub fn manifest_field_path(&self) -> &str {
        match self.manifest_field.as_deref() {
            Some(field) if !field.is_empty() => field,
            _ => DEFAULT_MANIFEST_FIELD,
        }
    }

    pub fn image_dir(&self) -> Option<PathBuf> {
        self.image_directory
            .as_deref()
            .filter(|d| !d.is_empty())
            .map(PathBuf::from)
    }

    /// Explicit blob prefix for directory uploads, if configured
    pub fn image_blob_prefix(&self) -> Option<&str> {
        self.image_prefix.as_deref().map(|p| p.trim_matches('/'))
    }
}

/// Cloud Storage interoperability settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// XML API endpoint; defaults to `https://storage.googleapis.com`
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    /// HMAC access key
    #[serde(default)]
    pub access_key: Option<String>,
    /// HMAC secret
    #[serde(default)]
    pub secret_key: Option<String>,
}

fn default_region() -> String {
    "auto".to_string()
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            port: default_metrics_port(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    9090
}

/// Log output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Used when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
