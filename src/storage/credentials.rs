//! HMAC credentials for the Cloud Storage interoperability API
//!
//! Credentials are looked up in order:
//!
//! 1. `storage.access_key` / `storage.secret_key` from the configuration
//! 2. `GCS_HMAC_ACCESS_KEY_ID` / `GCS_HMAC_SECRET` environment variables
//! 3. `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` environment variables
//!
//! # Example
//!
//! ```
//! use connector_gcs::storage::Credentials;
//!
//! let creds = Credentials::new("GOOG1EXAMPLE", "secret");
//! assert_eq!(creds.access_key_id(), "GOOG1EXAMPLE");
//! ```

use crate::config::StorageConfig;
use thiserror::Error;

const ENV_ACCESS_KEYS: [&str; 2] = ["GCS_HMAC_ACCESS_KEY_ID", "AWS_ACCESS_KEY_ID"];
const ENV_SECRET_KEYS: [&str; 2] = ["GCS_HMAC_SECRET", "AWS_SECRET_ACCESS_KEY"];

/// Credential loading errors
#[derive(Error, Debug)]
pub enum CredentialsError {
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),
}

/// HMAC key pair
#[derive(Clone)]
pub struct Credentials {
    access_key_id: String,
    secret_access_key: String,
}

impl Credentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
        }
    }

    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }

    pub fn secret_access_key(&self) -> &str {
        &self.secret_access_key
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// Factory methods for loading credentials
pub struct CredentialsProvider;

impl CredentialsProvider {
    /// Load credentials from the configuration, then from the environment
    pub fn resolve(config: &StorageConfig) -> Result<Credentials, CredentialsError> {
        match Self::from_config(config) {
            Ok(creds) => Ok(creds),
            Err(CredentialsError::MissingCredentials(_)) => Self::from_env(),
            Err(e) => Err(e),
        }
    }

    /// Load credentials from environment variables
    pub fn from_env() -> Result<Credentials, CredentialsError> {
        let access_key = first_env(&ENV_ACCESS_KEYS).ok_or_else(|| {
            CredentialsError::MissingCredentials(format!(
                "none of {} is set",
                ENV_ACCESS_KEYS.join(", ")
            ))
        })?;
        let secret_key = first_env(&ENV_SECRET_KEYS).ok_or_else(|| {
            CredentialsError::MissingCredentials(format!(
                "none of {} is set",
                ENV_SECRET_KEYS.join(", ")
            ))
        })?;
        Ok(Credentials::new(access_key, secret_key))
    }

    /// Load credentials from the `storage` section of the configuration
    pub fn from_config(config: &StorageConfig) -> Result<Credentials, CredentialsError> {
        match (&config.access_key, &config.secret_key) {
            (Some(access), Some(secret)) if !access.is_empty() && !secret.is_empty() => {
                Ok(Credentials::new(access.clone(), secret.clone()))
            }
            (None, None) => Err(CredentialsError::MissingCredentials(
                "storage.access_key and storage.secret_key not set".into(),
            )),
            _ => Err(CredentialsError::InvalidCredentials(
                "storage.access_key and storage.secret_key must be set together".into(),
            )),
        }
    }
}

fn first_env(names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|v| !v.is_empty())
}
