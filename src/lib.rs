//! Connector GCS Library
//!
//! Ships finalized media segments and images from local directories to Cloud
//! Storage (`gs://`), keeping an optional JSON manifest of uploaded files.
//!
//! # Features
//!
//! - **Segment uploads**: one uploader per output, fed by "segment closed" notifications
//! - **Directory uploads**: watches a directory, honouring `.lock` markers
//! - **Manifest**: merges uploaded file names into a nested JSON field
//! - **Timeouts**: files failing for too long are abandoned instead of retried forever
//!
//! # Example
//!
//! ```no_run
//! use connector_gcs::{config::Config, connector::Connector, storage::GcsStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("connector.yaml")?.normalize()?;
//!     let store = GcsStore::new(&config.storage).await?;
//!     let mut connector = Connector::new(config, Arc::new(store));
//!     connector.setup().await?;
//!     tokio::signal::ctrl_c().await?;
//!     connector.shutdown(std::time::Duration::from_secs(10)).await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connector;
pub mod logging;
pub mod manifest;
pub mod metrics;
pub mod storage;
pub mod uploader;

// Re-export commonly used types
pub use config::Config;
pub use connector::Connector;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
