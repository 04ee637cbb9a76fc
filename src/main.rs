//! Connector GCS - ships finalized media segments to Cloud Storage
//!
//! Segment-closed notifications are read from stdin as JSON lines:
//! `{"output": 0, "path": "/work/output_0/clip_0001.mp4"}`.

use anyhow::Context;
use clap::Parser;
use connector_gcs::config::{Config, ManifestLocator, NormalizedConfig};
use connector_gcs::connector::Connector;
use connector_gcs::logging;
use connector_gcs::storage::{GcsStore, MemoryStore, ObjectStore};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// Connector GCS - uploads finalized segments and images to gs:// outputs
#[derive(Parser, Debug)]
#[command(name = "connector-gcs")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "connector.yaml")]
    config: PathBuf,

    /// Log level or filter directives; overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    /// Keep uploads in memory instead of talking to Cloud Storage
    #[arg(long)]
    dry_run: bool,

    /// Seconds to wait for uploaders to stop on shutdown
    #[arg(long, default_value_t = 10)]
    shutdown_grace_secs: u64,
}

/// One stdin notification
#[derive(Debug, Deserialize)]
struct SegmentClosed {
    output: usize,
    path: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::load(&args.config)
        .and_then(|c| c.normalize())
        .with_context(|| format!("loading configuration from {}", args.config.display()))?;

    logging::init_logging(&config.logging, args.log_level.as_deref())?;
    info!("Starting connector-gcs v{}", connector_gcs::VERSION);
    info!(outputs = config.outputs.len(), dry_run = args.dry_run, "Loaded configuration from {:?}", args.config);

    let store = build_store(&config, args.dry_run).await?;

    #[cfg(feature = "metrics")]
    let mut metrics_server = if config.metrics.enabled {
        let mut server = connector_gcs::metrics::server::MetricsServer::new((&config.metrics).into());
        let addr = server.start().await?;
        info!(%addr, "Metrics server listening");
        Some(server)
    } else {
        None
    };

    let mut connector = Connector::new(config, store);
    connector.setup().await?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                result?;
                info!("Received Ctrl-C, shutting down");
                break;
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => handle_notification(&connector, &line),
                Ok(None) => {
                    info!("stdin closed, running until Ctrl-C");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to read stdin, ignoring further notifications");
                    stdin_open = false;
                }
            },
        }
    }

    let aborted = connector
        .shutdown(Duration::from_secs(args.shutdown_grace_secs))
        .await;
    if aborted > 0 {
        warn!(aborted, "Some uploaders were aborted with work pending");
    }

    #[cfg(feature = "metrics")]
    if let Some(server) = metrics_server.as_mut() {
        server.shutdown().await;
    }

    Ok(())
}

async fn build_store(config: &NormalizedConfig, dry_run: bool) -> anyhow::Result<Arc<dyn ObjectStore>> {
    if !dry_run {
        let store = GcsStore::new(&config.storage).await?;
        info!(endpoint = %store.endpoint(), "Using Cloud Storage");
        return Ok(Arc::new(store));
    }

    let store = MemoryStore::new();
    for output in &config.outputs {
        store.create_bucket(&output.bucket);
    }
    if let Some(ManifestLocator::Remote { bucket, .. }) = config.manifest_locator()? {
        store.create_bucket(&bucket);
    }
    info!("Dry run: uploads are kept in memory");
    Ok(Arc::new(store))
}

fn handle_notification(connector: &Connector, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    match serde_json::from_str::<SegmentClosed>(line) {
        Ok(event) => {
            if let Err(e) = connector.notify_segment_closed(event.output, event.path) {
                warn!(error = %e, "Dropping segment notification");
            }
        }
        Err(e) => warn!(error = %e, line, "Malformed segment notification"),
    }
}
