//! Prometheus Metrics HTTP Server
//!
//! Provides an HTTP endpoint for Prometheus to scrape uploader metrics,
//! plus a trivial `/health` probe.
//!
//! # Example
//!
//! ```no_run
//! use connector_gcs::metrics::server::{MetricsServer, MetricsServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = MetricsServerConfig {
//!         address: "127.0.0.1:9090".to_string(),
//!     };
//!     let mut server = MetricsServer::new(config);
//!     let addr = server.start().await?;
//!     println!("Metrics server listening on {}", addr);
//!     Ok(())
//! }
//! ```

use crate::config::MetricsConfig;
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{Encoder, TextEncoder};
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// Configuration for the metrics server
#[derive(Debug, Clone)]
pub struct MetricsServerConfig {
    /// Address to bind to (e.g., "127.0.0.1:9090")
    pub address: String,
}

impl From<&MetricsConfig> for MetricsServerConfig {
    fn from(config: &MetricsConfig) -> Self {
        Self {
            address: format!("0.0.0.0:{}", config.port),
        }
    }
}

/// Builder for MetricsServer
#[derive(Default)]
pub struct MetricsServerBuilder {
    address: Option<String>,
}

impl MetricsServerBuilder {
    /// Set the listen address
    pub fn address(mut self, address: &str) -> Self {
        self.address = Some(address.to_string());
        self
    }

    pub fn build(self) -> Result<MetricsServer, MetricsServerError> {
        let address = self
            .address
            .ok_or_else(|| MetricsServerError::Config("listen address is required".into()))?;
        Ok(MetricsServer::new(MetricsServerConfig { address }))
    }
}

/// Metrics server error
#[derive(Debug, thiserror::Error)]
pub enum MetricsServerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to bind metrics listener: {0}")]
    Bind(#[from] std::io::Error),

    #[error("Metrics server already started on {0}")]
    AlreadyStarted(SocketAddr),
}

/// Prometheus scrape endpoint running as a background task
pub struct MetricsServer {
    config: MetricsServerConfig,
    local_addr: Option<SocketAddr>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl MetricsServer {
    pub fn new(config: MetricsServerConfig) -> Self {
        Self {
            config,
            local_addr: None,
            shutdown_tx: None,
            task: None,
        }
    }

    pub fn builder() -> MetricsServerBuilder {
        MetricsServerBuilder::default()
    }

    /// Bound address once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Bind and start serving.
    ///
    /// Returns the bound address, which differs from the configured one when
    /// port 0 is used.
    pub async fn start(&mut self) -> Result<SocketAddr, MetricsServerError> {
        if let Some(addr) = self.local_addr {
            return Err(MetricsServerError::AlreadyStarted(addr));
        }

        let listener = TcpListener::bind(&self.config.address).await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        self.task = Some(tokio::spawn(accept_loop(listener, shutdown_rx)));
        self.shutdown_tx = Some(shutdown_tx);
        self.local_addr = Some(addr);
        Ok(addr)
    }

    /// Stop accepting connections and wait for the accept loop to exit
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        self.local_addr = None;
    }
}

async fn accept_loop(listener: TcpListener, mut shutdown_rx: oneshot::Receiver<()>) {
    loop {
        tokio::select! {
            _ = &mut shutdown_rx => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tokio::spawn(async move {
                        let served = http1::Builder::new()
                            .serve_connection(TokioIo::new(stream), service_fn(handle_request))
                            .await;
                        if let Err(e) = served {
                            tracing::debug!(%peer, error = %e, "Metrics connection closed with error");
                        }
                    });
                }
                Err(e) => tracing::debug!(error = %e, "Metrics listener accept failed"),
            },
        }
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let routed = match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => render_metrics(),
        (&Method::GET, "/health") => text(StatusCode::OK, "application/json", r#"{"status":"ok"}"#),
        _ => text(StatusCode::NOT_FOUND, "text/plain", "Not Found"),
    };
    Ok(routed.unwrap_or_else(|_| {
        let mut fallback = Response::new(Full::new(Bytes::from_static(b"Internal Server Error")));
        *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        fallback
    }))
}

type HandlerResult = Result<Response<Full<Bytes>>, hyper::http::Error>;

fn render_metrics() -> HandlerResult {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return text(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", "Failed to encode metrics");
    }

    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", encoder.format_type())
        .body(Full::new(Bytes::from(buffer)))
}

fn text(status: StatusCode, content_type: &str, body: &'static str) -> HandlerResult {
    Response::builder()
        .status(status)
        .header("Content-Type", content_type)
        .body(Full::new(Bytes::from_static(body.as_bytes())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_metrics_section() {
        let config = MetricsServerConfig::from(&MetricsConfig {
            enabled: true,
            port: 9191,
        });
        assert_eq!(config.address, "0.0.0.0:9191");
    }

    #[test]
    fn test_builder_missing_address() {
        let result = MetricsServerBuilder::default().build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let mut server = MetricsServer::builder().address("127.0.0.1:0").build().unwrap();
        let addr = server.start().await.unwrap();
        assert_eq!(server.local_addr(), Some(addr));
        assert!(matches!(
            server.start().await,
            Err(MetricsServerError::AlreadyStarted(_))
        ));
        server.shutdown().await;
        assert_eq!(server.local_addr(), None);
    }
}
