//! HTTP connector daemon.
//!
//! Runs the connector with a built-in echo application: every request is
//! answered with its own body.
//!
//! ```text
//!     socket ──▶ listener ──▶ connection (inbound Way) ──▶ echo task
//!                               ▲                             │
//!     socket ◀──────────────── connection (outbound Way) ◀────┘
//! ```

use std::path::PathBuf;

use bytes::Bytes;
use clap::Parser;
use http::{header, Response, StatusCode};
use tokio::sync::mpsc;

use http_connector::config::{load_config, ConnectorConfig};
use http_connector::http::{HttpServer, InboundRequest};
use http_connector::lifecycle::signals::wait_for_signal;
use http_connector::lifecycle::Shutdown;
use http_connector::net::Listener;
use http_connector::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "http-connector")]
#[command(about = "Non-blocking HTTP/1.1 connector with optional TLS", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file. Defaults are used when absent.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ConnectorConfig::default(),
    };

    logging::init(&config.observability)?;
    tracing::info!("http-connector v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        tls = config.listener.tls.is_some(),
        pipelining_depth = config.http.pipelining_depth,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics exporter");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = Listener::bind(&config.listener).await?;
    let server = HttpServer::new(config)?;

    let (requests_tx, requests_rx) = mpsc::unbounded_channel();
    let echo = tokio::spawn(echo(requests_rx));

    let shutdown = Shutdown::new();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(signal) => tracing::info!(signal, "Shutdown signal received"),
            Err(e) => tracing::error!(error = %e, "Failed to listen for signals"),
        }
        signal_shutdown.trigger();
    });

    server.run(listener, requests_tx, shutdown.subscribe()).await?;

    echo.abort();

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn echo(mut requests: mpsc::UnboundedReceiver<InboundRequest>) {
    while let Some(request) = requests.recv().await {
        let body = request.request().body().clone();
        let response = Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .header("x-request-id", request.id().to_string())
            .body(body)
            .unwrap_or_else(|_| Response::new(Bytes::new()));

        match request.respond(response) {
            Ok(delivery) => {
                tokio::spawn(async move {
                    if let Err(e) = delivery.wait().await {
                        tracing::debug!(error = %e, "Echo response not delivered");
                    }
                });
            }
            Err(e) => tracing::debug!(request_id = %request.id(), error = %e, "Connection no longer accepts responses"),
        }
    }
}
