//! HTTP server setup and accept loop.
//!
//! # Responsibilities
//! - Accept connections from the bounded listener
//! - Build a plain or TLS connection for each accepted socket
//! - Register connections and spawn one driver task per connection
//! - On shutdown: stop accepting, ask every connection to close, wait
//!
//! Decoded requests from all connections are delivered on a single
//! channel; the application answers through each request's handle.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rustls::ServerConfig;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::Instrument;

use crate::config::ConnectorConfig;
use crate::error::TlsError;
use crate::http::request::InboundRequest;
use crate::lifecycle::ShutdownSignal;
use crate::net::connection::{Connection, ConnectionSettings, Transport};
use crate::net::driver;
use crate::net::listener::{ConnectionPermit, Listener, ListenerError};
use crate::net::registry::ConnectionRegistry;
use crate::net::socket::SocketChannel;
use crate::net::tls::load_tls_config;
use crate::tls::rustls_engine::RustlsEngine;
use crate::tls::tasks::{BlockingTaskExecutor, TaskExecutor};

/// Startup failures.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("TLS setup failed: {0}")]
    Tls(#[from] TlsError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Connector front end: accepts sockets and drives their connections.
pub struct HttpServer {
    config: ConnectorConfig,
    settings: ConnectionSettings,
    tls: Option<Arc<ServerConfig>>,
    executor: Arc<dyn TaskExecutor>,
    registry: Arc<ConnectionRegistry>,
}

impl HttpServer {
    /// Create a server, loading the TLS certificate if one is configured.
    pub fn new(config: ConnectorConfig) -> Result<Self, ServerError> {
        let tls = match &config.listener.tls {
            Some(tls) => Some(load_tls_config(Path::new(&tls.cert_path), Path::new(&tls.key_path))?),
            None => None,
        };
        Ok(Self {
            settings: ConnectionSettings::from(&config),
            executor: Arc::new(BlockingTaskExecutor::new(config.tasks.max_concurrent_tasks)),
            registry: Arc::new(ConnectionRegistry::new()),
            tls,
            config,
        })
    }

    /// Serve TLS with an already built server configuration.
    pub fn with_tls_config(mut self, tls: Arc<ServerConfig>) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Run delegated TLS tasks on `executor` instead of the blocking pool.
    pub fn with_executor(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.executor = executor;
        self
    }

    /// Live connections.
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    /// Accept connections until `shutdown` fires, then close them all.
    pub async fn run(
        &self,
        listener: Listener,
        requests: mpsc::UnboundedSender<InboundRequest>,
        mut shutdown: ShutdownSignal,
    ) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            tls = self.tls.is_some(),
            "HTTP server starting"
        );

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => self.spawn_connection(stream, peer, permit, requests.clone()),
                    Err(ListenerError::Closed) => break,
                    Err(e) => tracing::warn!(error = %e, "Accept failed"),
                },
                _ = shutdown.triggered() => {
                    tracing::info!("Shutdown signal received, no longer accepting");
                    break;
                }
            }
        }

        let open = self.registry.active_count();
        self.registry.close_all();
        let deadline = Duration::from_secs(self.config.timeouts.shutdown_secs);
        if self.registry.wait_for_shutdown(deadline).await {
            tracing::info!(closed = open, "HTTP server stopped");
        } else {
            tracing::warn!(
                remaining = self.registry.active_count(),
                "Connections still open at shutdown deadline"
            );
        }
        Ok(())
    }

    fn spawn_connection(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        permit: ConnectionPermit,
        requests: mpsc::UnboundedSender<InboundRequest>,
    ) {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(peer_addr = %peer, error = %e, "Failed to set TCP_NODELAY");
        }

        let transport = match &self.tls {
            Some(tls) => match RustlsEngine::new(Arc::clone(tls)) {
                Ok(engine) => Transport::Tls {
                    engine: Box::new(engine),
                    executor: Arc::clone(&self.executor),
                },
                Err(e) => {
                    tracing::warn!(peer_addr = %peer, error = %e, "Failed to create TLS session");
                    return;
                }
            },
            None => Transport::Plain,
        };

        let stream = Arc::new(stream);
        let (connection, events) = Connection::open(
            SocketChannel::new(Arc::clone(&stream)),
            transport,
            self.settings,
            requests,
        );
        let id = connection.id();
        self.registry.register(connection.handle());

        let registry = Arc::clone(&self.registry);
        let idle_timeout = Duration::from_secs(self.config.timeouts.idle_secs);
        let span = tracing::info_span!("connection", connection_id = %id, peer_addr = %peer);
        tokio::spawn(
            async move {
                // Held until the connection is done.
                let _permit = permit;
                driver::drive(connection, stream, events, idle_timeout).await;
                registry.unregister(id);
            }
            .instrument(span),
        );
    }
}
