//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the
//! connector. All types derive Serde traits for deserialization from config
//! files, and every section falls back to its defaults.

use serde::{Deserialize, Serialize};

/// Root configuration for the connector.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Buffer sizing.
    pub buffers: BufferConfig,

    /// HTTP framing limits and pipelining.
    pub http: HttpConfig,

    /// Delegated TLS task execution.
    pub tasks: TaskConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            tls: None,
            max_connections: 10_000,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Per-connection buffer sizes in bytes.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Plaintext buffer owned by each Way.
    pub application_buffer_size: usize,

    /// Ciphertext buffers of a TLS session; one maximum-size record fits.
    pub packet_buffer_size: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            application_buffer_size: 8192,
            packet_buffer_size: 16_709,
        }
    }
}

/// HTTP/1.1 framing limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Requests that may await their final response at once.
    pub pipelining_depth: usize,

    /// Request line plus headers.
    pub max_header_bytes: usize,

    /// Decoded request body.
    pub max_body_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            pipelining_depth: 8,
            max_header_bytes: 8192,
            max_body_bytes: 1024 * 1024,
        }
    }
}

/// Delegated TLS task execution.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Tasks allowed to run concurrently across all connections.
    pub max_concurrent_tasks: usize,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 4,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Idle connection timeout in seconds.
    pub idle_secs: u64,

    /// Time allowed for connections to close on shutdown, in seconds.
    pub shutdown_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            idle_secs: 60,
            shutdown_secs: 30,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit logs as JSON lines instead of human-readable text.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
