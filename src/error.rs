//! Error types shared by the connector core.
//!
//! # Design Decisions
//! - `ConnectorError` is `Clone` so a single connection-level failure can be
//!   reported to every queued message individually
//! - I/O errors are flattened to kind + message for the same reason
//! - "No progress" is never an error; it is `IoProgress::WouldBlock`

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures reported to connections and to the issuers of queued messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectorError {
    /// The connection was closed before the message could be transmitted.
    #[error("connection closed")]
    ConnectionClosed,

    /// No readiness or event was observed for too long.
    #[error("connection idle for more than {0:?}")]
    IdleTimeout(Duration),

    /// The socket reported a failure.
    #[error("socket I/O failed ({kind:?}): {message}")]
    Io {
        /// Kind of the underlying error.
        kind: io::ErrorKind,
        /// Rendered error message.
        message: String,
    },

    /// The TLS engine rejected a record or failed the handshake.
    #[error("TLS engine failure: {0}")]
    Tls(String),

    /// The peer sent a malformed HTTP message.
    #[error("malformed HTTP message: {0}")]
    Protocol(#[from] ParseError),

    /// The application side stopped consuming requests.
    #[error("application stopped accepting requests")]
    ApplicationGone,
}

impl From<io::Error> for ConnectorError {
    fn from(e: io::Error) -> Self {
        ConnectorError::Io {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

impl From<rustls::Error> for ConnectorError {
    fn from(e: rustls::Error) -> Self {
        ConnectorError::Tls(e.to_string())
    }
}

/// HTTP/1.1 framing errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("invalid request line")]
    InvalidRequestLine,

    #[error("unsupported HTTP version")]
    UnsupportedVersion,

    #[error("invalid header field")]
    InvalidHeader,

    #[error("invalid Content-Length")]
    InvalidContentLength,

    #[error("invalid chunked encoding")]
    InvalidChunk,

    #[error("message head exceeds {limit} bytes")]
    HeadTooLarge { limit: usize },

    #[error("message body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },
}

/// Errors raised while building TLS configuration or engines.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("file not found: {0:?}")]
    NotFound(PathBuf),

    #[error("no private key found in {0:?}")]
    MissingPrivateKey(PathBuf),

    #[error("no certificate found in {0:?}")]
    MissingCertificate(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("rustls error: {0}")]
    Rustls(#[from] rustls::Error),
}
