//! Non-blocking HTTP/1.1 connector library.
//!
//! Moves bytes between sockets and an application-level HTTP message stream,
//! optionally through a TLS wrap/unwrap stage, tolerating partial reads and
//! writes and asynchronous handshake progress.

// Core subsystems
pub mod error;
pub mod http;
pub mod io;
pub mod net;
pub mod tls;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;

pub use crate::config::schema::ConnectorConfig;
pub use crate::error::{ConnectorError, ParseError, TlsError};
pub use crate::http::{HttpServer, InboundRequest, RequestId};
pub use crate::lifecycle::{Shutdown, ShutdownSignal};
pub use crate::net::{Connection, ConnectionHandle, ConnectionRegistry, Delivery};
