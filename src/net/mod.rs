//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → tls.rs (server configuration for the optional TLS stage)
//!     → connection.rs (Ways, state machine) over socket.rs
//!     → driver.rs (one task per connection, readiness + events)
//!     → registry.rs (live connections, load distribution)
//!
//! Connection States:
//!     Opening → Open → Closing → Closed
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - TLS is optional and handled transparently by the Ways' channels

pub mod connection;
pub mod driver;
pub mod handle;
pub mod listener;
pub mod registry;
pub mod socket;
pub mod tls;

pub use connection::{Connection, ConnectionId, ConnectionSettings, ConnectionState, Transport};
pub use handle::{ConnectionEvent, ConnectionHandle, Delivery};
pub use listener::{Listener, ListenerError};
pub use registry::ConnectionRegistry;
pub use socket::{MemorySocket, SocketChannel};
