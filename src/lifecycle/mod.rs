//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Close connections → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accept, flush and close connections, exit
//! - Shutdown has timeout: connections still open at the deadline are
//!   abandoned

pub mod shutdown;
pub mod signals;

pub use shutdown::{Shutdown, ShutdownSignal};
