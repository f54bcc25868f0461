//! TLS unwrap/wrap stage.
//!
//! # Data Flow
//! ```text
//! ciphertext from socket
//!     → adapter.rs (ReadableTlsChannel: packet buffer → unwrap)
//!     → session.rs (status bookkeeping, delegated tasks)
//!     → engine.rs (TlsEngine contract; rustls_engine.rs implements it)
//!     → plaintext into the inbound Way buffer
//! ```
//!
//! # Design Decisions
//! - The connector only choreographs I/O; cryptography stays in the engine
//! - Delegated tasks run on a `TaskExecutor`, never on the readiness path
//! - Permission and retry predicates live in status.rs as pure functions

pub mod adapter;
pub mod engine;
pub mod rustls_engine;
pub mod session;
pub mod status;
pub mod tasks;

pub use adapter::{ReadableTlsChannel, WritableTlsChannel};
pub use engine::{DelegatedTask, EngineResult, EngineStatus, HandshakeStatus, TlsEngine};
pub use rustls_engine::RustlsEngine;
pub use session::TlsSession;
pub use tasks::{BlockingTaskExecutor, InlineTaskExecutor, TaskCompletion, TaskExecutor};
