//! Contract between the connector and a cryptographic engine.
//!
//! The connector never implements TLS itself. It hands ciphertext and
//! plaintext slices to an engine and reacts to the statuses it reports.

use crate::error::ConnectorError;

/// Result status of the last wrap/unwrap call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    Ok,
    /// The session is closed; no more records will be processed.
    Closed,
    /// More ciphertext is needed before anything can be produced.
    BufferUnderflow,
    /// The destination slice was too small.
    BufferOverflow,
}

/// Where the handshake stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    NotHandshaking,
    /// The engine has records to send before it can continue.
    NeedWrap,
    /// The engine needs records from the peer.
    NeedUnwrap,
    /// A delegated task must run before the handshake can continue.
    NeedTask,
    /// Reported once by the call that completed the handshake.
    Finished,
}

/// Outcome of one wrap or unwrap call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineResult {
    pub status: EngineStatus,
    pub handshake_status: HandshakeStatus,
    pub bytes_consumed: usize,
    pub bytes_produced: usize,
}

impl EngineResult {
    pub fn new(
        status: EngineStatus,
        handshake_status: HandshakeStatus,
        bytes_consumed: usize,
        bytes_produced: usize,
    ) -> Self {
        Self {
            status,
            handshake_status,
            bytes_consumed,
            bytes_produced,
        }
    }
}

/// Expensive handshake computation to run off the readiness path.
pub type DelegatedTask = Box<dyn FnOnce() + Send + 'static>;

/// A TLS engine with explicit wrap/unwrap steps.
pub trait TlsEngine: Send {
    /// Decrypt records from `src` into `dst`.
    fn unwrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, ConnectorError>;

    /// Encrypt `src` into records written to `dst`. `src` may be empty when
    /// only handshake or alert records are due.
    fn wrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, ConnectorError>;

    /// Current handshake status, never `Finished`.
    fn handshake_status(&self) -> HandshakeStatus;

    /// Next pending delegated task, if any.
    fn delegated_task(&mut self) -> Option<DelegatedTask>;

    /// Queue a close_notify alert; the next wraps will emit it.
    fn close_outbound(&mut self);
}
