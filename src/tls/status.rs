//! Loop and permission predicates for the TLS adapters.
//!
//! Pure functions over explicit engine state so the retry policy can be
//! checked against every status combination without a socket.

use super::engine::{EngineStatus, HandshakeStatus};

/// Handshake statuses during which the handshake is still running.
pub fn is_handshaking(handshake: HandshakeStatus) -> bool {
    !matches!(
        handshake,
        HandshakeStatus::NotHandshaking | HandshakeStatus::Finished
    )
}

/// Whether unwrapping is permitted at all. A pending wrap or task has to
/// happen before reading makes sense.
pub fn could_drain(engine: EngineStatus, handshake: HandshakeStatus) -> bool {
    engine != EngineStatus::Closed
        && matches!(
            handshake,
            HandshakeStatus::NotHandshaking | HandshakeStatus::NeedUnwrap
        )
}

/// Whether the readable adapter may loop. Underflow only means more
/// ciphertext is needed.
pub fn can_loop(way_can_loop: bool, engine: EngineStatus) -> bool {
    way_can_loop && matches!(engine, EngineStatus::Ok | EngineStatus::BufferUnderflow)
}

/// Whether another unwrap attempt is productive.
pub fn can_retry(
    last_read: usize,
    handshaking: bool,
    engine: EngineStatus,
    handshake: HandshakeStatus,
    target_has_remaining: bool,
) -> bool {
    (last_read > 0
        || (handshaking && engine == EngineStatus::Ok && handshake == HandshakeStatus::NeedUnwrap))
        && target_has_remaining
}
