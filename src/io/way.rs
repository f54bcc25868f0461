//! Directional flow state machine shared by inbound and outbound Ways.
//!
//! # State Transitions
//! ```text
//! Idle ──update_state──▶ Interest ──readiness──▶ Ready ──process──▶ Processing
//!  ▲                                                                    │
//!  └────────────────────────── attempt finished ───────────────────────┘
//!
//! any ──cancel──▶ Cancelling (terminal)
//! ```
//!
//! # Design Decisions
//! - `update_state` is the only place that leaves `Idle`
//! - A Way in `Processing` never starts a second attempt
//! - Loop predicates are pure functions over explicit state

use crate::error::ConnectorError;
use crate::io::buffer::IoProgress;

/// Readiness state of one Way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoState {
    /// Nothing to do, no readiness requested.
    Idle,
    /// Waiting for the socket to become readable/writable.
    Interest,
    /// Actionable; the next processing pass will run an attempt.
    Ready,
    /// An attempt is in flight.
    Processing,
    /// The connection is closing. Terminal.
    Cancelling,
}

/// Socket readiness a connection wants to be woken for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoInterest {
    pub readable: bool,
    pub writable: bool,
}

impl IoInterest {
    pub fn is_empty(&self) -> bool {
        !self.readable && !self.writable
    }

    /// Map to Tokio's interest set, `None` when nothing is wanted.
    pub fn to_tokio(self) -> Option<tokio::io::Interest> {
        match (self.readable, self.writable) {
            (true, true) => Some(tokio::io::Interest::READABLE.add(tokio::io::Interest::WRITABLE)),
            (true, false) => Some(tokio::io::Interest::READABLE),
            (false, true) => Some(tokio::io::Interest::WRITABLE),
            (false, false) => None,
        }
    }
}

/// Capability set every Way variant provides.
pub trait Way {
    /// Inputs `update_state` needs from the owning connection.
    type Context;

    fn io_state(&self) -> IoState;

    /// Decide whether to escalate out of `Idle`.
    fn update_state(&mut self, context: &Self::Context);

    /// The socket became actionable for this direction.
    fn on_ready(&mut self);

    /// Fail every message this Way still owns.
    fn on_error(&mut self, error: &ConnectorError);

    /// Enter `Cancelling`, drop buffered bytes and fail owned messages.
    fn cancel(&mut self, error: &ConnectorError);

    fn is_cancelled(&self) -> bool {
        self.io_state() == IoState::Cancelling
    }
}

/// `Interest → Ready` when the multiplexer reports readiness.
pub fn ready_transition(state: IoState) -> IoState {
    match state {
        IoState::Interest => IoState::Ready,
        other => other,
    }
}

/// Whether a Way should run another fill/drain attempt within the same
/// processing pass.
pub fn can_loop(last: IoProgress, buffer_has_capacity: bool) -> bool {
    matches!(last, IoProgress::Transferred(n) if n > 0) && buffer_has_capacity
}

/// Escalation target for an idle inbound Way.
///
/// Buffered content that the decoder has not yet rejected as incomplete is
/// acted on straight away; otherwise the Way waits for the socket.
pub fn inbound_escalation(
    state: IoState,
    has_room: bool,
    could_drain: bool,
    has_actionable_content: bool,
    buffer_has_capacity: bool,
) -> IoState {
    if state != IoState::Idle || !has_room || !could_drain {
        return state;
    }
    if has_actionable_content {
        IoState::Ready
    } else if buffer_has_capacity {
        IoState::Interest
    } else {
        state
    }
}
