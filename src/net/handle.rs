//! Application-facing side of a connection.
//!
//! # Data Flow
//! ```text
//! application ──handle(response)──▶ outbound queue ──Wake──▶ driver task
//! TLS executor ──TaskCompleted──────────────────────────────▶ driver task
//! driver task ──watch──▶ ConnectionState observers
//! ```
//!
//! # Design Decisions
//! - Handles never touch the socket or the Ways; they only enqueue and
//!   send `ConnectionEvent`s, so all state transitions happen on the
//!   connection's own task
//! - Each response gets its own `Delivery`, resolved exactly once

use std::sync::Arc;

use bytes::Bytes;
use http::Response;
use tokio::sync::{mpsc, oneshot, watch};

use crate::error::ConnectorError;
use crate::http::decoder::has_connection_token;
use crate::http::inbound::PendingRequest;
use crate::http::outbound::{OutboundMessage, Outcome};
use crate::http::queue::MessageQueue;
use crate::http::request::RequestId;

use super::connection::{ConnectionId, ConnectionState};

/// Messages delivered to a connection's driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// New outbound work was queued.
    Wake,
    /// A batch of delegated TLS tasks finished.
    TaskCompleted,
    /// Flush what is queued, then close.
    Close,
}

pub type EventSender = mpsc::UnboundedSender<ConnectionEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<ConnectionEvent>;

/// State shared between a connection and its handles.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) id: ConnectionId,
    pub(crate) outbound: Arc<MessageQueue<OutboundMessage>>,
    pub(crate) pending: Arc<MessageQueue<PendingRequest>>,
    pub(crate) state: watch::Sender<ConnectionState>,
    pub(crate) events: EventSender,
}

/// Cloneable handle used by the application layer to answer requests.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    shared: Arc<Shared>,
}

impl ConnectionHandle {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub fn id(&self) -> ConnectionId {
        self.shared.id
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Responses queued for transmission, the one in flight included.
    pub fn load_score(&self) -> usize {
        self.shared.outbound.len()
    }

    /// Requests still waiting for their final response.
    pub fn pending_requests(&self) -> usize {
        self.shared.pending.len()
    }

    /// Queue `response` for the request `request_id`.
    ///
    /// Responses leave in request order: one queued for a later pipelined
    /// request waits until every earlier request has its final response.
    /// A final response to a non-persistent request, or one carrying
    /// `Connection: close`, closes the connection once transmitted.
    pub fn handle(&self, request_id: RequestId, response: Response<Bytes>) -> Result<Delivery, ConnectorError> {
        if !matches!(self.state(), ConnectionState::Opening | ConnectionState::Open) {
            return Err(ConnectorError::ConnectionClosed);
        }

        let is_final = !response.status().is_informational();
        let (persistent, head) = self
            .shared
            .pending
            .find_map(|p| (p.id == request_id).then_some((p.persistent, p.head)))
            .unwrap_or((true, false));
        let close_after = is_final && (!persistent || has_connection_token(response.headers(), "close"));

        let (mut message, rx) = OutboundMessage::new(request_id, response, close_after);
        message.head_only = head;
        if self.shared.outbound.push_back(message).is_err() {
            return Err(ConnectorError::ConnectionClosed);
        }
        // The driver only disappears together with the queue, which was
        // checked above.
        let _ = self.shared.events.send(ConnectionEvent::Wake);
        Ok(Delivery { rx })
    }

    /// Ask the connection to flush queued responses and close.
    pub fn close(&self) {
        let _ = self.shared.events.send(ConnectionEvent::Close);
    }

    /// Wait until the connection has fully closed.
    pub async fn closed(&self) {
        let mut rx = self.shared.state.subscribe();
        // An error means the connection was dropped, which is closed too.
        let _ = rx.wait_for(|state| *state == ConnectionState::Closed).await;
    }
}

/// Pending outcome of one queued response.
#[derive(Debug)]
pub struct Delivery {
    rx: oneshot::Receiver<Outcome>,
}

impl Delivery {
    /// Wait for the response to be transmitted or failed.
    pub async fn wait(self) -> Outcome {
        self.rx.await.unwrap_or(Err(ConnectorError::ConnectionClosed))
    }

    /// Non-blocking check. `None` while the response is still queued.
    pub fn try_outcome(&mut self) -> Option<Outcome> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(ConnectorError::ConnectionClosed)),
        }
    }
}
