//! Outbound HTTP Way: queued responses out to the socket.
//!
//! # Responsibilities
//! - Bind the first queued response whose request is next in line, and
//!   serialize it
//! - Stream the serialized bytes through a writable channel (plain or TLS)
//! - Pop a message only after its last byte has reached the socket, then
//!   report it to its issuer and retire its request if it was final
//! - Fail every queued message exactly once on error
//!
//! # Design Decisions
//! - Responses leave in request order whatever order the application
//!   answers in: a response waits in the queue until its request heads the
//!   pending queue. Responses to requests that are not pending go out in
//!   queue order
//! - The bound message stays in the queue while it is being transmitted,
//!   so the load score counts it
//! - A message counts as transmitted when its payload is exhausted, the
//!   application buffer is empty and the channel holds no pending ciphertext

use std::sync::Arc;

use bytes::Bytes;
use http::Response;
use tokio::sync::oneshot;

use crate::error::ConnectorError;
use crate::io::buffer::{Buffer, IoProgress};
use crate::io::channel::WritableBufferedChannel;
use crate::io::way::{self, IoState, Way};
use crate::observability::metrics;

use super::inbound::PendingRequest;
use super::queue::MessageQueue;
use super::request::RequestId;
use super::response::{encode_head_response, encode_response};

/// Per-message outcome reported to the issuer.
pub type Outcome = Result<(), ConnectorError>;

/// A response waiting for transmission.
#[derive(Debug)]
pub struct OutboundMessage {
    pub request_id: RequestId,
    pub response: Response<Bytes>,
    /// Close the connection once this message is on the wire.
    pub close_after: bool,
    /// Answers a `HEAD` request: headers only.
    pub head_only: bool,
    completion: oneshot::Sender<Outcome>,
}

impl OutboundMessage {
    /// Build a message and the receiver its outcome will be sent to.
    pub fn new(
        request_id: RequestId,
        response: Response<Bytes>,
        close_after: bool,
    ) -> (Self, oneshot::Receiver<Outcome>) {
        let (completion, rx) = oneshot::channel();
        let message = Self {
            request_id,
            response,
            close_after,
            head_only: false,
            completion,
        };
        (message, rx)
    }

    /// Informational (1xx) responses are provisional.
    pub fn is_final(&self) -> bool {
        !self.response.status().is_informational()
    }

    /// Report the outcome. Consumes the message so it cannot be reported twice.
    pub fn finish(self, outcome: Outcome) {
        metrics::record_message(if outcome.is_ok() { "sent" } else { "failed" });
        // The issuer may have stopped listening.
        let _ = self.completion.send(outcome);
    }
}

/// A message whose transmission just completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletedMessage {
    pub request_id: RequestId,
    pub is_final: bool,
    pub close_after: bool,
}

/// Connection facts the outbound Way needs to decide on escalation.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutboundContext {
    /// Application bytes may be written (TLS: handshake done, not closed).
    pub can_transmit: bool,
    /// The channel has bytes of its own to write (TLS records).
    pub channel_pending: bool,
}

#[derive(Debug)]
struct BoundMessage {
    request_id: RequestId,
    is_final: bool,
    close_after: bool,
    payload: Bytes,
    offset: usize,
}

impl BoundMessage {
    fn unsent(&self) -> &[u8] {
        &self.payload[self.offset..]
    }
}

/// Writing side of an HTTP connection.
#[derive(Debug)]
pub struct HttpOutboundWay {
    io_state: IoState,
    buffer: Buffer,
    queue: Arc<MessageQueue<OutboundMessage>>,
    pending: Arc<MessageQueue<PendingRequest>>,
    bound: Option<BoundMessage>,
}

impl HttpOutboundWay {
    pub fn new(
        buffer_size: usize,
        queue: Arc<MessageQueue<OutboundMessage>>,
        pending: Arc<MessageQueue<PendingRequest>>,
    ) -> Self {
        Self {
            io_state: IoState::Idle,
            buffer: Buffer::new(buffer_size),
            queue,
            pending,
            bound: None,
        }
    }

    /// Queue depth, the in-flight message included.
    pub fn load_score(&self) -> usize {
        self.queue.len()
    }

    /// Nothing queued, bound or buffered.
    pub fn is_flushed(&self) -> bool {
        self.bound.is_none() && self.buffer.is_empty() && self.queue.is_empty()
    }

    fn has_unsent(&self) -> bool {
        self.buffer.has_remaining() || self.bound.as_ref().is_some_and(|b| !b.unsent().is_empty())
    }

    /// Bind the first message whose turn it is, if nothing is bound.
    fn bind_next(&mut self) -> bool {
        if self.bound.is_some() {
            return true;
        }
        let waiting = self.pending.map_all(|p| p.id);
        self.bound = self.queue.find_map(|message| {
            let id = message.request_id;
            let in_turn = waiting.first() == Some(&id) || !waiting.contains(&id);
            in_turn.then(|| BoundMessage {
                request_id: id,
                is_final: message.is_final(),
                close_after: message.close_after,
                payload: if message.head_only {
                    encode_head_response(&message.response, message.close_after)
                } else {
                    encode_response(&message.response, message.close_after)
                },
                offset: 0,
            })
        });
        if let Some(bound) = &self.bound {
            tracing::trace!(request_id = %bound.request_id, bytes = bound.payload.len(), "Response bound");
        }
        self.bound.is_some()
    }

    /// Copy as much of the bound payload as fits into the buffer.
    fn stage(&mut self) -> Result<(), ConnectorError> {
        let Some(bound) = self.bound.as_mut() else {
            return Ok(());
        };
        if bound.unsent().is_empty() || !self.buffer.has_space() {
            return Ok(());
        }
        self.buffer.fill_with(|free| -> Result<usize, ConnectorError> {
            let unsent = bound.unsent();
            let n = unsent.len().min(free.len());
            free[..n].copy_from_slice(&unsent[..n]);
            bound.offset += n;
            Ok(n)
        })?;
        Ok(())
    }

    /// Run one staging/drain attempt. Only acts in `Ready`.
    pub fn process<C>(&mut self, channel: &mut C) -> Result<Vec<CompletedMessage>, ConnectorError>
    where
        C: WritableBufferedChannel + ?Sized,
    {
        let mut completed = Vec::new();
        if self.io_state != IoState::Ready {
            return Ok(completed);
        }
        self.io_state = IoState::Processing;

        let result = self.transmit(channel, &mut completed);
        if self.io_state == IoState::Processing {
            self.io_state = IoState::Idle;
        }
        result.map(|()| completed)
    }

    fn transmit<C>(&mut self, channel: &mut C, completed: &mut Vec<CompletedMessage>) -> Result<(), ConnectorError>
    where
        C: WritableBufferedChannel + ?Sized,
    {
        loop {
            self.stage()?;
            let last = channel.drain(&mut self.buffer)?;

            let transmitted = self
                .bound
                .as_ref()
                .is_some_and(|b| b.unsent().is_empty())
                && self.buffer.is_empty()
                && !channel.has_pending();
            if transmitted {
                if let Some(done) = self.complete_bound() {
                    completed.push(done);
                }
                if self.bind_next() {
                    continue;
                }
            }

            let work_left = self.has_unsent() || channel.has_pending();
            if !way::can_loop(last, work_left) {
                return Ok(());
            }
        }
    }

    fn complete_bound(&mut self) -> Option<CompletedMessage> {
        let bound = self.bound.take()?;
        let message = self
            .queue
            .remove_first(|m| m.request_id == bound.request_id)?;
        tracing::trace!(request_id = %bound.request_id, "Response transmitted");
        message.finish(Ok(()));
        if bound.is_final {
            // A provisional response leaves its request pending.
            let retired = self.pending.pop_front_if(|head| head.id == bound.request_id);
            if retired.is_some() {
                tracing::trace!(request_id = %bound.request_id, "Request completed");
            }
        }
        Some(CompletedMessage {
            request_id: bound.request_id,
            is_final: bound.is_final,
            close_after: bound.close_after,
        })
    }
}

impl Way for HttpOutboundWay {
    type Context = OutboundContext;

    fn io_state(&self) -> IoState {
        self.io_state
    }

    fn update_state(&mut self, context: &OutboundContext) {
        if self.io_state != IoState::Idle {
            return;
        }
        self.bind_next();
        if (self.has_unsent() && context.can_transmit) || context.channel_pending {
            self.io_state = IoState::Interest;
        }
    }

    fn on_ready(&mut self) {
        self.io_state = way::ready_transition(self.io_state);
    }

    fn on_error(&mut self, error: &ConnectorError) {
        // Queued messages first, then the one in flight.
        let in_flight = self
            .bound
            .take()
            .and_then(|bound| self.queue.remove_first(|m| m.request_id == bound.request_id));
        for message in self.queue.drain_all() {
            message.finish(Err(error.clone()));
        }
        if let Some(message) = in_flight {
            message.finish(Err(error.clone()));
        }
    }

    fn cancel(&mut self, error: &ConnectorError) {
        self.io_state = IoState::Cancelling;
        self.buffer.clear();
        self.queue.close();
        self.on_error(error);
    }
}
