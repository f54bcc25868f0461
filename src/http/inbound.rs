//! Inbound HTTP Way: socket bytes in, decoded requests out.
//!
//! # Responsibilities
//! - Fill the application buffer through a readable channel (plain or TLS)
//! - Feed buffered bytes to the request decoder
//! - Record every released request in the pending queue until its final
//!   response has been transmitted
//! - Stop reading once `pipelining_depth` requests are pending
//!
//! # Design Decisions
//! - Framing errors never abort a pass; requests decoded before the error
//!   are still released and the error is reported alongside them
//! - A framing error takes a slot in the pending queue like a request, so
//!   its `400` is answered only after every earlier request
//! - After end of stream or a framing error the Way stops reading but keeps
//!   releasing requests that are already buffered

use std::sync::Arc;

use bytes::Bytes;
use http::{Method, Request};

use crate::error::{ConnectorError, ParseError};
use crate::io::buffer::{Buffer, IoProgress};
use crate::io::channel::ReadableBufferedChannel;
use crate::io::way::{self, IoState, Way};

use super::decoder::{DecoderLimits, RequestDecoder};
use super::queue::MessageQueue;
use super::request::RequestId;

/// A request awaiting its final response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRequest {
    pub id: RequestId,
    /// The connection stays open after the final response.
    pub persistent: bool,
    /// Responses carry headers only.
    pub head: bool,
}

/// A framing error, answered in request order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Pending slot held by the error.
    pub id: RequestId,
    pub error: ParseError,
}

/// Connection facts the inbound Way needs to decide on escalation.
#[derive(Debug, Clone, Copy, Default)]
pub struct InboundContext {
    /// The channel permits reading (TLS: not closed, no wrap or task due).
    pub could_drain: bool,
    /// The channel holds input it can process without touching the socket.
    pub pending_input: bool,
}

/// Result of one processing pass.
#[derive(Debug, Default)]
pub struct InboundProgress {
    pub requests: Vec<(RequestId, Request<Bytes>)>,
    /// Plaintext bytes moved into the buffer.
    pub bytes: usize,
    pub end_of_stream: bool,
    pub rejection: Option<Rejection>,
}

/// Reading side of an HTTP connection.
#[derive(Debug)]
pub struct HttpInboundWay {
    io_state: IoState,
    buffer: Buffer,
    decoder: RequestDecoder,
    pending: Arc<MessageQueue<PendingRequest>>,
    pipelining_depth: usize,
    end_of_stream: bool,
    stopped: bool,
    /// The decoder consumed everything buffered without completing a request.
    needs_input: bool,
}

impl HttpInboundWay {
    pub fn new(
        buffer_size: usize,
        limits: DecoderLimits,
        pipelining_depth: usize,
        pending: Arc<MessageQueue<PendingRequest>>,
    ) -> Self {
        Self {
            io_state: IoState::Idle,
            buffer: Buffer::new(buffer_size),
            decoder: RequestDecoder::new(limits),
            pending,
            pipelining_depth: pipelining_depth.max(1),
            end_of_stream: false,
            stopped: false,
            needs_input: false,
        }
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    /// Another request may be released without exceeding the pipeline depth.
    pub fn has_room(&self) -> bool {
        self.pending.len() < self.pipelining_depth
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.end_of_stream
    }

    /// Reading is over, by peer shutdown or by `stop`.
    pub fn is_reading_finished(&self) -> bool {
        self.end_of_stream || self.stopped
    }

    /// Stop reading for good. Buffered bytes are discarded.
    pub fn stop(&mut self) {
        self.stopped = true;
        self.buffer.clear();
        if self.io_state == IoState::Interest {
            self.io_state = IoState::Idle;
        }
    }

    /// A delegated TLS task finished; resume the suspended unwrap.
    pub fn on_task_completed(&mut self) {
        if self.io_state == IoState::Idle {
            self.io_state = IoState::Ready;
        }
    }

    fn has_actionable_content(&self) -> bool {
        !self.stopped && !self.buffer.is_empty() && !self.needs_input
    }

    /// Run one fill/decode attempt. Only acts in `Ready`.
    pub fn process<C>(&mut self, channel: &mut C) -> Result<InboundProgress, ConnectorError>
    where
        C: ReadableBufferedChannel + ?Sized,
    {
        let mut progress = InboundProgress::default();
        if self.io_state != IoState::Ready {
            return Ok(progress);
        }
        self.io_state = IoState::Processing;

        let result = self.fill_and_decode(channel, &mut progress);
        if self.io_state == IoState::Processing {
            self.io_state = IoState::Idle;
        }
        result.map(|()| progress)
    }

    fn fill_and_decode<C>(&mut self, channel: &mut C, progress: &mut InboundProgress) -> Result<(), ConnectorError>
    where
        C: ReadableBufferedChannel + ?Sized,
    {
        loop {
            self.decode_buffered(progress);
            if !self.has_room() || self.is_reading_finished() || !channel.could_drain() {
                return Ok(());
            }

            let last = channel.fill(&mut self.buffer)?;
            match last {
                IoProgress::Transferred(n) => {
                    progress.bytes += n;
                    if n > 0 {
                        self.needs_input = false;
                    }
                }
                IoProgress::EndOfStream => {
                    self.end_of_stream = true;
                    progress.end_of_stream = true;
                    self.decode_buffered(progress);
                    return Ok(());
                }
                IoProgress::WouldBlock => {}
            }

            if !channel.can_loop(way::can_loop(last, self.buffer.has_space())) {
                self.decode_buffered(progress);
                return Ok(());
            }
        }
    }

    /// Release buffered requests while the pipeline has room.
    fn decode_buffered(&mut self, progress: &mut InboundProgress) {
        while self.has_room() && self.has_actionable_content() {
            let decoder = &mut self.decoder;
            let mut decoded = None;
            let outcome = self.buffer.drain_with(|bytes| {
                decoder.decode(bytes).map(|(used, request)| {
                    decoded = request;
                    used
                })
            });
            match outcome {
                Err(error) => {
                    let id = RequestId::new();
                    tracing::debug!(request_id = %id, error = %error, "Rejecting malformed request");
                    let slot = PendingRequest {
                        id,
                        persistent: false,
                        head: false,
                    };
                    if self.pending.push_back(slot).is_ok() {
                        progress.rejection = Some(Rejection { id, error });
                    }
                    self.stop();
                    return;
                }
                Ok(_) => match decoded {
                    Some(done) => {
                        let id = RequestId::new();
                        let pending = PendingRequest {
                            id,
                            persistent: done.persistent,
                            head: *done.request.method() == Method::HEAD,
                        };
                        if self.pending.push_back(pending).is_err() {
                            return;
                        }
                        tracing::trace!(request_id = %id, "Request decoded");
                        progress.requests.push((id, done.request));
                        if !done.persistent {
                            // Nothing after a non-persistent request is read.
                            self.stop();
                            return;
                        }
                    }
                    None => self.needs_input = true,
                },
            }
        }
    }
}

impl Way for HttpInboundWay {
    type Context = InboundContext;

    fn io_state(&self) -> IoState {
        self.io_state
    }

    fn update_state(&mut self, context: &InboundContext) {
        if self.io_state == IoState::Cancelling {
            return;
        }
        let can_read = context.could_drain && !self.is_reading_finished();
        let actionable =
            self.has_actionable_content() || (context.pending_input && context.could_drain && !self.stopped);
        self.io_state = way::inbound_escalation(
            self.io_state,
            self.has_room(),
            can_read || actionable,
            actionable,
            can_read && self.buffer.has_space(),
        );
    }

    fn on_ready(&mut self) {
        self.io_state = way::ready_transition(self.io_state);
    }

    /// Forget every request still awaiting its final response.
    ///
    /// Requests already handed to the application learn of the failure
    /// through their connection: `respond` returns
    /// `ConnectorError::ConnectionClosed` and `ConnectionHandle::closed`
    /// resolves. A request still being decoded is dropped with the buffer.
    fn on_error(&mut self, error: &ConnectorError) {
        let mut abandoned = 0;
        while self.pending.pop_front().is_some() {
            abandoned += 1;
        }
        if abandoned > 0 {
            tracing::debug!(abandoned, error = %error, "Dropping requests awaiting a response");
        }
    }

    fn cancel(&mut self, error: &ConnectorError) {
        self.io_state = IoState::Cancelling;
        self.buffer.clear();
        self.stopped = true;
        self.pending.close();
        self.on_error(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::channel::PlainReadableChannel;
    use crate::net::socket::MemorySocket;

    fn way(depth: usize) -> HttpInboundWay {
        HttpInboundWay::new(64, DecoderLimits::default(), depth, Arc::new(MessageQueue::new()))
    }

    fn readable() -> InboundContext {
        InboundContext {
            could_drain: true,
            pending_input: false,
        }
    }

    fn pass(way: &mut HttpInboundWay, socket: &mut MemorySocket) -> InboundProgress {
        way.update_state(&readable());
        way.on_ready();
        way.process(&mut PlainReadableChannel::new(socket)).unwrap()
    }

    #[test]
    fn idle_way_requests_read_interest() {
        let mut way = way(2);
        assert_eq!(way.io_state(), IoState::Idle);
        way.update_state(&readable());
        assert_eq!(way.io_state(), IoState::Interest);
        way.on_ready();
        assert_eq!(way.io_state(), IoState::Ready);
    }

    #[test]
    fn releases_requests_up_to_pipelining_depth() {
        let mut socket = MemorySocket::new();
        socket.push_inbound(b"GET /1 HTTP/1.1\r\n\r\nGET /2 HTTP/1.1\r\n\r\n");
        let mut way = way(1);

        let progress = pass(&mut way, &mut socket);
        assert_eq!(progress.requests.len(), 1);
        assert!(!way.has_room());

        // No room: the way stays idle even though bytes are buffered.
        way.update_state(&readable());
        assert_eq!(way.io_state(), IoState::Idle);

        way.pending.pop_front();
        way.update_state(&readable());
        assert_eq!(way.io_state(), IoState::Ready);
        let progress = way.process(&mut PlainReadableChannel::new(&mut socket)).unwrap();
        assert_eq!(progress.requests[0].1.uri().path(), "/2");
    }

    #[test]
    fn framing_error_stops_reading() {
        let mut socket = MemorySocket::new();
        socket.push_inbound(b"GET / HTTP/1.1\r\n\r\nNOT-HTTP\r\n\r\n");
        let mut way = way(4);
        let progress = pass(&mut way, &mut socket);
        assert_eq!(progress.requests.len(), 1);
        let rejection = progress.rejection.unwrap();
        assert_eq!(rejection.error, ParseError::InvalidRequestLine);
        // The error waits behind the request decoded before it.
        let order = way.pending.map_all(|p| p.id);
        assert_eq!(order, vec![progress.requests[0].0, rejection.id]);
        assert!(way.is_reading_finished());
        way.update_state(&readable());
        assert_eq!(way.io_state(), IoState::Idle);
    }

    #[test]
    fn end_of_stream_is_reported_once_buffer_is_read() {
        let mut socket = MemorySocket::new();
        socket.push_inbound(b"GET / HTTP/1.1\r\n\r\n");
        socket.close_inbound();
        let mut way = way(4);
        let progress = pass(&mut way, &mut socket);
        assert_eq!(progress.requests.len(), 1);
        assert!(progress.end_of_stream);
        assert!(way.is_end_of_stream());
    }

    #[test]
    fn non_persistent_request_ends_reading() {
        let mut socket = MemorySocket::new();
        socket.push_inbound(b"GET / HTTP/1.0\r\n\r\nGET /ignored HTTP/1.0\r\n\r\n");
        let mut way = way(4);
        let progress = pass(&mut way, &mut socket);
        assert_eq!(progress.requests.len(), 1);
        assert!(way.is_reading_finished());
    }

    #[test]
    fn head_requests_are_marked() {
        let mut socket = MemorySocket::new();
        socket.push_inbound(b"HEAD /x HTTP/1.1\r\n\r\nGET /y HTTP/1.1\r\n\r\n");
        let mut way = way(4);
        pass(&mut way, &mut socket);
        assert_eq!(way.pending.map_all(|p| p.head), vec![true, false]);
    }

    #[test]
    fn cancel_is_terminal() {
        let mut way = way(4);
        way.cancel(&ConnectorError::ConnectionClosed);
        way.update_state(&readable());
        way.on_ready();
        assert_eq!(way.io_state(), IoState::Cancelling);
    }
}
