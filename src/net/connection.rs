//! Connection state machine: one socket, one inbound and one outbound Way.
//!
//! # Responsibilities
//! - Pair the two Ways over a socket, with or without a TLS session
//! - Turn readiness and `ConnectionEvent`s into Way transitions
//! - Hand decoded requests to the application and correlate completed
//!   responses with pending requests by `RequestId`
//! - Close gracefully (flush, then TLS `close_notify`) or immediately
//!   (cancel both Ways, fail every queued message)
//!
//! # State Transitions
//! ```text
//! Opening ──handshake done (or plain)──▶ Open ──close requested──▶ Closing
//!    │                                    │                           │
//!    └───────────── error ────────────────┴──── flushed / error ──────┴──▶ Closed
//! ```
//!
//! # Design Decisions
//! - The connection is sans-io: it needs `Read + Write` with non-blocking
//!   semantics and nothing else, so it runs against `MemorySocket` in tests
//! - Processing runs in bounded passes; a pass that makes no Way `Ready`
//!   ends the loop and the driver waits for readiness or an event
//! - Inbound and outbound never block each other (full duplex)

use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::config::ConnectorConfig;
use crate::error::ConnectorError;
use crate::http::decoder::DecoderLimits;
use crate::http::inbound::{HttpInboundWay, InboundContext, InboundProgress};
use crate::http::outbound::{CompletedMessage, HttpOutboundWay, OutboundContext, OutboundMessage};
use crate::http::queue::MessageQueue;
use crate::http::request::InboundRequest;
use crate::http::response::bad_request;
use crate::io::channel::{PlainReadableChannel, PlainWritableChannel};
use crate::io::way::{IoInterest, IoState, Way};
use crate::observability::metrics;
use crate::tls::adapter::{ReadableTlsChannel, WritableTlsChannel};
use crate::tls::engine::TlsEngine;
use crate::tls::session::TlsSession;
use crate::tls::tasks::TaskExecutor;

use super::handle::{ConnectionEvent, ConnectionHandle, EventReceiver, Shared};

/// Global atomic counter for connection IDs.
/// Relaxed ordering is enough: only uniqueness matters.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Upper bound on processing passes per wake-up.
const MAX_PASSES: usize = 32;

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Connection-level lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted; TLS handshake (if any) in progress.
    Opening,
    /// Exchanging requests and responses.
    Open,
    /// No new responses accepted; flushing before close.
    Closing,
    /// Terminal.
    Closed,
}

/// Per-connection sizing and limits.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    pub application_buffer_size: usize,
    pub packet_buffer_size: usize,
    pub pipelining_depth: usize,
    pub limits: DecoderLimits,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self::from(&ConnectorConfig::default())
    }
}

impl From<&ConnectorConfig> for ConnectionSettings {
    fn from(config: &ConnectorConfig) -> Self {
        Self {
            application_buffer_size: config.buffers.application_buffer_size,
            packet_buffer_size: config.buffers.packet_buffer_size,
            pipelining_depth: config.http.pipelining_depth,
            limits: DecoderLimits {
                max_head_bytes: config.http.max_header_bytes,
                max_body_bytes: config.http.max_body_bytes,
            },
        }
    }
}

/// How bytes are protected on the wire.
pub enum Transport {
    Plain,
    Tls {
        engine: Box<dyn TlsEngine>,
        executor: Arc<dyn TaskExecutor>,
    },
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Plain => f.write_str("Plain"),
            Transport::Tls { .. } => f.write_str("Tls"),
        }
    }
}

/// One HTTP/1.1 connection over a non-blocking socket.
#[derive(Debug)]
pub struct Connection<S: Read + Write> {
    id: ConnectionId,
    socket: S,
    security: Option<TlsSession>,
    inbound: HttpInboundWay,
    outbound: HttpOutboundWay,
    shared: Arc<Shared>,
    requests: mpsc::UnboundedSender<InboundRequest>,
    state: ConnectionState,
}

impl<S: Read + Write> Connection<S> {
    /// Wrap an accepted socket. Decoded requests are sent on `requests`;
    /// the returned receiver carries this connection's events.
    pub fn open(
        socket: S,
        transport: Transport,
        settings: ConnectionSettings,
        requests: mpsc::UnboundedSender<InboundRequest>,
    ) -> (Self, EventReceiver) {
        let id = ConnectionId::new();
        let (events, events_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Opening);
        let outbound_queue = Arc::new(MessageQueue::new());
        let pending = Arc::new(MessageQueue::new());

        let security = match transport {
            Transport::Plain => None,
            Transport::Tls { engine, executor } => Some(TlsSession::new(
                engine,
                executor,
                events.clone(),
                settings.packet_buffer_size,
            )),
        };

        let shared = Arc::new(Shared {
            id,
            outbound: Arc::clone(&outbound_queue),
            pending: Arc::clone(&pending),
            state,
            events,
        });

        metrics::record_connection_opened();
        tracing::debug!(connection_id = %id, tls = security.is_some(), "Connection opened");

        let connection = Self {
            id,
            socket,
            security,
            inbound: HttpInboundWay::new(
                settings.application_buffer_size,
                settings.limits,
                settings.pipelining_depth,
                Arc::clone(&pending),
            ),
            outbound: HttpOutboundWay::new(settings.application_buffer_size, outbound_queue, pending),
            shared,
            requests,
            state: ConnectionState::Opening,
        };
        (connection, events_rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    /// Handle for the application layer.
    pub fn handle(&self) -> ConnectionHandle {
        ConnectionHandle::new(Arc::clone(&self.shared))
    }

    pub fn inbound(&self) -> &HttpInboundWay {
        &self.inbound
    }

    pub fn outbound(&self) -> &HttpOutboundWay {
        &self.outbound
    }

    pub fn tls_session(&self) -> Option<&TlsSession> {
        self.security.as_ref()
    }

    pub fn socket(&self) -> &S {
        &self.socket
    }

    /// Readiness the driver should wait for.
    pub fn interest(&self) -> IoInterest {
        IoInterest {
            readable: self.inbound.io_state() == IoState::Interest,
            writable: self.outbound.io_state() == IoState::Interest,
        }
    }

    /// The multiplexer reported the socket actionable.
    pub fn on_readiness(&mut self, readable: bool, writable: bool) {
        if readable {
            self.inbound.on_ready();
        }
        if writable {
            self.outbound.on_ready();
        }
    }

    pub fn on_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Wake => {}
            ConnectionEvent::TaskCompleted => {
                if let Some(session) = self.security.as_mut() {
                    session.on_tasks_completed();
                }
                self.inbound.on_task_completed();
            }
            ConnectionEvent::Close => self.begin_close(),
        }
    }

    /// Some Way can act without waiting for readiness.
    pub fn has_ready_work(&self) -> bool {
        self.inbound.io_state() == IoState::Ready || self.outbound.io_state() == IoState::Ready
    }

    /// Run every `Ready` Way until none is left or the pass bound is hit.
    /// Failures close the connection.
    pub fn process_ready(&mut self) {
        for _ in 0..MAX_PASSES {
            if self.is_closed() {
                return;
            }
            self.update_state();
            if !self.has_ready_work() {
                return;
            }
            if let Err(error) = self.run_pass() {
                self.close(error);
                return;
            }
        }
        self.update_state();
    }

    fn run_pass(&mut self) -> Result<(), ConnectorError> {
        if self.inbound.io_state() == IoState::Ready {
            let progress = self.run_inbound()?;
            self.on_inbound_progress(progress)?;
        }
        if self.outbound.io_state() == IoState::Ready {
            let completed = self.run_outbound()?;
            for message in completed {
                self.on_message_transmitted(message);
            }
        }
        Ok(())
    }

    fn run_inbound(&mut self) -> Result<InboundProgress, ConnectorError> {
        let socket = &mut self.socket;
        let inbound = &mut self.inbound;
        match self.security.as_mut() {
            Some(session) => inbound.process(&mut ReadableTlsChannel::new(socket, session)),
            None => inbound.process(&mut PlainReadableChannel::new(socket)),
        }
    }

    fn run_outbound(&mut self) -> Result<Vec<CompletedMessage>, ConnectorError> {
        let socket = &mut self.socket;
        let outbound = &mut self.outbound;
        match self.security.as_mut() {
            Some(session) => outbound.process(&mut WritableTlsChannel::new(socket, session)),
            None => outbound.process(&mut PlainWritableChannel::new(socket)),
        }
    }

    fn on_inbound_progress(&mut self, progress: InboundProgress) -> Result<(), ConnectorError> {
        if progress.bytes > 0 {
            metrics::record_wire_bytes("inbound", progress.bytes);
        }

        for (id, request) in progress.requests {
            metrics::record_request();
            tracing::debug!(
                connection_id = %self.id,
                request_id = %id,
                method = %request.method(),
                uri = %request.uri(),
                "Request received"
            );
            let inbound = InboundRequest::new(id, request, self.handle());
            if self.requests.send(inbound).is_err() {
                return Err(ConnectorError::ApplicationGone);
            }
        }

        if let Some(rejection) = progress.rejection {
            tracing::debug!(
                connection_id = %self.id,
                request_id = %rejection.id,
                error = %rejection.error,
                "Answering malformed request with 400"
            );
            // Sent once every earlier request has its final response.
            let response = bad_request(&rejection.error.to_string());
            let (message, _) = OutboundMessage::new(rejection.id, response, true);
            // Refused only when the queue is already closed.
            let _ = self.shared.outbound.push_back(message);
        }

        if progress.end_of_stream {
            tracing::debug!(connection_id = %self.id, "Peer closed its sending side");
        }
        Ok(())
    }

    fn on_message_transmitted(&mut self, message: CompletedMessage) {
        if message.close_after {
            self.begin_close();
        }
    }

    /// Re-evaluate both Ways and the connection state.
    pub fn update_state(&mut self) {
        if self.is_closed() {
            return;
        }

        if self.state == ConnectionState::Opening
            && self.security.as_ref().map_or(true, TlsSession::is_established)
        {
            tracing::debug!(connection_id = %self.id, "Connection open");
            self.set_state(ConnectionState::Open);
        }

        // A peer that stopped sending gets its outstanding answers first.
        if self.state == ConnectionState::Open
            && self.inbound.is_end_of_stream()
            && self.shared.pending.is_empty()
            && self.outbound.is_flushed()
        {
            self.begin_close();
        }

        let inbound_context = match self.security.as_ref() {
            Some(session) => InboundContext {
                could_drain: session.could_drain(),
                pending_input: session.has_unprocessed_input(),
            },
            None => InboundContext {
                could_drain: true,
                pending_input: false,
            },
        };
        let outbound_context = match self.security.as_ref() {
            Some(session) => OutboundContext {
                can_transmit: session.could_wrap_application_data(),
                channel_pending: session.has_pending_output(),
            },
            None => OutboundContext {
                can_transmit: true,
                channel_pending: false,
            },
        };
        self.inbound.update_state(&inbound_context);
        self.outbound.update_state(&outbound_context);

        if self.state == ConnectionState::Closing
            && self.outbound.is_flushed()
            && !outbound_context.channel_pending
        {
            self.finish_close();
        }
    }

    /// Stop reading, flush what is queued, then close.
    pub fn begin_close(&mut self) {
        if !matches!(self.state, ConnectionState::Opening | ConnectionState::Open) {
            return;
        }
        tracing::debug!(
            connection_id = %self.id,
            queued = self.outbound.load_score(),
            "Closing connection gracefully"
        );
        self.set_state(ConnectionState::Closing);
        self.inbound.stop();
        if let Some(session) = self.security.as_mut() {
            if session.is_established() {
                session.close_outbound();
            }
        }
    }

    fn finish_close(&mut self) {
        self.close(ConnectorError::ConnectionClosed);
    }

    /// Close immediately: cancel both Ways, drop buffered bytes and fail
    /// every queued message with `error`.
    pub fn close(&mut self, error: ConnectorError) {
        if self.is_closed() {
            return;
        }
        match &error {
            ConnectorError::ConnectionClosed => {
                tracing::debug!(connection_id = %self.id, "Connection closed")
            }
            other => tracing::debug!(connection_id = %self.id, error = %other, "Connection failed"),
        }
        if let Some(session) = self.security.as_mut() {
            if matches!(self.state, ConnectionState::Opening) && !matches!(error, ConnectorError::ConnectionClosed) {
                metrics::record_handshake("failed");
            }
            session.inbound_packets.clear();
            session.outbound_packets.clear();
        }
        self.outbound.cancel(&error);
        self.inbound.cancel(&error);
        self.set_state(ConnectionState::Closed);
        metrics::record_connection_closed();
    }

    fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
        self.shared.state.send_replace(state);
    }
}

impl<S: Read + Write> Drop for Connection<S> {
    fn drop(&mut self) {
        if !self.is_closed() {
            self.close(ConnectorError::ConnectionClosed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::socket::MemorySocket;
    use bytes::Bytes;
    use http::Response;

    fn plain() -> (Connection<MemorySocket>, MemorySocket, mpsc::UnboundedReceiver<InboundRequest>) {
        let socket = MemorySocket::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let (conn, _events) = Connection::open(socket.clone(), Transport::Plain, ConnectionSettings::default(), tx);
        (conn, socket, rx)
    }

    fn pump(conn: &mut Connection<MemorySocket>) {
        for _ in 0..8 {
            conn.process_ready();
            let interest = conn.interest();
            if interest.is_empty() && !conn.has_ready_work() {
                break;
            }
            conn.on_readiness(interest.readable, interest.writable);
        }
        conn.process_ready();
    }

    fn ok(body: &'static str) -> Response<Bytes> {
        Response::new(Bytes::from_static(body.as_bytes()))
    }

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
        assert!(id1.to_string().starts_with("conn-"));
    }

    #[test]
    fn plain_connection_opens_and_reads() {
        let (mut conn, socket, mut requests) = plain();
        assert_eq!(conn.state(), ConnectionState::Opening);
        conn.update_state();
        assert_eq!(conn.state(), ConnectionState::Open);
        assert!(conn.interest().readable);

        socket.push_inbound(b"GET /hello HTTP/1.1\r\nHost: a\r\n\r\n");
        pump(&mut conn);
        let request = requests.try_recv().unwrap();
        assert_eq!(request.request().uri().path(), "/hello");
        assert_eq!(request.connection().pending_requests(), 1);

        request.respond(ok("hi")).unwrap();
        pump(&mut conn);
        let wire = socket.take_outbound();
        assert!(wire.starts_with(b"HTTP/1.1 200 OK\r\n"));
        assert!(wire.ends_with(b"\r\n\r\nhi"));
        assert_eq!(conn.handle().pending_requests(), 0);
        assert_eq!(conn.state(), ConnectionState::Open);
    }

    #[test]
    fn malformed_request_gets_400_then_close() {
        let (mut conn, socket, _requests) = plain();
        socket.push_inbound(b"BROKEN\r\n\r\n");
        pump(&mut conn);
        let wire = String::from_utf8(socket.take_outbound()).unwrap();
        assert!(wire.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(wire.contains("connection: close"));
        assert!(conn.is_closed());
    }

    #[test]
    fn non_persistent_request_closes_after_response() {
        let (mut conn, socket, mut requests) = plain();
        socket.push_inbound(b"GET / HTTP/1.0\r\n\r\n");
        pump(&mut conn);
        let request = requests.try_recv().unwrap();
        let mut delivery = request.respond(ok("bye")).unwrap();
        pump(&mut conn);
        assert_eq!(delivery.try_outcome(), Some(Ok(())));
        assert!(conn.is_closed());
        assert!(request.respond(ok("late")).is_err());
    }

    #[test]
    fn peer_shutdown_closes_after_answers() {
        let (mut conn, socket, mut requests) = plain();
        socket.push_inbound(b"GET / HTTP/1.1\r\n\r\n");
        socket.close_inbound();
        pump(&mut conn);
        assert!(!conn.is_closed());

        let request = requests.try_recv().unwrap();
        request.respond(ok("done")).unwrap();
        pump(&mut conn);
        assert!(conn.is_closed());
        assert!(socket.take_outbound().ends_with(b"done"));
    }

    #[test]
    fn close_abandons_requests_awaiting_answers() {
        let (mut conn, socket, mut requests) = plain();
        socket.push_inbound(b"GET /1 HTTP/1.1\r\n\r\nGET /2 HTTP/1.1\r\n\r\n");
        pump(&mut conn);
        let first = requests.try_recv().unwrap();
        let second = requests.try_recv().unwrap();
        let handle = conn.handle();
        assert_eq!(handle.pending_requests(), 2);

        conn.close(ConnectorError::IdleTimeout(std::time::Duration::from_secs(1)));
        assert_eq!(handle.pending_requests(), 0);
        assert_eq!(handle.state(), ConnectionState::Closed);
        assert!(matches!(first.respond(ok("late")), Err(ConnectorError::ConnectionClosed)));
        assert!(matches!(second.respond(ok("late")), Err(ConnectorError::ConnectionClosed)));
    }

    #[test]
    fn application_gone_fails_connection() {
        let (mut conn, socket, requests) = plain();
        drop(requests);
        socket.push_inbound(b"GET / HTTP/1.1\r\n\r\n");
        pump(&mut conn);
        assert!(conn.is_closed());
    }

    #[test]
    fn socket_error_fails_queued_messages() {
        let (mut conn, socket, mut requests) = plain();
        socket.push_inbound(b"GET / HTTP/1.1\r\n\r\n");
        pump(&mut conn);
        let request = requests.try_recv().unwrap();

        socket.fail_writes(std::io::ErrorKind::ConnectionReset);
        let mut delivery = request.respond(ok("x")).unwrap();
        pump(&mut conn);
        assert!(conn.is_closed());
        assert!(matches!(
            delivery.try_outcome(),
            Some(Err(ConnectorError::Io { kind: std::io::ErrorKind::ConnectionReset, .. }))
        ));
    }
}
