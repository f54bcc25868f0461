//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http::Response;
use tokio::sync::mpsc;

use http_connector::error::ConnectorError;
use http_connector::http::InboundRequest;
use http_connector::net::connection::{Connection, ConnectionSettings, Transport};
use http_connector::net::handle::EventReceiver;
use http_connector::net::socket::MemorySocket;
use http_connector::tls::engine::{DelegatedTask, EngineResult, EngineStatus, HandshakeStatus, TlsEngine};
use http_connector::tls::tasks::InlineTaskExecutor;

/// First flight the scripted client sends.
pub const CLIENT_HELLO: &[u8] = b"HELLO";
/// Flight the scripted engine answers with once its task has run.
pub const SERVER_HELLO: &[u8] = b"WELCOME";
/// Record the scripted engine emits for close_notify.
pub const CLOSE_NOTIFY: &[u8] = b"BYE";

/// A connection under test with the peer's end of its socket.
pub struct Harness {
    pub connection: Connection<MemorySocket>,
    pub events: EventReceiver,
    pub peer: MemorySocket,
    pub requests: mpsc::UnboundedReceiver<InboundRequest>,
}

impl Harness {
    pub fn plain(settings: ConnectionSettings) -> Self {
        Self::open(Transport::Plain, settings)
    }

    /// Connection over a [`ScriptedEngine`]; returns the engine's log too.
    pub fn scripted(settings: ConnectionSettings) -> (Self, Arc<Mutex<EngineLog>>) {
        let (engine, log) = ScriptedEngine::new();
        let transport = Transport::Tls {
            engine: Box::new(engine),
            executor: Arc::new(InlineTaskExecutor),
        };
        (Self::open(transport, settings), log)
    }

    pub fn open(transport: Transport, settings: ConnectionSettings) -> Self {
        let peer = MemorySocket::new();
        let (tx, requests) = mpsc::unbounded_channel();
        let (connection, events) = Connection::open(peer.clone(), transport, settings, tx);
        Self {
            connection,
            events,
            peer,
            requests,
        }
    }

    /// Deliver events and readiness until the connection settles.
    pub fn pump(&mut self) {
        for _ in 0..64 {
            while let Ok(event) = self.events.try_recv() {
                self.connection.on_event(event);
            }
            self.connection.process_ready();
            if self.connection.is_closed() {
                return;
            }
            let interest = self.connection.interest();
            self.connection.on_readiness(interest.readable, interest.writable);
        }
        self.connection.process_ready();
    }

    /// Every request decoded so far.
    pub fn received(&mut self) -> Vec<InboundRequest> {
        let mut received = Vec::new();
        while let Ok(request) = self.requests.try_recv() {
            received.push(request);
        }
        received
    }
}

pub fn response(status: u16, body: &'static str) -> Response<Bytes> {
    Response::builder()
        .status(status)
        .body(Bytes::from_static(body.as_bytes()))
        .unwrap()
}

/// What the scripted engine saw.
#[derive(Debug, Default)]
pub struct EngineLog {
    /// Handshake status reported by each wrap/unwrap call, in order.
    pub statuses: Vec<HandshakeStatus>,
    pub unwraps: usize,
    pub wraps: usize,
    pub tasks_run: usize,
    /// Calls made while the script forbade them.
    pub violations: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitHello,
    Task,
    Established,
}

/// TLS engine that follows `NeedUnwrap → NeedTask → NeedWrap → Finished`
/// and then passes application bytes through unchanged.
pub struct ScriptedEngine {
    phase: Phase,
    task_taken: bool,
    task_done: Arc<AtomicBool>,
    close_requested: bool,
    close_sent: bool,
    log: Arc<Mutex<EngineLog>>,
}

impl ScriptedEngine {
    pub fn new() -> (Self, Arc<Mutex<EngineLog>>) {
        let log = Arc::new(Mutex::new(EngineLog::default()));
        let engine = Self {
            phase: Phase::AwaitHello,
            task_taken: false,
            task_done: Arc::new(AtomicBool::new(false)),
            close_requested: false,
            close_sent: false,
            log: Arc::clone(&log),
        };
        (engine, log)
    }

    fn violation(&self, what: String) {
        self.log.lock().unwrap().violations.push(what);
    }

    fn result(&self, status: EngineStatus, handshake: HandshakeStatus, consumed: usize, produced: usize) -> EngineResult {
        self.log.lock().unwrap().statuses.push(handshake);
        EngineResult::new(status, handshake, consumed, produced)
    }
}

impl TlsEngine for ScriptedEngine {
    fn unwrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, ConnectorError> {
        self.log.lock().unwrap().unwraps += 1;
        let status = self.handshake_status();
        if !matches!(status, HandshakeStatus::NeedUnwrap | HandshakeStatus::NotHandshaking) {
            self.violation(format!("unwrap during {status:?}"));
            return Ok(self.result(EngineStatus::Ok, status, 0, 0));
        }

        match self.phase {
            Phase::AwaitHello => {
                if src.len() < CLIENT_HELLO.len() {
                    return Ok(self.result(EngineStatus::BufferUnderflow, HandshakeStatus::NeedUnwrap, 0, 0));
                }
                if &src[..CLIENT_HELLO.len()] != CLIENT_HELLO {
                    return Err(ConnectorError::Tls("unexpected client hello".to_string()));
                }
                self.phase = Phase::Task;
                Ok(self.result(EngineStatus::Ok, HandshakeStatus::NeedTask, CLIENT_HELLO.len(), 0))
            }
            Phase::Task => unreachable!("handshake status gates this phase"),
            Phase::Established => {
                if src.is_empty() {
                    return Ok(self.result(EngineStatus::BufferUnderflow, HandshakeStatus::NotHandshaking, 0, 0));
                }
                if dst.is_empty() {
                    return Ok(self.result(EngineStatus::BufferOverflow, HandshakeStatus::NotHandshaking, 0, 0));
                }
                let n = src.len().min(dst.len());
                dst[..n].copy_from_slice(&src[..n]);
                Ok(self.result(EngineStatus::Ok, HandshakeStatus::NotHandshaking, n, n))
            }
        }
    }

    fn wrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, ConnectorError> {
        self.log.lock().unwrap().wraps += 1;
        let status = self.handshake_status();
        match self.phase {
            Phase::AwaitHello => {
                self.violation("wrap before the client hello".to_string());
                Ok(self.result(EngineStatus::Ok, status, 0, 0))
            }
            Phase::Task => {
                if status == HandshakeStatus::NeedTask {
                    self.violation("wrap while the task is pending".to_string());
                    return Ok(self.result(EngineStatus::Ok, status, 0, 0));
                }
                if !src.is_empty() {
                    self.violation("application data wrapped during the handshake".to_string());
                }
                if dst.len() < SERVER_HELLO.len() {
                    return Ok(self.result(EngineStatus::BufferOverflow, status, 0, 0));
                }
                dst[..SERVER_HELLO.len()].copy_from_slice(SERVER_HELLO);
                self.phase = Phase::Established;
                Ok(self.result(EngineStatus::Ok, HandshakeStatus::Finished, 0, SERVER_HELLO.len()))
            }
            Phase::Established => {
                if self.close_requested {
                    if self.close_sent || dst.len() < CLOSE_NOTIFY.len() {
                        return Ok(self.result(EngineStatus::Closed, HandshakeStatus::NotHandshaking, 0, 0));
                    }
                    dst[..CLOSE_NOTIFY.len()].copy_from_slice(CLOSE_NOTIFY);
                    self.close_sent = true;
                    return Ok(self.result(EngineStatus::Closed, HandshakeStatus::NotHandshaking, 0, CLOSE_NOTIFY.len()));
                }
                let n = src.len().min(dst.len());
                dst[..n].copy_from_slice(&src[..n]);
                Ok(self.result(EngineStatus::Ok, HandshakeStatus::NotHandshaking, n, n))
            }
        }
    }

    fn handshake_status(&self) -> HandshakeStatus {
        match self.phase {
            Phase::AwaitHello => HandshakeStatus::NeedUnwrap,
            Phase::Task if self.task_done.load(Ordering::SeqCst) => HandshakeStatus::NeedWrap,
            Phase::Task => HandshakeStatus::NeedTask,
            Phase::Established if self.close_requested && !self.close_sent => HandshakeStatus::NeedWrap,
            Phase::Established => HandshakeStatus::NotHandshaking,
        }
    }

    fn delegated_task(&mut self) -> Option<DelegatedTask> {
        if self.phase != Phase::Task || self.task_taken {
            return None;
        }
        self.task_taken = true;
        let done = Arc::clone(&self.task_done);
        let log = Arc::clone(&self.log);
        Some(Box::new(move || {
            log.lock().unwrap().tasks_run += 1;
            done.store(true, Ordering::SeqCst);
        }))
    }

    fn close_outbound(&mut self) {
        self.close_requested = true;
    }
}

/// Self-signed certificate for `localhost` as DER (certificate, PKCS#8 key).
pub fn self_signed() -> (Vec<u8>, Vec<u8>) {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    (cert.serialize_der().unwrap(), cert.serialize_private_key_der())
}
