//! [`TlsEngine`] backed by a rustls server connection.
//!
//! # Status Mapping
//! ```text
//! rustls wants_write            → NeedWrap
//! rustls is_handshaking         → NeedUnwrap
//! otherwise                     → NotHandshaking
//! handshake ended in this call  → Finished (reported once)
//! close_notify received         → Closed
//! ```
//!
//! rustls performs no delegated tasks, so `delegated_task` is always empty.

use std::io::{self, Read};
use std::sync::Arc;

use rustls::{ServerConfig, ServerConnection};

use crate::error::{ConnectorError, TlsError};

use super::engine::{DelegatedTask, EngineResult, EngineStatus, HandshakeStatus, TlsEngine};

/// Server-side TLS engine over `rustls::ServerConnection`.
pub struct RustlsEngine {
    conn: ServerConnection,
    handshaking: bool,
    peer_closed: bool,
    outbound_closed: bool,
}

impl RustlsEngine {
    pub fn new(config: Arc<ServerConfig>) -> Result<Self, TlsError> {
        let conn = ServerConnection::new(config)?;
        Ok(Self {
            handshaking: conn.is_handshaking(),
            conn,
            peer_closed: false,
            outbound_closed: false,
        })
    }

    fn step_handshake(&mut self) -> HandshakeStatus {
        let was_handshaking = self.handshaking;
        self.handshaking = self.conn.is_handshaking();
        if was_handshaking && !self.handshaking {
            HandshakeStatus::Finished
        } else {
            self.handshake_status()
        }
    }
}

impl TlsEngine for RustlsEngine {
    fn unwrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, ConnectorError> {
        let mut consumed = 0;
        if !src.is_empty() {
            let mut records = src;
            consumed = self.conn.read_tls(&mut records)?;
        }

        let state = self.conn.process_new_packets()?;
        let available = state.plaintext_bytes_to_read();

        let mut produced = 0;
        if available > 0 && !dst.is_empty() {
            produced = match self.conn.reader().read(dst) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => 0,
                Err(e) => return Err(e.into()),
            };
        }
        if state.peer_has_closed() {
            self.peer_closed = true;
        }

        let status = if self.peer_closed && produced >= available {
            EngineStatus::Closed
        } else if available > produced && produced == dst.len() {
            EngineStatus::BufferOverflow
        } else if consumed == 0 && produced == 0 {
            EngineStatus::BufferUnderflow
        } else {
            EngineStatus::Ok
        };

        Ok(EngineResult::new(status, self.step_handshake(), consumed, produced))
    }

    fn wrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, ConnectorError> {
        let mut consumed = 0;
        if !src.is_empty() && !self.conn.is_handshaking() && !self.outbound_closed {
            consumed = io::Write::write(&mut self.conn.writer(), src)?;
        }

        let capacity = dst.len();
        let mut out: &mut [u8] = dst;
        while self.conn.wants_write() && !out.is_empty() {
            if self.conn.write_tls(&mut out)? == 0 {
                break;
            }
        }
        let produced = capacity - out.len();

        let status = if self.outbound_closed && !self.conn.wants_write() {
            EngineStatus::Closed
        } else if produced == 0 && consumed == 0 && self.conn.wants_write() {
            EngineStatus::BufferOverflow
        } else {
            EngineStatus::Ok
        };

        Ok(EngineResult::new(status, self.step_handshake(), consumed, produced))
    }

    fn handshake_status(&self) -> HandshakeStatus {
        if self.conn.wants_write() {
            HandshakeStatus::NeedWrap
        } else if self.conn.is_handshaking() {
            HandshakeStatus::NeedUnwrap
        } else {
            HandshakeStatus::NotHandshaking
        }
    }

    fn delegated_task(&mut self) -> Option<DelegatedTask> {
        None
    }

    fn close_outbound(&mut self) {
        if !self.outbound_closed {
            self.outbound_closed = true;
            self.conn.send_close_notify();
        }
    }
}
