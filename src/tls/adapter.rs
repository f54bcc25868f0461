//! TLS adapters: buffered channels that unwrap/wrap instead of copying.
//!
//! # Data Flow
//! ```text
//! socket ──read──▶ inbound_packets ──unwrap──▶ Way buffer
//! Way buffer ──wrap──▶ outbound_packets ──write──▶ socket
//! ```

use std::io::{Read, Write};

use crate::error::ConnectorError;
use crate::io::buffer::{Buffer, IoProgress};
use crate::io::channel::{ReadableBufferedChannel, WritableBufferedChannel};

use super::engine::EngineStatus;
use super::session::TlsSession;

/// Readable channel that unwraps ciphertext from the socket.
pub struct ReadableTlsChannel<'a, S: ?Sized> {
    socket: &'a mut S,
    session: &'a mut TlsSession,
}

impl<'a, S: Read + ?Sized> ReadableTlsChannel<'a, S> {
    pub fn new(socket: &'a mut S, session: &'a mut TlsSession) -> Self {
        Self { socket, session }
    }
}

impl<S: Read + ?Sized> ReadableBufferedChannel for ReadableTlsChannel<'_, S> {
    fn fill(&mut self, target: &mut Buffer) -> Result<IoProgress, ConnectorError> {
        let session = &mut *self.session;

        let mut end_of_stream = false;
        if session.could_drain() {
            let read = session.inbound_packets.fill_from(&mut *self.socket)?;
            end_of_stream = read.is_end_of_stream();
        }

        let mut produced = 0;
        while session.could_drain() {
            let result = session.unwrap_into(target)?;
            produced += result.bytes_produced;
            if !session.can_retry(result.bytes_consumed, target.has_space()) {
                break;
            }
        }

        if produced > 0 {
            Ok(IoProgress::Transferred(produced))
        } else if session.engine_status() == EngineStatus::Closed
            || (end_of_stream && session.inbound_packets.is_empty())
        {
            Ok(IoProgress::EndOfStream)
        } else if end_of_stream {
            // Truncated record at end of stream.
            Err(ConnectorError::Tls("peer closed inside a TLS record".to_string()))
        } else {
            Ok(IoProgress::Transferred(0))
        }
    }

    fn could_drain(&self) -> bool {
        self.session.could_drain()
    }

    fn can_loop(&self, way_can_loop: bool) -> bool {
        self.session.can_loop(way_can_loop)
    }
}

/// Writable channel that wraps application bytes before writing them.
pub struct WritableTlsChannel<'a, S: ?Sized> {
    socket: &'a mut S,
    session: &'a mut TlsSession,
}

impl<'a, S: Write + ?Sized> WritableTlsChannel<'a, S> {
    pub fn new(socket: &'a mut S, session: &'a mut TlsSession) -> Self {
        Self { socket, session }
    }
}

impl<S: Write + ?Sized> WritableBufferedChannel for WritableTlsChannel<'_, S> {
    fn drain(&mut self, source: &mut Buffer) -> Result<IoProgress, ConnectorError> {
        let session = &mut *self.session;
        let mut written = 0;

        loop {
            if !session.outbound_packets.is_empty() {
                match session.outbound_packets.drain_into(&mut *self.socket, usize::MAX)? {
                    IoProgress::Transferred(n) if n > 0 => written += n,
                    _ => break,
                }
                if !session.outbound_packets.is_empty() {
                    continue;
                }
            }

            let wrap_application = source.has_remaining() && session.could_wrap_application_data();
            if !wrap_application && !session.wants_wrap() {
                break;
            }
            let result = session.wrap_from(wrap_application.then_some(&mut *source))?;
            if result.bytes_consumed == 0 && result.bytes_produced == 0 {
                break;
            }
        }

        if written > 0 {
            Ok(IoProgress::Transferred(written))
        } else {
            Ok(IoProgress::WouldBlock)
        }
    }

    fn has_pending(&self) -> bool {
        self.session.has_pending_output()
    }
}
