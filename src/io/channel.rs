//! Buffered channels: adapt a raw non-blocking socket to buffer semantics.
//!
//! # Data Flow
//! ```text
//! inbound:  socket ──read──▶ [ReadableBufferedChannel] ──fill──▶ Way buffer
//! outbound: Way buffer ──drain──▶ [WritableBufferedChannel] ──write──▶ socket
//! ```
//!
//! The plain channels below copy bytes straight through. The TLS adapters in
//! `crate::tls::adapter` implement the same traits, substituting unwrap/wrap
//! for the copy.

use std::io::{Read, Write};

use crate::error::ConnectorError;
use crate::io::buffer::{Buffer, IoProgress};

/// A source that can fill a Way's buffer.
pub trait ReadableBufferedChannel {
    /// Move as many bytes as currently available into `target`.
    fn fill(&mut self, target: &mut Buffer) -> Result<IoProgress, ConnectorError>;

    /// Whether reading is semantically permitted at all, regardless of how
    /// many bytes are buffered.
    fn could_drain(&self) -> bool {
        true
    }

    /// Whether another attempt is worthwhile, given the Way's own verdict.
    fn can_loop(&self, way_can_loop: bool) -> bool {
        way_can_loop
    }
}

/// A sink that can drain a Way's buffer.
pub trait WritableBufferedChannel {
    /// Move as many bytes from `source` to the wire as it accepts right now.
    fn drain(&mut self, source: &mut Buffer) -> Result<IoProgress, ConnectorError>;

    /// Whether bytes accepted from the Way are still waiting to reach the wire.
    fn has_pending(&self) -> bool {
        false
    }
}

/// Plain-text reader over a non-blocking socket.
pub struct PlainReadableChannel<'a, S: ?Sized> {
    socket: &'a mut S,
}

impl<'a, S: Read + ?Sized> PlainReadableChannel<'a, S> {
    pub fn new(socket: &'a mut S) -> Self {
        Self { socket }
    }
}

impl<S: Read + ?Sized> ReadableBufferedChannel for PlainReadableChannel<'_, S> {
    fn fill(&mut self, target: &mut Buffer) -> Result<IoProgress, ConnectorError> {
        Ok(target.fill_from(&mut *self.socket)?)
    }
}

/// Plain-text writer over a non-blocking socket.
pub struct PlainWritableChannel<'a, S: ?Sized> {
    socket: &'a mut S,
}

impl<'a, S: Write + ?Sized> PlainWritableChannel<'a, S> {
    pub fn new(socket: &'a mut S) -> Self {
        Self { socket }
    }
}

impl<S: Write + ?Sized> WritableBufferedChannel for PlainWritableChannel<'_, S> {
    fn drain(&mut self, source: &mut Buffer) -> Result<IoProgress, ConnectorError> {
        if source.is_empty() {
            return Ok(IoProgress::WouldBlock);
        }
        Ok(source.drain_into(&mut *self.socket, usize::MAX)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::socket::MemorySocket;

    #[test]
    fn plain_channels_copy_bytes() {
        let mut socket = MemorySocket::new();
        socket.push_inbound(b"ping");

        let mut buffer = Buffer::new(16);
        let progress = PlainReadableChannel::new(&mut socket).fill(&mut buffer).unwrap();
        assert_eq!(progress, IoProgress::Transferred(4));

        let progress = PlainWritableChannel::new(&mut socket).drain(&mut buffer).unwrap();
        assert_eq!(progress, IoProgress::Transferred(4));
        assert_eq!(socket.take_outbound(), b"ping");
    }

    #[test]
    fn empty_writer_blocks() {
        let mut socket = MemorySocket::new();
        let mut buffer = Buffer::new(4);
        let mut channel = PlainWritableChannel::new(&mut socket);
        assert_eq!(channel.drain(&mut buffer).unwrap(), IoProgress::WouldBlock);
        assert!(!channel.has_pending());
        assert_eq!(socket.write_calls(), 0);
    }
}
