//! Non-blocking byte sockets.
//!
//! Connections only need `Read + Write` with non-blocking semantics:
//! `WouldBlock` means no progress and a zero-byte read means end of stream.
//! `SocketChannel` provides that over a Tokio TCP stream.
//!
//! `MemorySocket` is a simulation transport: a deterministic in-memory peer
//! for driving a `Connection` without a network. It is public so embedders
//! can test their application layer against a real connection; its
//! fragmentation, short-write, blocking and failure controls exist for
//! that purpose. Servers never construct it.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::net::TcpStream;

/// Non-blocking `Read`/`Write` over a shared Tokio TCP stream.
///
/// Reads and writes go through `try_read`/`try_write`, which clear Tokio's
/// readiness flag when they would block.
#[derive(Debug, Clone)]
pub struct SocketChannel {
    stream: Arc<TcpStream>,
}

impl SocketChannel {
    pub fn new(stream: Arc<TcpStream>) -> Self {
        Self { stream }
    }

    pub fn stream(&self) -> &Arc<TcpStream> {
        &self.stream
    }
}

impl Read for SocketChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.try_read(buf)
    }
}

impl Write for SocketChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.try_write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    inbound: VecDeque<Vec<u8>>,
    inbound_closed: bool,
    outbound: Vec<u8>,
    write_limit: Option<usize>,
    /// Total bytes still accepted before writes start blocking.
    write_budget: Option<usize>,
    writes_blocked: bool,
    write_failure: Option<io::ErrorKind>,
    read_calls: usize,
    write_calls: usize,
}

/// Simulation transport. Clones share the same state, so a test keeps one
/// clone as the remote peer while the connection owns another.
///
/// Each `push_inbound` call is delivered by at most one `read`, which lets
/// tests control exactly how a message is fragmented.
#[derive(Debug, Clone, Default)]
pub struct MemorySocket {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemorySocket {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue bytes for the connection to read.
    pub fn push_inbound(&self, bytes: &[u8]) {
        if !bytes.is_empty() {
            self.lock().inbound.push_back(bytes.to_vec());
        }
    }

    /// Signal end of stream once queued bytes are read.
    pub fn close_inbound(&self) {
        self.lock().inbound_closed = true;
    }

    /// Take everything the connection wrote so far.
    pub fn take_outbound(&self) -> Vec<u8> {
        std::mem::take(&mut self.lock().outbound)
    }

    /// Accept at most `limit` bytes per write call.
    pub fn set_write_limit(&self, limit: Option<usize>) {
        self.lock().write_limit = limit;
    }

    /// Accept `budget` more bytes in total, then report `WouldBlock`.
    pub fn set_write_budget(&self, budget: Option<usize>) {
        self.lock().write_budget = budget;
    }

    /// Make every write report `WouldBlock`.
    pub fn block_writes(&self, blocked: bool) {
        self.lock().writes_blocked = blocked;
    }

    /// Make every subsequent write fail with `kind`.
    pub fn fail_writes(&self, kind: io::ErrorKind) {
        self.lock().write_failure = Some(kind);
    }

    pub fn read_calls(&self) -> usize {
        self.lock().read_calls
    }

    /// Number of write calls, blocked and failed ones included.
    pub fn write_calls(&self) -> usize {
        self.lock().write_calls
    }
}

impl Read for MemorySocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut inner = self.lock();
        inner.read_calls += 1;
        let Some(chunk) = inner.inbound.front_mut() else {
            return if inner.inbound_closed {
                Ok(0)
            } else {
                Err(io::ErrorKind::WouldBlock.into())
            };
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        chunk.drain(..n);
        if chunk.is_empty() {
            inner.inbound.pop_front();
        }
        Ok(n)
    }
}

impl Write for MemorySocket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self.lock();
        inner.write_calls += 1;
        if let Some(kind) = inner.write_failure {
            return Err(io::Error::new(kind, "injected write failure"));
        }
        if inner.writes_blocked || inner.write_budget == Some(0) {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let mut n = inner.write_limit.map_or(buf.len(), |limit| limit.min(buf.len()));
        if let Some(budget) = inner.write_budget.as_mut() {
            n = n.min(*budget);
            *budget -= n;
        }
        inner.outbound.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_follow_pushed_chunks() {
        let mut socket = MemorySocket::new();
        socket.push_inbound(b"abc");
        socket.push_inbound(b"de");
        let mut buf = [0u8; 8];
        assert_eq!(socket.read(&mut buf).unwrap(), 3);
        assert_eq!(socket.read(&mut buf).unwrap(), 2);
        assert_eq!(socket.read(&mut buf).unwrap_err().kind(), io::ErrorKind::WouldBlock);
        socket.close_inbound();
        assert_eq!(socket.read(&mut buf).unwrap(), 0);
        assert_eq!(socket.read_calls(), 4);
    }

    #[test]
    fn write_limits_and_failures() {
        let mut socket = MemorySocket::new();
        socket.set_write_limit(Some(2));
        assert_eq!(socket.write(b"hello").unwrap(), 2);
        socket.block_writes(true);
        assert_eq!(socket.write(b"llo").unwrap_err().kind(), io::ErrorKind::WouldBlock);
        socket.block_writes(false);
        socket.fail_writes(io::ErrorKind::BrokenPipe);
        assert_eq!(socket.write(b"llo").unwrap_err().kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(socket.take_outbound(), b"he");
        assert_eq!(socket.write_calls(), 3);
    }

    #[test]
    fn write_budget_blocks_once_spent() {
        let mut socket = MemorySocket::new();
        socket.set_write_budget(Some(4));
        assert_eq!(socket.write(b"abc").unwrap(), 3);
        assert_eq!(socket.write(b"def").unwrap(), 1);
        assert_eq!(socket.write(b"ef").unwrap_err().kind(), io::ErrorKind::WouldBlock);
        socket.set_write_budget(None);
        assert_eq!(socket.write(b"ef").unwrap(), 2);
        assert_eq!(socket.take_outbound(), b"abcdef");
    }
}
