//! Fixed-capacity byte staging area.
//!
//! # Responsibilities
//! - Hold bytes between a producer (socket, unwrap, encoder) and a consumer
//!   (decoder, wrap, socket)
//! - Track fill/drain progress with a read cursor and a write limit
//! - Translate non-blocking `Read`/`Write` results into [`IoProgress`]
//!
//! # Layout
//! ```text
//! 0        position         limit            capacity
//! |--------|================|----------------|
//!  consumed    remaining          space
//! ```

use std::io::{self, Read, Write};

/// Lifecycle of a buffer between fills and drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Empty, or untouched since the last completed operation.
    Idle,
    /// A producer is writing into the free space.
    Filling,
    /// Holds bytes that nobody has started to consume.
    Filled,
    /// A consumer is reading the remaining bytes.
    Draining,
    /// A drain stopped with bytes still remaining.
    Drained,
}

/// Outcome of one non-blocking transfer attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoProgress {
    /// Bytes moved. Zero is legal and means nothing could be moved.
    Transferred(usize),
    /// The channel has nothing to offer or accept right now.
    WouldBlock,
    /// Orderly shutdown by the peer.
    EndOfStream,
}

impl IoProgress {
    /// Number of bytes moved by this attempt.
    pub fn bytes(&self) -> usize {
        match self {
            IoProgress::Transferred(n) => *n,
            _ => 0,
        }
    }

    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, IoProgress::EndOfStream)
    }
}

/// Fixed-capacity byte region with fill and drain cursors.
#[derive(Debug)]
pub struct Buffer {
    bytes: Box<[u8]>,
    position: usize,
    limit: usize,
    state: BufferState,
}

impl Buffer {
    /// Allocate a buffer of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: vec![0; capacity].into_boxed_slice(),
            position: 0,
            limit: 0,
            state: BufferState::Idle,
        }
    }

    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    pub fn state(&self) -> BufferState {
        self.state
    }

    /// Bytes filled but not yet drained.
    pub fn remaining(&self) -> usize {
        self.limit - self.position
    }

    pub fn has_remaining(&self) -> bool {
        self.limit > self.position
    }

    pub fn is_empty(&self) -> bool {
        !self.has_remaining()
    }

    /// Free space available to the next fill, counting the prefix that
    /// compaction would reclaim.
    pub fn space(&self) -> usize {
        self.capacity() - self.remaining()
    }

    pub fn has_space(&self) -> bool {
        self.space() > 0
    }

    /// The unread bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[self.position..self.limit]
    }

    /// Shift the unread bytes to the front of the region.
    pub fn compact(&mut self) {
        debug_assert!(
            !matches!(self.state, BufferState::Filling | BufferState::Draining),
            "compaction during an in-flight transfer"
        );
        if self.position == 0 {
            return;
        }
        self.bytes.copy_within(self.position..self.limit, 0);
        self.limit -= self.position;
        self.position = 0;
    }

    /// Discard everything and return to `Idle`.
    pub fn clear(&mut self) {
        self.position = 0;
        self.limit = 0;
        self.state = BufferState::Idle;
    }

    /// Let `producer` write into the free space. It returns how many bytes it
    /// wrote, which must not exceed the slice it was given.
    pub fn fill_with<E, F>(&mut self, producer: F) -> Result<usize, E>
    where
        F: FnOnce(&mut [u8]) -> Result<usize, E>,
    {
        self.compact();
        self.state = BufferState::Filling;
        let free = self.capacity() - self.limit;
        let result = producer(&mut self.bytes[self.limit..]);
        if let Ok(n) = &result {
            self.limit += (*n).min(free);
        }
        self.state = if self.has_remaining() {
            BufferState::Filled
        } else {
            BufferState::Idle
        };
        result
    }

    /// Let `consumer` read the unread bytes. It returns how many it consumed.
    pub fn drain_with<E, F>(&mut self, consumer: F) -> Result<usize, E>
    where
        F: FnOnce(&[u8]) -> Result<usize, E>,
    {
        self.state = BufferState::Draining;
        let available = self.remaining();
        let result = consumer(&self.bytes[self.position..self.limit]);
        if let Ok(n) = &result {
            self.position += (*n).min(available);
        }
        if self.has_remaining() {
            self.state = BufferState::Drained;
        } else {
            self.position = 0;
            self.limit = 0;
            self.state = BufferState::Idle;
        }
        result
    }

    /// Read from a non-blocking source into the free space.
    pub fn fill_from<R: Read + ?Sized>(&mut self, source: &mut R) -> io::Result<IoProgress> {
        if !self.has_space() {
            return Ok(IoProgress::Transferred(0));
        }
        let mut progress = IoProgress::WouldBlock;
        self.fill_with(|free| loop {
            match source.read(free) {
                Ok(0) => {
                    progress = IoProgress::EndOfStream;
                    return Ok(0);
                }
                Ok(n) => {
                    progress = IoProgress::Transferred(n);
                    return Ok(n);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(0),
                Err(e) => return Err(e),
            }
        })?;
        Ok(progress)
    }

    /// Write up to `max` unread bytes into a non-blocking sink.
    pub fn drain_into<W: Write + ?Sized>(&mut self, sink: &mut W, max: usize) -> io::Result<IoProgress> {
        if self.is_empty() {
            return Ok(IoProgress::Transferred(0));
        }
        let mut progress = IoProgress::WouldBlock;
        self.drain_with(|unread| {
            let window = &unread[..unread.len().min(max)];
            loop {
                match sink.write(window) {
                    Ok(0) => {
                        return Err(io::Error::new(
                            io::ErrorKind::WriteZero,
                            "socket accepted zero bytes",
                        ))
                    }
                    Ok(n) => {
                        progress = IoProgress::Transferred(n);
                        return Ok(n);
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(0),
                    Err(e) => return Err(e),
                }
            }
        })?;
        Ok(progress)
    }
}
