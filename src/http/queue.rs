//! Concurrency-safe FIFO shared between the application and the I/O path.
//!
//! # Design Decisions
//! - A plain `Mutex<VecDeque<_>>`; critical sections never await
//! - Closing the queue and rejecting pushes happen under the same lock, so a
//!   message is either drained by the closer or refused to its issuer
//! - A poisoned lock is recovered: the queue holds no invariants a panic
//!   could break halfway

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Ordered sequence of in-flight messages for one direction.
#[derive(Debug)]
pub struct MessageQueue<T> {
    inner: Mutex<Inner<T>>,
}

impl<T> MessageQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                closed: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `item`, handing it back if the queue has been closed.
    pub fn push_back(&self, item: T) -> Result<(), T> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(item);
        }
        inner.items.push_back(item);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Project every item, head first.
    pub fn map_all<R>(&self, f: impl FnMut(&T) -> R) -> Vec<R> {
        self.lock().items.iter().map(f).collect()
    }

    /// First non-`None` projection, searching from the head.
    pub fn find_map<R>(&self, f: impl FnMut(&T) -> Option<R>) -> Option<R> {
        self.lock().items.iter().find_map(f)
    }

    pub fn pop_front(&self) -> Option<T> {
        self.lock().items.pop_front()
    }

    /// Remove the head only if `predicate` accepts it.
    pub fn pop_front_if(&self, predicate: impl FnOnce(&T) -> bool) -> Option<T> {
        let mut inner = self.lock();
        match inner.items.front() {
            Some(head) if predicate(head) => inner.items.pop_front(),
            _ => None,
        }
    }

    /// Remove the first item `predicate` accepts, wherever it sits.
    pub fn remove_first(&self, predicate: impl FnMut(&T) -> bool) -> Option<T> {
        let mut inner = self.lock();
        let index = inner.items.iter().position(predicate)?;
        inner.items.remove(index)
    }

    /// Remove everything, oldest first.
    pub fn drain_all(&self) -> Vec<T> {
        self.lock().items.drain(..).collect()
    }

    /// Refuse further pushes. Items already queued stay put.
    pub fn close(&self) {
        self.lock().closed = true;
    }
}

impl<T> Default for MessageQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
