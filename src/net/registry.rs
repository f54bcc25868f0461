//! Registry of live connections.
//!
//! # Responsibilities
//! - Track every driven connection by `ConnectionId`
//! - Pick the least loaded connection for upstream load distribution
//! - Ask all connections to close and wait for them on shutdown

use std::time::Duration;

use dashmap::DashMap;

use super::connection::ConnectionId;
use super::handle::ConnectionHandle;

/// Live connections keyed by id.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionHandle>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handle: ConnectionHandle) {
        self.connections.insert(handle.id(), handle);
    }

    pub fn unregister(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        self.connections.remove(&id).map(|(_, handle)| handle)
    }

    pub fn get(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        self.connections.get(&id).map(|entry| entry.value().clone())
    }

    /// Get current active connection count.
    pub fn active_count(&self) -> usize {
        self.connections.len()
    }

    /// The connection with the smallest load score.
    pub fn least_loaded(&self) -> Option<ConnectionHandle> {
        self.connections
            .iter()
            .min_by_key(|entry| entry.value().load_score())
            .map(|entry| entry.value().clone())
    }

    /// Ask every connection to flush and close.
    pub fn close_all(&self) {
        for entry in self.connections.iter() {
            entry.value().close();
        }
    }

    /// Wait until every connection has unregistered. Returns `false` on timeout.
    pub async fn wait_for_shutdown(&self, timeout: Duration) -> bool {
        let drained = async {
            while !self.connections.is_empty() {
                // Check periodically
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        tokio::time::timeout(timeout, drained).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::RequestId;
    use crate::net::connection::{Connection, ConnectionSettings, Transport};
    use crate::net::socket::MemorySocket;
    use bytes::Bytes;
    use http::Response;
    use tokio::sync::mpsc;

    fn connection() -> Connection<MemorySocket> {
        let (tx, _rx) = mpsc::unbounded_channel();
        let (mut conn, _events) =
            Connection::open(MemorySocket::new(), Transport::Plain, ConnectionSettings::default(), tx);
        conn.update_state();
        conn
    }

    #[test]
    fn least_loaded_prefers_shortest_queue() {
        let registry = ConnectionRegistry::new();
        let busy = connection();
        let idle = connection();
        registry.register(busy.handle());
        registry.register(idle.handle());
        assert_eq!(registry.active_count(), 2);

        for _ in 0..2 {
            busy.handle()
                .handle(RequestId::new(), Response::new(Bytes::new()))
                .unwrap();
        }
        assert_eq!(busy.handle().load_score(), 2);
        assert_eq!(registry.least_loaded().map(|h| h.id()), Some(idle.id()));

        assert!(registry.unregister(idle.id()).is_some());
        assert_eq!(registry.least_loaded().map(|h| h.id()), Some(busy.id()));
    }

    #[tokio::test]
    async fn wait_for_shutdown_times_out_while_connections_remain() {
        let registry = ConnectionRegistry::new();
        let conn = connection();
        registry.register(conn.handle());
        assert!(!registry.wait_for_shutdown(Duration::from_millis(60)).await);
        registry.unregister(conn.id());
        assert!(registry.wait_for_shutdown(Duration::from_millis(60)).await);
    }
}
