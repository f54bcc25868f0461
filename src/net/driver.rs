//! Per-connection driver task.
//!
//! # Data Flow
//! ```text
//! loop:
//!     process_ready()                    (run Ready Ways)
//!     select!
//!         socket readiness (interest)  → on_readiness
//!         ConnectionEvent              → on_event
//!         idle timer                   → close(IdleTimeout)
//! ```
//!
//! The driver is the only place that waits. The connection itself never
//! blocks; it just reports which readiness it wants.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::Ready;
use tokio::net::TcpStream;

use crate::error::ConnectorError;
use crate::io::way::IoInterest;

use super::connection::Connection;
use super::handle::EventReceiver;
use super::socket::SocketChannel;

/// Drive `connection` until it closes.
pub async fn drive(
    mut connection: Connection<SocketChannel>,
    stream: Arc<TcpStream>,
    mut events: EventReceiver,
    idle_timeout: Duration,
) {
    loop {
        connection.process_ready();
        if connection.is_closed() {
            break;
        }
        if connection.has_ready_work() {
            // The pass budget ran out; let other connections run first.
            tokio::task::yield_now().await;
            continue;
        }

        let interest = connection.interest();
        tokio::select! {
            ready = wait_ready(&stream, interest) => match ready {
                Ok(ready) => connection.on_readiness(
                    ready.is_readable() || ready.is_read_closed(),
                    ready.is_writable() || ready.is_write_closed(),
                ),
                Err(e) => connection.close(e.into()),
            },
            event = events.recv() => match event {
                Some(event) => connection.on_event(event),
                None => connection.close(ConnectorError::ConnectionClosed),
            },
            _ = tokio::time::sleep(idle_timeout) => {
                connection.close(ConnectorError::IdleTimeout(idle_timeout));
            }
        }
    }

    // Late task completions are refused from here on.
    events.close();
    tracing::trace!(connection_id = %connection.id(), "Driver finished");
}

async fn wait_ready(stream: &TcpStream, interest: IoInterest) -> io::Result<Ready> {
    match interest.to_tokio() {
        Some(interest) => stream.ready(interest).await,
        None => std::future::pending().await,
    }
}
