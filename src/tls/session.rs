//! Per-connection TLS session state.
//!
//! # Responsibilities
//! - Own the engine and the packet-sized buffers
//! - Record engine and handshake status after every wrap/unwrap
//! - Submit delegated tasks and resume once they complete

use std::sync::Arc;

use crate::error::ConnectorError;
use crate::io::buffer::Buffer;
use crate::net::handle::EventSender;
use crate::observability::metrics;

use super::engine::{EngineResult, EngineStatus, HandshakeStatus, TlsEngine};
use super::status;
use super::tasks::{TaskCompletion, TaskExecutor};

/// TLS state attached to a connection while encryption is active.
pub struct TlsSession {
    engine: Box<dyn TlsEngine>,
    engine_status: EngineStatus,
    handshake_status: HandshakeStatus,
    established: bool,
    outbound_closed: bool,
    task_in_flight: bool,
    /// Ciphertext read from the socket, not yet unwrapped.
    pub(crate) inbound_packets: Buffer,
    /// Ciphertext produced by wrap, not yet written to the socket.
    pub(crate) outbound_packets: Buffer,
    executor: Arc<dyn TaskExecutor>,
    events: EventSender,
}

impl TlsSession {
    pub fn new(
        engine: Box<dyn TlsEngine>,
        executor: Arc<dyn TaskExecutor>,
        events: EventSender,
        packet_buffer_size: usize,
    ) -> Self {
        let handshake_status = engine.handshake_status();
        Self {
            engine,
            engine_status: EngineStatus::Ok,
            handshake_status,
            established: false,
            outbound_closed: false,
            task_in_flight: false,
            inbound_packets: Buffer::new(packet_buffer_size),
            outbound_packets: Buffer::new(packet_buffer_size),
            executor,
            events,
        }
    }

    pub fn engine_status(&self) -> EngineStatus {
        self.engine_status
    }

    pub fn handshake_status(&self) -> HandshakeStatus {
        self.handshake_status
    }

    pub fn is_handshaking(&self) -> bool {
        status::is_handshaking(self.handshake_status)
    }

    /// The handshake has completed at least once.
    pub fn is_established(&self) -> bool {
        self.established
    }

    pub fn is_task_in_flight(&self) -> bool {
        self.task_in_flight
    }

    pub fn is_outbound_closed(&self) -> bool {
        self.outbound_closed
    }

    pub fn could_drain(&self) -> bool {
        !self.task_in_flight && status::could_drain(self.engine_status, self.handshake_status)
    }

    pub fn can_loop(&self, way_can_loop: bool) -> bool {
        status::can_loop(way_can_loop, self.engine_status)
    }

    pub fn can_retry(&self, last_read: usize, target_has_remaining: bool) -> bool {
        status::can_retry(
            last_read,
            self.is_handshaking(),
            self.engine_status,
            self.handshake_status,
            target_has_remaining,
        )
    }

    /// Application bytes may only be wrapped once the handshake is done.
    pub fn could_wrap_application_data(&self) -> bool {
        self.established
            && !self.is_handshaking()
            && !self.outbound_closed
            && self.engine_status != EngineStatus::Closed
    }

    /// The engine has records of its own to send.
    pub fn wants_wrap(&self) -> bool {
        self.handshake_status == HandshakeStatus::NeedWrap
    }

    /// Ciphertext is waiting to be produced or written.
    pub fn has_pending_output(&self) -> bool {
        !self.outbound_packets.is_empty() || self.wants_wrap()
    }

    /// Buffered ciphertext, or plaintext the engine could not hand over
    /// last time, can be unwrapped without reading the socket.
    pub fn has_unprocessed_input(&self) -> bool {
        let buffered = !self.inbound_packets.is_empty() && self.engine_status != EngineStatus::BufferUnderflow;
        (buffered || self.engine_status == EngineStatus::BufferOverflow) && self.could_drain()
    }

    /// Unwrap buffered ciphertext into `target`.
    pub fn unwrap_into(&mut self, target: &mut Buffer) -> Result<EngineResult, ConnectorError> {
        let engine = &mut self.engine;
        let packets = &mut self.inbound_packets;
        let mut outcome = None;
        target.fill_with(|dst| -> Result<usize, ConnectorError> {
            packets.drain_with(|src| -> Result<usize, ConnectorError> {
                let result = engine.unwrap(src, dst)?;
                outcome = Some(result);
                Ok(result.bytes_consumed)
            })?;
            Ok(outcome.map_or(0, |r| r.bytes_produced))
        })?;
        let result = outcome.unwrap_or_else(|| {
            EngineResult::new(EngineStatus::BufferUnderflow, self.handshake_status, 0, 0)
        });
        self.record(result);
        Ok(result)
    }

    /// Wrap bytes from `source` (or only pending engine records when `None`)
    /// into the outbound packet buffer.
    pub fn wrap_from(&mut self, source: Option<&mut Buffer>) -> Result<EngineResult, ConnectorError> {
        let engine = &mut self.engine;
        let mut outcome = None;
        self.outbound_packets.fill_with(|dst| -> Result<usize, ConnectorError> {
            match source {
                Some(source) => {
                    source.drain_with(|src| -> Result<usize, ConnectorError> {
                        let result = engine.wrap(src, dst)?;
                        outcome = Some(result);
                        Ok(result.bytes_consumed)
                    })?;
                    Ok(outcome.map_or(0, |r| r.bytes_produced))
                }
                None => {
                    let result = engine.wrap(&[], dst)?;
                    outcome = Some(result);
                    Ok(result.bytes_produced)
                }
            }
        })?;
        let result = outcome.unwrap_or_else(|| {
            EngineResult::new(EngineStatus::BufferOverflow, self.handshake_status, 0, 0)
        });
        self.record(result);
        Ok(result)
    }

    /// Queue close_notify. Subsequent wraps emit it.
    pub fn close_outbound(&mut self) {
        if self.outbound_closed {
            return;
        }
        self.outbound_closed = true;
        self.engine.close_outbound();
        self.handshake_status = self.engine.handshake_status();
    }

    /// Delegated tasks finished; pick up where the handshake left off.
    pub fn on_tasks_completed(&mut self) {
        self.task_in_flight = false;
        self.handshake_status = self.engine.handshake_status();
        if self.handshake_status == HandshakeStatus::NeedTask {
            self.schedule_tasks();
        }
    }

    fn record(&mut self, result: EngineResult) {
        // An Ok call that moved nothing is "need more input", not progress.
        self.engine_status = if result.status == EngineStatus::Ok
            && result.bytes_consumed == 0
            && result.bytes_produced == 0
        {
            EngineStatus::BufferUnderflow
        } else {
            result.status
        };

        self.handshake_status = match result.handshake_status {
            HandshakeStatus::Finished => {
                if !self.established {
                    tracing::debug!("TLS handshake finished");
                    metrics::record_handshake("ok");
                }
                self.established = true;
                self.engine.handshake_status()
            }
            HandshakeStatus::NotHandshaking if !self.established => {
                // Engines that never report Finished still complete.
                metrics::record_handshake("ok");
                self.established = true;
                HandshakeStatus::NotHandshaking
            }
            other => other,
        };

        if self.handshake_status == HandshakeStatus::NeedTask {
            self.schedule_tasks();
        }
    }

    fn schedule_tasks(&mut self) {
        if self.task_in_flight {
            return;
        }
        let mut tasks = Vec::new();
        while let Some(task) = self.engine.delegated_task() {
            tasks.push(task);
        }
        if tasks.is_empty() {
            self.handshake_status = self.engine.handshake_status();
            return;
        }
        tracing::trace!(count = tasks.len(), "Submitting delegated TLS tasks");
        self.task_in_flight = true;
        self.executor.execute(
            Box::new(move || {
                for task in tasks {
                    task();
                }
            }),
            TaskCompletion::new(self.events.clone()),
        );
    }
}

impl std::fmt::Debug for TlsSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsSession")
            .field("engine_status", &self.engine_status)
            .field("handshake_status", &self.handshake_status)
            .field("established", &self.established)
            .field("task_in_flight", &self.task_in_flight)
            .field("inbound_packets", &self.inbound_packets.remaining())
            .field("outbound_packets", &self.outbound_packets.remaining())
            .finish()
    }
}
