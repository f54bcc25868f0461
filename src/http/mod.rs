//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! plaintext from the readable channel
//!     → inbound.rs (Way: fill, decode, pipelining depth)
//!     → decoder.rs (incremental HTTP/1.1 framing)
//!     → request.rs (RequestId, InboundRequest to the application)
//!
//! application response
//!     → queue.rs (outbound FIFO, load score)
//!     → outbound.rs (Way: bind, stage, drain, complete)
//!     → response.rs (HTTP/1.1 serialization)
//!     → writable channel
//! ```
//!
//! server.rs ties the Ways to accepted sockets.

pub mod decoder;
pub mod inbound;
pub mod outbound;
pub mod queue;
pub mod request;
pub mod response;
pub mod server;

pub use decoder::{DecodedRequest, DecoderLimits, RequestDecoder};
pub use inbound::{HttpInboundWay, InboundContext, InboundProgress, PendingRequest, Rejection};
pub use outbound::{CompletedMessage, HttpOutboundWay, OutboundContext, OutboundMessage, Outcome};
pub use queue::MessageQueue;
pub use request::{InboundRequest, RequestId};
pub use server::{HttpServer, ServerError};
