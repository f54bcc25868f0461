//! Byte-level I/O subsystem.
//!
//! # Data Flow
//! ```text
//! socket
//!     → channel.rs (plain buffered channel, or TLS adapter)
//!     → buffer.rs (fixed-capacity staging, fill/drain cursors)
//!     → way.rs (readiness state machine per direction)
//!     → HTTP Ways (message framing and queues)
//! ```

pub mod buffer;
pub mod channel;
pub mod way;

pub use buffer::{Buffer, BufferState, IoProgress};
pub use channel::{ReadableBufferedChannel, WritableBufferedChannel};
pub use way::{IoInterest, IoState, Way};
