//! Connections: the duplex byte pipes devices talk through.
//!
//! The [`ObservableConnection`] is the hub between one I/O transport and
//! many observers: inbound chunks fan out to every subscriber, outbound
//! text funnels through the encoder into the transport. Transports are
//! external; anything implementing [`Io`] and publishing inbound bytes via
//! [`ObservableConnection::data_received`] works. The crate ships the
//! in-memory [`MemoryIo`] used by tests.

mod memory;
mod observable;

pub use memory::MemoryIo;
pub use observable::{
    ConnectionEvent, DataSubscriber, EncodeFn, ObservableConnection, SendFn, SubscriberId,
};

use crate::error::Result;

/// Transport boundary: a bidirectional byte stream the runtime can open,
/// close and (through the connection's send hook) write to.
///
/// Implementations publish inbound chunks with a timestamp by calling
/// [`ObservableConnection::data_received`], usually from a dedicated pump
/// task.
pub trait Io: Send + Sync {
    /// Opens the transport.
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying resource cannot be acquired.
    fn open(&self) -> Result<()>;

    /// Closes the transport. Closing an already-closed transport is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns an error when tear-down of the resource fails.
    fn close(&self) -> Result<()>;

    /// Returns true while the transport is open.
    fn is_open(&self) -> bool;
}
