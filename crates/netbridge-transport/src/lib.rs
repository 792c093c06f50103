//! Transport boundary for Netbridge.
//!
//! The bridge never owns sockets. It consumes two things from whatever
//! network library the host uses:
//!
//! - **inbound**: "these bytes arrived on connection N" (delivered to
//!   `netbridge_session::Inbound` from the transport's own threads), and
//! - **outbound**: "send these bytes on connection N": the [`Transport`]
//!   trait defined here.
//!
//! Accepting connections, retries and TLS stay on the transport's side of
//! the line.
//!
//! # Feature Flags
//!
//! - `channel` (default): [`ChannelTransport`], which forwards outgoing
//!   buffers over a Tokio channel to the task that owns the real sockets.

#[cfg(feature = "channel")]
mod channel;
mod error;

#[cfg(feature = "channel")]
pub use channel::{ChannelTransport, Outgoing, OutgoingReceiver};
pub use error::TransportError;

use std::fmt;

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub const fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// The outbound half of the transport: hands encoded bytes to the network.
///
/// `send` is synchronous and must not block. It is called from the tick
/// thread, so implementations queue the buffer (or write it to a
/// non-blocking socket) and return. A returned error means the
/// connection is unusable; the bridge tears it down.
pub trait Transport: Send + Sync + 'static {
    /// Queues `data` for delivery on `connection`.
    fn send(
        &self,
        connection: ConnectionId,
        data: &[u8],
    ) -> Result<(), TransportError>;

    /// Called when the bridge closes `connection` locally, so the
    /// transport can release the socket. The default does nothing.
    fn close(&self, connection: ConnectionId) {
        let _ = connection;
    }
}

/// Shared transports are transports too, so a host can keep one handle
/// and give the bridge a clone.
impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn send(
        &self,
        connection: ConnectionId,
        data: &[u8],
    ) -> Result<(), TransportError> {
        (**self).send(connection, data)
    }

    fn close(&self, connection: ConnectionId) {
        (**self).close(connection);
    }
}
