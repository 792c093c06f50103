//! Channel-backed [`Transport`] using a Tokio unbounded mpsc queue.
//!
//! The bridge's tick thread must never wait on a socket. `ChannelTransport`
//! turns each `send` into a queue push; a task on the host's runtime owns
//! the [`OutgoingReceiver`] and performs the actual writes.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use tokio::sync::mpsc;

use crate::{ConnectionId, Transport, TransportError};

/// One buffer queued for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    /// Where the bytes should go.
    pub connection: ConnectionId,
    /// The encoded bytes, exactly as the bridge produced them.
    pub data: Vec<u8>,
}

/// Receiving half handed to the socket-owning task.
pub type OutgoingReceiver = mpsc::UnboundedReceiver<Outgoing>;

/// A [`Transport`] that forwards outgoing buffers over a channel.
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Outgoing>,
    closed: Mutex<HashSet<ConnectionId>>,
}

impl ChannelTransport {
    /// Creates the transport together with the receiver the socket task
    /// drains.
    pub fn new() -> (Self, OutgoingReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Self {
            tx,
            closed: Mutex::new(HashSet::new()),
        };
        (transport, rx)
    }

    /// Marks a connection as closed. Later sends to it fail with
    /// [`TransportError::ConnectionClosed`].
    pub fn mark_closed(&self, connection: ConnectionId) {
        self.closed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(connection);
        tracing::debug!(%connection, "channel transport marked connection closed");
    }

    /// Whether [`mark_closed`](Self::mark_closed) was called for `connection`.
    pub fn is_closed(&self, connection: ConnectionId) -> bool {
        self.closed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&connection)
    }
}

impl Transport for ChannelTransport {
    fn send(
        &self,
        connection: ConnectionId,
        data: &[u8],
    ) -> Result<(), TransportError> {
        if self.is_closed(connection) {
            return Err(TransportError::ConnectionClosed(connection));
        }
        self.tx
            .send(Outgoing {
                connection,
                data: data.to_vec(),
            })
            // The receiver is gone: the socket task has exited.
            .map_err(|_| TransportError::Shutdown)
    }

    fn close(&self, connection: ConnectionId) {
        self.mark_closed(connection);
    }
}
