use crate::ConnectionId;

/// Errors that can occur at the transport boundary.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection was closed (by either side) before the operation.
    #[error("connection {0} closed")]
    ConnectionClosed(ConnectionId),

    /// The remote end reset the connection.
    #[error("connection {connection} reset: {reason}")]
    ConnectionReset {
        connection: ConnectionId,
        reason: String,
    },

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// The transport was shut down.
    #[error("transport shut down")]
    Shutdown,
}
