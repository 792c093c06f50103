//! Error types for the session layer.

use netbridge_transport::ConnectionId;

/// Errors raised while buffering inbound bytes.
///
/// `BufferOverflow` and `FrameTooLarge` are fatal for the connection they
/// name: the registry tears it down and the session loop reports it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Bytes arrived for a connection that was never opened (or has
    /// already been torn down).
    #[error("connection {0} is not open")]
    UnknownConnection(ConnectionId),

    /// `open` was called twice for the same connection.
    #[error("connection {0} is already open")]
    AlreadyOpen(ConnectionId),

    /// The frame buffer was closed; no further bytes are accepted.
    #[error("connection {0} is closed")]
    Closed(ConnectionId),

    /// Accepting the chunk would exceed the configured cap on
    /// buffered-but-unconsumed bytes.
    #[error(
        "connection {connection}: buffering {attempted} bytes would exceed the {limit} byte limit"
    )]
    BufferOverflow {
        connection: ConnectionId,
        attempted: usize,
        limit: usize,
    },

    /// A length prefix announced a frame larger than the configured
    /// maximum. The stream cannot be resynchronized after this.
    #[error("connection {connection}: frame of {len} bytes exceeds maximum {max}")]
    FrameTooLarge {
        connection: ConnectionId,
        len: u32,
        max: u32,
    },
}

impl SessionError {
    /// Whether the connection must be torn down after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::BufferOverflow { .. } | Self::FrameTooLarge { .. }
        )
    }
}
