//! Unified error type for Netbridge.

use netbridge_dispatch::DispatchError;
use netbridge_protocol::ProtocolError;
use netbridge_session::SessionError;
use netbridge_transport::TransportError;

/// Wraps every sub-crate error so applications handle one type.
///
/// The `#[from]` conversions let `?` lift sub-crate errors directly.
#[derive(Debug, thiserror::Error)]
pub enum NetbridgeError {
    /// The transport failed (reset, closed, send error).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Bytes did not match the wire format, or a message type clashed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Buffering failed (unknown connection, overflow, oversized frame).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A listener could not be registered.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

#[cfg(test)]
mod tests {
    use netbridge_protocol::WireType;
    use netbridge_transport::ConnectionId;

    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err: NetbridgeError = TransportError::ConnectionClosed(ConnectionId::new(3)).into();
        assert!(matches!(err, NetbridgeError::Transport(_)));
        assert!(err.to_string().contains("conn-3"));
    }

    #[test]
    fn test_from_protocol_error() {
        let err: NetbridgeError = ProtocolError::UnknownWireType(WireType(9)).into();
        assert!(matches!(err, NetbridgeError::Protocol(_)));
    }

    #[test]
    fn test_from_session_error() {
        let err: NetbridgeError = SessionError::UnknownConnection(ConnectionId::new(1)).into();
        assert!(matches!(err, NetbridgeError::Session(_)));
    }

    #[test]
    fn test_from_dispatch_error() {
        let err: NetbridgeError = DispatchError::DuplicateListener(WireType(4)).into();
        assert!(matches!(err, NetbridgeError::Dispatch(_)));
        assert!(err.to_string().contains("wt-4"));
    }
}
