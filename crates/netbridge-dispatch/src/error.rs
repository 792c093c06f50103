//! Error types for the dispatch layer.

use netbridge_protocol::WireType;

/// Errors raised while registering listeners.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// The same listener handle is already registered for this wire type.
    #[error("listener already registered for {0}")]
    DuplicateListener(WireType),
}
