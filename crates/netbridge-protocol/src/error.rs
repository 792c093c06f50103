//! Error types for the protocol layer.
//!
//! Everything here is about bytes that do not match the wire format. None
//! of these errors says anything about the health of the connection the
//! bytes came from: the session loop logs them, drops the frame and
//! carries on.

use crate::WireType;

/// Errors that can occur while encoding or decoding messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization of a payload failed.
    ///
    /// For a message that was constructed successfully this means the
    /// type cannot be represented in the codec's format, which is a
    /// schema bug rather than a runtime condition.
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization of a payload failed.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The input is too short to even hold the wire-type discriminator.
    #[error("truncated message: need {needed} bytes, got {available}")]
    Truncated { needed: usize, available: usize },

    /// The discriminator names no registered message type.
    #[error("unknown wire type {0}")]
    UnknownWireType(WireType),

    /// The discriminator is known, but the payload does not decode as the
    /// type registered for it.
    #[error("malformed {type_name} payload ({wire_type}): {source}")]
    Malformed {
        wire_type: WireType,
        type_name: &'static str,
        source: Box<ProtocolError>,
    },

    /// Two different Rust types were registered under the same wire type.
    #[error(
        "wire type {wire_type} already registered to {existing}, cannot register {attempted}"
    )]
    WireTypeConflict {
        wire_type: WireType,
        existing: &'static str,
        attempted: &'static str,
    },

    /// The message is invalid at the protocol level.
    ///
    /// For custom [`Codec`](crate::Codec) implementations whose errors do
    /// not map onto the variants above.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

impl ProtocolError {
    /// The wire type this error can be attributed to, if any.
    pub fn wire_type(&self) -> Option<WireType> {
        match self {
            Self::UnknownWireType(wire_type)
            | Self::Malformed { wire_type, .. }
            | Self::WireTypeConflict { wire_type, .. } => Some(*wire_type),
            _ => None,
        }
    }
}
