//! Wire-type discriminators.

use std::fmt;

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// Width of the discriminator at the start of every encoded message.
pub const WIRE_TYPE_LEN: usize = 2;

/// Identifies which message shape an encoded message holds.
///
/// This is a protocol-level number, not a Rust type: both ends of the
/// connection agree on it, whatever language they are written in.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct WireType(pub u16);

impl fmt::Display for WireType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wt-{}", self.0)
    }
}

/// An application message that can travel on the wire.
///
/// Implementors pick a unique [`WireType`]. Everything else comes from
/// serde.
///
/// ```rust
/// use netbridge_protocol::{NetMessage, WireType};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// struct PlayerMove { x: f32, y: f32, z: f32 }
///
/// impl NetMessage for PlayerMove {
///     const WIRE_TYPE: WireType = WireType(100);
/// }
/// ```
pub trait NetMessage: Serialize + DeserializeOwned + Send + 'static {
    /// The discriminator written in front of this message's payload.
    const WIRE_TYPE: WireType;
}

/// Reads the discriminator from the front of an encoded message without
/// decoding the payload.
///
/// # Errors
/// Returns [`ProtocolError::Truncated`] when `bytes` is shorter than
/// [`WIRE_TYPE_LEN`].
pub fn peek_wire_type(bytes: &[u8]) -> Result<WireType, ProtocolError> {
    match bytes {
        [hi, lo, ..] => Ok(WireType(u16::from_be_bytes([*hi, *lo]))),
        _ => Err(ProtocolError::Truncated {
            needed: WIRE_TYPE_LEN,
            available: bytes.len(),
        }),
    }
}
