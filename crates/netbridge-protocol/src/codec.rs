//! Payload codecs.
//!
//! A [`Codec`] turns one payload value into bytes and back. It knows
//! nothing about wire types; [`MessageCodec`](crate::MessageCodec) adds
//! the discriminator on top and picks the right target type on decode.
//!
//! [`JsonCodec`] is the default: readable in packet captures and logs.
//! A compact binary codec can be dropped in later without touching the
//! session loop, since everything above this layer is generic over
//! `Codec`.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// `encode` must be deterministic: the same value always yields the same
/// bytes. `decode` must not panic on arbitrary input.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns a [`ProtocolError`] if the value cannot be represented in
    /// this format.
    fn encode<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns a [`ProtocolError`] if the bytes are malformed, incomplete,
    /// or don't match the expected type.
    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// ## Example
///
/// ```rust
/// use netbridge_protocol::{Codec, JsonCodec};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, PartialEq, Serialize, Deserialize)]
/// struct Ping { at: u64 }
///
/// let codec = JsonCodec;
/// let bytes = codec.encode(&Ping { at: 5000 }).unwrap();
/// let decoded: Ping = codec.decode(&bytes).unwrap();
/// assert_eq!(decoded, Ping { at: 5000 });
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
