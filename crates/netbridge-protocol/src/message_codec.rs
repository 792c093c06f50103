//! Discriminated message encoding: [`Codec`] plus a wire-type registry.

use std::any::TypeId;
use std::collections::HashMap;

use crate::wire::{WIRE_TYPE_LEN, peek_wire_type};
use crate::{Codec, Message, NetMessage, ProtocolError, WireType};

/// Decodes a payload (discriminator already stripped) into a [`Message`].
type DecodeFn<C> = fn(&C, &[u8]) -> Result<Message, ProtocolError>;

struct Registration<C> {
    type_id: TypeId,
    type_name: &'static str,
    decode: DecodeFn<C>,
}

/// Encodes messages with their wire type and decodes them back.
///
/// Decoding needs to know which Rust type a discriminator stands for, so
/// every receivable message type is registered once up front.
///
/// ```rust
/// use netbridge_protocol::{JsonCodec, MessageCodec, NetMessage, WireType};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// struct ServerResponse { success: bool }
///
/// impl NetMessage for ServerResponse {
///     const WIRE_TYPE: WireType = WireType(200);
/// }
///
/// let mut codec = MessageCodec::new(JsonCodec);
/// codec.register::<ServerResponse>().unwrap();
///
/// let bytes = codec.encode(&ServerResponse { success: true }).unwrap();
/// let msg = codec.decode(&bytes).unwrap();
/// assert_eq!(msg.wire_type(), WireType(200));
/// assert_eq!(
///     msg.downcast_ref::<ServerResponse>(),
///     Some(&ServerResponse { success: true }),
/// );
/// ```
pub struct MessageCodec<C: Codec> {
    codec: C,
    registry: HashMap<WireType, Registration<C>>,
}

impl<C: Codec> MessageCodec<C> {
    /// Creates a codec with no registered message types.
    pub fn new(codec: C) -> Self {
        Self {
            codec,
            registry: HashMap::new(),
        }
    }

    /// Makes `M` decodable.
    ///
    /// Registering the same type twice is a no-op.
    ///
    /// # Errors
    /// Returns [`ProtocolError::WireTypeConflict`] if another type already
    /// owns `M::WIRE_TYPE`.
    pub fn register<M: NetMessage>(&mut self) -> Result<(), ProtocolError> {
        let wire_type = M::WIRE_TYPE;
        let type_name = std::any::type_name::<M>();

        if let Some(existing) = self.registry.get(&wire_type) {
            if existing.type_id == TypeId::of::<M>() {
                return Ok(());
            }
            return Err(ProtocolError::WireTypeConflict {
                wire_type,
                existing: existing.type_name,
                attempted: type_name,
            });
        }

        self.registry.insert(
            wire_type,
            Registration {
                type_id: TypeId::of::<M>(),
                type_name,
                decode: decode_as::<C, M>,
            },
        );
        tracing::trace!(%wire_type, type_name, "message type registered");
        Ok(())
    }

    /// Whether a decoder exists for `wire_type`.
    pub fn is_registered(&self, wire_type: WireType) -> bool {
        self.registry.contains_key(&wire_type)
    }

    /// Serializes `message` as `[wire_type][payload]`.
    ///
    /// Sending does not require registration; only decoding does.
    ///
    /// # Errors
    /// Propagates the payload codec's encode error. For a well-formed
    /// message type this indicates a schema bug.
    pub fn encode<M: NetMessage>(
        &self,
        message: &M,
    ) -> Result<Vec<u8>, ProtocolError> {
        let payload = self.codec.encode(message)?;
        let mut bytes = Vec::with_capacity(WIRE_TYPE_LEN + payload.len());
        bytes.extend_from_slice(&M::WIRE_TYPE.0.to_be_bytes());
        bytes.extend_from_slice(&payload);
        Ok(bytes)
    }

    /// Decodes one complete encoded message.
    ///
    /// # Errors
    /// - [`ProtocolError::Truncated`]: no room for the discriminator
    /// - [`ProtocolError::UnknownWireType`]: nothing registered for it
    /// - [`ProtocolError::Malformed`]: payload rejected by the codec
    pub fn decode(&self, bytes: &[u8]) -> Result<Message, ProtocolError> {
        let wire_type = peek_wire_type(bytes)?;
        let registration = self
            .registry
            .get(&wire_type)
            .ok_or(ProtocolError::UnknownWireType(wire_type))?;

        (registration.decode)(&self.codec, &bytes[WIRE_TYPE_LEN..]).map_err(
            |e| ProtocolError::Malformed {
                wire_type,
                type_name: registration.type_name,
                source: Box::new(e),
            },
        )
    }

    /// The payload codec in use.
    pub fn codec(&self) -> &C {
        &self.codec
    }
}

fn decode_as<C: Codec, M: NetMessage>(
    codec: &C,
    payload: &[u8],
) -> Result<Message, ProtocolError> {
    let body: M = codec.decode(payload)?;
    Ok(Message::new(body))
}
