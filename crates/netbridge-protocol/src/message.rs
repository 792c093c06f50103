//! The decoded, type-erased message handed to listeners.

use std::any::Any;
use std::fmt;

use crate::{NetMessage, WireType};

/// A decoded application message plus its wire type.
///
/// Produced by [`MessageCodec::decode`](crate::MessageCodec::decode) and
/// consumed right away by the request queue or the dispatcher. Listeners
/// get at the concrete value with [`downcast_ref`](Self::downcast_ref).
pub struct Message {
    wire_type: WireType,
    type_name: &'static str,
    body: Box<dyn Any + Send>,
}

impl Message {
    /// Wraps a concrete message.
    pub fn new<M: NetMessage>(body: M) -> Self {
        Self {
            wire_type: M::WIRE_TYPE,
            type_name: std::any::type_name::<M>(),
            body: Box::new(body),
        }
    }

    /// The wire type this message was decoded from (or will encode as).
    pub fn wire_type(&self) -> WireType {
        self.wire_type
    }

    /// The Rust type name of the body, for logs.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Whether the body is an `M`.
    pub fn is<M: NetMessage>(&self) -> bool {
        self.body.is::<M>()
    }

    /// Borrows the body as an `M`, or `None` if it is another type.
    pub fn downcast_ref<M: NetMessage>(&self) -> Option<&M> {
        self.body.downcast_ref::<M>()
    }

    /// Takes the body out as an `M`. On a type mismatch the message is
    /// handed back unchanged.
    pub fn downcast<M: NetMessage>(self) -> Result<M, Self> {
        let Self {
            wire_type,
            type_name,
            body,
        } = self;
        match body.downcast::<M>() {
            Ok(value) => Ok(*value),
            Err(body) => Err(Self {
                wire_type,
                type_name,
                body,
            }),
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("wire_type", &self.wire_type)
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Chat {
        text: String,
    }

    impl NetMessage for Chat {
        const WIRE_TYPE: WireType = WireType(5);
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Kick;

    impl NetMessage for Kick {
        const WIRE_TYPE: WireType = WireType(6);
    }

    #[test]
    fn test_new_takes_wire_type_from_message_type() {
        let msg = Message::new(Chat { text: "hi".into() });
        assert_eq!(msg.wire_type(), WireType(5));
        assert!(msg.type_name().ends_with("Chat"));
    }

    #[test]
    fn test_downcast_ref_matching_type() {
        let msg = Message::new(Chat { text: "hi".into() });
        assert!(msg.is::<Chat>());
        assert_eq!(msg.downcast_ref::<Chat>().unwrap().text, "hi");
    }

    #[test]
    fn test_downcast_ref_other_type_is_none() {
        let msg = Message::new(Chat { text: "hi".into() });
        assert!(!msg.is::<Kick>());
        assert!(msg.downcast_ref::<Kick>().is_none());
    }

    #[test]
    fn test_downcast_mismatch_returns_message_intact() {
        let msg = Message::new(Chat { text: "keep".into() });
        let msg = msg.downcast::<Kick>().unwrap_err();
        assert_eq!(msg.wire_type(), WireType(5));
        assert_eq!(msg.downcast::<Chat>().unwrap().text, "keep");
    }

    #[test]
    fn test_debug_shows_wire_type() {
        let msg = Message::new(Kick);
        let text = format!("{msg:?}");
        assert!(text.contains("wt-6") || text.contains("WireType(6)"));
    }
}
