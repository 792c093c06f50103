//! Wire protocol for Netbridge.
//!
//! This crate defines how application messages look on the wire:
//!
//! - **Wire types** ([`WireType`], [`NetMessage`]): the discriminator
//!   that says which message shape a byte sequence holds.
//! - **Messages** ([`Message`]): a decoded, type-erased message plus its
//!   wire type, ready for routing.
//! - **Codecs** ([`Codec`] trait, [`JsonCodec`], [`MessageCodec`]): how
//!   payloads become bytes, and how a discriminated byte sequence becomes
//!   a [`Message`] again.
//! - **Framing** ([`frame`]): the optional length prefix used when the
//!   transport does not preserve message boundaries.
//!
//! # Wire format
//!
//! ```text
//! ┌──────────────────────┬──────────────────────────┐
//! │ wire_type: u16 (BE)  │ payload (codec-specific) │
//! └──────────────────────┴──────────────────────────┘
//! ```
//!
//! The discriminator comes first and has a fixed width, so it can be read
//! with [`peek_wire_type`] without touching the payload. A payload that
//! fails to decode is still attributed to a known type.

mod codec;
mod error;
pub mod frame;
mod message;
mod message_codec;
mod wire;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use message::Message;
pub use message_codec::MessageCodec;
pub use wire::{NetMessage, WIRE_TYPE_LEN, WireType, peek_wire_type};
