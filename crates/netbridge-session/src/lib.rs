//! Connection-side buffering for Netbridge.
//!
//! This crate is the hand-off point between the transport's I/O threads
//! and the single tick thread:
//!
//! 1. **Frame buffers**: one [`FrameBuffer`] per connection accumulates
//!    bytes as they arrive and records complete frames in order.
//! 2. **Registry**: the [`ConnectionRegistry`] (tick side) and its
//!    cloneable [`Inbound`] handle (I/O side) track which connections are
//!    open and carry closures back to the tick thread.
//!
//! # How it fits in the stack
//!
//! ```text
//! Transport threads ──bytes──→ Inbound ──append──→ FrameBuffer
//!                                                      │
//! Tick thread (SessionLoop) ←──────────try_take────────┘
//! ```
//!
//! The frame buffer's mutex is the only lock a frame passes through.

mod config;
mod error;
mod frame_buffer;
mod registry;

pub use config::{Framing, SessionConfig};
pub use error::SessionError;
pub use frame_buffer::{Frame, FrameBuffer};
pub use registry::{CloseReason, ClosedConnection, ConnectionRegistry, Inbound};
