//! # Netbridge
//!
//! The network session bridge of a game client: raw bytes from a socket
//! in, typed messages delivered to game code once per tick.
//!
//! The transport's I/O threads push bytes through an [`Inbound`] handle
//! into per-connection frame buffers. The game loop calls
//! [`SessionLoop::tick`], which drains those buffers, decodes each frame
//! and routes the message: first to a pending request waiting for that
//! response type, otherwise to every listener registered for it.
//!
//! ## Quick start
//!
//! ```rust
//! use netbridge::prelude::*;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct PlayerMove { x: f32, y: f32, z: f32 }
//! impl NetMessage for PlayerMove { const WIRE_TYPE: WireType = WireType(100); }
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct ServerResponse { success: bool }
//! impl NetMessage for ServerResponse { const WIRE_TYPE: WireType = WireType(101); }
//!
//! # fn main() -> Result<(), NetbridgeError> {
//! let (transport, _outgoing) = ChannelTransport::new();
//! let mut session = SessionLoop::new(transport, BridgeConfig::default());
//!
//! let conn = ConnectionId::new(1);
//! session.inbound().open(conn)?;
//!
//! let reply = session.send_request::<_, ServerResponse>(
//!     conn,
//!     &PlayerMove { x: 1.0, y: 2.0, z: 3.0 },
//! )?;
//! reply.add_listener(|r| println!("server said {}", r.success));
//!
//! // Once per frame:
//! let report = session.tick();
//! # let _ = report;
//! # Ok(())
//! # }
//! ```
//!
//! ## Crates
//!
//! | Crate | Role |
//! |---|---|
//! | `netbridge-transport` | `ConnectionId`, the `Transport` trait, `ChannelTransport` |
//! | `netbridge-protocol` | Wire types and the message codec |
//! | `netbridge-session` | Frame buffers and the connection registry |
//! | `netbridge-dispatch` | Listeners and request/response correlation |
//! | `netbridge-tick` | Optional fixed-rate pacing for `tick` |

mod config;
mod error;
pub mod logging;
mod session_loop;

pub use config::BridgeConfig;
pub use error::NetbridgeError;
pub use session_loop::{SessionLoop, TickReport};

pub use netbridge_dispatch as dispatch;
pub use netbridge_protocol as protocol;
pub use netbridge_session as session;
pub use netbridge_tick as tick;
pub use netbridge_transport as transport;

pub use netbridge_session::Inbound;

/// Everything an application typically needs.
pub mod prelude {
    pub use crate::{BridgeConfig, NetbridgeError, SessionLoop, TickReport};
    pub use netbridge_dispatch::{Listener, RequestState, ResponseHandle};
    #[cfg(feature = "json")]
    pub use netbridge_protocol::JsonCodec;
    pub use netbridge_protocol::{Codec, Message, NetMessage, WireType};
    pub use netbridge_session::{Framing, Inbound, SessionConfig};
    pub use netbridge_tick::{TickConfig, TickPolicy, TickScheduler};
    pub use netbridge_transport::{
        ChannelTransport, ConnectionId, Transport, TransportError,
    };
}
