//! Tick-side message delivery for Netbridge.
//!
//! Everything here runs on the single tick thread, so listeners are plain
//! `Rc`-based closures with no synchronization:
//!
//! - [`Dispatcher`] fans a decoded [`Message`](netbridge_protocol::Message)
//!   out to every [`Listener`] registered for its wire type.
//! - [`RequestQueue`] correlates a response with the request waiting for
//!   its wire type and completes that request's [`ResponseHandle`].
//!
//! The session loop offers each message to the request queue first and
//! dispatches it only if no request claimed it.

mod dispatcher;
mod error;
mod listener;
pub mod panic;
mod request;

pub use dispatcher::{Dispatcher, RouteReport};
pub use error::DispatchError;
pub use listener::Listener;
pub use request::{RequestQueue, RequestState, Resolution, ResponseHandle};
