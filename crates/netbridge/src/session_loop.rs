//! The per-tick driver.
//!
//! [`SessionLoop`] owns everything that lives on the tick thread: the
//! message codec, the dispatcher, the request queue and the tick side of
//! the connection registry. Each call to [`tick`](SessionLoop::tick)
//! drains what the I/O threads buffered since the previous one:
//!
//! 1. Apply closures queued by the I/O side (drop their pending
//!    requests, report errors).
//! 2. For every open connection, in ascending id order, take frames until
//!    the buffer is empty or the frame budget is spent.
//! 3. Decode each frame; offer it to the request queue, then to the
//!    dispatcher if no request claimed it.

use netbridge_dispatch::{
    Dispatcher, Listener, RequestQueue, Resolution, ResponseHandle,
};
use netbridge_protocol::frame::encode_length_prefixed;
use netbridge_protocol::{Codec, MessageCodec, NetMessage, WireType};
use netbridge_session::{
    CloseReason, ClosedConnection, ConnectionRegistry, Framing, Inbound,
    SessionError,
};
use netbridge_transport::{ConnectionId, Transport};

#[cfg(feature = "json")]
use netbridge_protocol::JsonCodec;

use crate::{BridgeConfig, NetbridgeError};

type ErrorCallback = Box<dyn FnMut(ConnectionId, &NetbridgeError)>;

// ---------------------------------------------------------------------------
// TickReport
// ---------------------------------------------------------------------------

/// What one [`SessionLoop::tick`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Frames taken from connection buffers.
    pub frames: usize,
    /// Frames that failed to decode and were dropped.
    pub decode_errors: usize,
    /// Messages that completed a pending request.
    pub resolved: usize,
    /// Messages delivered to at least one listener.
    pub dispatched: usize,
    /// Messages nobody was listening for.
    pub unhandled: usize,
    /// Listener invocations that panicked.
    pub listener_panics: usize,
    /// Connections whose closure was applied this tick.
    pub closed: usize,
    /// The frame budget ran out with frames still pending.
    pub budget_exhausted: bool,
}

impl TickReport {
    /// Whether the tick found nothing to do.
    pub fn is_idle(&self) -> bool {
        *self == Self::default()
    }
}

// ---------------------------------------------------------------------------
// SessionLoop
// ---------------------------------------------------------------------------

/// Drives decoding and delivery on the tick thread.
///
/// Not `Send`: listeners are `Rc`-based and run on whichever thread calls
/// [`tick`](Self::tick). Hand [`inbound`](Self::inbound) to the transport's
/// I/O threads instead.
pub struct SessionLoop<T: Transport, C: Codec> {
    transport: T,
    codec: MessageCodec<C>,
    registry: ConnectionRegistry,
    dispatcher: Dispatcher,
    requests: RequestQueue,
    on_error: Option<ErrorCallback>,
    framing: Framing,
    max_frames_per_tick: Option<usize>,
    /// Where draining resumes after a tick ran out of budget.
    resume_from: Option<ConnectionId>,
    scratch: Vec<u8>,
    ticks: u64,
}

#[cfg(feature = "json")]
impl<T: Transport> SessionLoop<T, JsonCodec> {
    /// A session loop with JSON payloads.
    pub fn new(transport: T, config: BridgeConfig) -> Self {
        Self::with_codec(transport, JsonCodec, config)
    }
}

impl<T: Transport, C: Codec> SessionLoop<T, C> {
    /// A session loop with a custom payload codec.
    pub fn with_codec(transport: T, codec: C, config: BridgeConfig) -> Self {
        let config = config.validated();
        tracing::debug!(
            framing = ?config.session.framing,
            max_frames_per_tick = ?config.max_frames_per_tick,
            "session loop created"
        );
        Self {
            transport,
            codec: MessageCodec::new(codec),
            framing: config.session.framing,
            registry: ConnectionRegistry::new(config.session),
            dispatcher: Dispatcher::new(),
            requests: RequestQueue::new(),
            on_error: None,
            max_frames_per_tick: config.max_frames_per_tick,
            resume_from: None,
            scratch: Vec::new(),
            ticks: 0,
        }
    }

    // -- registration -----------------------------------------------------

    /// Makes `M` decodable without attaching a listener (for example a
    /// message only ever consumed through [`send_request`](Self::send_request)).
    ///
    /// # Errors
    /// [`ProtocolError::WireTypeConflict`](netbridge_protocol::ProtocolError::WireTypeConflict)
    /// if another type owns `M::WIRE_TYPE`.
    pub fn register_message<M: NetMessage>(&mut self) -> Result<(), NetbridgeError> {
        self.codec.register::<M>()?;
        Ok(())
    }

    /// Registers `M` and a listener for it in one step. Keep the returned
    /// handle to [`unregister`](Self::unregister) later.
    ///
    /// # Errors
    /// A wire-type conflict for `M`.
    pub fn listen<M, F>(&mut self, f: F) -> Result<Listener, NetbridgeError>
    where
        M: NetMessage,
        F: FnMut(&M) + 'static,
    {
        self.codec.register::<M>()?;
        let listener = Listener::new::<M, F>(f);
        self.dispatcher.register(&listener)?;
        Ok(listener)
    }

    /// Adds a prebuilt listener.
    ///
    /// The listener's wire type must be decodable (see
    /// [`register_message`](Self::register_message)) or it never fires.
    ///
    /// # Errors
    /// [`DispatchError::DuplicateListener`](netbridge_dispatch::DispatchError::DuplicateListener)
    /// if this handle is already registered.
    pub fn register(&mut self, listener: &Listener) -> Result<(), NetbridgeError> {
        let wire_type = listener.wire_type();
        if !self.codec.is_registered(wire_type) {
            tracing::debug!(%wire_type, "listener registered for a wire type with no decoder");
        }
        self.dispatcher.register(listener)?;
        Ok(())
    }

    /// Removes a listener. Returns `false` if it was not registered.
    pub fn unregister(&mut self, listener: &Listener) -> bool {
        self.dispatcher.unregister(listener)
    }

    /// Sets the callback for connection failures: transport errors and
    /// fatal buffering errors. Runs on the tick thread. Replaces any
    /// previous callback.
    pub fn on_error<F>(&mut self, f: F)
    where
        F: FnMut(ConnectionId, &NetbridgeError) + 'static,
    {
        self.on_error = Some(Box::new(f));
    }

    // -- outbound ---------------------------------------------------------

    /// Encodes `message` and hands it to the transport.
    ///
    /// A transport failure tears the connection down (its pending
    /// requests are cancelled) and is reported to the
    /// [`on_error`](Self::on_error) callback before being returned.
    ///
    /// # Errors
    /// - [`SessionError::UnknownConnection`] if `connection` is not open
    /// - an encode error or an outgoing frame over `max_frame_len`
    /// - the transport's send error
    pub fn send<M: NetMessage>(
        &mut self,
        connection: ConnectionId,
        message: &M,
    ) -> Result<(), NetbridgeError> {
        if !self.registry.contains(connection) {
            return Err(SessionError::UnknownConnection(connection).into());
        }
        let bytes = self.frame_outgoing(connection, self.codec.encode(message)?)?;
        if let Err(e) = self.transport.send(connection, &bytes) {
            tracing::warn!(%connection, error = %e, "send failed, closing connection");
            self.teardown_local(connection);
            let error = NetbridgeError::Transport(e);
            if let Some(on_error) = self.on_error.as_mut() {
                on_error(connection, &error);
            }
            return Err(error);
        }
        tracing::trace!(%connection, wire_type = %M::WIRE_TYPE, bytes = bytes.len(), "message sent");
        Ok(())
    }

    /// Sends `request` and returns a handle that completes when a message
    /// of type `Resp` arrives.
    ///
    /// `Resp` is registered for decoding automatically. A request already
    /// waiting for `Resp` is overwritten. Nothing is recorded if sending
    /// fails.
    ///
    /// # Errors
    /// Everything [`send`](Self::send) returns, plus a wire-type conflict
    /// for `Resp`.
    pub fn send_request<Req, Resp>(
        &mut self,
        connection: ConnectionId,
        request: &Req,
    ) -> Result<ResponseHandle<Resp>, NetbridgeError>
    where
        Req: NetMessage,
        Resp: NetMessage,
    {
        self.codec.register::<Resp>()?;
        let generation = self
            .registry
            .generation(connection)
            .ok_or(SessionError::UnknownConnection(connection))?;
        self.send(connection, request)?;
        Ok(self.requests.insert::<Resp>(connection, generation))
    }

    /// Drops the request waiting for `expected` without firing it.
    /// Returns `false` if none was pending.
    pub fn cancel_request(&mut self, expected: WireType) -> bool {
        self.requests.cancel(expected)
    }

    // -- connections ------------------------------------------------------

    /// The handle the transport's I/O threads feed.
    pub fn inbound(&self) -> Inbound {
        self.registry.inbound()
    }

    /// Closes `connection` from this side: its buffered frames are
    /// discarded, its pending requests cancelled and the transport told.
    /// Returns `false` if it was not open.
    pub fn close_connection(&mut self, connection: ConnectionId) -> bool {
        let closed = self.teardown_local(connection);
        if closed {
            tracing::info!(%connection, "connection closed");
        }
        closed
    }

    /// Number of open connections.
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Number of requests waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.requests.len()
    }

    /// Ticks run so far.
    pub fn tick_count(&self) -> u64 {
        self.ticks
    }

    // -- tick -------------------------------------------------------------

    /// Processes everything buffered since the last tick. Never blocks.
    pub fn tick(&mut self) -> TickReport {
        self.ticks += 1;
        let mut report = TickReport::default();

        while let Some(closed) = self.registry.poll_closed() {
            self.apply_closure(closed);
            report.closed += 1;
        }

        let mut budget = self.max_frames_per_tick;
        let mut connections = self.registry.snapshot();
        if let Some(start) = self.resume_from.take() {
            let split = connections.partition_point(|(id, _)| *id < start);
            connections.rotate_left(split);
        }

        'connections: for (i, (connection, buffer)) in connections.iter().enumerate() {
            loop {
                if budget == Some(0) {
                    let starved = connections[i..]
                        .iter()
                        .find(|(_, buffer)| buffer.pending_frames() > 0);
                    if let Some((next, _)) = starved {
                        report.budget_exhausted = true;
                        self.resume_from = Some(*next);
                    }
                    break 'connections;
                }
                let Some(frame) = buffer.try_take(&mut self.scratch) else {
                    break;
                };
                if let Some(left) = budget.as_mut() {
                    *left -= 1;
                }
                report.frames += 1;

                let message = match self.codec.decode(&self.scratch) {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::warn!(
                            %connection,
                            seq = frame.seq,
                            len = frame.len,
                            error = %e,
                            "dropping undecodable frame"
                        );
                        report.decode_errors += 1;
                        continue;
                    }
                };

                match self.requests.try_resolve(message) {
                    Resolution::Consumed => report.resolved += 1,
                    Resolution::Unclaimed(message) => {
                        let routed = self.dispatcher.route(&message);
                        report.listener_panics += routed.panicked;
                        if routed.is_unhandled() {
                            tracing::debug!(
                                %connection,
                                wire_type = %message.wire_type(),
                                "no listener for message"
                            );
                            report.unhandled += 1;
                        } else {
                            report.dispatched += 1;
                        }
                    }
                }
            }
        }

        if report.budget_exhausted {
            tracing::debug!(frames = report.frames, "frame budget exhausted");
        }
        tracing::trace!(tick = self.ticks, ?report, "tick complete");
        report
    }

    // -- internals --------------------------------------------------------

    fn frame_outgoing(
        &self,
        connection: ConnectionId,
        bytes: Vec<u8>,
    ) -> Result<Vec<u8>, NetbridgeError> {
        let Framing::LengthPrefixed { max_frame_len } = self.framing else {
            return Ok(bytes);
        };
        let too_large = || SessionError::FrameTooLarge {
            connection,
            len: u32::try_from(bytes.len()).unwrap_or(u32::MAX),
            max: max_frame_len,
        };
        if bytes.len() > max_frame_len as usize {
            return Err(too_large().into());
        }
        encode_length_prefixed(&bytes).ok_or_else(|| too_large().into())
    }

    fn teardown_local(&mut self, connection: ConnectionId) -> bool {
        let Some(generation) = self.registry.close(connection) else {
            return false;
        };
        self.transport.close(connection);
        self.requests.cancel_connection(connection, generation);
        true
    }

    fn apply_closure(&mut self, closed: ClosedConnection) {
        let ClosedConnection {
            connection,
            generation,
            reason,
        } = closed;
        let cancelled = self.requests.cancel_connection(connection, generation);
        let error = match reason {
            CloseReason::Remote | CloseReason::Local => {
                tracing::info!(%connection, cancelled, "connection closed");
                return;
            }
            CloseReason::Transport(e) => NetbridgeError::Transport(e),
            CloseReason::Session(e) => NetbridgeError::Session(e),
        };
        tracing::warn!(%connection, cancelled, error = %error, "connection failed");
        if let Some(on_error) = self.on_error.as_mut() {
            on_error(connection, &error);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::{Arc, Mutex};

    use netbridge_transport::TransportError;
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Default, Clone)]
    struct Recorder(Arc<Mutex<Vec<(ConnectionId, Vec<u8>)>>>);

    impl Transport for Recorder {
        fn send(&self, connection: ConnectionId, data: &[u8]) -> Result<(), TransportError> {
            self.0.lock().unwrap().push((connection, data.to_vec()));
            Ok(())
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Ping(u32);

    impl NetMessage for Ping {
        const WIRE_TYPE: WireType = WireType(1);
    }

    const CONN: ConnectionId = ConnectionId::new(1);

    fn session(config: BridgeConfig) -> (SessionLoop<Recorder, JsonCodec>, Recorder) {
        let transport = Recorder::default();
        (SessionLoop::new(transport.clone(), config), transport)
    }

    #[test]
    fn test_empty_tick_is_idle() {
        let (mut s, _) = session(BridgeConfig::default());
        assert!(s.tick().is_idle());
        assert_eq!(s.tick_count(), 1);
    }

    #[test]
    fn test_tick_dispatches_in_arrival_order() {
        let (mut s, _) = session(BridgeConfig::default());
        let seen = Rc::new(RefCell::new(Vec::new()));
        {
            let seen = Rc::clone(&seen);
            s.listen(move |p: &Ping| seen.borrow_mut().push(p.0)).unwrap();
        }
        let inbound = s.inbound();
        inbound.open(CONN).unwrap();
        let codec = MessageCodec::new(JsonCodec);
        for i in 0..5 {
            inbound.bytes_received(CONN, &codec.encode(&Ping(i)).unwrap()).unwrap();
        }

        let report = s.tick();

        assert_eq!(report.frames, 5);
        assert_eq!(report.dispatched, 5);
        assert_eq!(*seen.borrow(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_send_to_unknown_connection_fails() {
        let (mut s, transport) = session(BridgeConfig::default());
        let err = s.send(CONN, &Ping(1)).unwrap_err();
        assert!(matches!(err, NetbridgeError::Session(SessionError::UnknownConnection(_))));
        assert!(transport.0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_send_is_length_prefixed_when_configured() {
        let mut config = BridgeConfig::default();
        config.session.framing = Framing::length_prefixed();
        let (mut s, transport) = session(config);
        s.inbound().open(CONN).unwrap();

        s.send(CONN, &Ping(7)).unwrap();

        let sent = transport.0.lock().unwrap();
        let bytes = &sent[0].1;
        let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        assert_eq!(len, bytes.len() - 4);
        assert_eq!(&bytes[4..6], &Ping::WIRE_TYPE.0.to_be_bytes());
    }

    #[test]
    fn test_outgoing_frame_over_limit_is_rejected() {
        let mut config = BridgeConfig::default();
        config.session.framing = Framing::LengthPrefixed { max_frame_len: 4 };
        let (mut s, transport) = session(config);
        s.inbound().open(CONN).unwrap();

        let err = s.send(CONN, &Ping(123_456)).unwrap_err();
        assert!(matches!(err, NetbridgeError::Session(SessionError::FrameTooLarge { .. })));
        assert!(transport.0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_frame_budget_carries_over_to_next_tick() {
        let (mut s, _) = session(BridgeConfig {
            max_frames_per_tick: Some(2),
            ..BridgeConfig::default()
        });
        s.listen(|_: &Ping| {}).unwrap();
        let inbound = s.inbound();
        inbound.open(CONN).unwrap();
        let codec = MessageCodec::new(JsonCodec);
        for i in 0..3 {
            inbound.bytes_received(CONN, &codec.encode(&Ping(i)).unwrap()).unwrap();
        }

        let first = s.tick();
        assert_eq!(first.frames, 2);
        assert!(first.budget_exhausted);

        let second = s.tick();
        assert_eq!(second.frames, 1);
        assert!(!second.budget_exhausted);
    }

    #[test]
    fn test_budget_resumes_with_starved_connection() {
        let (mut s, _) = session(BridgeConfig {
            max_frames_per_tick: Some(1),
            ..BridgeConfig::default()
        });
        let order = Rc::new(RefCell::new(Vec::new()));
        {
            let order = Rc::clone(&order);
            s.listen(move |p: &Ping| order.borrow_mut().push(p.0)).unwrap();
        }
        let inbound = s.inbound();
        let codec = MessageCodec::new(JsonCodec);
        for raw in [1, 2] {
            let id = ConnectionId::new(raw);
            inbound.open(id).unwrap();
            inbound.bytes_received(id, &codec.encode(&Ping(raw as u32)).unwrap()).unwrap();
        }
        // Connection 1 refills before the second tick.
        s.tick();
        inbound.bytes_received(ConnectionId::new(1), &codec.encode(&Ping(10)).unwrap()).unwrap();
        s.tick();

        assert_eq!(*order.borrow(), vec![1, 2]);
    }
}
