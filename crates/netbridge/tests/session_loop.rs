//! End-to-end tests: bytes in through `Inbound`, messages out through
//! listeners and response handles, bytes back through `ChannelTransport`.

use std::cell::RefCell;
use std::rc::Rc;
use std::thread;

use netbridge::prelude::*;
use netbridge::protocol::MessageCodec;
use netbridge::protocol::frame::encode_length_prefixed;
use netbridge::session::SessionError;
use netbridge::transport::OutgoingReceiver;
use serde::{Deserialize, Serialize};

// =========================================================================
// Message types
// =========================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PlayerMove {
    x: f32,
    y: f32,
    z: f32,
}

impl NetMessage for PlayerMove {
    const WIRE_TYPE: WireType = WireType(100);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ServerResponse {
    success: bool,
}

impl NetMessage for ServerResponse {
    const WIRE_TYPE: WireType = WireType(101);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ChatLine {
    text: String,
}

impl NetMessage for ChatLine {
    const WIRE_TYPE: WireType = WireType(102);
}

// =========================================================================
// Helpers
// =========================================================================

const CONN: ConnectionId = ConnectionId::new(1);

fn bridge(config: BridgeConfig) -> (SessionLoop<ChannelTransport, JsonCodec>, OutgoingReceiver) {
    let (transport, outgoing) = ChannelTransport::new();
    (SessionLoop::new(transport, config), outgoing)
}

fn encode<M: NetMessage>(message: &M) -> Vec<u8> {
    MessageCodec::new(JsonCodec).encode(message).unwrap()
}

fn collect<M: NetMessage + Clone>(
    session: &mut SessionLoop<ChannelTransport, JsonCodec>,
) -> Rc<RefCell<Vec<M>>> {
    let log = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&log);
    session
        .listen(move |m: &M| sink.borrow_mut().push(m.clone()))
        .unwrap();
    log
}

// =========================================================================
// Request / response
// =========================================================================

#[test]
fn test_player_move_request_resolves_after_one_tick() {
    let (mut session, mut outgoing) = bridge(BridgeConfig::default());
    let inbound = session.inbound();
    inbound.open(CONN).unwrap();

    let handle = session
        .send_request::<_, ServerResponse>(CONN, &PlayerMove { x: 1.0, y: 2.0, z: 3.0 })
        .unwrap();
    let fired = Rc::new(RefCell::new(None));
    {
        let fired = Rc::clone(&fired);
        handle.add_listener(move |r: &ServerResponse| *fired.borrow_mut() = Some(r.clone()));
    }

    // The request went out as [wire type][json].
    let sent = outgoing.try_recv().unwrap();
    assert_eq!(sent.connection, CONN);
    assert_eq!(&sent.data[..2], &100u16.to_be_bytes());

    // The server answers on the I/O side; nothing fires until the tick.
    inbound
        .bytes_received(CONN, &encode(&ServerResponse { success: true }))
        .unwrap();
    assert!(fired.borrow().is_none());
    assert_eq!(handle.state(), RequestState::Sent);

    let report = session.tick();

    assert_eq!(report.resolved, 1);
    assert_eq!(*fired.borrow(), Some(ServerResponse { success: true }));
    assert_eq!(handle.state(), RequestState::Resolved);
    assert_eq!(
        handle.get_message().as_deref(),
        Some(&ServerResponse { success: true })
    );
    assert_eq!(session.pending_requests(), 0);
}

#[test]
fn test_unclaimed_response_reaches_listeners() {
    let (mut session, _outgoing) = bridge(BridgeConfig::default());
    let responses = collect::<ServerResponse>(&mut session);
    let inbound = session.inbound();
    inbound.open(CONN).unwrap();

    inbound
        .bytes_received(CONN, &encode(&ServerResponse { success: false }))
        .unwrap();
    let report = session.tick();

    assert_eq!(report.dispatched, 1);
    assert_eq!(*responses.borrow(), vec![ServerResponse { success: false }]);
}

#[test]
fn test_cancel_request_sends_response_to_dispatch() {
    let (mut session, _outgoing) = bridge(BridgeConfig::default());
    let responses = collect::<ServerResponse>(&mut session);
    let inbound = session.inbound();
    inbound.open(CONN).unwrap();

    let handle = session
        .send_request::<_, ServerResponse>(CONN, &PlayerMove { x: 0.0, y: 0.0, z: 0.0 })
        .unwrap();
    assert!(session.cancel_request(ServerResponse::WIRE_TYPE));

    inbound
        .bytes_received(CONN, &encode(&ServerResponse { success: true }))
        .unwrap();
    session.tick();

    assert_eq!(handle.state(), RequestState::Cancelled);
    assert_eq!(responses.borrow().len(), 1);
}

// =========================================================================
// Decoding
// =========================================================================

#[test]
fn test_decode_error_is_counted_and_next_frame_proceeds() {
    let (mut session, _outgoing) = bridge(BridgeConfig::default());
    let chat = collect::<ChatLine>(&mut session);
    let inbound = session.inbound();
    inbound.open(CONN).unwrap();

    inbound.bytes_received(CONN, &[0xff]).unwrap();
    inbound.bytes_received(CONN, &[0x00, 0x63, b'{']).unwrap();
    inbound
        .bytes_received(CONN, &encode(&ChatLine { text: "gg".into() }))
        .unwrap();

    let report = session.tick();

    assert_eq!(report.frames, 3);
    assert_eq!(report.decode_errors, 2);
    assert_eq!(report.dispatched, 1);
    assert_eq!(chat.borrow()[0].text, "gg");
    assert_eq!(session.connection_count(), 1);
}

#[test]
fn test_message_without_listener_is_unhandled() {
    let (mut session, _outgoing) = bridge(BridgeConfig::default());
    session.register_message::<ChatLine>().unwrap();
    let inbound = session.inbound();
    inbound.open(CONN).unwrap();
    inbound
        .bytes_received(CONN, &encode(&ChatLine { text: "hi".into() }))
        .unwrap();

    let report = session.tick();
    assert_eq!(report.unhandled, 1);
}

#[test]
fn test_panicking_listener_does_not_break_tick() {
    let (mut session, _outgoing) = bridge(BridgeConfig::default());
    session
        .listen(|_: &ChatLine| panic!("game code bug"))
        .unwrap();
    let chat = collect::<ChatLine>(&mut session);
    let inbound = session.inbound();
    inbound.open(CONN).unwrap();
    inbound
        .bytes_received(CONN, &encode(&ChatLine { text: "a".into() }))
        .unwrap();

    let report = session.tick();

    assert_eq!(report.listener_panics, 1);
    assert_eq!(chat.borrow().len(), 1);
}

// =========================================================================
// Length-prefixed framing
// =========================================================================

#[test]
fn test_length_prefixed_stream_split_across_chunks() {
    let mut config = BridgeConfig::default();
    config.session.framing = Framing::length_prefixed();
    let (mut session, _outgoing) = bridge(config);
    let chat = collect::<ChatLine>(&mut session);
    let inbound = session.inbound();
    inbound.open(CONN).unwrap();

    let mut stream = Vec::new();
    for text in ["one", "two", "three"] {
        stream.extend(encode_length_prefixed(&encode(&ChatLine { text: text.into() })).unwrap());
    }
    // Three-byte slices: every frame straddles a chunk boundary.
    for chunk in stream.chunks(3) {
        inbound.bytes_received(CONN, chunk).unwrap();
    }

    session.tick();

    let texts: Vec<String> = chat.borrow().iter().map(|c| c.text.clone()).collect();
    assert_eq!(texts, vec!["one", "two", "three"]);
}

#[test]
fn test_oversized_length_prefix_tears_connection_down() {
    let mut config = BridgeConfig::default();
    config.session.framing = Framing::LengthPrefixed { max_frame_len: 16 };
    let (mut session, _outgoing) = bridge(config);
    let errors = Rc::new(RefCell::new(Vec::new()));
    {
        let errors = Rc::clone(&errors);
        session.on_error(move |conn, e| errors.borrow_mut().push((conn, e.to_string())));
    }
    let inbound = session.inbound();
    inbound.open(CONN).unwrap();

    let err = inbound.bytes_received(CONN, &1024u32.to_be_bytes()).unwrap_err();
    assert!(matches!(err, SessionError::FrameTooLarge { .. }));

    let report = session.tick();

    assert_eq!(report.closed, 1);
    assert_eq!(session.connection_count(), 0);
    assert_eq!(errors.borrow().len(), 1);
    assert_eq!(errors.borrow()[0].0, CONN);
}

// =========================================================================
// Teardown
// =========================================================================

#[test]
fn test_remote_close_cancels_pending_requests_silently() {
    let (mut session, _outgoing) = bridge(BridgeConfig::default());
    let errors = Rc::new(RefCell::new(0));
    {
        let errors = Rc::clone(&errors);
        session.on_error(move |_, _| *errors.borrow_mut() += 1);
    }
    let inbound = session.inbound();
    inbound.open(CONN).unwrap();
    let handle = session
        .send_request::<_, ServerResponse>(CONN, &PlayerMove { x: 0.0, y: 0.0, z: 0.0 })
        .unwrap();

    inbound.close(CONN);
    let report = session.tick();

    assert_eq!(report.closed, 1);
    assert_eq!(handle.state(), RequestState::Cancelled);
    assert_eq!(*errors.borrow(), 0);
    assert_eq!(session.pending_requests(), 0);
}

#[test]
fn test_transport_failure_is_reported_through_on_error() {
    let (mut session, _outgoing) = bridge(BridgeConfig::default());
    let errors = Rc::new(RefCell::new(Vec::new()));
    {
        let errors = Rc::clone(&errors);
        session.on_error(move |conn, e| {
            errors
                .borrow_mut()
                .push((conn, matches!(e, NetbridgeError::Transport(_))));
        });
    }
    let inbound = session.inbound();
    inbound.open(CONN).unwrap();
    inbound.open(ConnectionId::new(2)).unwrap();

    inbound.fail(
        CONN,
        TransportError::ConnectionReset {
            connection: CONN,
            reason: "peer reset".into(),
        },
    );
    session.tick();

    assert_eq!(*errors.borrow(), vec![(CONN, true)]);
    assert_eq!(session.connection_count(), 1);
}

#[test]
fn test_close_connection_discards_buffered_frames() {
    let (mut session, mut outgoing) = bridge(BridgeConfig::default());
    let chat = collect::<ChatLine>(&mut session);
    let inbound = session.inbound();
    inbound.open(CONN).unwrap();
    inbound
        .bytes_received(CONN, &encode(&ChatLine { text: "late".into() }))
        .unwrap();

    assert!(session.close_connection(CONN));
    assert!(!session.close_connection(CONN));

    assert!(inbound.bytes_received(CONN, b"more").is_err());
    let report = session.tick();
    assert_eq!(report.frames, 0);
    assert!(chat.borrow().is_empty());

    let err = session.send(CONN, &ChatLine { text: "x".into() }).unwrap_err();
    assert!(matches!(err, NetbridgeError::Session(SessionError::UnknownConnection(_))));
    assert!(outgoing.try_recv().is_err());
}

#[test]
fn test_send_failure_tears_down_connection() {
    let (mut session, outgoing) = bridge(BridgeConfig::default());
    let errors = Rc::new(RefCell::new(Vec::new()));
    {
        let errors = Rc::clone(&errors);
        session.on_error(move |conn, e| {
            errors
                .borrow_mut()
                .push((conn, matches!(e, NetbridgeError::Transport(TransportError::Shutdown))));
        });
    }
    session.inbound().open(CONN).unwrap();
    drop(outgoing);

    let err = session.send(CONN, &ChatLine { text: "x".into() }).unwrap_err();

    assert!(matches!(err, NetbridgeError::Transport(TransportError::Shutdown)));
    assert_eq!(session.connection_count(), 0);
    assert_eq!(*errors.borrow(), vec![(CONN, true)]);

    // Local teardown queues no closure, so the next tick reports nothing.
    assert_eq!(session.tick().closed, 0);
    assert_eq!(errors.borrow().len(), 1);
}

#[test]
fn test_reopened_connection_keeps_requests_sent_after_reopen() {
    let (mut session, _outgoing) = bridge(BridgeConfig::default());
    let inbound = session.inbound();
    inbound.open(CONN).unwrap();
    let stale = session
        .send_request::<_, ServerResponse>(CONN, &PlayerMove { x: 0.0, y: 0.0, z: 0.0 })
        .unwrap();

    // The transport reuses the id before the tick sees the close.
    inbound.close(CONN);
    inbound.open(CONN).unwrap();
    let fresh = session
        .send_request::<_, ServerResponse>(CONN, &PlayerMove { x: 1.0, y: 0.0, z: 0.0 })
        .unwrap();
    inbound
        .bytes_received(CONN, &encode(&ServerResponse { success: true }))
        .unwrap();

    let report = session.tick();

    assert_eq!(report.closed, 1);
    assert_eq!(report.resolved, 1);
    assert_eq!(report.unhandled, 0);
    assert_eq!(stale.state(), RequestState::Overwritten);
    assert_eq!(fresh.state(), RequestState::Resolved);
    assert_eq!(session.connection_count(), 1);
}

#[test]
fn test_close_cancels_old_request_but_not_one_for_another_type() {
    let (mut session, _outgoing) = bridge(BridgeConfig::default());
    let inbound = session.inbound();
    inbound.open(CONN).unwrap();
    let old = session
        .send_request::<_, ServerResponse>(CONN, &PlayerMove { x: 0.0, y: 0.0, z: 0.0 })
        .unwrap();

    inbound.close(CONN);
    inbound.open(CONN).unwrap();
    let new = session
        .send_request::<_, ChatLine>(CONN, &PlayerMove { x: 2.0, y: 0.0, z: 0.0 })
        .unwrap();

    session.tick();

    assert_eq!(old.state(), RequestState::Cancelled);
    assert_eq!(new.state(), RequestState::Sent);
    assert_eq!(session.pending_requests(), 1);
}

// =========================================================================
// Threads
// =========================================================================

#[test]
fn test_io_thread_feeds_tick_thread_in_order() {
    let (mut session, _outgoing) = bridge(BridgeConfig::default());
    let chat = collect::<ChatLine>(&mut session);
    let inbound = session.inbound();
    inbound.open(CONN).unwrap();

    let io = thread::spawn(move || {
        for i in 0..500 {
            inbound
                .bytes_received(CONN, &encode(&ChatLine { text: i.to_string() }))
                .unwrap();
        }
    });

    while chat.borrow().len() < 500 {
        session.tick();
        thread::yield_now();
    }
    io.join().unwrap();

    for (i, line) in chat.borrow().iter().enumerate() {
        assert_eq!(line.text, i.to_string());
    }
}
