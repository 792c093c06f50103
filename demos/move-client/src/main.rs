//! A headless client talking to an in-process fake server.
//!
//! The "server" is a tokio task that reads what the client sends through
//! `ChannelTransport` and answers through `Inbound`, the same way a socket
//! reader task would. The client side runs the session loop at 30 Hz.
//!
//! Run with `RUST_LOG=debug cargo run -p move-client` for the full trace.

use netbridge::prelude::*;
use netbridge::protocol::MessageCodec;
use netbridge::transport::OutgoingReceiver;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PlayerMove {
    x: f32,
    y: f32,
    z: f32,
}

impl NetMessage for PlayerMove {
    const WIRE_TYPE: WireType = WireType(100);
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ServerResponse {
    success: bool,
}

impl NetMessage for ServerResponse {
    const WIRE_TYPE: WireType = WireType(101);
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WorldTick {
    seq: u64,
}

impl NetMessage for WorldTick {
    const WIRE_TYPE: WireType = WireType(200);
}

// ---------------------------------------------------------------------------
// Fake server
// ---------------------------------------------------------------------------

/// Accepts moves inside a 10-unit cube and broadcasts a world tick after
/// each one.
async fn fake_server(mut outgoing: OutgoingReceiver, inbound: Inbound) {
    let mut codec = MessageCodec::new(JsonCodec);
    if let Err(e) = codec.register::<PlayerMove>() {
        tracing::error!(error = %e, "server codec setup failed");
        return;
    }
    let mut seq = 0;

    while let Some(out) = outgoing.recv().await {
        let reply = match codec.decode(&out.data) {
            Ok(msg) => match msg.downcast_ref::<PlayerMove>() {
                Some(m) => ServerResponse {
                    success: [m.x, m.y, m.z].iter().all(|v| v.abs() <= 10.0),
                },
                None => continue,
            },
            Err(e) => {
                tracing::warn!(error = %e, "server got garbage");
                continue;
            }
        };
        seq += 1;
        for bytes in [codec.encode(&reply), codec.encode(&WorldTick { seq })] {
            let delivered = bytes
                .map_err(NetbridgeError::from)
                .and_then(|b| Ok(inbound.bytes_received(out.connection, &b)?));
            if let Err(e) = delivered {
                tracing::warn!(error = %e, "server could not deliver");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), NetbridgeError> {
    netbridge::logging::init();

    let (transport, outgoing) = ChannelTransport::new();
    let mut session = SessionLoop::new(transport, BridgeConfig::default());
    session.on_error(|conn, e| tracing::error!(%conn, error = %e, "connection failed"));
    session.listen(|t: &WorldTick| tracing::info!(seq = t.seq, "world tick"))?;

    let conn = ConnectionId::new(1);
    let inbound = session.inbound();
    inbound.open(conn)?;
    let server = tokio::spawn(fake_server(outgoing, inbound.clone()));

    let moves = [
        PlayerMove { x: 1.0, y: 2.0, z: 3.0 },
        PlayerMove { x: 4.0, y: 0.5, z: -2.0 },
        PlayerMove { x: 50.0, y: 0.0, z: 0.0 },
    ];

    let mut scheduler = TickScheduler::new(TickConfig::with_rate(30));
    let mut pending: Option<ResponseHandle<ServerResponse>> = None;
    let mut next_move = moves.iter();

    loop {
        let info = scheduler.wait_for_tick().await;
        let report = session.tick();
        if !report.is_idle() {
            tracing::debug!(tick = info.tick, ?report, "tick");
        }

        let ready = pending
            .as_ref()
            .is_none_or(|h| h.state() != RequestState::Sent);
        if ready {
            let Some(m) = next_move.next() else {
                break;
            };
            let handle = session.send_request::<_, ServerResponse>(conn, m)?;
            let sent = m.clone();
            handle.add_listener(move |r| {
                tracing::info!(?sent, accepted = r.success, "move answered");
            });
            pending = Some(handle);
        }
        scheduler.record_tick_end();
    }

    // Let the last world tick arrive.
    let info = scheduler.wait_for_tick().await;
    session.tick();
    tracing::info!(ticks = info.tick, "done");

    session.close_connection(conn);
    drop(session);
    server.abort();
    Ok(())
}
