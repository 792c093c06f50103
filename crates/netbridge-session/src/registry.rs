//! Open-connection registry shared between the I/O threads and the tick.
//!
//! The transport calls into [`Inbound`] from its own threads: open a
//! connection, deliver bytes, report a close or an error. The tick thread
//! owns the [`ConnectionRegistry`], snapshots the open buffers each tick
//! and picks up closures through a channel, so everything that must run
//! on the tick thread (dropping pending requests, invoking the
//! application's error callback) does.
//!
//! Every [`Inbound::open`] stamps the connection with a fresh generation.
//! A transport may reuse an id as soon as it is closed, so the tick side
//! matches closure events against (id, generation) and never mistakes a
//! reopened connection for the one that went away.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use netbridge_transport::{ConnectionId, TransportError};
use tokio::sync::mpsc;

use crate::{FrameBuffer, SessionConfig, SessionError};

// ---------------------------------------------------------------------------
// Closure events
// ---------------------------------------------------------------------------

/// Why a connection went away.
#[derive(Debug)]
pub enum CloseReason {
    /// The transport reported a clean close from the remote side.
    Remote,
    /// The application closed it through the session loop.
    Local,
    /// The transport failed (reset, send/receive error).
    Transport(TransportError),
    /// Buffering failed fatally (overflow, oversized frame).
    Session(SessionError),
}

impl CloseReason {
    /// Whether this closure should be reported as an error.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Session(_))
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote => f.write_str("closed by remote"),
            Self::Local => f.write_str("closed locally"),
            Self::Transport(e) => write!(f, "transport error: {e}"),
            Self::Session(e) => write!(f, "session error: {e}"),
        }
    }
}

/// A connection torn down on the I/O side, waiting for the tick thread to
/// finish the cleanup.
#[derive(Debug)]
pub struct ClosedConnection {
    /// The connection that closed.
    pub connection: ConnectionId,
    /// The generation it was opened with.
    pub generation: u64,
    /// Why.
    pub reason: CloseReason,
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

struct Entry {
    generation: u64,
    buffer: Arc<FrameBuffer>,
}

struct Shared {
    config: SessionConfig,
    connections: RwLock<HashMap<ConnectionId, Entry>>,
    next_generation: AtomicU64,
}

impl Shared {
    fn get(&self, connection: ConnectionId) -> Option<Arc<FrameBuffer>> {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&connection)
            .map(|entry| Arc::clone(&entry.buffer))
    }

    fn generation(&self, connection: ConnectionId) -> Option<u64> {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&connection)
            .map(|entry| entry.generation)
    }

    /// Removes the connection and releases its buffer. Returns the
    /// generation it was opened with, or `None` if it was not open.
    fn remove(&self, connection: ConnectionId) -> Option<u64> {
        let entry = self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&connection)?;
        entry.buffer.close();
        Some(entry.generation)
    }
}

// ---------------------------------------------------------------------------
// Inbound: the I/O-side handle
// ---------------------------------------------------------------------------

/// The handle the transport calls from its I/O threads.
///
/// Cheap to clone; every method is non-blocking apart from short lock
/// sections.
#[derive(Clone)]
pub struct Inbound {
    shared: Arc<Shared>,
    closed_tx: mpsc::UnboundedSender<ClosedConnection>,
}

impl Inbound {
    /// Registers a newly accepted connection and creates its frame buffer.
    /// Returns the generation assigned to it.
    ///
    /// # Errors
    /// Returns [`SessionError::AlreadyOpen`] if the id is in use.
    pub fn open(&self, connection: ConnectionId) -> Result<u64, SessionError> {
        let mut connections = self
            .shared
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if connections.contains_key(&connection) {
            return Err(SessionError::AlreadyOpen(connection));
        }
        let generation = self.shared.next_generation.fetch_add(1, Ordering::Relaxed);
        connections.insert(
            connection,
            Entry {
                generation,
                buffer: Arc::new(FrameBuffer::new(connection, self.shared.config.clone())),
            },
        );
        tracing::debug!(%connection, generation, "connection opened");
        Ok(generation)
    }

    /// Delivers bytes read from `connection`.
    ///
    /// A fatal buffering error (see [`SessionError::is_fatal`]) tears the
    /// connection down before returning the error; the tick thread then
    /// reports it.
    ///
    /// # Errors
    /// - [`SessionError::UnknownConnection`]: not open
    /// - anything [`FrameBuffer::append`] returns
    pub fn bytes_received(
        &self,
        connection: ConnectionId,
        bytes: &[u8],
    ) -> Result<(), SessionError> {
        let buffer = self
            .shared
            .get(connection)
            .ok_or(SessionError::UnknownConnection(connection))?;

        match buffer.append(bytes) {
            Ok(()) => Ok(()),
            Err(e) if e.is_fatal() => {
                tracing::warn!(%connection, error = %e, "tearing down connection");
                self.teardown(connection, CloseReason::Session(e.clone()));
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Reports that the remote side closed `connection` cleanly.
    pub fn close(&self, connection: ConnectionId) {
        self.teardown(connection, CloseReason::Remote);
    }

    /// Reports a transport failure on `connection` and tears it down.
    pub fn fail(&self, connection: ConnectionId, error: TransportError) {
        tracing::debug!(%connection, error = %error, "transport failure");
        self.teardown(connection, CloseReason::Transport(error));
    }

    fn teardown(&self, connection: ConnectionId, reason: CloseReason) {
        let Some(generation) = self.shared.remove(connection) else {
            return;
        };
        tracing::debug!(%connection, generation, %reason, "connection torn down");
        // The receiver only disappears with the session loop itself.
        let _ = self.closed_tx.send(ClosedConnection {
            connection,
            generation,
            reason,
        });
    }
}

// ---------------------------------------------------------------------------
// ConnectionRegistry: the tick-side owner
// ---------------------------------------------------------------------------

/// Tracks open connections for the tick thread.
pub struct ConnectionRegistry {
    shared: Arc<Shared>,
    closed_tx: mpsc::UnboundedSender<ClosedConnection>,
    closed_rx: mpsc::UnboundedReceiver<ClosedConnection>,
}

impl ConnectionRegistry {
    /// Creates an empty registry. Every connection gets a frame buffer
    /// built from `config`.
    pub fn new(config: SessionConfig) -> Self {
        let (closed_tx, closed_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                config: config.validated(),
                connections: RwLock::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
            }),
            closed_tx,
            closed_rx,
        }
    }

    /// A handle for the transport's I/O threads.
    pub fn inbound(&self) -> Inbound {
        Inbound {
            shared: Arc::clone(&self.shared),
            closed_tx: self.closed_tx.clone(),
        }
    }

    /// The next connection torn down on the I/O side, if any.
    pub fn poll_closed(&mut self) -> Option<ClosedConnection> {
        self.closed_rx.try_recv().ok()
    }

    /// Open connections and their buffers, in ascending id order.
    ///
    /// The lock is released before returning, so the caller can drain
    /// buffers while the transport keeps opening and closing connections.
    pub fn snapshot(&self) -> Vec<(ConnectionId, Arc<FrameBuffer>)> {
        let mut open: Vec<_> = self
            .shared
            .connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, entry)| (*id, Arc::clone(&entry.buffer)))
            .collect();
        open.sort_by_key(|(id, _)| *id);
        open
    }

    /// Closes a connection from the tick side. No closure event is queued:
    /// the caller is already on the tick thread and cleans up directly.
    ///
    /// Returns the generation of the connection that closed, or `None` if
    /// it was not open.
    pub fn close(&self, connection: ConnectionId) -> Option<u64> {
        let generation = self.shared.remove(connection)?;
        tracing::debug!(%connection, generation, "connection closed locally");
        Some(generation)
    }

    /// The generation `connection` was opened with, if it is open.
    pub fn generation(&self, connection: ConnectionId) -> Option<u64> {
        self.shared.generation(connection)
    }

    /// Whether `connection` is open.
    pub fn contains(&self, connection: ConnectionId) -> bool {
        self.shared.get(connection).is_some()
    }

    /// The buffer for `connection`, if open.
    pub fn get(&self, connection: ConnectionId) -> Option<Arc<FrameBuffer>> {
        self.shared.get(connection)
    }

    /// Number of open connections.
    pub fn len(&self) -> usize {
        self.shared
            .connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` if no connection is open.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The configuration each frame buffer is built with.
    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ConnectionRegistry {
        ConnectionRegistry::new(SessionConfig::default())
    }

    #[test]
    fn test_open_then_bytes_received_lands_in_buffer() {
        let registry = registry();
        let inbound = registry.inbound();
        let id = ConnectionId::new(1);

        inbound.open(id).unwrap();
        inbound.bytes_received(id, b"hello").unwrap();

        let buffer = registry.get(id).unwrap();
        let mut scratch = Vec::new();
        buffer.try_take(&mut scratch).unwrap();
        assert_eq!(scratch, b"hello");
    }

    #[test]
    fn test_open_twice_is_rejected() {
        let registry = registry();
        let inbound = registry.inbound();
        inbound.open(ConnectionId::new(1)).unwrap();
        assert_eq!(
            inbound.open(ConnectionId::new(1)).unwrap_err(),
            SessionError::AlreadyOpen(ConnectionId::new(1))
        );
    }

    #[test]
    fn test_bytes_for_unknown_connection_are_rejected() {
        let registry = registry();
        let err = registry
            .inbound()
            .bytes_received(ConnectionId::new(9), b"x")
            .unwrap_err();
        assert_eq!(err, SessionError::UnknownConnection(ConnectionId::new(9)));
    }

    #[test]
    fn test_snapshot_is_sorted_by_id() {
        let registry = registry();
        let inbound = registry.inbound();
        for raw in [5, 2, 9, 1] {
            inbound.open(ConnectionId::new(raw)).unwrap();
        }
        let ids: Vec<u64> = registry
            .snapshot()
            .into_iter()
            .map(|(id, _)| id.into_inner())
            .collect();
        assert_eq!(ids, vec![1, 2, 5, 9]);
    }

    #[test]
    fn test_remote_close_queues_event_and_releases_buffer() {
        let mut registry = registry();
        let inbound = registry.inbound();
        let id = ConnectionId::new(3);
        inbound.open(id).unwrap();
        inbound.bytes_received(id, b"pending").unwrap();
        let buffer = registry.get(id).unwrap();

        inbound.close(id);

        assert!(!registry.contains(id));
        assert!(buffer.is_closed());
        let event = registry.poll_closed().unwrap();
        assert_eq!(event.connection, id);
        assert!(matches!(event.reason, CloseReason::Remote));
        assert!(!event.reason.is_error());
        assert!(registry.poll_closed().is_none());
    }

    #[test]
    fn test_fail_queues_transport_error() {
        let mut registry = registry();
        let inbound = registry.inbound();
        let id = ConnectionId::new(4);
        inbound.open(id).unwrap();

        inbound.fail(
            id,
            TransportError::ConnectionReset {
                connection: id,
                reason: "rst".into(),
            },
        );

        let event = registry.poll_closed().unwrap();
        assert!(matches!(event.reason, CloseReason::Transport(_)));
        assert!(event.reason.is_error());
    }

    #[test]
    fn test_close_of_unknown_connection_queues_nothing() {
        let mut registry = registry();
        registry.inbound().close(ConnectionId::new(77));
        assert!(registry.poll_closed().is_none());
    }

    #[test]
    fn test_overflow_tears_down_and_reports() {
        let mut registry = ConnectionRegistry::new(SessionConfig {
            max_buffered_bytes: Some(2),
            ..SessionConfig::default()
        });
        let inbound = registry.inbound();
        let id = ConnectionId::new(1);
        inbound.open(id).unwrap();

        let err = inbound.bytes_received(id, b"abc").unwrap_err();
        assert!(matches!(err, SessionError::BufferOverflow { .. }));
        assert!(!registry.contains(id));

        let event = registry.poll_closed().unwrap();
        assert!(matches!(
            event.reason,
            CloseReason::Session(SessionError::BufferOverflow { .. })
        ));
    }

    #[test]
    fn test_local_close_queues_no_event() {
        let mut registry = registry();
        let id = ConnectionId::new(2);
        registry.inbound().open(id).unwrap();

        assert!(registry.close(id).is_some());
        assert!(registry.close(id).is_none());
        assert!(registry.poll_closed().is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_reopened_id_gets_a_new_generation() {
        let mut registry = registry();
        let inbound = registry.inbound();
        let id = ConnectionId::new(6);

        let first = inbound.open(id).unwrap();
        inbound.close(id);
        let second = inbound.open(id).unwrap();

        assert_ne!(first, second);
        assert_eq!(registry.generation(id), Some(second));
        let event = registry.poll_closed().unwrap();
        assert_eq!(event.connection, id);
        assert_eq!(event.generation, first);
    }

    #[test]
    fn test_inbound_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Inbound>();
        assert_send_sync::<FrameBuffer>();
    }
}
