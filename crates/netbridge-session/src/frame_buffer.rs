//! Per-connection frame buffer.
//!
//! Bytes arrive on a transport thread at arbitrary times and in arbitrary
//! chunk sizes. The tick thread wants whole frames, oldest first, without
//! ever waiting. `FrameBuffer` sits in between:
//!
//! ```text
//!            read_pos           scan_pos                 len
//!               │                  │                      │
//! storage: [ consumed | pending frames | partial frame   ]
//!                      └── pending: (offset, len) ... ──┘
//! ```
//!
//! - `append` (producer) writes to the end and records any frames the new
//!   bytes complete.
//! - `try_take` (consumer) pops the oldest frame and copies its bytes out.
//! - Once nothing is pending, the consumed prefix is dropped (compaction).
//!
//! All three run under one mutex, so a compaction can never move bytes an
//! append is writing or a take is reading. The critical sections are a
//! `memcpy` plus some bookkeeping; the lock is never held across a
//! callback or a decode.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use netbridge_protocol::frame::{LENGTH_PREFIX_LEN, read_length_prefix};
use netbridge_transport::ConnectionId;

use crate::{Framing, SessionConfig, SessionError};

/// A complete frame inside a connection's backing buffer.
///
/// `offset` is only meaningful until the frame is taken: the buffer is
/// compacted once everything pending has been consumed. `seq` numbers the
/// frames of one connection from 0 and is never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    /// Position in arrival order on this connection.
    pub seq: u64,
    /// Start of the frame's bytes in the backing buffer.
    pub offset: usize,
    /// Number of bytes in the frame.
    pub len: usize,
}

/// Length-prefix reader state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    /// Need [`LENGTH_PREFIX_LEN`] bytes at `scan_pos`.
    AwaitingLength,
    /// Prefix consumed; need `len` body bytes at `scan_pos`.
    AwaitingBody { len: usize },
}

struct Inner {
    storage: Vec<u8>,
    /// Everything before this has been handed to the consumer.
    read_pos: usize,
    /// Everything before this belongs to a recorded frame (or a consumed
    /// length prefix).
    scan_pos: usize,
    reader: ReadState,
    pending: VecDeque<Frame>,
    next_seq: u64,
    closed: bool,
}

impl Inner {
    fn push_frame(&mut self, offset: usize, len: usize) {
        self.pending.push_back(Frame {
            seq: self.next_seq,
            offset,
            len,
        });
        self.next_seq += 1;
    }

    /// Runs the length-prefix state machine over newly appended bytes.
    fn scan_length_prefixed(
        &mut self,
        connection: ConnectionId,
        max_frame_len: u32,
    ) -> Result<(), SessionError> {
        loop {
            match self.reader {
                ReadState::AwaitingLength => {
                    let Some(len) =
                        read_length_prefix(&self.storage[self.scan_pos..])
                    else {
                        return Ok(());
                    };
                    if len > max_frame_len {
                        return Err(SessionError::FrameTooLarge {
                            connection,
                            len,
                            max: max_frame_len,
                        });
                    }
                    self.scan_pos += LENGTH_PREFIX_LEN;
                    self.reader = ReadState::AwaitingBody { len: len as usize };
                }
                ReadState::AwaitingBody { len } => {
                    if self.storage.len() - self.scan_pos < len {
                        return Ok(());
                    }
                    self.push_frame(self.scan_pos, len);
                    self.scan_pos += len;
                    self.reader = ReadState::AwaitingLength;
                }
            }
        }
    }

    /// Drops the consumed prefix. Only called with nothing pending, so no
    /// recorded offset needs rebasing.
    fn compact(&mut self, initial_capacity: usize, shrink_threshold: usize) {
        debug_assert!(self.pending.is_empty());
        let consumed = self.read_pos;
        if consumed == self.storage.len() {
            self.storage.clear();
        } else {
            // A partial length-prefixed frame survives at the front.
            self.storage.drain(..consumed);
        }
        self.scan_pos -= consumed;
        self.read_pos = 0;

        if self.storage.capacity() > shrink_threshold
            && self.storage.len() <= initial_capacity
        {
            self.storage.shrink_to(initial_capacity);
        }
    }
}

/// Accumulates one connection's inbound bytes and hands out whole frames
/// in arrival order.
///
/// `append` may be called from any thread, concurrently with `try_take`
/// on another. Frames are returned FIFO, one per `append` in
/// [`Framing::PerChunk`] mode.
pub struct FrameBuffer {
    connection: ConnectionId,
    config: SessionConfig,
    inner: Mutex<Inner>,
}

impl FrameBuffer {
    /// Creates an empty buffer for `connection`.
    pub fn new(connection: ConnectionId, config: SessionConfig) -> Self {
        let config = config.validated();
        let inner = Inner {
            storage: Vec::with_capacity(config.initial_capacity),
            read_pos: 0,
            scan_pos: 0,
            reader: ReadState::AwaitingLength,
            pending: VecDeque::new(),
            next_seq: 0,
            closed: false,
        };
        Self {
            connection,
            config,
            inner: Mutex::new(inner),
        }
    }

    /// The connection this buffer belongs to.
    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// Appends a chunk delivered by the transport.
    ///
    /// The chunk is copied; the caller keeps ownership of its slice.
    ///
    /// # Errors
    /// - [`SessionError::Closed`]: the buffer was closed
    /// - [`SessionError::BufferOverflow`]: the chunk would exceed
    ///   `max_buffered_bytes`; nothing is written
    /// - [`SessionError::FrameTooLarge`]: a length prefix is above
    ///   `max_frame_len`; the stream is unusable from here on
    pub fn append(&self, chunk: &[u8]) -> Result<(), SessionError> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(SessionError::Closed(self.connection));
        }

        if let Some(limit) = self.config.max_buffered_bytes {
            let attempted = inner.storage.len() - inner.read_pos + chunk.len();
            if attempted > limit {
                return Err(SessionError::BufferOverflow {
                    connection: self.connection,
                    attempted,
                    limit,
                });
            }
        }

        let offset = inner.storage.len();
        inner.storage.extend_from_slice(chunk);

        match self.config.framing {
            Framing::PerChunk => {
                inner.push_frame(offset, chunk.len());
                inner.scan_pos = inner.storage.len();
            }
            Framing::LengthPrefixed { max_frame_len } => {
                inner.scan_length_prefixed(self.connection, max_frame_len)?;
            }
        }

        tracing::trace!(
            connection = %self.connection,
            bytes = chunk.len(),
            pending = inner.pending.len(),
            "chunk appended"
        );
        Ok(())
    }

    /// Takes the oldest complete frame, copying its bytes into `scratch`
    /// (which is cleared first).
    ///
    /// Returns `None` when no complete frame is pending. Never blocks
    /// beyond the short critical section shared with `append`.
    pub fn try_take(&self, scratch: &mut Vec<u8>) -> Option<Frame> {
        let mut inner = self.lock();
        let frame = inner.pending.pop_front()?;

        scratch.clear();
        scratch.extend_from_slice(
            &inner.storage[frame.offset..frame.offset + frame.len],
        );
        inner.read_pos = frame.offset + frame.len;

        if inner.pending.is_empty() {
            inner.compact(
                self.config.initial_capacity,
                self.config.shrink_threshold,
            );
        }
        Some(frame)
    }

    /// Closes the buffer: later appends fail, pending frames and any
    /// partial frame are discarded and the backing storage is released.
    ///
    /// Returns how many complete frames were discarded. Idempotent.
    pub fn close(&self) -> usize {
        let mut inner = self.lock();
        if inner.closed {
            return 0;
        }
        let discarded = inner.pending.len();
        inner.closed = true;
        inner.pending = VecDeque::new();
        inner.storage = Vec::new();
        inner.read_pos = 0;
        inner.scan_pos = 0;
        inner.reader = ReadState::AwaitingLength;

        tracing::debug!(
            connection = %self.connection,
            discarded,
            "frame buffer closed"
        );
        discarded
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of complete frames waiting for `try_take`.
    pub fn pending_frames(&self) -> usize {
        self.lock().pending.len()
    }

    /// Bytes appended but not yet taken, including any partial frame.
    pub fn buffered_bytes(&self) -> usize {
        let inner = self.lock();
        inner.storage.len() - inner.read_pos
    }

    /// Current capacity of the backing storage.
    pub fn capacity(&self) -> usize {
        self.lock().storage.capacity()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // No user code runs under this lock, so a poisoned guard still
        // holds consistent state.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// =========================================================================
// Tests
// =========================================================================
