//! Frame buffer configuration.

use netbridge_protocol::frame::DEFAULT_MAX_FRAME_LEN;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Framing
// ---------------------------------------------------------------------------

/// How a connection's byte stream is cut into frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Framing {
    /// Every transport delivery is exactly one frame.
    ///
    /// Correct only for transports that preserve message boundaries
    /// (WebSocket binary messages, one-datagram-per-message UDP). A
    /// plain TCP stream can split or merge messages and needs
    /// [`LengthPrefixed`](Self::LengthPrefixed) instead.
    #[default]
    PerChunk,

    /// Each frame is `[len: u32 BE][body]`, reassembled independently of
    /// how the transport chunks the stream.
    LengthPrefixed {
        /// Largest accepted body. A bigger prefix is fatal for the
        /// connection.
        max_frame_len: u32,
    },
}

impl Framing {
    /// Length-prefixed framing with the default maximum frame size.
    pub fn length_prefixed() -> Self {
        Self::LengthPrefixed {
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Configuration shared by every connection's [`FrameBuffer`](crate::FrameBuffer).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Frame boundary rule.
    pub framing: Framing,

    /// Cap on bytes buffered but not yet taken by the tick thread.
    ///
    /// `None` (the default) leaves the buffer unbounded: if the network
    /// outpaces the tick, memory grows. With a cap, the append that would
    /// cross it fails and the connection is torn down.
    pub max_buffered_bytes: Option<usize>,

    /// Capacity reserved for a new connection's backing buffer.
    pub initial_capacity: usize,

    /// When a drained buffer's capacity exceeds this, it is shrunk back
    /// towards `initial_capacity` so one burst does not pin memory.
    pub shrink_threshold: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            framing: Framing::default(),
            max_buffered_bytes: None,
            initial_capacity: 4 * 1024,
            shrink_threshold: 1024 * 1024,
        }
    }
}

impl SessionConfig {
    /// Clamp and fix any out-of-range values so the config is safe to use.
    ///
    /// - A zero `max_frame_len` falls back to the default maximum.
    /// - A zero `max_buffered_bytes` would reject every byte; it is
    ///   treated as unbounded.
    /// - `shrink_threshold` is raised to at least `initial_capacity`.
    pub fn validated(mut self) -> Self {
        if let Framing::LengthPrefixed { max_frame_len: 0 } = self.framing {
            tracing::warn!("max_frame_len of 0: using default");
            self.framing = Framing::length_prefixed();
        }
        if self.max_buffered_bytes == Some(0) {
            tracing::warn!("max_buffered_bytes of 0: treating as unbounded");
            self.max_buffered_bytes = None;
        }
        if self.shrink_threshold < self.initial_capacity {
            self.shrink_threshold = self.initial_capacity;
        }
        self
    }
}
