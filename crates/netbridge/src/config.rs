//! Bridge configuration.

use netbridge_session::SessionConfig;
use serde::{Deserialize, Serialize};

/// Configuration for a [`SessionLoop`](crate::SessionLoop).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Per-connection buffering and framing.
    pub session: SessionConfig,

    /// Upper bound on frames processed by one `tick`, across all
    /// connections. `None` (the default) drains everything that is
    /// pending. Frames left over wait for the next tick.
    pub max_frames_per_tick: Option<usize>,
}

impl BridgeConfig {
    /// Clamp out-of-range values. A budget of zero would stall every
    /// tick and is treated as unbounded.
    pub fn validated(mut self) -> Self {
        if self.max_frames_per_tick == Some(0) {
            tracing::warn!("max_frames_per_tick of 0, treating as unbounded");
            self.max_frames_per_tick = None;
        }
        self.session = self.session.validated();
        self
    }
}
