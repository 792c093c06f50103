//! Length-prefixed framing.
//!
//! Stream transports (plain TCP) do not preserve message boundaries: one
//! read may hold half a message or three of them. When the bridge is
//! configured for length-prefixed framing, every encoded message is sent
//! as
//!
//! ```text
//! ┌────────────────────┬──────────────────────────────┐
//! │ len: u32 (BE)      │ encoded message (len bytes)  │
//! └────────────────────┴──────────────────────────────┘
//! ```
//!
//! and the receiving frame buffer reassembles it with a small state
//! machine, regardless of how the transport chunked the bytes.

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Default upper bound for a single frame body (16 MiB).
///
/// A length prefix above the configured bound is treated as stream
/// corruption, not as a request to buffer that much.
pub const DEFAULT_MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// Prepends a big-endian `u32` length to `body`.
///
/// Returns `None` if `body` is too long for the prefix to describe.
pub fn encode_length_prefixed(body: &[u8]) -> Option<Vec<u8>> {
    let len = u32::try_from(body.len()).ok()?;
    let mut framed = Vec::with_capacity(LENGTH_PREFIX_LEN + body.len());
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(body);
    Some(framed)
}

/// Reads a length prefix from the front of `bytes`, if there are enough
/// bytes for one.
pub fn read_length_prefix(bytes: &[u8]) -> Option<u32> {
    let prefix: [u8; LENGTH_PREFIX_LEN] =
        bytes.get(..LENGTH_PREFIX_LEN)?.try_into().ok()?;
    Some(u32::from_be_bytes(prefix))
}
