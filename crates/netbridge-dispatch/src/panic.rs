//! Formatting for panic payloads caught around application callbacks.

use std::any::Any;
use std::fmt;

/// Displays a panic payload as its message when it is a string, and as
/// `Any` otherwise.
#[derive(Debug)]
#[must_use]
pub struct PanicMessage(Box<dyn Any + Send>);

impl fmt::Display for PanicMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(s) = self.0.downcast_ref::<String>() {
            f.write_str(s)
        } else if let Some(s) = self.0.downcast_ref::<&'static str>() {
            f.write_str(s)
        } else {
            write!(f, "{:?}", self.0)
        }
    }
}

/// Wraps a payload returned by [`std::panic::catch_unwind`].
pub fn format_panic(payload: Box<dyn Any + Send>) -> PanicMessage {
    PanicMessage(payload)
}
