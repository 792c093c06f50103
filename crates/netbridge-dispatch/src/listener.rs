//! Listener handles.

use std::cell::RefCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use netbridge_protocol::{Message, NetMessage, WireType};

use crate::panic::{PanicMessage, format_panic};

/// Returns `false` when the callback declined the message.
type Callback = dyn FnMut(&Message) -> bool;

/// A callback interested in one wire type.
///
/// `Listener` is a handle: clones share the callback and count as the same
/// listener, which is what [`Dispatcher::unregister`](crate::Dispatcher::unregister)
/// and duplicate detection compare. Keep a clone around to unregister later.
#[derive(Clone)]
pub struct Listener {
    wire_type: WireType,
    callback: Rc<RefCell<Callback>>,
}

impl Listener {
    /// A listener for messages of type `M`, called with the decoded value.
    pub fn new<M, F>(mut f: F) -> Self
    where
        M: NetMessage,
        F: FnMut(&M) + 'static,
    {
        Self::filtered(M::WIRE_TYPE, move |message: &Message| {
            let Some(body) = message.downcast_ref::<M>() else {
                tracing::warn!(
                    wire_type = %message.wire_type(),
                    expected = std::any::type_name::<M>(),
                    actual = message.type_name(),
                    "listener skipped: message type mismatch"
                );
                return false;
            };
            f(body);
            true
        })
    }

    /// A listener for `wire_type` that receives the undecoded envelope.
    pub fn raw<F>(wire_type: WireType, mut f: F) -> Self
    where
        F: FnMut(&Message) + 'static,
    {
        Self::filtered(wire_type, move |message: &Message| {
            f(message);
            true
        })
    }

    fn filtered<F>(wire_type: WireType, f: F) -> Self
    where
        F: FnMut(&Message) -> bool + 'static,
    {
        Self {
            wire_type,
            callback: Rc::new(RefCell::new(f)),
        }
    }

    /// The wire type this listener wants.
    pub fn wire_type(&self) -> WireType {
        self.wire_type
    }

    /// Whether `self` and `other` are clones of the same listener.
    pub fn same_as(&self, other: &Listener) -> bool {
        Rc::ptr_eq(&self.callback, &other.callback)
    }

    /// Runs the callback, containing any panic it raises. `Ok(false)`
    /// means the message was not delivered.
    ///
    /// A listener that is already running (it triggered a route back to
    /// itself) is skipped rather than re-entered. A typed listener skips
    /// bodies of another Rust type.
    pub(crate) fn invoke(&self, message: &Message) -> Result<bool, PanicMessage> {
        let Ok(mut callback) = self.callback.try_borrow_mut() else {
            tracing::warn!(
                wire_type = %self.wire_type,
                "listener re-entered while running; skipped"
            );
            return Ok(false);
        };
        panic::catch_unwind(AssertUnwindSafe(|| (*callback)(message))).map_err(format_panic)
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("wire_type", &self.wire_type)
            .field("callback", &Rc::as_ptr(&self.callback))
            .finish()
    }
}
