//! Wire-type fan-out.

use std::collections::HashMap;

use netbridge_protocol::{Message, WireType};

use crate::{DispatchError, Listener};

/// Outcome of routing one message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteReport {
    /// Listeners that ran to completion.
    pub delivered: usize,
    /// Listeners that panicked. Each was logged; the rest still ran.
    pub panicked: usize,
}

impl RouteReport {
    /// No listener took the message: none was registered for its wire
    /// type, or every one declined it.
    pub fn is_unhandled(&self) -> bool {
        self.delivered == 0 && self.panicked == 0
    }
}

/// Maps each wire type to an ordered list of listeners.
///
/// Lives on the tick thread; [`route`](Self::route) invokes listeners
/// synchronously in registration order.
#[derive(Debug, Default)]
pub struct Dispatcher {
    listeners: HashMap<WireType, Vec<Listener>>,
}

impl Dispatcher {
    /// Creates a dispatcher with no listeners.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `listener` after any already registered for its wire type.
    ///
    /// # Errors
    /// Returns [`DispatchError::DuplicateListener`] if this handle (or a
    /// clone of it) is already registered.
    pub fn register(&mut self, listener: &Listener) -> Result<(), DispatchError> {
        let wire_type = listener.wire_type();
        let slot = self.listeners.entry(wire_type).or_default();
        if slot.iter().any(|l| l.same_as(listener)) {
            tracing::warn!(%wire_type, "listener already registered; ignoring");
            return Err(DispatchError::DuplicateListener(wire_type));
        }
        slot.push(listener.clone());
        tracing::debug!(%wire_type, count = slot.len(), "listener registered");
        Ok(())
    }

    /// Removes `listener`. Returns `false` if it was not registered.
    pub fn unregister(&mut self, listener: &Listener) -> bool {
        let wire_type = listener.wire_type();
        let Some(slot) = self.listeners.get_mut(&wire_type) else {
            return false;
        };
        let Some(pos) = slot.iter().position(|l| l.same_as(listener)) else {
            return false;
        };
        slot.remove(pos);
        if slot.is_empty() {
            self.listeners.remove(&wire_type);
        }
        tracing::debug!(%wire_type, "listener unregistered");
        true
    }

    /// Delivers `message` to every listener for its wire type.
    pub fn route(&self, message: &Message) -> RouteReport {
        let wire_type = message.wire_type();
        let Some(slot) = self.listeners.get(&wire_type) else {
            tracing::trace!(%wire_type, "no listeners");
            return RouteReport::default();
        };

        let mut report = RouteReport::default();
        for listener in slot {
            match listener.invoke(message) {
                Ok(true) => report.delivered += 1,
                Ok(false) => {}
                Err(panic) => {
                    tracing::error!(%wire_type, panic = %panic, "listener panicked");
                    report.panicked += 1;
                }
            }
        }
        report
    }

    /// Number of listeners registered for `wire_type`.
    pub fn listener_count(&self, wire_type: WireType) -> usize {
        self.listeners.get(&wire_type).map_or(0, Vec::len)
    }

    /// Whether any listener is registered for `wire_type`.
    pub fn has_listeners(&self, wire_type: WireType) -> bool {
        self.listener_count(wire_type) > 0
    }
}
