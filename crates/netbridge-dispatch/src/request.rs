//! Request/response correlation.
//!
//! A request is identified by the wire type of the response it expects.
//! At most one request per response type is pending: a newer request for
//! the same type replaces the older one, whose handle moves to
//! [`RequestState::Overwritten`] and never fires.
//!
//! Each request remembers the connection it went out on together with
//! that connection's generation, so closing a connection only cancels
//! what was sent while it was open under that generation.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use netbridge_protocol::{Message, NetMessage, WireType};
use netbridge_transport::ConnectionId;

use crate::panic::format_panic;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Where a request is in its lifecycle.
///
/// `Sent` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Transmitted; waiting for the response.
    Sent,
    /// The response arrived and the listeners ran.
    Resolved,
    /// A newer request for the same response type replaced this one.
    Overwritten,
    /// Cancelled, or its connection closed before the response arrived.
    Cancelled,
}

/// What [`RequestQueue::try_resolve`] did with a message.
#[derive(Debug)]
pub enum Resolution {
    /// A pending request took the message.
    Consumed,
    /// Nothing was waiting for it; dispatch it normally.
    Unclaimed(Message),
}

// ---------------------------------------------------------------------------
// Slot: shared between the queue and the handle
// ---------------------------------------------------------------------------

type ResponseListener<M> = Box<dyn FnOnce(&M)>;

struct Slot<M> {
    state: RequestState,
    response: Option<Rc<M>>,
    listeners: Vec<ResponseListener<M>>,
}

/// The queue's type-erased view of a slot.
trait PendingSlot {
    /// Completes the request. Hands the message back if its body is not
    /// the type the request expects.
    fn fulfill(&self, message: Message) -> Result<(), Message>;

    /// Moves the request to a terminal state without firing listeners.
    fn retire(&self, state: RequestState);
}

impl<M: NetMessage> PendingSlot for RefCell<Slot<M>> {
    fn fulfill(&self, message: Message) -> Result<(), Message> {
        let body = Rc::new(message.downcast::<M>()?);
        let listeners = {
            let mut slot = self.borrow_mut();
            slot.state = RequestState::Resolved;
            slot.response = Some(Rc::clone(&body));
            std::mem::take(&mut slot.listeners)
        };
        // The borrow is released: a listener may add another listener to
        // this same handle, which then fires immediately.
        for listener in listeners {
            run_listener(listener, &body);
        }
        Ok(())
    }

    fn retire(&self, state: RequestState) {
        let mut slot = self.borrow_mut();
        slot.state = state;
        slot.listeners.clear();
    }
}

fn run_listener<M: NetMessage>(listener: ResponseListener<M>, body: &M) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| listener(body))) {
        tracing::error!(
            wire_type = %M::WIRE_TYPE,
            panic = %format_panic(payload),
            "response listener panicked"
        );
    }
}

// ---------------------------------------------------------------------------
// ResponseHandle
// ---------------------------------------------------------------------------

/// The caller's side of a request expecting a response of type `M`.
pub struct ResponseHandle<M> {
    slot: Rc<RefCell<Slot<M>>>,
}

impl<M: NetMessage> ResponseHandle<M> {
    /// Runs `f` once with the response.
    ///
    /// If the response has already arrived, `f` runs now. If the request
    /// was overwritten or cancelled, `f` is dropped without running.
    pub fn add_listener<F>(&self, f: F)
    where
        F: FnOnce(&M) + 'static,
    {
        let resolved = {
            let mut slot = self.slot.borrow_mut();
            match slot.state {
                RequestState::Sent => {
                    slot.listeners.push(Box::new(f));
                    return;
                }
                RequestState::Resolved => slot.response.clone(),
                RequestState::Overwritten | RequestState::Cancelled => None,
            }
        };
        if let Some(body) = resolved {
            run_listener(Box::new(f), &body);
        }
    }

    /// The response, once it has arrived.
    pub fn get_message(&self) -> Option<Rc<M>> {
        self.slot.borrow().response.clone()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RequestState {
        self.slot.borrow().state
    }

    /// The wire type of the expected response.
    pub fn expected(&self) -> WireType {
        M::WIRE_TYPE
    }
}

impl<M> Clone for ResponseHandle<M> {
    fn clone(&self) -> Self {
        Self {
            slot: Rc::clone(&self.slot),
        }
    }
}

impl<M: NetMessage> fmt::Debug for ResponseHandle<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseHandle")
            .field("expected", &M::WIRE_TYPE)
            .field("state", &self.state())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// RequestQueue
// ---------------------------------------------------------------------------

struct Pending {
    connection: ConnectionId,
    generation: u64,
    slot: Rc<dyn PendingSlot>,
}

/// Pending requests keyed by expected response wire type.
#[derive(Default)]
pub struct RequestQueue {
    pending: HashMap<WireType, Pending>,
}

impl RequestQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a request sent on `connection` (opened as `generation`)
    /// that expects a response of type `M`, replacing any request already
    /// waiting for `M`.
    pub fn insert<M: NetMessage>(
        &mut self,
        connection: ConnectionId,
        generation: u64,
    ) -> ResponseHandle<M> {
        let slot = Rc::new(RefCell::new(Slot::<M> {
            state: RequestState::Sent,
            response: None,
            listeners: Vec::new(),
        }));
        let pending = Pending {
            connection,
            generation,
            slot: Rc::clone(&slot) as Rc<dyn PendingSlot>,
        };
        if let Some(previous) = self.pending.insert(M::WIRE_TYPE, pending) {
            tracing::debug!(
                expected = %M::WIRE_TYPE,
                previous = %previous.connection,
                %connection,
                "pending request overwritten"
            );
            previous.slot.retire(RequestState::Overwritten);
        }
        ResponseHandle { slot }
    }

    /// Offers `message` to the request waiting for its wire type.
    pub fn try_resolve(&mut self, message: Message) -> Resolution {
        let wire_type = message.wire_type();
        let Some(pending) = self.pending.remove(&wire_type) else {
            return Resolution::Unclaimed(message);
        };
        match pending.slot.fulfill(message) {
            Ok(()) => {
                tracing::trace!(%wire_type, connection = %pending.connection, "request resolved");
                Resolution::Consumed
            }
            Err(message) => {
                tracing::warn!(
                    %wire_type,
                    actual = message.type_name(),
                    "response body does not match the pending request"
                );
                self.pending.insert(wire_type, pending);
                Resolution::Unclaimed(message)
            }
        }
    }

    /// Drops the request waiting for `expected` without firing it.
    /// Returns `false` if none was pending.
    pub fn cancel(&mut self, expected: WireType) -> bool {
        match self.pending.remove(&expected) {
            Some(pending) => {
                pending.slot.retire(RequestState::Cancelled);
                true
            }
            None => false,
        }
    }

    /// Drops every request sent on `connection` while it was open as
    /// `generation`. Returns how many.
    pub fn cancel_connection(&mut self, connection: ConnectionId, generation: u64) -> usize {
        let mut cancelled = 0;
        self.pending.retain(|_, pending| {
            if pending.connection != connection || pending.generation != generation {
                return true;
            }
            pending.slot.retire(RequestState::Cancelled);
            cancelled += 1;
            false
        });
        if cancelled > 0 {
            tracing::debug!(%connection, generation, cancelled, "pending requests cancelled");
        }
        cancelled
    }

    /// Whether a request is waiting for `expected`.
    pub fn is_pending(&self, expected: WireType) -> bool {
        self.pending.contains_key(&expected)
    }

    /// Number of pending requests.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Returns `true` if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl fmt::Debug for RequestQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.pending.keys()).finish()
    }
}
