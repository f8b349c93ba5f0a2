//! Single-settlement deferred values.
//!
//! A [`Deferred`] is created `Pending` by a producer function and settles at
//! most once, as fulfilled or rejected.  Key guarantees:
//!
//! - **Settle-once**: the first settlement wins; later attempts are silent
//!   no-ops, not errors
//! - **FIFO delivery**: continuations queued while pending run in
//!   registration order when settlement arrives
//! - **Immediate path**: continuations attached after settlement run at once,
//!   on the current turn
//! - **Chain-flattening**: a continuation returning [`Completion::Chain`]
//!   makes the derived deferred adopt the inner deferred's eventual outcome
//! - **Unified rejection channel**: producer failures, failing continuations,
//!   and explicit rejections are indistinguishable downstream
//!
//! Single logical thread only: the shared state cell is `Rc<RefCell<_>>`,
//! which is deliberately not `Send`.

use std::cell::RefCell;
use std::fmt;
use std::mem;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::value::Value;

// ---------------------------------------------------------------------------
// DeferredState — the three-state settlement machine
// ---------------------------------------------------------------------------

/// Settlement state.  Monotonic: `Pending` is the only state with an exit,
/// and both exits are terminal.  The payload lives inside the settled
/// variant, so "value present iff fulfilled" holds structurally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeferredState {
    Pending,
    Fulfilled(Value),
    Rejected(Value),
}

impl DeferredState {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    pub fn is_settled(&self) -> bool {
        !self.is_pending()
    }

    pub fn is_fulfilled(&self) -> bool {
        matches!(self, Self::Fulfilled(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

impl fmt::Display for DeferredState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Fulfilled(_) => write!(f, "fulfilled"),
            Self::Rejected(_) => write!(f, "rejected"),
        }
    }
}

// ---------------------------------------------------------------------------
// Completion — what a continuation produces
// ---------------------------------------------------------------------------

/// Result of invoking a continuation.
///
/// The host-language dispatch "is the return value itself a deferred?" is a
/// tagged union here: a plain [`Value`] cannot contain a [`Deferred`], so a
/// deferred fulfilled with a nested deferred is unrepresentable and the
/// flattening rule is enforced by construction.
#[derive(Debug, Clone)]
pub enum Completion {
    /// Ordinary value: the derived deferred fulfills with it.
    Value(Value),
    /// Another deferred: the derived deferred adopts its eventual outcome.
    Chain(Deferred),
    /// Synchronous failure: the derived deferred rejects with the payload.
    Thrown(Value),
}

/// A continuation registered through [`Deferred::then`].
pub type Continuation = Box<dyn FnOnce(Value) -> Completion>;

/// Internal settled-payload callback: one queue entry.
pub(crate) type Reaction = Box<dyn FnOnce(Value)>;

// ---------------------------------------------------------------------------
// Cell — private shared state
// ---------------------------------------------------------------------------

struct Cell {
    state: DeferredState,
    fulfillment_queue: Vec<Reaction>,
    rejection_queue: Vec<Reaction>,
    rejection_handled: bool,
}

impl Cell {
    fn pending() -> Self {
        Self {
            state: DeferredState::Pending,
            fulfillment_queue: Vec::new(),
            rejection_queue: Vec::new(),
            rejection_handled: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Settler — the settlement capability pair
// ---------------------------------------------------------------------------

/// Cloneable settlement capability bound to one deferred's private cell.
///
/// Carries both capabilities of the construction contract: settle as
/// fulfilled and settle as rejected.  Clones share the cell, so the
/// settle-once guard holds across every copy a producer hands out.
#[derive(Clone)]
pub struct Settler {
    cell: Rc<RefCell<Cell>>,
}

impl Settler {
    /// Settle as fulfilled.  Silently does nothing if already settled.
    ///
    /// Drains the fulfillment queue in registration order, exactly once; the
    /// rejection queue is discarded unrun.  The cell borrow is released
    /// before any reaction runs, so a reaction that chains back onto this
    /// deferred observes it settled and takes the immediate path.
    pub fn fulfill(&self, value: Value) {
        let reactions = {
            let mut cell = self.cell.borrow_mut();
            if cell.state.is_settled() {
                return;
            }
            cell.state = DeferredState::Fulfilled(value.clone());
            cell.rejection_queue.clear();
            mem::take(&mut cell.fulfillment_queue)
        };
        for reaction in reactions {
            reaction(value.clone());
        }
    }

    /// Settle as rejected.  Silently does nothing if already settled.
    ///
    /// Symmetric with [`Settler::fulfill`], draining the rejection queue.
    pub fn reject(&self, reason: Value) {
        let reactions = {
            let mut cell = self.cell.borrow_mut();
            if cell.state.is_settled() {
                return;
            }
            cell.state = DeferredState::Rejected(reason.clone());
            cell.fulfillment_queue.clear();
            mem::take(&mut cell.rejection_queue)
        };
        for reaction in reactions {
            reaction(reason.clone());
        }
    }
}

impl fmt::Debug for Settler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settler")
            .field("state", &self.cell.borrow().state)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Deferred — the deferred value itself
// ---------------------------------------------------------------------------

/// A single-settlement deferred value.
///
/// Cheap to clone; clones are handles to the same cell.  Each link produced
/// by [`Deferred::then`] owns its own cell, queues, and state.
#[derive(Clone)]
pub struct Deferred {
    cell: Rc<RefCell<Cell>>,
}

impl Deferred {
    /// Create a deferred and run `producer` synchronously with its settler.
    ///
    /// The deferred is `Pending` with empty queues before the producer runs,
    /// so a settlement performed inside the producer is visible by the time
    /// construction returns.  A producer returning `Err(payload)` is treated
    /// identically to it calling [`Settler::reject`] with that payload; an
    /// `Err` after the producer already settled is suppressed by the
    /// settle-once guard.
    pub fn new(producer: impl FnOnce(Settler) -> Result<(), Value>) -> Self {
        let (deferred, settler) = Self::pending();
        if let Err(thrown) = producer(settler.clone()) {
            settler.reject(thrown);
        }
        deferred
    }

    /// Bare producer/consumer pair: a pending deferred and its settler.
    pub fn pending() -> (Self, Settler) {
        let cell = Rc::new(RefCell::new(Cell::pending()));
        (Self { cell: Rc::clone(&cell) }, Settler { cell })
    }

    /// A deferred already settled as fulfilled.
    pub fn fulfilled(value: Value) -> Self {
        let (deferred, settler) = Self::pending();
        settler.fulfill(value);
        deferred
    }

    /// A deferred already settled as rejected.  Initially unhandled.
    pub fn rejected(reason: Value) -> Self {
        let (deferred, settler) = Self::pending();
        settler.reject(reason);
        deferred
    }

    /// Attach continuations; returns the derived deferred immediately,
    /// whatever the receiver's state.
    ///
    /// - receiver pending: both internal handlers are queued FIFO
    /// - receiver settled: the matching handler runs at once
    /// - `on_fulfilled` absent: fulfillment passes through unchanged
    /// - `on_rejected` absent: rejection passes through unchanged, which is
    ///   what carries a rejection across indifferent links to the first
    ///   handler that cares
    ///
    /// Supplying `on_rejected` marks the receiver's rejection as handled.
    pub fn then(
        &self,
        on_fulfilled: Option<Continuation>,
        on_rejected: Option<Continuation>,
    ) -> Deferred {
        let (next, settler) = Deferred::pending();
        if on_rejected.is_some() {
            self.cell.borrow_mut().rejection_handled = true;
        }

        let handle_fulfilled: Reaction = match on_fulfilled {
            Some(continuation) => {
                let settler = settler.clone();
                Box::new(move |value| apply_continuation(continuation, value, &settler))
            }
            None => {
                let settler = settler.clone();
                Box::new(move |value| settler.fulfill(value))
            }
        };
        let handle_rejected: Reaction = match on_rejected {
            Some(continuation) => {
                Box::new(move |reason| apply_continuation(continuation, reason, &settler))
            }
            None => Box::new(move |reason| settler.reject(reason)),
        };

        self.subscribe(handle_fulfilled, handle_rejected);
        next
    }

    /// Sugar for `then(None, Some(on_rejected))`.
    pub fn catch(&self, on_rejected: Continuation) -> Deferred {
        self.then(None, Some(on_rejected))
    }

    /// Snapshot of the current state, payload included.
    pub fn state(&self) -> DeferredState {
        self.cell.borrow().state.clone()
    }

    pub fn is_pending(&self) -> bool {
        self.cell.borrow().state.is_pending()
    }

    pub fn is_settled(&self) -> bool {
        self.cell.borrow().state.is_settled()
    }

    pub fn is_fulfilled(&self) -> bool {
        self.cell.borrow().state.is_fulfilled()
    }

    pub fn is_rejected(&self) -> bool {
        self.cell.borrow().state.is_rejected()
    }

    /// The fulfillment payload, only while fulfilled.
    pub fn value(&self) -> Option<Value> {
        match &self.cell.borrow().state {
            DeferredState::Fulfilled(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// The rejection payload, only while rejected.
    pub fn reason(&self) -> Option<Value> {
        match &self.cell.borrow().state {
            DeferredState::Rejected(reason) => Some(reason.clone()),
            _ => None,
        }
    }

    /// Whether a rejection handler was ever attached to this link, or its
    /// outcome adopted by a downstream chain.
    pub fn rejection_handled(&self) -> bool {
        self.cell.borrow().rejection_handled
    }

    /// Continuation pairs still queued (zero once settled).
    pub fn queued_reactions(&self) -> usize {
        let cell = self.cell.borrow();
        cell.fulfillment_queue.len() + cell.rejection_queue.len()
    }

    /// Forward this deferred's eventual outcome verbatim into `target`.
    /// Adoption counts as handling this link's rejection.
    pub(crate) fn pipe_into(&self, target: Settler) {
        self.cell.borrow_mut().rejection_handled = true;
        let forward_fulfill: Reaction = {
            let target = target.clone();
            Box::new(move |value| target.fulfill(value))
        };
        let forward_reject: Reaction = Box::new(move |reason| target.reject(reason));
        self.subscribe(forward_fulfill, forward_reject);
    }

    pub(crate) fn mark_rejection_handled(&self) {
        self.cell.borrow_mut().rejection_handled = true;
    }

    /// Route one reaction pair: queue both while pending, or run the matching
    /// one immediately.  The cell borrow is released before the immediate
    /// reaction runs.
    pub(crate) fn subscribe(&self, on_fulfilled: Reaction, on_rejected: Reaction) {
        let immediate = {
            let mut cell = self.cell.borrow_mut();
            match cell.state.clone() {
                DeferredState::Pending => {
                    cell.fulfillment_queue.push(on_fulfilled);
                    cell.rejection_queue.push(on_rejected);
                    None
                }
                DeferredState::Fulfilled(value) => Some((on_fulfilled, value)),
                DeferredState::Rejected(reason) => Some((on_rejected, reason)),
            }
        };
        if let Some((reaction, payload)) = immediate {
            reaction(payload);
        }
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cell = self.cell.borrow();
        f.debug_struct("Deferred")
            .field("state", &cell.state)
            .field(
                "queued_reactions",
                &(cell.fulfillment_queue.len() + cell.rejection_queue.len()),
            )
            .finish()
    }
}

/// The convert-to-rejection boundary around every user continuation: maps the
/// returned completion onto the derived deferred's settler.
fn apply_continuation(continuation: Continuation, input: Value, settler: &Settler) {
    match continuation(input) {
        Completion::Value(value) => settler.fulfill(value),
        Completion::Chain(inner) => inner.pipe_into(settler.clone()),
        Completion::Thrown(reason) => settler.reject(reason),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
