//! The continuation carrier (spec §4.2): suspend a dispatching event's
//! future at a cooperative park point, and resume it later with a value or
//! exception.
//!
//! This implementation takes the "state-machine entities" shape sketched in
//! spec §9, expressed with native `async`/`await`: an entity's `invoke`
//! returns a boxed future, blocking primitives suspend by awaiting a
//! [`ParkFuture`], and the controller drives the future with a no-op waker
//! (there is never more than one live future per in-flight event, and
//! resumption is always explicit via [`Controller::resume`][crate::controller::Controller::resume],
//! never waker-triggered background polling).

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

use crate::entity::DispatchFuture;
use crate::error::Fault;
use crate::value::Value;

/// The outcome delivered to a parked call site: either the primitive's
/// normal return value or an exception raised as if thrown at the `park`
/// call site.
pub type Outcome = Result<Value, Fault>;

/// A shared cell a [`ParkFuture`] polls and [`Controller::resume`][crate::controller::Controller::resume]
/// fulfills.
///
/// Cloning a `ParkSlot` shares the same underlying cell; at most one
/// `ParkFuture` is ever alive against a given slot at a time (double-park
/// replaces it, see [`ParkSlot::new`] callers in `controller.rs`).
#[derive(Clone, Default)]
pub struct ParkSlot(Rc<RefCell<Option<Outcome>>>);

impl ParkSlot {
    #[must_use]
    pub fn new() -> Self {
        ParkSlot(Rc::new(RefCell::new(None)))
    }

    /// Delivers `outcome` to this slot. Called exactly once per park, from
    /// `Controller::resume`.
    pub fn fulfill(&self, outcome: Outcome) {
        *self.0.borrow_mut() = Some(outcome);
    }

    fn take(&self) -> Option<Outcome> {
        self.0.borrow_mut().take()
    }
}

/// The future awaited at a blocking primitive's suspension point.
///
/// `Pending` until [`ParkSlot::fulfill`] has been called; the controller
/// never wakes this via the waker (see module docs), so there is no reason
/// to register one — it is simply repolled when the owning event is
/// redispatched.
pub struct ParkFuture {
    slot: ParkSlot,
}

impl ParkFuture {
    #[must_use]
    pub fn new(slot: ParkSlot) -> Self {
        ParkFuture { slot }
    }
}

impl Future for ParkFuture {
    type Output = Outcome;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.slot.take() {
            Some(outcome) => Poll::Ready(outcome),
            None => Poll::Pending,
        }
    }
}

/// A suspended call stack: the top-level dispatch future, paused at
/// whichever [`ParkFuture`] it last awaited.
pub struct Continuation {
    future: RefCell<DispatchFuture>,
    slot: RefCell<ParkSlot>,
}

impl Continuation {
    pub(crate) fn new(future: DispatchFuture, slot: ParkSlot) -> Self {
        Continuation {
            future: RefCell::new(future),
            slot: RefCell::new(slot),
        }
    }

    /// The outcome slot this continuation's live park point is reading
    /// from — the target of [`ParkSlot::fulfill`] on resume.
    pub(crate) fn slot(&self) -> ParkSlot {
        self.slot.borrow().clone()
    }

    /// Replaces the live outcome slot, used after a redispatch that parked
    /// again at a new (or the same, on double-park) point.
    pub(crate) fn set_slot(&self, slot: ParkSlot) {
        *self.slot.borrow_mut() = slot;
    }

    /// Mutably borrows the suspended future so the scheduler can poll it.
    pub(crate) fn future_mut(&self) -> std::cell::RefMut<'_, DispatchFuture> {
        self.future.borrow_mut()
    }
}

/// A future's `Pending`/`Ready` outcome paired with the park slot it
/// registered while suspending (if any). Used by the scheduler to track
/// which slot a resume should fulfill.
pub(crate) fn poll_tracked(
    future: &mut DispatchFuture,
    last_slot: &RefCell<Option<ParkSlot>>,
) -> (Poll<Outcome>, Option<ParkSlot>) {
    *last_slot.borrow_mut() = None;
    let waker = noop_waker();
    let mut cx = Context::from_waker(&waker);
    let poll = future.as_mut().poll(&mut cx);
    let slot = if poll.is_pending() {
        last_slot.borrow_mut().take()
    } else {
        None
    };
    (poll, slot)
}

pub(crate) fn noop_waker() -> Waker {
    fn no_op(_: *const ()) {}
    fn clone(_: *const ()) -> RawWaker {
        raw_waker()
    }
    fn raw_waker() -> RawWaker {
        static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, no_op, no_op, no_op);
        RawWaker::new(std::ptr::null(), &VTABLE)
    }
    // Safety: the vtable's functions all ignore the data pointer, so a
    // null, non-deallocated pointer is sound for the lifetime of any Waker
    // cloned from it.
    #[allow(unsafe_code)]
    unsafe {
        Waker::from_raw(raw_waker())
    }
}
