//! `Condition<T>`: typed value hand-off (spec §4.4.2).

use std::cell::RefCell;
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::rc::Rc;

use prime_mover_core::{current_controller, query_current_controller, ContractError, EventRef, Fault, Value};

/// A typed wakeup: each waiter receives its own clone of the signalled
/// value.
///
/// `T: Clone` rather than an ownership-extraction scheme (`Rc::try_unwrap`
/// out of the `Value::Boxed` outcome): `signal_all` must hand the same
/// value to every current waiter regardless of how many there are, so a
/// clone-per-waiter is required anyway — `signal` just reuses the same path
/// for a single waiter.
pub struct Condition<T> {
    waiters: Rc<RefCell<VecDeque<EventRef>>>,
    _value: PhantomData<T>,
}

impl<T> Clone for Condition<T> {
    fn clone(&self) -> Self {
        Condition {
            waiters: self.waiters.clone(),
            _value: PhantomData,
        }
    }
}

impl<T> Condition<T> {
    #[must_use]
    pub fn new() -> Self {
        Condition {
            waiters: Rc::new(RefCell::new(VecDeque::new())),
            _value: PhantomData,
        }
    }

    #[must_use]
    pub fn has_waiters(&self) -> bool {
        !self.waiters.borrow().is_empty()
    }

    #[must_use]
    pub fn waiter_count(&self) -> usize {
        self.waiters.borrow().len()
    }
}

impl<T> Default for Condition<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + 'static> Condition<T> {
    /// Suspends the calling event until [`Condition::signal`] or
    /// [`Condition::signal_all`] delivers a value.
    pub async fn wait(&self) -> Result<T, Fault> {
        let controller = query_current_controller()
            .ok_or_else(|| Fault::Domain(Box::new(ContractError::NoBoundController)))?;
        let event = controller
            .currently_dispatching()
            .ok_or_else(|| Fault::Domain(Box::new(ContractError::ParkOutsideDispatch)))?;
        self.waiters.borrow_mut().push_back(event);
        let outcome = controller.park().await?;
        match outcome.downcast_ref::<T>() {
            Some(value) => Ok(value.clone()),
            None => Err(Fault::Fatal(
                "condition resumed with a value of the wrong type".to_string(),
            )),
        }
    }

    /// Hands `value` to the longest-waiting waiter. No-op if nobody is
    /// waiting.
    pub fn signal(&self, value: T) {
        let Some(event) = self.waiters.borrow_mut().pop_front() else {
            return;
        };
        let controller = current_controller();
        let now = controller.current_time();
        controller.resume(&event, now, Ok(Value::boxed(value)));
    }

    /// Hands an independent clone of `value` to every current waiter, in
    /// FIFO order, all resuming at the current time.
    pub fn signal_all(&self, value: T) {
        let drained: Vec<EventRef> = self.waiters.borrow_mut().drain(..).collect();
        if drained.is_empty() {
            return;
        }
        let controller = current_controller();
        let now = controller.current_time();
        for event in drained {
            controller.resume(&event, now, Ok(Value::boxed(value.clone())));
        }
    }
}
