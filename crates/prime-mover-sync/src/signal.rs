//! `Signal`: broadcast, unvalued wakeup (spec §4.4.1).

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use prime_mover_core::{current_controller, query_current_controller, ContractError, EventRef, Fault, Value};

/// A broadcast wakeup with no payload.
///
/// Cheap to clone: all clones share the same waiter list.
#[derive(Clone)]
pub struct Signal {
    waiters: Rc<RefCell<VecDeque<EventRef>>>,
}

impl Signal {
    #[must_use]
    pub fn new() -> Self {
        Signal {
            waiters: Rc::new(RefCell::new(VecDeque::new())),
        }
    }

    /// Suspends the calling event until the next [`Signal::signal`] or
    /// [`Signal::signal_all`]. Must be called from inside event dispatch.
    pub async fn wait(&self) -> Result<(), Fault> {
        let controller = query_current_controller()
            .ok_or_else(|| Fault::Domain(Box::new(ContractError::NoBoundController)))?;
        let event = controller
            .currently_dispatching()
            .ok_or_else(|| Fault::Domain(Box::new(ContractError::ParkOutsideDispatch)))?;
        self.waiters.borrow_mut().push_back(event);
        controller.park().await?;
        Ok(())
    }

    /// Resumes the single longest-waiting waiter. No-op if nobody is
    /// waiting.
    pub fn signal(&self) {
        let Some(event) = self.waiters.borrow_mut().pop_front() else {
            return;
        };
        let controller = current_controller();
        let now = controller.current_time();
        controller.resume(&event, now, Ok(Value::Null));
    }

    /// Resumes every current waiter, in FIFO registration order, all at
    /// the current simulated time.
    pub fn signal_all(&self) {
        let drained: Vec<EventRef> = self.waiters.borrow_mut().drain(..).collect();
        if drained.is_empty() {
            return;
        }
        let controller = current_controller();
        let now = controller.current_time();
        for event in drained {
            controller.resume(&event, now, Ok(Value::Null));
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

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}
