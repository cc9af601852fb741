//! `Resource`: a counted pool with FIFO waiters (spec §4.4.3).

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use prime_mover_core::{
    current_controller, query_current_controller, ContractError, Controller, EventRef, Fault, Time, Value,
};

struct Waiter {
    event: EventRef,
    count: i64,
    arrival: Time,
}

struct Inner {
    pool_id: usize,
    capacity: i64,
    available: i64,
    waiters: VecDeque<Waiter>,
    total_acquisitions: u64,
    total_wait_time: i64,
    max_wait_time: i64,
    utilization_integral: f64,
    last_change_time: Time,
}

impl Inner {
    /// Accrues the utilisation integral for the `used` level held since the
    /// last change, up to `now`, then advances the watermark. Must be
    /// called before any change to `available`.
    fn accrue(&mut self, now: Time) {
        let elapsed = (now.ticks() - self.last_change_time.ticks()).max(0) as f64;
        let used = (self.capacity - self.available) as f64;
        self.utilization_integral += used * elapsed;
        self.last_change_time = now;
    }

    fn record_acquisition(&mut self, arrival: Time, resume: Time) {
        let wait = (resume.ticks() - arrival.ticks()).max(0);
        self.total_acquisitions += 1;
        self.total_wait_time += wait;
        self.max_wait_time = self.max_wait_time.max(wait);
    }
}

/// A counted pool of identical, interchangeable units.
///
/// Cheap to clone: all clones share the same pool state and identity (used
/// to validate that a [`Token`] is released back to the pool it came from).
#[derive(Clone)]
pub struct Resource {
    inner: Rc<RefCell<Inner>>,
}

/// Proof of a successful acquisition, bound to the pool it came from.
pub struct Token {
    pool_id: usize,
    count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceStatistics {
    pub total_acquisitions: u64,
    pub avg_wait_time: f64,
    pub max_wait_time: i64,
    pub utilization: f64,
}

impl Resource {
    /// Constructs a pool with `capacity` units, all initially available.
    /// `capacity` must be positive.
    pub fn new(capacity: i64) -> Result<Self, ContractError> {
        if capacity <= 0 {
            return Err(ContractError::NonPositiveCapacity(capacity));
        }
        let inner = Rc::new(RefCell::new(Inner {
            pool_id: 0,
            capacity,
            available: capacity,
            waiters: VecDeque::new(),
            total_acquisitions: 0,
            total_wait_time: 0,
            max_wait_time: 0,
            utilization_integral: 0.0,
            last_change_time: Time::ZERO,
        }));
        // The pool's own address uniquely identifies it for the lifetime of
        // the `Rc` group; cheaper than threading a separate id generator
        // through `Resource::new`.
        let pool_id = Rc::as_ptr(&inner) as usize;
        inner.borrow_mut().pool_id = pool_id;
        Ok(Resource { inner })
    }

    /// Acquires `count` units, suspending the calling event until they are
    /// available and this waiter is at the head of the FIFO. `count = 0`
    /// always succeeds immediately, recorded as a zero-wait acquisition.
    pub async fn acquire(&self, count: i64) -> Result<Token, Fault> {
        let controller = query_current_controller()
            .ok_or_else(|| Fault::Domain(Box::new(ContractError::NoBoundController)))?;
        let now = controller.current_time();

        if count == 0 {
            let mut inner = self.inner.borrow_mut();
            inner.accrue(now);
            inner.record_acquisition(now, now);
            return Ok(self.token(0));
        }

        let immediate = {
            let inner = self.inner.borrow();
            inner.waiters.is_empty() && inner.available >= count
        };
        if immediate {
            let mut inner = self.inner.borrow_mut();
            inner.accrue(now);
            inner.available -= count;
            inner.record_acquisition(now, now);
            return Ok(self.token(count));
        }

        let event = controller
            .currently_dispatching()
            .ok_or_else(|| Fault::Domain(Box::new(ContractError::ParkOutsideDispatch)))?;
        self.inner.borrow_mut().waiters.push_back(Waiter {
            event,
            count,
            arrival: now,
        });
        controller.park().await?;
        Ok(self.token(count))
    }

    /// Releases a previously-acquired token back to its pool. Errors if the
    /// token belongs to a different pool.
    pub fn release(&self, token: Token) -> Result<(), Fault> {
        if token.pool_id != self.inner.borrow().pool_id {
            return Err(Fault::Domain(Box::new(ContractError::WrongPool)));
        }
        self.release_count(token.count);
        Ok(())
    }

    /// Releases `count` units without a token (test/utility entry point;
    /// spec §4.4.3's `release(count)` overload).
    pub fn release_count(&self, count: i64) {
        let controller = current_controller();
        let now = controller.current_time();
        {
            let mut inner = self.inner.borrow_mut();
            inner.accrue(now);
            inner.available += count;
        }
        self.serve_waiters(&controller, now);
    }

    fn serve_waiters(&self, controller: &Controller, now: Time) {
        loop {
            let served = {
                let mut inner = self.inner.borrow_mut();
                match inner.waiters.front() {
                    Some(head) if inner.available >= head.count => {
                        let head = inner.waiters.pop_front().expect("front() just matched Some");
                        inner.accrue(now);
                        inner.available -= head.count;
                        inner.record_acquisition(head.arrival, now);
                        Some(head.event)
                    }
                    _ => None,
                }
            };
            match served {
                Some(event) => controller.resume(&event, now, Ok(Value::Null)),
                None => break,
            }
        }
    }

    /// A scoped acquisition, released automatically when the returned
    /// [`ScopedLoan`] is dropped (normal or unwinding exit).
    pub async fn loan(&self, count: i64) -> Result<ScopedLoan, Fault> {
        let token = self.acquire(count).await?;
        Ok(ScopedLoan {
            resource: self.clone(),
            token: Some(token),
        })
    }

    #[must_use]
    pub fn available(&self) -> i64 {
        self.inner.borrow().available
    }

    #[must_use]
    pub fn statistics(&self) -> ResourceStatistics {
        let controller = current_controller();
        let now = controller.current_time();
        let mut inner = self.inner.borrow_mut();
        inner.accrue(now);
        let avg_wait_time = if inner.total_acquisitions == 0 {
            0.0
        } else {
            inner.total_wait_time as f64 / inner.total_acquisitions as f64
        };
        let utilization = if now.ticks() == 0 {
            0.0
        } else {
            inner.utilization_integral / now.ticks() as f64
        };
        ResourceStatistics {
            total_acquisitions: inner.total_acquisitions,
            avg_wait_time,
            max_wait_time: inner.max_wait_time,
            utilization,
        }
    }

    fn token(&self, count: i64) -> Token {
        Token {
            pool_id: self.inner.borrow().pool_id,
            count,
        }
    }
}

/// Releases its token when dropped.
pub struct ScopedLoan {
    resource: Resource,
    token: Option<Token>,
}

impl Drop for ScopedLoan {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.resource.release_count(token.count);
        }
    }
}
