//! The controller: the scheduler main loop (spec §4.3) plus the ambient
//! ([`ControllerConfig`]) and thread-local-binding machinery (spec §6, §9).

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::task::Poll;

use crate::continuation::{poll_tracked, Continuation, Outcome, ParkFuture, ParkSlot};
use crate::entity::{entity_handle, DispatchFuture, Entity, EntityHandle, EventId};
use crate::error::{ContractError, Fault};
use crate::event::{CompletionHook, Event, EventQueue, EventRef};
use crate::time::Time;
use crate::value::Value;

/// Construction-time and runtime-togglable controller settings (ambient:
/// spec.md has no configuration layer of its own, since the core has no
/// deployment surface — this is the plain-struct equivalent used in place
/// of a file/env-backed config crate).
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub start_time: Time,
    /// Exclusive upper bound on `current_time`; `event_loop` halts once
    /// `current_time >= end_time`. `Time::MAX` effectively disables it.
    pub end_time: Time,
    pub track_event_sources: bool,
    pub track_spectrum: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            start_time: Time::ZERO,
            end_time: Time::MAX,
            track_event_sources: false,
            track_spectrum: false,
        }
    }
}

struct Inner {
    current_time: Time,
    start_time: Time,
    end_time: Time,
    pending: EventQueue,
    currently_dispatching: Option<EventRef>,
    track_event_sources: bool,
    track_spectrum: bool,
    total_events: u64,
    /// `BTreeMap`, not a hash map: spec §5 calls out hash-ordered
    /// iteration as a determinism hazard, and nothing here is on a hot
    /// enough path to need `HashMap`'s O(1) edge.
    spectrum: BTreeMap<String, u64>,
}

/// A deterministic discrete-event scheduler (spec §4.3).
///
/// Cheap to clone: internally two `Rc`s, so the handle returned from
/// [`Controller::new`] and the one bound into the thread-local slot are the
/// same shared state.
///
/// `last_park_slot` lives in its own cell, outside `inner`, on purpose:
/// polling an entity's future (`first_poll`/`repoll_continuation`) may
/// re-enter the controller through the thread-local lookup (e.g. a
/// primitive calling `post` or `park` from inside the very future being
/// polled). Were `last_park_slot` part of `Inner`, the `Ref` held live
/// across that poll would collide with the reentrant `borrow_mut`.
#[derive(Clone)]
pub struct Controller {
    inner: Rc<RefCell<Inner>>,
    last_park_slot: Rc<RefCell<Option<ParkSlot>>>,
}

thread_local! {
    static CURRENT_CONTROLLER: RefCell<Option<Controller>> = const { RefCell::new(None) };
}

impl Controller {
    #[must_use]
    pub fn new(config: ControllerConfig) -> Self {
        let inner = Inner {
            current_time: config.start_time,
            start_time: config.start_time,
            end_time: config.end_time,
            pending: EventQueue::new(),
            currently_dispatching: None,
            track_event_sources: config.track_event_sources,
            track_spectrum: config.track_spectrum,
            total_events: 0,
            spectrum: BTreeMap::new(),
        };
        Controller {
            inner: Rc::new(RefCell::new(inner)),
            last_park_slot: Rc::new(RefCell::new(None)),
        }
    }

    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(ControllerConfig::default())
    }

    /// Binds this controller into the current thread's ambient slot, so
    /// that [`current_controller`] and friends can find it from inside
    /// entity code without it being threaded through explicitly.
    pub fn bind(&self) {
        CURRENT_CONTROLLER.with(|slot| *slot.borrow_mut() = Some(self.clone()));
    }

    /// Releases the thread-local binding. Safe to call whether or not this
    /// controller is currently bound.
    pub fn close(&self) {
        CURRENT_CONTROLLER.with(|slot| {
            let mut slot = slot.borrow_mut();
            if let Some(bound) = slot.as_ref() {
                if Rc::ptr_eq(&bound.inner, &self.inner) {
                    *slot = None;
                }
            }
        });
    }

    #[must_use]
    pub fn current_time(&self) -> Time {
        self.inner.borrow().current_time
    }

    pub fn set_start_time(&self, time: Time) {
        self.inner.borrow_mut().start_time = time;
    }

    pub fn set_end_time(&self, time: Time) {
        self.inner.borrow_mut().end_time = time;
    }

    pub fn set_track_event_sources(&self, enabled: bool) {
        self.inner.borrow_mut().track_event_sources = enabled;
    }

    pub fn set_track_spectrum(&self, enabled: bool) {
        self.inner.borrow_mut().track_spectrum = enabled;
    }

    #[must_use]
    pub fn total_events(&self) -> u64 {
        self.inner.borrow().total_events
    }

    /// Per-signature dispatch counts, populated only when
    /// `track_spectrum` is enabled. Returned as a `BTreeMap` so iteration
    /// order is itself deterministic.
    #[must_use]
    pub fn spectrum(&self) -> BTreeMap<String, u64> {
        self.inner.borrow().spectrum.clone()
    }

    /// Re-initialises the controller to its construction-time state,
    /// keeping the bound thread-local slot (if any) pointed at the same
    /// handle. `clear(); clear();` is idempotent: both leave the
    /// controller in its initial state.
    pub fn clear(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.current_time = inner.start_time;
        inner.pending.clear();
        inner.currently_dispatching = None;
        inner.total_events = 0;
        inner.spectrum.clear();
        drop(inner);
        *self.last_park_slot.borrow_mut() = None;
    }

    /// The event this thread is currently dispatching, if any.
    #[must_use]
    pub fn currently_dispatching(&self) -> Option<EventRef> {
        self.inner.borrow().currently_dispatching.clone()
    }

    fn require_dispatching(&self) -> Result<EventRef, ContractError> {
        self.currently_dispatching()
            .ok_or(ContractError::ParkOutsideDispatch)
    }

    /// Schedules `target.invoke(event_id, arguments)` for dispatch at the
    /// current time (fire-and-forget).
    pub fn post(&self, target: EntityHandle, event_id: EventId, arguments: Vec<Value>) -> EventRef {
        let time = self.current_time();
        self.post_at_unchecked(time, target, event_id, arguments)
    }

    /// Schedules for dispatch at an absolute time. `time` must be `>=
    /// current_time()`; an earlier time is a contract violation (spec's
    /// own recommendation for this previously-open boundary case).
    pub fn post_at(
        &self,
        time: Time,
        target: EntityHandle,
        event_id: EventId,
        arguments: Vec<Value>,
    ) -> Result<EventRef, ContractError> {
        let current = self.current_time();
        if time < current {
            return Err(ContractError::TimeTravel {
                current,
                requested: time,
            });
        }
        Ok(self.post_at_unchecked(time, target, event_id, arguments))
    }

    fn post_at_unchecked(
        &self,
        time: Time,
        target: EntityHandle,
        event_id: EventId,
        arguments: Vec<Value>,
    ) -> EventRef {
        let mut event = Event::new(time, target, event_id, arguments);
        if self.inner.borrow().track_event_sources {
            event.source = self
                .currently_dispatching()
                .map(|e| Rc::downgrade(&e))
                .unwrap_or_default();
        }
        let event = Rc::new(RefCell::new(event));
        self.inner.borrow_mut().pending.push(event.clone());
        event
    }

    /// Removes a previously-posted event before it dispatches (used to
    /// layer timeouts: post a timeout event, and cancel it if the primary
    /// wait is served first).
    pub fn cancel(&self, event: &EventRef) -> bool {
        self.inner.borrow_mut().pending.remove(event)
    }

    /// Schedules `target.invoke(event_id, arguments)` and suspends the
    /// calling event until it completes, returning its value or
    /// propagating its exception.
    ///
    /// The child dispatches at the current time, sharing the caller's
    /// ordinal successor slot (spec §4.3): nothing else is posted between
    /// the caller's own post calls and this one, so the child receives the
    /// very next ordinal and therefore fires before anything posted after
    /// it at the same time.
    pub async fn post_continuing(
        &self,
        target: EntityHandle,
        event_id: EventId,
        arguments: Vec<Value>,
    ) -> Result<Value, Fault> {
        let parent = self
            .require_dispatching()
            .map_err(|e| Fault::Domain(Box::new(e)))?;
        let time = self.current_time();
        let mut child = Event::new(time, target, event_id, arguments);
        child.caller = Some(Rc::downgrade(&parent));
        child.completion = Some(CompletionHook { parent });
        let child = Rc::new(RefCell::new(child));
        self.inner.borrow_mut().pending.push(child);

        self.park().await
    }

    /// Suspends the calling event until resumed. Building block for every
    /// blocking primitive (`Signal`, `Condition`, `Resource`, `Queue`) and
    /// for `post_continuing`/`blocking_sleep` above.
    ///
    /// Must only be called (and immediately awaited) from inside dispatch
    /// of an entity's `invoke` future — i.e. while this controller has a
    /// `currently_dispatching` event.
    pub async fn park(&self) -> Result<Value, Fault> {
        let slot = ParkSlot::new();
        if self.last_park_slot.borrow().is_some() {
            tracing::warn!("double-park on one event; replacing prior continuation");
        }
        *self.last_park_slot.borrow_mut() = Some(slot.clone());
        ParkFuture::new(slot).await
    }

    /// Registers `event`'s waiting-room slot directly, for primitives that
    /// need to hand a waiter its own `ParkSlot` up front (e.g. a resource
    /// recording the slot in its FIFO before the caller awaits it). Most
    /// callers should prefer [`Controller::park`].
    #[must_use]
    pub fn new_park_slot(&self) -> ParkSlot {
        let slot = ParkSlot::new();
        *self.last_park_slot.borrow_mut() = Some(slot.clone());
        slot
    }

    /// Resumes a parked event at `new_time` with `outcome`, re-inserting it
    /// into the queue. Called by blocking primitives from inside dispatch
    /// of some other event. Panics (contract violation in primitive code)
    /// if `event` is not currently parked.
    pub fn resume(&self, event: &EventRef, new_time: Time, outcome: Outcome) {
        let slot = {
            let ev = event.borrow();
            ev.continuation
                .as_ref()
                .expect("resume() called on an event with no continuation")
                .slot()
        };
        slot.fulfill(outcome);
        event.borrow_mut().time = new_time;
        self.inner.borrow_mut().pending.push(event.clone());
    }

    /// Suspends the calling event until `now() + delta`, implemented as a
    /// plain timer event (dispatched through the same `post`/`complete`
    /// path as any other entity) whose completion resumes the caller —
    /// no separate wall-clock timer machinery is needed.
    pub async fn blocking_sleep(&self, delta: i64) -> Result<(), Fault> {
        let wake_at = self.current_time().saturating_add(delta);
        let parent = self.require_dispatching().map_err(|e| Fault::Domain(Box::new(e)))?;
        let mut timer = Event::new(wake_at, entity_handle(SleepTimer), 0, vec![]);
        timer.completion = Some(CompletionHook { parent });
        self.inner.borrow_mut().pending.push(Rc::new(RefCell::new(timer)));
        self.park().await.map(|_| ())
    }

    /// Runs the main loop (spec §4.3) until the queue drains or
    /// `current_time >= end_time`.
    pub fn event_loop(&self) -> Result<(), Fault> {
        self.bind();
        let result = self.run_loop();
        self.close();
        result
    }

    fn run_loop(&self) -> Result<(), Fault> {
        loop {
            let end_time = self.inner.borrow().end_time;
            if self.current_time() >= end_time {
                return Ok(());
            }
            let next = self.inner.borrow_mut().pending.pop_min();
            let Some(event) = next else {
                return Ok(());
            };
            self.dispatch_one(event)?;
        }
    }

    fn dispatch_one(&self, event: EventRef) -> Result<(), Fault> {
        {
            let mut inner = self.inner.borrow_mut();
            let event_time = event.borrow().time;
            inner.current_time = inner.current_time.max(event_time);
            inner.currently_dispatching = Some(event.clone());
        }

        let (target, event_id, signature) = {
            let ev = event.borrow();
            let signature = ev.target.borrow().signature_of(ev.event_id);
            (ev.target.clone(), ev.event_id, signature)
        };
        let time = self.current_time();
        tracing::debug!(%time, event_id, %signature, "dispatch");

        let has_continuation = event.borrow().continuation.is_some();
        let poll = if has_continuation {
            self.repoll_continuation(&event)
        } else {
            self.first_poll(&event, target, event_id)
        };

        match poll {
            Poll::Pending => {
                tracing::trace!(%time, %signature, "parked");
                self.inner.borrow_mut().currently_dispatching = None;
                Ok(())
            }
            Poll::Ready(outcome) => {
                event.borrow_mut().continuation = None;
                self.inner.borrow_mut().currently_dispatching = None;
                self.record_statistics(&signature);
                self.complete(&event, time, &signature, outcome)
            }
        }
    }

    fn first_poll(&self, event: &EventRef, target: EntityHandle, event_id: EventId) -> Poll<Outcome> {
        let args = event.borrow().arguments.clone();
        let mut future = target.borrow_mut().invoke(event_id, args);
        let (poll, slot) = poll_tracked(&mut future, &self.last_park_slot);
        if poll.is_pending() {
            let slot = slot.expect("an event that parked must have registered a slot via Controller::park");
            event.borrow_mut().continuation = Some(Continuation::new(future, slot));
        }
        poll
    }

    fn repoll_continuation(&self, event: &EventRef) -> Poll<Outcome> {
        let ev = event.borrow();
        let continuation = ev
            .continuation
            .as_ref()
            .expect("repoll_continuation requires a continuation");
        let mut future = continuation.future_mut();
        let (poll, slot) = poll_tracked(&mut future, &self.last_park_slot);
        drop(future);
        if let Some(slot) = slot {
            continuation.set_slot(slot);
        }
        poll
    }

    fn record_statistics(&self, signature: &str) {
        let mut inner = self.inner.borrow_mut();
        inner.total_events += 1;
        if inner.track_spectrum {
            *inner.spectrum.entry(signature.to_string()).or_insert(0) += 1;
        }
    }

    fn complete(&self, event: &EventRef, time: Time, signature: &str, outcome: Outcome) -> Result<(), Fault> {
        let completion = event.borrow_mut().completion.take();
        if let Some(hook) = completion {
            // This event was dispatched via `post_continuing`: deliver its
            // outcome to the caller instead of terminating the run.
            self.resume(&hook.parent, self.current_time(), outcome);
            return Ok(());
        }

        match outcome {
            Ok(_) => Ok(()),
            Err(fault @ Fault::SimulationEnd) => Err(fault),
            Err(fault @ Fault::Fatal(_)) => Err(fault),
            Err(fault @ Fault::SimulationFault { .. }) => Err(fault),
            Err(Fault::Domain(source)) => {
                // `Entity` exposes no class name beyond `signature_of`, so
                // the signature doubles as the entity label here.
                let wrapped = Fault::Domain(source).wrap_domain(
                    time,
                    signature.to_string(),
                    event.borrow().event_id,
                    signature.to_string(),
                );
                tracing::error!(%time, %signature, "{wrapped}");
                Err(wrapped)
            }
        }
    }
}

/// The entity a `blocking_sleep` timer dispatches against: completes
/// immediately, its only purpose is to occupy a queue slot at the wake time.
struct SleepTimer;

impl Entity for SleepTimer {
    fn invoke(&mut self, _event_id: EventId, _arguments: Vec<Value>) -> DispatchFuture {
        Box::pin(async { Ok(Value::Null) })
    }

    fn signature_of(&self, _event_id: EventId) -> String {
        "sleep()".to_string()
    }
}

/// Binds/locates the thread-local controller, panicking if none is bound.
#[must_use]
pub fn current_controller() -> Controller {
    query_current_controller().expect("no controller bound to the current thread")
}

/// Non-panicking variant of [`current_controller`].
#[must_use]
pub fn query_current_controller() -> Option<Controller> {
    CURRENT_CONTROLLER.with(|slot| slot.borrow().clone())
}

/// Shortcut for `current_controller().current_time()`.
#[must_use]
pub fn now() -> Time {
    current_controller().current_time()
}
