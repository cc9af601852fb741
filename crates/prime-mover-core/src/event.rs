//! Event (spec §3) and the time-ordered Event Queue (spec §4.1).

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use crate::continuation::Continuation;
use crate::entity::{EntityHandle, EventId};
use crate::time::Time;
use crate::value::Value;

/// A shared handle to an [`Event`].
///
/// Events live behind `Rc<RefCell<_>>` so that `source`/`caller` links and
/// the queue's own storage can all point at the same instance; the queue is
/// the only owner that ever removes an event from circulation.
pub type EventRef = Rc<RefCell<Event>>;

/// Where to deliver an event's outcome once it reaches `Ready`, distinct
/// from the diagnostic `caller` link. Only set for events dispatched via
/// `Controller::post_continuing`.
pub(crate) struct CompletionHook {
    pub(crate) parent: EventRef,
}

/// A scheduled unit of work (spec §3).
pub struct Event {
    /// When this event fires. Reassigned only by the scheduler, when
    /// re-inserting a resumed event.
    pub time: Time,
    pub target: EntityHandle,
    pub event_id: EventId,
    pub arguments: Vec<Value>,
    /// Optional parent, for trace reconstruction only. May be absent
    /// ("unknown") if the ancestor has already been reclaimed.
    pub source: Weak<RefCell<Event>>,
    /// Set when this event was dispatched by a blocking call (e.g.
    /// `post_continuing`) so its resumption can re-enter the call site.
    /// Diagnostic only — never read by the scheduler to decide where to
    /// deliver an outcome (see `completion` for that), and weak like
    /// `source` so a caller chain never keeps a completed ancestor alive.
    pub caller: Option<Weak<RefCell<Event>>>,
    pub(crate) completion: Option<CompletionHook>,
    /// Present iff this event represents a suspended blocking call.
    pub(crate) continuation: Option<Continuation>,
    /// Assigned by the queue at push time; breaks ties between events
    /// scheduled at the same `time`.
    pub ordinal: u64,
    pub debug_info: Option<String>,
}

impl Event {
    /// Constructs a fresh (never-yet-dispatched) event. `ordinal` is
    /// assigned by [`EventQueue::push`], not here.
    #[must_use]
    pub fn new(time: Time, target: EntityHandle, event_id: EventId, arguments: Vec<Value>) -> Self {
        Event {
            time,
            target,
            event_id,
            arguments,
            source: Weak::new(),
            caller: None,
            completion: None,
            continuation: None,
            ordinal: 0,
            debug_info: None,
        }
    }

    #[must_use]
    pub fn with_debug_info(mut self, info: impl Into<String>) -> Self {
        self.debug_info = Some(info.into());
        self
    }

    #[must_use]
    pub fn is_parked(&self) -> bool {
        self.continuation.is_some()
    }
}

/// Time-ordered event queue, keyed by `(time, ordinal)` (spec §4.1).
///
/// A `BTreeMap` gives `O(log n)` push/pop/remove and free in-order
/// iteration for diagnostics, with no subtraction anywhere in the ordering
/// path — ties are broken by comparing `ordinal`, never by computing
/// `a.time - b.time`.
pub struct EventQueue {
    pending: BTreeMap<(Time, u64), EventRef>,
    next_ordinal: u64,
}

impl EventQueue {
    #[must_use]
    pub fn new() -> Self {
        EventQueue {
            pending: BTreeMap::new(),
            next_ordinal: 0,
        }
    }

    /// Assigns `event` the next ordinal and inserts it, preserving FIFO
    /// order among events sharing a `time`.
    pub fn push(&mut self, event: EventRef) {
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        let time = {
            let mut ev = event.borrow_mut();
            ev.ordinal = ordinal;
            ev.time
        };
        self.pending.insert((time, ordinal), event);
    }

    /// Removes and returns the earliest-ordered event.
    pub fn pop_min(&mut self) -> Option<EventRef> {
        let key = *self.pending.keys().next()?;
        self.pending.remove(&key)
    }

    #[must_use]
    pub fn peek_min(&self) -> Option<EventRef> {
        self.pending.values().next().cloned()
    }

    /// Removes a specific scheduled event (used for cancellation, e.g.
    /// discarding a timeout once its waiter has been served another way).
    /// Returns `true` if the event was present.
    pub fn remove(&mut self, event: &EventRef) -> bool {
        let key = {
            let ev = event.borrow();
            (ev.time, ev.ordinal)
        };
        self.pending.remove(&key).is_some()
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// In-order iteration for diagnostics; not on any hot path.
    pub fn iter(&self) -> impl Iterator<Item = &EventRef> {
        self.pending.values()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.next_ordinal = 0;
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}
