//! The contract the core requires of user entities.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use crate::error::Fault;
use crate::value::Value;

/// Ordinal identifier into an entity's event table.
///
/// Produced by the (out-of-scope) bytecode transformer; the core treats it
/// as an opaque dispatch key.
pub type EventId = u32;

/// The future an entity's dispatch returns: it may complete immediately, or
/// suspend at a blocking primitive's park point and complete later once the
/// controller resumes it.
pub type DispatchFuture = Pin<Box<dyn Future<Output = Result<Value, Fault>>>>;

/// The capability set the scheduler requires of every dispatch target.
///
/// The core treats entities as opaque: it invokes by ordinal and never
/// inspects fields or methods beyond this contract.
pub trait Entity {
    /// Dispatches `event_id` with `arguments`, returning a future that may
    /// park (via a blocking primitive) before resolving to a value or fault.
    fn invoke(&mut self, event_id: EventId, arguments: Vec<Value>) -> DispatchFuture;

    /// A pure, human-readable label for `event_id`, used for diagnostics and
    /// per-signature statistics. Must not have side effects.
    fn signature_of(&self, event_id: EventId) -> String;
}

/// A shared, interior-mutable handle to an entity.
///
/// `Rc<RefCell<_>>` rather than `Arc<Mutex<_>>`: the scheduling model is
/// single-threaded cooperative (spec §5), so atomics and cross-thread
/// synchronization would be pure overhead with no correctness benefit.
pub type EntityHandle = Rc<RefCell<dyn Entity>>;

/// Wraps any `Entity` value in the handle type the scheduler expects.
pub fn entity_handle<E: Entity + 'static>(entity: E) -> EntityHandle {
    Rc::new(RefCell::new(entity))
}
