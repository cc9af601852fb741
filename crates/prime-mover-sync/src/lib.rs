//! Blocking primitives built on `prime-mover-core`'s continuation carrier:
//! `Signal`, `Condition<T>`, `Resource`, and `Queue<T>` (spec §4.4).
//!
//! Every primitive here is a thin, cheaply-clonable handle (`Rc` internally)
//! whose suspension points call `Controller::park` and whose wakeups call
//! `Controller::resume`. They carry no controller reference of their own:
//! each call locates the current run through the thread-local binding, the
//! same ambient-lookup pattern `Controller` itself exposes.

pub mod condition;
pub mod queue;
pub mod resource;
pub mod signal;

pub use condition::Condition;
pub use queue::{Queue, QueueStatistics};
pub use resource::{Resource, ResourceStatistics, ScopedLoan, Token};
pub use signal::Signal;
