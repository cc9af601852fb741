//! Prime Mover: a deterministic discrete-event simulation engine.
//!
//! ```text
//!               post / post_at / post_continuing
//!                          |
//!                          v
//!   Entity  <---- dispatch ----  Controller  ----  EventQueue
//!     |                               ^
//!     | invoke() returns a future     | park() / resume()
//!     v                               |
//!   Signal, Condition<T>, Resource, Queue<T>   (prime-mover-sync)
//! ```
//!
//! A simulation is: implement [`Entity`] for your domain types, `post` the
//! first events onto a [`Controller`], and call
//! [`Controller::event_loop`]. Entities suspend by awaiting one of the
//! blocking primitives in `prime_mover_sync`; the controller resumes them
//! in strict `(time, ordinal)` order, so two runs over the same program
//! always produce the same trace.
//!
//! This crate is a thin re-export of `prime-mover-core` (Time, Event,
//! EventQueue, Continuation, Controller, Entity, error taxonomy) and
//! `prime-mover-sync` (Signal, Condition, Resource, Queue) — split the way
//! they are so the primitives can be versioned and tested independently of
//! the scheduler core they're built on.

pub use prime_mover_core::{
    current_controller, entity_handle, now, query_current_controller, ContractError, Controller,
    ControllerConfig, DispatchFuture, DomainError, Entity, EntityHandle, Event, EventId, EventQueue,
    EventRef, Fault, Outcome, Time, Value,
};

pub use prime_mover_sync::{Condition, Queue, QueueStatistics, Resource, ResourceStatistics, ScopedLoan, Signal, Token};
