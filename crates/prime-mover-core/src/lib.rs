//! Deterministic discrete-event scheduler core.
//!
//! A simulation advances by repeatedly popping the earliest-ordered pending
//! [`Event`](event::Event) off an [`EventQueue`](event::EventQueue) and
//! dispatching it against its target [`Entity`](entity::Entity). Dispatch
//! may suspend at a blocking primitive's park point; the
//! [`Controller`](controller::Controller) tracks that suspension as a
//! [`Continuation`](continuation::Continuation) and resumes it later with a
//! value or a [`Fault`](error::Fault).
//!
//! This crate defines the scheduler itself. The blocking primitives built
//! on top of `Controller::park`/`resume` (`Signal`, `Condition<T>`,
//! `Resource`, `Queue<T>`) live in `prime-mover-sync`.

pub mod continuation;
pub mod controller;
pub mod entity;
pub mod error;
pub mod event;
pub mod time;
pub mod value;

pub use controller::{current_controller, now, query_current_controller, Controller, ControllerConfig};
pub use continuation::Outcome;
pub use entity::{entity_handle, DispatchFuture, Entity, EntityHandle, EventId};
pub use error::{ContractError, DomainError, Fault};
pub use event::{Event, EventQueue, EventRef};
pub use time::Time;
pub use value::Value;
