//! Error taxonomy (spec §7): four error kinds with distinct propagation policy.

use std::error::Error as StdError;

use crate::entity::EventId;
use crate::time::Time;

/// Errors surfaced synchronously at the call site for misuse of the core
/// API. These never enter the event queue.
#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    #[error("resource capacity must be positive, got {0}")]
    NonPositiveCapacity(i64),

    #[error("token belongs to a different resource pool")]
    WrongPool,

    #[error("no controller is bound to the current thread")]
    NoBoundController,

    #[error("post_at time {requested} is before current time {current}")]
    TimeTravel { current: Time, requested: Time },

    #[error("park() called outside of event dispatch")]
    ParkOutsideDispatch,
}

/// A boxed, type-erased user exception raised inside an event, prior to
/// being wrapped by the scheduler boundary.
pub type DomainError = Box<dyn StdError>;

/// The error type flowing through `Result<Value, Fault>` at event-dispatch
/// granularity (spec §7).
#[derive(Debug, thiserror::Error)]
pub enum Fault {
    /// ControlFlow-End: a user-initiated "stop now" signal. Propagates out
    /// of `event_loop` unwrapped; not an error for logging purposes.
    #[error("simulation end")]
    SimulationEnd,

    /// Domain-Fault: a recoverable user exception, not yet wrapped by the
    /// scheduler boundary. `Controller::dispatch` wraps this into
    /// `SimulationFault` exactly once.
    #[error("{0}")]
    Domain(#[source] DomainError),

    /// Domain-Fault, wrapped. Carries the component tag, current time,
    /// entity class name, and event signature, with the original error
    /// preserved as `source`.
    #[error("[scheduler] dispatch failed at time {time}, entity {entity}, event {signature}: {source}")]
    SimulationFault {
        component: &'static str,
        time: Time,
        entity: String,
        event_id: EventId,
        signature: String,
        #[source]
        source: DomainError,
    },

    /// Fatal-Runtime: propagates unwrapped, no recovery attempted.
    #[error("{0}")]
    Fatal(String),
}

impl Fault {
    /// Wraps a `Domain` fault into a `SimulationFault`, following the
    /// message format `[scheduler] <action> failed at time <t>, entity
    /// <class>, event <signature>: <original-message>`. A `Fault` that is
    /// already a `SimulationFault` (or any other variant) passes through
    /// unchanged — the scheduler boundary never re-wraps.
    #[must_use]
    pub fn wrap_domain(self, time: Time, entity: String, event_id: EventId, signature: String) -> Self {
        match self {
            Fault::Domain(source) => Fault::SimulationFault {
                component: "scheduler",
                time,
                entity,
                event_id,
                signature,
                source,
            },
            other => other,
        }
    }

    /// True for `SimulationEnd`: the only variant that is not a failure for
    /// logging/statistics purposes.
    #[must_use]
    pub fn is_control_flow(&self) -> bool {
        matches!(self, Fault::SimulationEnd)
    }
}
