//! End-to-end scenarios exercising the scheduler and blocking primitives
//! together, one test per scenario.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use proptest::prelude::*;
use test_case::test_case;

use prime_mover::{
    current_controller, entity_handle, Condition, Controller, ControllerConfig, DispatchFuture, Entity,
    EntityHandle, EventId, Fault, Resource, Signal, Time, Value,
};

fn fresh_controller() -> Controller {
    Controller::with_defaults()
}

#[test]
fn single_blocking_event_on_a_signal() {
    struct Waiter {
        signal: Signal,
        trace: Rc<RefCell<Vec<String>>>,
    }
    impl Entity for Waiter {
        fn invoke(&mut self, _event_id: EventId, _arguments: Vec<Value>) -> DispatchFuture {
            let signal = self.signal.clone();
            let trace = self.trace.clone();
            Box::pin(async move {
                let now = current_controller().current_time();
                trace.borrow_mut().push(format!("W-before@{now}"));
                signal.wait().await?;
                let now = current_controller().current_time();
                trace.borrow_mut().push(format!("W-after@{now}"));
                Ok(Value::Null)
            })
        }
        fn signature_of(&self, _event_id: EventId) -> String {
            "wait()".into()
        }
    }

    struct Signaller {
        signal: Signal,
        trace: Rc<RefCell<Vec<String>>>,
    }
    impl Entity for Signaller {
        fn invoke(&mut self, _event_id: EventId, _arguments: Vec<Value>) -> DispatchFuture {
            let signal = self.signal.clone();
            let trace = self.trace.clone();
            Box::pin(async move {
                let now = current_controller().current_time();
                trace.borrow_mut().push(format!("G-signal@{now}"));
                signal.signal();
                Ok(Value::Null)
            })
        }
        fn signature_of(&self, _event_id: EventId) -> String {
            "signal()".into()
        }
    }

    let controller = fresh_controller();
    controller.bind();
    let signal = Signal::new();
    let trace = Rc::new(RefCell::new(Vec::new()));

    controller.post(
        entity_handle(Waiter {
            signal: signal.clone(),
            trace: trace.clone(),
        }),
        0,
        vec![],
    );
    controller
        .post_at(
            Time::new(100),
            entity_handle(Signaller {
                signal: signal.clone(),
                trace: trace.clone(),
            }),
            0,
            vec![],
        )
        .unwrap();
    controller.event_loop().unwrap();

    assert_eq!(
        *trace.borrow(),
        vec!["W-before@0", "G-signal@100", "W-after@100"]
    );
    assert!(!signal.has_waiters());
}

#[test]
fn typed_condition_fifo_with_three_waiters_and_signalers() {
    struct Waiter {
        condition: Condition<i64>,
        result: Rc<RefCell<Option<(i64, i64)>>>, // (value, resume_time)
    }
    impl Entity for Waiter {
        fn invoke(&mut self, _event_id: EventId, _arguments: Vec<Value>) -> DispatchFuture {
            let condition = self.condition.clone();
            let result = self.result.clone();
            Box::pin(async move {
                let value = condition.wait().await?;
                let now = current_controller().current_time().ticks();
                *result.borrow_mut() = Some((value, now));
                Ok(Value::Null)
            })
        }
        fn signature_of(&self, _event_id: EventId) -> String {
            "wait()".into()
        }
    }

    struct Signaller {
        condition: Condition<i64>,
        value: i64,
    }
    impl Entity for Signaller {
        fn invoke(&mut self, _event_id: EventId, _arguments: Vec<Value>) -> DispatchFuture {
            let condition = self.condition.clone();
            let value = self.value;
            Box::pin(async move {
                condition.signal(value);
                Ok(Value::Null)
            })
        }
        fn signature_of(&self, _event_id: EventId) -> String {
            "signal()".into()
        }
    }

    let controller = fresh_controller();
    controller.bind();
    let condition = Condition::new();
    let results: Vec<_> = (0..3).map(|_| Rc::new(RefCell::new(None))).collect();

    for (i, result) in results.iter().enumerate() {
        controller
            .post_at(
                Time::new(i as i64 * 10),
                entity_handle(Waiter {
                    condition: condition.clone(),
                    result: result.clone(),
                }),
                0,
                vec![],
            )
            .unwrap();
    }
    for (time, value) in [(100, 42), (200, 99), (300, 777)] {
        controller
            .post_at(
                Time::new(time),
                entity_handle(Signaller {
                    condition: condition.clone(),
                    value,
                }),
                0,
                vec![],
            )
            .unwrap();
    }
    controller.event_loop().unwrap();

    assert_eq!(*results[0].borrow(), Some((42, 100)));
    assert_eq!(*results[1].borrow(), Some((99, 200)));
    assert_eq!(*results[2].borrow(), Some((777, 300)));
}

struct HoldingCustomer {
    resource: Resource,
    hold: i64,
}
impl Entity for HoldingCustomer {
    fn invoke(&mut self, _event_id: EventId, _arguments: Vec<Value>) -> DispatchFuture {
        let resource = self.resource.clone();
        let hold = self.hold;
        Box::pin(async move {
            let controller = current_controller();
            let token = resource.acquire(1).await?;
            controller.blocking_sleep(hold).await?;
            resource
                .release(token)
                .map_err(|_| Fault::Fatal("release failed".to_string()))?;
            Ok(Value::Null)
        })
    }
    fn signature_of(&self, _event_id: EventId) -> String {
        "hold()".into()
    }
}

#[test]
fn resource_burst_arrivals() {
    let controller = fresh_controller();
    controller.bind();
    let resource = Resource::new(1).unwrap();

    for _ in 0..5 {
        controller.post(
            entity_handle(HoldingCustomer {
                resource: resource.clone(),
                hold: 10,
            }),
            0,
            vec![],
        );
    }
    controller.event_loop().unwrap();
    controller.bind();

    let stats = resource.statistics();
    assert_eq!(stats.total_acquisitions, 5);
    assert!((stats.avg_wait_time - 20.0).abs() < f64::EPSILON);
    assert_eq!(stats.max_wait_time, 40);
    assert_eq!(resource.available(), 1);
}

#[test]
fn resource_fifo_waiters_resume_together_after_a_scheduled_release() {
    struct Holder {
        resource: Resource,
        release_at: Signal,
    }
    impl Entity for Holder {
        fn invoke(&mut self, _event_id: EventId, _arguments: Vec<Value>) -> DispatchFuture {
            let resource = self.resource.clone();
            let release_at = self.release_at.clone();
            Box::pin(async move {
                let token = resource.acquire(1).await?;
                release_at.wait().await?;
                resource
                    .release(token)
                    .map_err(|_| Fault::Fatal("release failed".to_string()))?;
                Ok(Value::Null)
            })
        }
        fn signature_of(&self, _event_id: EventId) -> String {
            "hold()".into()
        }
    }

    struct ReleaseTrigger {
        release_at: Signal,
    }
    impl Entity for ReleaseTrigger {
        fn invoke(&mut self, _event_id: EventId, _arguments: Vec<Value>) -> DispatchFuture {
            let release_at = self.release_at.clone();
            Box::pin(async move {
                release_at.signal();
                Ok(Value::Null)
            })
        }
        fn signature_of(&self, _event_id: EventId) -> String {
            "trigger()".into()
        }
    }

    struct Consumer {
        resource: Resource,
        log: Rc<RefCell<Vec<(i64, i64)>>>,
    }
    impl Entity for Consumer {
        fn invoke(&mut self, _event_id: EventId, _arguments: Vec<Value>) -> DispatchFuture {
            let resource = self.resource.clone();
            let log = self.log.clone();
            Box::pin(async move {
                let arrival = current_controller().current_time().ticks();
                let token = resource.acquire(1).await?;
                let resume = current_controller().current_time().ticks();
                log.borrow_mut().push((arrival, resume));
                resource
                    .release(token)
                    .map_err(|_| Fault::Fatal("release failed".to_string()))?;
                Ok(Value::Null)
            })
        }
        fn signature_of(&self, _event_id: EventId) -> String {
            "consume()".into()
        }
    }

    let controller = fresh_controller();
    controller.bind();
    let resource = Resource::new(1).unwrap();
    let release_at = Signal::new();
    let log = Rc::new(RefCell::new(Vec::new()));

    controller.post(
        entity_handle(Holder {
            resource: resource.clone(),
            release_at: release_at.clone(),
        }),
        0,
        vec![],
    );
    for time in [10, 20, 30] {
        controller
            .post_at(
                Time::new(time),
                entity_handle(Consumer {
                    resource: resource.clone(),
                    log: log.clone(),
                }),
                0,
                vec![],
            )
            .unwrap();
    }
    controller
        .post_at(Time::new(100), entity_handle(ReleaseTrigger { release_at }), 0, vec![])
        .unwrap();

    controller.event_loop().unwrap();

    assert_eq!(*log.borrow(), vec![(10, 100), (20, 100), (30, 100)]);
    assert_eq!(resource.available(), 1);
}

#[test]
fn mm1_stable_arrivals_see_zero_wait() {
    let controller = fresh_controller();
    controller.bind();
    let resource = Resource::new(1).unwrap();

    for i in 0..5 {
        controller
            .post_at(
                Time::new(i * 20),
                entity_handle(HoldingCustomer {
                    resource: resource.clone(),
                    hold: 10,
                }),
                0,
                vec![],
            )
            .unwrap();
    }
    controller.event_loop().unwrap();
    controller.bind();

    let stats = resource.statistics();
    assert_eq!(stats.total_acquisitions, 5);
    assert_eq!(stats.avg_wait_time, 0.0);
    assert_eq!(stats.max_wait_time, 0);
}

#[test]
fn event_time_ordering_survives_extremes_without_overflow() {
    let config = ControllerConfig {
        start_time: Time::MIN,
        ..ControllerConfig::default()
    };
    let controller = Controller::new(config);
    controller.bind();

    struct Recorder {
        trace: Rc<RefCell<Vec<Time>>>,
    }
    impl Entity for Recorder {
        fn invoke(&mut self, _event_id: EventId, _arguments: Vec<Value>) -> DispatchFuture {
            let trace = self.trace.clone();
            Box::pin(async move {
                let now = current_controller().current_time();
                trace.borrow_mut().push(now);
                Ok(Value::Null)
            })
        }
        fn signature_of(&self, _event_id: EventId) -> String {
            "record()".into()
        }
    }

    let trace = Rc::new(RefCell::new(Vec::new()));
    controller
        .post_at(Time::MAX, entity_handle(Recorder { trace: trace.clone() }), 0, vec![])
        .unwrap();
    controller
        .post_at(Time::MIN, entity_handle(Recorder { trace: trace.clone() }), 0, vec![])
        .unwrap();
    controller
        .post_at(Time::ZERO, entity_handle(Recorder { trace: trace.clone() }), 0, vec![])
        .unwrap();

    controller.event_loop().unwrap();

    assert_eq!(*trace.borrow(), vec![Time::MIN, Time::ZERO, Time::MAX]);
}

/// A `post_continuing` chain of depth 1000: each link suspends on the next
/// one, the way a recursive procedure call would. Regression test for the
/// GC bug where a strong `Event::caller` link kept every completed ancestor
/// in a chain like this alive for the rest of the run.
struct Chain {
    remaining: u32,
    tracker: Rc<RefCell<Vec<Weak<RefCell<dyn Entity>>>>>,
}
impl Entity for Chain {
    fn invoke(&mut self, _event_id: EventId, _arguments: Vec<Value>) -> DispatchFuture {
        let remaining = self.remaining;
        let tracker = self.tracker.clone();
        Box::pin(async move {
            if remaining == 0 {
                return Ok(Value::Null);
            }
            let next = entity_handle(Chain {
                remaining: remaining - 1,
                tracker: tracker.clone(),
            });
            tracker.borrow_mut().push(Rc::downgrade(&next));
            current_controller().post_continuing(next, 0, vec![]).await?;
            Ok(Value::Null)
        })
    }
    fn signature_of(&self, _event_id: EventId) -> String {
        "chain()".into()
    }
}

#[test]
fn post_continuing_chain_is_fully_reclaimed_after_completion() {
    let controller = fresh_controller();
    controller.bind();

    let tracker: Rc<RefCell<Vec<Weak<RefCell<dyn Entity>>>>> = Rc::new(RefCell::new(Vec::new()));
    let root: EntityHandle = entity_handle(Chain {
        remaining: 1_000,
        tracker: tracker.clone(),
    });
    let root_weak = Rc::downgrade(&root);
    controller.post(root, 0, vec![]);
    controller.event_loop().unwrap();

    assert!(
        root_weak.upgrade().is_none(),
        "root entity should be reclaimed once the chain completes"
    );
    let tracked = tracker.borrow();
    assert_eq!(tracked.len(), 1_000);
    for (depth, link) in tracked.iter().enumerate() {
        assert!(
            link.upgrade().is_none(),
            "chain link at depth {depth} should be reclaimed once the chain completes"
        );
    }
}

/// Exercises the scheduler under `tracing` instrumentation (every dispatch
/// emits a `debug` span per `Controller::dispatch`), confirming a subscriber
/// can be installed around a simulation without interfering with it.
#[test]
fn event_loop_runs_cleanly_under_an_installed_subscriber() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("trace")
        .try_init();

    let controller = fresh_controller();
    controller.bind();
    let resource = Resource::new(1).unwrap();
    for _ in 0..3 {
        controller.post(
            entity_handle(HoldingCustomer {
                resource: resource.clone(),
                hold: 5,
            }),
            0,
            vec![],
        );
    }
    controller.event_loop().unwrap();
    controller.bind();
    assert_eq!(resource.available(), 1);
}

#[test_case(1, 10; "single unit, long holds")]
#[test_case(2, 10; "two units shared")]
#[test_case(5, 1; "plenty of capacity")]
fn resource_conserves_capacity_across_burst_arrivals_table(capacity: i64, hold: i64) {
    let controller = fresh_controller();
    controller.bind();
    let resource = Resource::new(capacity).unwrap();

    for _ in 0..6 {
        controller.post(
            entity_handle(HoldingCustomer {
                resource: resource.clone(),
                hold,
            }),
            0,
            vec![],
        );
    }
    controller.event_loop().unwrap();
    controller.bind();

    let stats = resource.statistics();
    assert_eq!(stats.total_acquisitions, 6);
    assert_eq!(resource.available(), capacity);
}

proptest! {
    /// Posting an arbitrary number of immediate, non-blocking events must
    /// dispatch every one of them exactly once, regardless of count.
    #[test]
    fn every_posted_event_is_dispatched_exactly_once(count in 0usize..200) {
        struct Counter {
            hits: Rc<RefCell<u32>>,
        }
        impl Entity for Counter {
            fn invoke(&mut self, _event_id: EventId, _arguments: Vec<Value>) -> DispatchFuture {
                let hits = self.hits.clone();
                Box::pin(async move {
                    *hits.borrow_mut() += 1;
                    Ok(Value::Null)
                })
            }
            fn signature_of(&self, _event_id: EventId) -> String {
                "tick()".into()
            }
        }

        let controller = Controller::with_defaults();
        controller.bind();
        let hits = Rc::new(RefCell::new(0));
        for _ in 0..count {
            controller.post(entity_handle(Counter { hits: hits.clone() }), 0, vec![]);
        }
        controller.event_loop().unwrap();
        prop_assert_eq!(*hits.borrow(), count as u32);
    }
}
