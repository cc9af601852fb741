//! `Queue<T>`: a FIFO container with wait-time and length statistics
//! (spec §4.4.4).

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use prime_mover_core::{
    current_controller, query_current_controller, ContractError, EventRef, Fault, Time, Value,
};

struct Entry<T> {
    item: T,
    enqueued_at: Time,
}

struct Inner<T> {
    items: VecDeque<Entry<T>>,
    waiters: VecDeque<EventRef>,
    total_entries: u64,
    total_exits: u64,
    max_length: usize,
    total_wait_time: i64,
    max_wait_time: i64,
    length_integral: f64,
    last_change_time: Time,
}

impl<T> Inner<T> {
    fn accrue(&mut self, now: Time) {
        let elapsed = (now.ticks() - self.last_change_time.ticks()).max(0) as f64;
        self.length_integral += self.items.len() as f64 * elapsed;
        self.last_change_time = now;
    }
}

/// A time- and length-instrumented FIFO queue.
///
/// Cheap to clone: all clones share the same backing store and statistics.
pub struct Queue<T> {
    inner: Rc<RefCell<Inner<T>>>,
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Queue {
            inner: self.inner.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueueStatistics {
    pub total_entries: u64,
    pub total_exits: u64,
    pub current_length: usize,
    pub max_length: usize,
    pub avg_wait_time: f64,
    pub max_wait_time: i64,
}

impl<T> Queue<T> {
    #[must_use]
    pub fn new() -> Self {
        Queue {
            inner: Rc::new(RefCell::new(Inner {
                items: VecDeque::new(),
                waiters: VecDeque::new(),
                total_entries: 0,
                total_exits: 0,
                max_length: 0,
                total_wait_time: 0,
                max_wait_time: 0,
                length_integral: 0.0,
                last_change_time: Time::ZERO,
            })),
        }
    }

    /// Appends `item`, recording its enqueue time for wait-time statistics.
    /// If a dequeuer is already parked waiting on an empty queue, the item
    /// is handed to it directly instead of sitting in the buffer.
    pub fn enqueue(&self, item: T)
    where
        T: 'static,
    {
        let controller = current_controller();
        let now = controller.current_time();
        let waiting = self.inner.borrow_mut().waiters.pop_front();
        if let Some(event) = waiting {
            // Handed straight to a parked dequeuer: enters and exits at the
            // same instant, zero wait.
            let mut inner = self.inner.borrow_mut();
            inner.total_entries += 1;
            inner.total_exits += 1;
            drop(inner);
            controller.resume(&event, now, Ok(Value::boxed(item)));
            return;
        }
        let mut inner = self.inner.borrow_mut();
        inner.accrue(now);
        inner.items.push_back(Entry {
            item,
            enqueued_at: now,
        });
        inner.total_entries += 1;
        inner.max_length = inner.max_length.max(inner.items.len());
    }

    /// Removes and returns the head item, or `None` if empty. Never
    /// suspends — see [`Queue::dequeue_blocking`] for the suspending form.
    pub fn dequeue(&self) -> Option<T> {
        let controller = current_controller();
        let now = controller.current_time();
        let mut inner = self.inner.borrow_mut();
        let entry = inner.items.pop_front()?;
        inner.accrue(now);
        let wait = (now.ticks() - entry.enqueued_at.ticks()).max(0);
        inner.total_exits += 1;
        inner.total_wait_time += wait;
        inner.max_wait_time = inner.max_wait_time.max(wait);
        Some(entry.item)
    }

    /// Removes the first item equal to `item`. Updates the same statistics
    /// a `dequeue` would, except `total_exits` is left untouched (spec
    /// §4.4.4: only `dequeue` counts as an exit for that counter).
    pub fn remove(&self, item: &T) -> bool
    where
        T: PartialEq,
    {
        let controller = current_controller();
        let now = controller.current_time();
        let mut inner = self.inner.borrow_mut();
        let Some(pos) = inner.items.iter().position(|e| &e.item == item) else {
            return false;
        };
        inner.accrue(now);
        inner.items.remove(pos);
        true
    }

    #[must_use]
    pub fn peek(&self) -> Option<T>
    where
        T: Clone,
    {
        self.inner.borrow().items.front().map(|e| e.item.clone())
    }

    #[must_use]
    pub fn contains(&self, item: &T) -> bool
    where
        T: PartialEq,
    {
        self.inner.borrow().items.iter().any(|e| &e.item == item)
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.borrow().items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.borrow().items.is_empty()
    }

    pub fn clear(&self) {
        self.inner.borrow_mut().items.clear();
    }

    /// In-order (head-to-tail) snapshot of the current contents.
    #[must_use]
    pub fn to_vec(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.inner.borrow().items.iter().map(|e| e.item.clone()).collect()
    }

    #[must_use]
    pub fn statistics(&self) -> QueueStatistics {
        let controller = current_controller();
        let now = controller.current_time();
        let mut inner = self.inner.borrow_mut();
        inner.accrue(now);
        let avg_wait_time = if inner.total_exits == 0 {
            0.0
        } else {
            inner.total_wait_time as f64 / inner.total_exits as f64
        };
        QueueStatistics {
            total_entries: inner.total_entries,
            total_exits: inner.total_exits,
            current_length: inner.items.len(),
            max_length: inner.max_length,
            avg_wait_time,
            max_wait_time: inner.max_wait_time,
        }
    }

    /// Time-weighted average length over `[0, window_end]`.
    #[must_use]
    pub fn avg_length(&self, window_end: Time) -> f64 {
        let mut inner = self.inner.borrow_mut();
        inner.accrue(window_end);
        if window_end.ticks() == 0 {
            0.0
        } else {
            inner.length_integral / window_end.ticks() as f64
        }
    }

    pub fn reset_statistics(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.total_entries = 0;
        inner.total_exits = 0;
        inner.max_length = inner.items.len();
        inner.total_wait_time = 0;
        inner.max_wait_time = 0;
        inner.length_integral = 0.0;
    }
}

impl<T: Clone + 'static> Queue<T> {
    /// Suspends the calling event until an item is available, then removes
    /// and returns it.
    pub async fn dequeue_blocking(&self) -> Result<T, Fault> {
        let controller = query_current_controller()
            .ok_or_else(|| Fault::Domain(Box::new(ContractError::NoBoundController)))?;
        if let Some(item) = self.dequeue() {
            return Ok(item);
        }
        let event = controller
            .currently_dispatching()
            .ok_or_else(|| Fault::Domain(Box::new(ContractError::ParkOutsideDispatch)))?;
        self.inner.borrow_mut().waiters.push_back(event);
        let outcome = controller.park().await?;
        match outcome.downcast_ref::<T>() {
            Some(item) => Ok(item.clone()),
            None => Err(Fault::Fatal("dequeue resumed with a value of the wrong type".to_string())),
        }
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}
