//! Multiple-producer, single-consumer event queue
//!
//! Producers are native engine threads; the consumer is the scripting
//! thread. The lock is held only for the push or pop itself.

use std::collections::VecDeque;

use parking_lot::Mutex;

use super::dispatch::Scope;

/// Deferred operation against a wrapper's state `S`
///
/// Built on any thread, run exactly once on the scripting thread with
/// exclusive access to the state.
pub type Event<S> = Box<dyn FnOnce(&mut S, &mut Scope<'_>) + Send + 'static>;

/// Box a closure as an [`Event`]
pub fn event<S, F>(f: F) -> Event<S>
where
    F: FnOnce(&mut S, &mut Scope<'_>) + Send + 'static,
{
    Box::new(f)
}

/// FIFO of [`Event`]s safe to push from any thread
pub struct EventQueue<S> {
    events: Mutex<VecDeque<Event<S>>>,
}

impl<S> EventQueue<S> {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
        }
    }

    /// Append an event; never blocks beyond the push
    pub fn enqueue(&self, event: Event<S>) {
        self.events.lock().push_back(event);
    }

    /// Pop the oldest event
    pub fn dequeue(&self) -> Option<Event<S>> {
        self.events.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Move every queued event, oldest first, onto the back of `target`
    ///
    /// Returns the number of events moved.
    pub fn requeue_into(&self, target: &EventQueue<S>) -> usize {
        let moved: VecDeque<Event<S>> = std::mem::take(&mut *self.events.lock());
        let count = moved.len();
        if count > 0 {
            target.events.lock().extend(moved);
        }
        count
    }

    /// Drop every queued event; returns how many were discarded
    pub fn clear(&self) -> usize {
        let mut events = self.events.lock();
        let count = events.len();
        events.clear();
        count
    }
}

impl<S> Default for EventQueue<S> {
    fn default() -> Self {
        Self::new()
    }
}
