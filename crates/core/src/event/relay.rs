//! Buffering observer side of a wrapper hand-off
//!
//! A native handle can start producing events before its wrapper exists.
//! The transient observer pushes them into a [`Relay`], which buffers until
//! [`Relay::attach`] moves the buffer onto the wrapper's queue and switches
//! to forwarding. Both happen under one lock so producers racing the
//! hand-off keep their order.

use parking_lot::Mutex;

use super::dispatch::Dispatcher;
use super::queue::{Event, EventQueue};

pub struct Relay<S> {
    buffered: EventQueue<S>,
    target: Mutex<Option<Dispatcher<S>>>,
}

impl<S> Relay<S> {
    pub fn new() -> Self {
        Self {
            buffered: EventQueue::new(),
            target: Mutex::new(None),
        }
    }

    /// Buffer or forward `event`
    pub fn enqueue(&self, event: Event<S>) -> bool {
        let target = self.target.lock();
        match target.as_ref() {
            Some(dispatcher) => dispatcher.dispatch(event),
            None => {
                self.buffered.enqueue(event);
                true
            }
        }
    }

    /// Requeue buffered events onto `dispatcher` and forward from now on
    ///
    /// Returns the number of events moved. Attaching again retargets the
    /// relay; nothing is left behind on the previous dispatcher.
    pub fn attach(&self, dispatcher: Dispatcher<S>) -> usize {
        let mut target = self.target.lock();
        let moved = dispatcher.requeue_from(&self.buffered);
        *target = Some(dispatcher);
        moved
    }

    pub fn is_attached(&self) -> bool {
        self.target.lock().is_some()
    }

    /// Events waiting for a wrapper
    pub fn buffered(&self) -> usize {
        self.buffered.len()
    }
}

impl<S> Default for Relay<S> {
    fn default() -> Self {
        Self::new()
    }
}
