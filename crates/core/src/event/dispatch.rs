//! Per-object dispatch loop
//!
//! An [`AsyncObject`] owns a wrapper's state and event queue. Native threads
//! hold a [`Dispatcher`] and push events; the [`ScriptThread`] drains them
//! one at a time with exclusive access to the state. Script callbacks and
//! promise settlements requested through [`Scope`] run after the state
//! borrow is released, in request order.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use crossbeam::channel::Sender;
use tracing::{debug, trace, warn};

use super::queue::{Event, EventQueue};
use crate::script::{Deferred, Env, LoopId, Object, Promise, ScriptError, ScriptThread, Value};
use crate::validation::Errors;

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const STOPPED: u8 = 2;

// ============================================================================
// Cross-thread link
// ============================================================================

/// Shared between the scripting thread and every [`Dispatcher`] clone
pub(crate) struct LoopLink {
    id: LoopId,
    name: &'static str,
    wake: Sender<LoopId>,
    scheduled: AtomicBool,
    state: AtomicU8,
}

impl LoopLink {
    pub(crate) fn new(id: LoopId, name: &'static str, wake: Sender<LoopId>) -> Self {
        Self {
            id,
            name,
            wake,
            scheduled: AtomicBool::new(false),
            state: AtomicU8::new(IDLE),
        }
    }

    /// Ask the scripting thread for a drain; coalesces with an outstanding request
    pub(crate) fn request_drain(&self) {
        if !self.scheduled.swap(true, Ordering::AcqRel) && self.wake.send(self.id).is_err() {
            trace!(target: "rtcbridge::dispatch", loop_name = self.name, "scripting thread gone");
        }
    }

    /// Forget any outstanding request; the caller drains or re-requests next
    pub(crate) fn clear_scheduled(&self) {
        self.scheduled.store(false, Ordering::Release);
    }

    fn is_stopped(&self) -> bool {
        self.state.load(Ordering::Acquire) == STOPPED
    }
}

/// `Send + Sync` handle native threads use to reach one wrapper
pub struct Dispatcher<S> {
    queue: Arc<EventQueue<S>>,
    link: Arc<LoopLink>,
}

impl<S> Clone for Dispatcher<S> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            link: self.link.clone(),
        }
    }
}

impl<S> Dispatcher<S> {
    /// Queue `event` and request a drain
    ///
    /// Returns false, dropping the event, once the loop has stopped.
    /// Events dispatched before the loop starts wait for it.
    pub fn dispatch(&self, event: Event<S>) -> bool {
        if self.link.is_stopped() {
            debug!(
                target: "rtcbridge::dispatch",
                loop_name = self.link.name,
                "dropping event dispatched to stopped loop"
            );
            return false;
        }
        self.queue.enqueue(event);
        self.link.request_drain();
        true
    }

    /// Move every event from `pending` onto this queue, then request a drain
    pub fn requeue_from(&self, pending: &EventQueue<S>) -> usize {
        let moved = pending.requeue_into(&self.queue);
        if moved > 0 {
            trace!(target: "rtcbridge::dispatch", loop_name = self.link.name, moved, "requeued events");
            self.link.request_drain();
        }
        moved
    }

    pub fn is_stopped(&self) -> bool {
        self.link.is_stopped()
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

// ============================================================================
// Promise tokens
// ============================================================================

/// `Send` reference to a promise owned by an [`AsyncObject`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PromiseToken(u64);

// ============================================================================
// AsyncObject
// ============================================================================

/// State cell, event queue and promise table of one wrapper
pub struct AsyncObject<S> {
    state: RefCell<S>,
    dispatcher: Dispatcher<S>,
    promises: RefCell<HashMap<PromiseToken, Deferred>>,
    next_token: Cell<u64>,
}

impl<S: 'static> AsyncObject<S> {
    pub fn new(thread: &ScriptThread, name: &'static str, state: S) -> Self {
        Self {
            state: RefCell::new(state),
            dispatcher: Dispatcher {
                queue: Arc::new(EventQueue::new()),
                link: thread.new_link(name),
            },
            promises: RefCell::new(HashMap::new()),
            next_token: Cell::new(0),
        }
    }

    pub fn id(&self) -> LoopId {
        self.dispatcher.link.id
    }

    pub fn name(&self) -> &'static str {
        self.dispatcher.link.name
    }

    /// Shared borrow of the state, for getters on the scripting thread
    pub fn state(&self) -> Ref<'_, S> {
        self.state.borrow()
    }

    /// Exclusive borrow of the state, for methods on the scripting thread
    pub fn state_mut(&self) -> RefMut<'_, S> {
        self.state.borrow_mut()
    }

    /// State access through a unique reference, for teardown in `Drop`
    pub fn get_mut(&mut self) -> &mut S {
        self.state.get_mut()
    }

    pub fn dispatcher(&self) -> Dispatcher<S> {
        self.dispatcher.clone()
    }

    pub fn dispatch(&self, event: Event<S>) -> bool {
        self.dispatcher.dispatch(event)
    }

    pub fn is_running(&self) -> bool {
        self.dispatcher.link.state.load(Ordering::Acquire) == RUNNING
    }

    pub fn is_stopped(&self) -> bool {
        self.dispatcher.is_stopped()
    }

    /// New pending promise settled later through [`Scope::resolve`] or [`Scope::reject`]
    pub fn create_promise(&self, env: &Env) -> (PromiseToken, Promise) {
        let token = PromiseToken(self.next_token.get());
        self.next_token.set(token.0 + 1);
        let (deferred, promise) = env.create_promise();
        self.promises.borrow_mut().insert(token, deferred);
        (token, promise)
    }

    /// Settle `token` immediately; used when a method fails before reaching the engine
    pub fn reject_now(&self, env: &Env, token: PromiseToken, error: ScriptError) {
        if let Some(deferred) = self.promises.borrow_mut().remove(&token) {
            deferred.reject(error.to_value(env));
        }
    }

    pub fn pending_promises(&self) -> usize {
        self.promises.borrow().len()
    }

    /// Stop the loop: leave the running table, drop queued events, ignore later dispatches
    pub fn stop(&self, thread: &ScriptThread) {
        let previous = self.dispatcher.link.state.swap(STOPPED, Ordering::AcqRel);
        if previous == STOPPED {
            return;
        }
        let discarded = self.dispatcher.queue.clear();
        thread.unregister_loop(self.id());
        debug!(
            target: "rtcbridge::dispatch",
            loop_name = self.name(),
            discarded,
            "dispatch loop stopped"
        );
    }

    pub(crate) fn mark_running(&self) -> bool {
        self.dispatcher
            .link
            .state
            .compare_exchange(IDLE, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn link(&self) -> &Arc<LoopLink> {
        &self.dispatcher.link
    }
}

/// Native wrapper driven by a dispatch loop
pub trait AsyncWrap: 'static {
    type State: 'static;

    fn async_object(&self) -> &AsyncObject<Self::State>;
}

// ============================================================================
// Drain
// ============================================================================

pub(crate) trait Drain {
    fn drain(&self, thread: &ScriptThread) -> usize;

    /// Mark stopped without touching the running table
    fn halt(&self);
}

/// A running loop: keeps both the wrapper and its script object alive
pub(crate) struct LoopTask<W: AsyncWrap> {
    pub(crate) wrapper: Rc<W>,
    pub(crate) object: Object,
}

impl<W: AsyncWrap> Drain for LoopTask<W> {
    fn drain(&self, thread: &ScriptThread) -> usize {
        let async_object = self.wrapper.async_object();
        let link = async_object.link();
        link.clear_scheduled();

        let budget = thread.drain_budget();
        let mut executed = 0;
        while let Some(event) = async_object.dispatcher.queue.dequeue() {
            let mut scope = Scope::new(thread, &self.object);
            {
                let mut state = async_object.state.borrow_mut();
                event(&mut state, &mut scope);
            }
            executed += 1;

            if scope.finish(&async_object.promises) {
                async_object.stop(thread);
                break;
            }
            if budget != 0 && executed >= budget {
                if !async_object.dispatcher.queue.is_empty() {
                    link.request_drain();
                }
                break;
            }
        }
        trace!(target: "rtcbridge::dispatch", loop_name = link.name, executed, "drained");
        executed
    }

    fn halt(&self) {
        let async_object = self.wrapper.async_object();
        async_object.link().state.store(STOPPED, Ordering::Release);
        async_object.dispatcher.queue.clear();
    }
}

// ============================================================================
// Scope
// ============================================================================

enum Action {
    Callback { name: String, args: Vec<Value> },
    Resolve(PromiseToken, Value),
    Reject(PromiseToken, Value),
    Report(Errors),
}

/// What an event may do besides mutating its state
pub struct Scope<'a> {
    thread: &'a ScriptThread,
    object: &'a Object,
    actions: Vec<Action>,
    stop: bool,
}

impl<'a> Scope<'a> {
    pub(crate) fn new(thread: &'a ScriptThread, object: &'a Object) -> Self {
        Self {
            thread,
            object,
            actions: Vec::new(),
            stop: false,
        }
    }

    pub fn env(&self) -> &Env {
        self.thread.env()
    }

    pub fn thread(&self) -> &ScriptThread {
        self.thread
    }

    /// The script object this loop belongs to
    pub fn object(&self) -> &Object {
        self.object
    }

    /// Call `object[name](...args)` once the event returns; skipped if not a function
    pub fn make_callback(&mut self, name: &str, args: Vec<Value>) {
        self.actions.push(Action::Callback {
            name: name.to_string(),
            args,
        });
    }

    pub fn resolve(&mut self, token: PromiseToken, value: Value) {
        self.actions.push(Action::Resolve(token, value));
    }

    pub fn reject(&mut self, token: PromiseToken, reason: Value) {
        self.actions.push(Action::Reject(token, reason));
    }

    pub fn reject_with(&mut self, token: PromiseToken, error: ScriptError) {
        let reason = error.to_value(self.env());
        self.reject(token, reason);
    }

    /// Surface conversion errors that have no caller to return to
    pub fn report(&mut self, errors: Errors) {
        self.actions.push(Action::Report(errors));
    }

    /// Stop the loop after this event
    pub fn stop(&mut self) {
        self.stop = true;
    }

    pub fn is_stopping(&self) -> bool {
        self.stop
    }

    /// Run the queued actions; returns whether the loop should stop
    pub(crate) fn finish(self, promises: &RefCell<HashMap<PromiseToken, Deferred>>) -> bool {
        let env = self.thread.env();
        for action in self.actions {
            match action {
                Action::Callback { name, args } => {
                    let callback = self.object.get(env, &name);
                    if let Value::Function(function) = callback {
                        function.call(env, &Value::Object(self.object.clone()), &args);
                    } else {
                        trace!(target: "rtcbridge::dispatch", callback = %name, "no handler installed");
                    }
                    if let Some(exception) = env.take_exception() {
                        self.thread.record_uncaught(&name, exception);
                    }
                }
                Action::Resolve(token, value) => match promises.borrow_mut().remove(&token) {
                    Some(deferred) => deferred.resolve(value),
                    None => warn!(target: "rtcbridge::dispatch", ?token, "resolve for unknown promise"),
                },
                Action::Reject(token, reason) => match promises.borrow_mut().remove(&token) {
                    Some(deferred) => deferred.reject(reason),
                    None => warn!(target: "rtcbridge::dispatch", ?token, "reject for unknown promise"),
                },
                Action::Report(errors) => {
                    let exception = ScriptError::type_error(errors.to_string()).to_value(env);
                    self.thread.record_uncaught("conversion", exception);
                }
            }
        }
        self.stop
    }
}
