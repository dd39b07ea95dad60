//! The designated scripting thread
//!
//! [`ScriptThread`] owns the [`Env`], the table of running dispatch loops and
//! the receiving end of the wake-up channel native threads signal through.
//! It is `!Send`, so every value and wrapper created through it stays on
//! the thread that created it.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, warn};

use super::env::{Env, Limits};
use super::error::exception_message;
use super::object::Object;
use super::value::Value;
use crate::config::BridgeConfig;
use crate::event::dispatch::{AsyncWrap, Drain, LoopLink, LoopTask};

/// Identifies one dispatch loop on a [`ScriptThread`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoopId(u64);

struct ThreadInner {
    env: Env,
    wake_tx: Sender<LoopId>,
    wake_rx: Receiver<LoopId>,
    loops: RefCell<HashMap<LoopId, Rc<dyn Drain>>>,
    next_loop: Cell<u64>,
    uncaught: RefCell<Vec<Value>>,
    drain_budget: usize,
}

/// Handle to the scripting thread's runtime; clones share it
#[derive(Clone)]
pub struct ScriptThread(Rc<ThreadInner>);

impl ScriptThread {
    pub fn new(config: &BridgeConfig) -> Self {
        let (wake_tx, wake_rx) = channel::unbounded();
        Self(Rc::new(ThreadInner {
            env: Env::new(Limits::from(&config.limits)),
            wake_tx,
            wake_rx,
            loops: RefCell::new(HashMap::new()),
            next_loop: Cell::new(0),
            uncaught: RefCell::new(Vec::new()),
            drain_budget: config.dispatch.drain_budget,
        }))
    }

    pub fn env(&self) -> &Env {
        &self.0.env
    }

    /// Events one loop may run per drain turn; 0 is unbounded
    pub fn drain_budget(&self) -> usize {
        self.0.drain_budget
    }

    pub(crate) fn new_link(&self, name: &'static str) -> Arc<LoopLink> {
        let id = LoopId(self.0.next_loop.get());
        self.0.next_loop.set(id.0 + 1);
        Arc::new(LoopLink::new(id, name, self.0.wake_tx.clone()))
    }

    /// Start `wrapper`'s dispatch loop
    ///
    /// While running, the loop keeps `wrapper` and `object` alive. Events
    /// dispatched before the start are drained on the next turn.
    pub fn start<W: AsyncWrap>(&self, wrapper: Rc<W>, object: Object) {
        let async_object = wrapper.async_object();
        if !async_object.mark_running() {
            warn!(
                target: "rtcbridge::dispatch",
                loop_name = async_object.name(),
                "dispatch loop already started or stopped"
            );
            return;
        }
        let id = async_object.id();
        let name = async_object.name();
        let link = async_object.link().clone();
        self.0
            .loops
            .borrow_mut()
            .insert(id, Rc::new(LoopTask { wrapper, object }));
        // Requests made before the start went to an unregistered id.
        link.clear_scheduled();
        link.request_drain();
        debug!(target: "rtcbridge::dispatch", loop_name = name, ?id, "dispatch loop started");
    }

    pub(crate) fn unregister_loop(&self, id: LoopId) -> bool {
        let task = self.0.loops.borrow_mut().remove(&id);
        // Dropped outside the borrow: the wrapper's teardown may touch the table.
        let present = task.is_some();
        drop(task);
        present
    }

    pub fn is_running(&self, id: LoopId) -> bool {
        self.0.loops.borrow().contains_key(&id)
    }

    pub fn active_loops(&self) -> usize {
        self.0.loops.borrow().len()
    }

    fn drain_loop(&self, id: LoopId) -> usize {
        let task = self.0.loops.borrow().get(&id).cloned();
        match task {
            Some(task) => task.drain(self),
            None => 0,
        }
    }

    /// Drain every loop with a pending request, until none remain
    ///
    /// Returns the number of events executed.
    pub fn run_until_idle(&self) -> usize {
        let mut executed = 0;
        while let Ok(id) = self.0.wake_rx.try_recv() {
            executed += self.drain_loop(id);
        }
        executed
    }

    /// Wait up to `timeout` for one drain request, then run until idle
    pub fn turn(&self, timeout: Duration) -> usize {
        match self.0.wake_rx.recv_timeout(timeout) {
            Ok(id) => self.drain_loop(id) + self.run_until_idle(),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => 0,
        }
    }

    /// Run turns until `done` holds or `timeout` elapses; returns `done()`
    pub fn run_until(&self, mut done: impl FnMut() -> bool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        self.run_until_idle();
        while !done() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.turn(deadline - now);
        }
        true
    }

    pub(crate) fn record_uncaught(&self, source: &str, exception: Value) {
        warn!(
            target: "rtcbridge::dispatch",
            source,
            message = %exception_message(&self.0.env, &exception),
            "uncaught exception in callback"
        );
        self.0.uncaught.borrow_mut().push(exception);
    }

    /// Exceptions thrown by callbacks since the last call
    pub fn take_uncaught(&self) -> Vec<Value> {
        std::mem::take(&mut *self.0.uncaught.borrow_mut())
    }

    /// Drop every running loop without running its queued events
    pub fn shutdown(&self) -> usize {
        let loops: Vec<_> = self.0.loops.borrow_mut().drain().collect();
        let count = loops.len();
        for (_, task) in &loops {
            task.halt();
        }
        drop(loops);
        if count > 0 {
            debug!(target: "rtcbridge::dispatch", count, "scripting thread shut down");
        }
        count
    }
}

impl Default for ScriptThread {
    fn default() -> Self {
        Self::new(&BridgeConfig::default())
    }
}
