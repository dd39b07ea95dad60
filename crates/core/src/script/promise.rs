use std::cell::RefCell;
use std::rc::Rc;

use super::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum PromiseState {
    Pending,
    Fulfilled(Value),
    Rejected(Value),
}

/// Script-visible promise
#[derive(Clone)]
pub struct Promise(Rc<RefCell<PromiseState>>);

impl Promise {
    pub fn state(&self) -> PromiseState {
        self.0.borrow().clone()
    }

    pub fn is_pending(&self) -> bool {
        matches!(*self.0.borrow(), PromiseState::Pending)
    }

    pub fn ptr_eq(&self, other: &Promise) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// Settling side of a [`Promise`]; the first settlement wins
#[derive(Clone)]
pub struct Deferred(Rc<RefCell<PromiseState>>);

impl Deferred {
    pub(crate) fn new() -> (Deferred, Promise) {
        let state = Rc::new(RefCell::new(PromiseState::Pending));
        (Deferred(state.clone()), Promise(state))
    }

    pub fn resolve(&self, value: Value) {
        self.settle(PromiseState::Fulfilled(value));
    }

    pub fn reject(&self, reason: Value) {
        self.settle(PromiseState::Rejected(reason));
    }

    fn settle(&self, outcome: PromiseState) {
        let mut state = self.0.borrow_mut();
        if matches!(*state, PromiseState::Pending) {
            *state = outcome;
        }
    }
}
