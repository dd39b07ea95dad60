use std::cell::RefCell;
use std::rc::Rc;

use super::error::{ErrorKind, ScriptError};
use super::object::{Array, Object};
use super::promise::{Deferred, Promise};
use super::value::Value;
use crate::config::LimitsConfig;

/// Engine limits that make value creation fail with a pending `RangeError`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_array_length: usize,
    pub max_string_length: usize,
}

impl Default for Limits {
    fn default() -> Self {
        let config = LimitsConfig::default();
        Self {
            max_array_length: config.max_array_length,
            max_string_length: config.max_string_length,
        }
    }
}

impl From<&LimitsConfig> for Limits {
    fn from(config: &LimitsConfig) -> Self {
        Self {
            max_array_length: config.max_array_length,
            max_string_length: config.max_string_length,
        }
    }
}

struct EnvInner {
    pending: RefCell<Option<Value>>,
    limits: Limits,
}

/// Runtime context passed to every conversion and native function
///
/// Holds the single pending-exception slot. A throw while an exception is
/// already pending keeps the first one.
#[derive(Clone)]
pub struct Env(Rc<EnvInner>);

impl Env {
    pub fn new(limits: Limits) -> Self {
        Self(Rc::new(EnvInner {
            pending: RefCell::new(None),
            limits,
        }))
    }

    pub fn limits(&self) -> Limits {
        self.0.limits
    }

    pub fn throw(&self, exception: Value) {
        let mut pending = self.0.pending.borrow_mut();
        if pending.is_none() {
            *pending = Some(exception);
        }
    }

    pub fn throw_error(&self, error: ScriptError) {
        let value = error.to_value(self);
        self.throw(value);
    }

    pub fn throw_type_error(&self, message: impl Into<String>) {
        self.throw_error(ScriptError::type_error(message));
    }

    pub fn is_exception_pending(&self) -> bool {
        self.0.pending.borrow().is_some()
    }

    /// Take and clear the pending exception
    pub fn take_exception(&self) -> Option<Value> {
        self.0.pending.borrow_mut().take()
    }

    /// Array of `len` holes; empty with a pending `RangeError` above the limit
    pub fn create_array(&self, len: usize) -> Array {
        if len > self.0.limits.max_array_length {
            self.throw_error(ScriptError::new(ErrorKind::RangeError, "Invalid array length"));
            return Array::from_values(Vec::new());
        }
        Array::with_len(len)
    }

    /// String value; `undefined` with a pending `RangeError` above the limit
    pub fn create_string(&self, s: &str) -> Value {
        if s.len() > self.0.limits.max_string_length {
            self.throw_error(ScriptError::new(ErrorKind::RangeError, "Invalid string length"));
            return Value::Undefined;
        }
        Value::String(s.to_string())
    }

    pub fn create_object(&self) -> Object {
        Object::new()
    }

    pub fn create_promise(&self) -> (Deferred, Promise) {
        Deferred::new()
    }
}

impl Default for Env {
    fn default() -> Self {
        Self::new(Limits::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_throw_wins() {
        let env = Env::default();
        env.throw(Value::from("first"));
        env.throw(Value::from("second"));
        assert_eq!(env.take_exception(), Some(Value::from("first")));
        assert!(!env.is_exception_pending());
    }

    #[test]
    fn test_create_array_over_limit_sets_range_error() {
        let env = Env::new(Limits {
            max_array_length: 4,
            max_string_length: 16,
        });
        let array = env.create_array(5);
        assert!(array.is_empty());
        let exception = env.take_exception().unwrap();
        assert_eq!(
            super::super::exception_message(&env, &exception),
            "Invalid array length"
        );
        assert_eq!(env.create_array(4).len(), 4);
    }

    #[test]
    fn test_create_string_over_limit_sets_range_error() {
        let env = Env::new(Limits {
            max_array_length: 4,
            max_string_length: 3,
        });
        assert_eq!(env.create_string("abc"), Value::from("abc"));
        assert_eq!(env.create_string("abcd"), Value::Undefined);
        assert!(env.is_exception_pending());
    }
}
