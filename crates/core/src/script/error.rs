use std::fmt;

use super::env::Env;
use super::object::Object;
use super::value::Value;

/// Constructor name of a thrown error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Error,
    TypeError,
    RangeError,
    InvalidStateError,
    OperationError,
}

impl ErrorKind {
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::Error => "Error",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::RangeError => "RangeError",
            ErrorKind::InvalidStateError => "InvalidStateError",
            ErrorKind::OperationError => "OperationError",
        }
    }
}

/// An error to be raised in the scripting runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ScriptError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeError, message)
    }

    pub fn range_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RangeError, message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidStateError, message)
    }

    pub fn operation_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::OperationError, message)
    }

    /// Materialize as an `Error` object with `name` and `message`
    pub fn to_value(&self, env: &Env) -> Value {
        let object = Object::with_class("Error");
        object.set(env, "name", self.kind.name());
        object.set(env, "message", self.message.as_str());
        Value::Object(object)
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.name(), self.message)
    }
}

impl std::error::Error for ScriptError {}

/// Best-effort message of a thrown value
///
/// Error objects yield their `message`; strings yield themselves;
/// anything else yields its type name.
pub fn exception_message(env: &Env, exception: &Value) -> String {
    match exception {
        Value::String(message) => message.clone(),
        Value::Object(object) => match object.get(env, "message") {
            Value::String(message) => message,
            _ => format!("[object {}]", object.class_name()),
        },
        other => format!("Uncaught {:?}", other),
    }
}
