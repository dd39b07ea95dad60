//! Error types for rtcbridge core

use thiserror::Error;

use crate::config::ConfigError;
use crate::script::{Deferred, Env, ErrorKind, ScriptError};
use crate::validation::Errors;

/// Result type alias for rtcbridge core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while bridging
#[derive(Debug, Error)]
pub enum Error {
    /// One or more values failed conversion
    #[error("Conversion failed: {0}")]
    Conversion(Errors),

    /// Operation on a detached or closed object
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Error raised with an explicit script-side kind
    #[error("{0}")]
    Script(ScriptError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Bridging invariant violated
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// The error as it is raised in the scripting runtime
    pub fn to_script_error(&self) -> ScriptError {
        match self {
            Error::Conversion(errors) => ScriptError::new(ErrorKind::TypeError, errors.to_string()),
            Error::InvalidState(message) => ScriptError::invalid_state(message.clone()),
            Error::Script(error) => error.clone(),
            other => ScriptError::new(ErrorKind::Error, other.to_string()),
        }
    }

    /// Raise as the pending exception
    pub fn throw(&self, env: &Env) {
        env.throw_error(self.to_script_error());
    }

    /// Reject `deferred` with this error
    pub fn reject(&self, env: &Env, deferred: &Deferred) {
        deferred.reject(self.to_script_error().to_value(env));
    }
}

impl From<Errors> for Error {
    fn from(errors: Errors) -> Self {
        Error::Conversion(errors)
    }
}

impl From<ScriptError> for Error {
    fn from(error: ScriptError) -> Self {
        Error::Script(error)
    }
}
