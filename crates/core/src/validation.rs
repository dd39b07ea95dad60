//! Values that either succeed or carry every error found
//!
//! [`Validation`] is the carrier for conversion results. Independent
//! inputs combined with [`Validation::zip`], [`combine!`](crate::combine) or
//! `collect()` report the union of their errors in input order; dependent
//! steps chained with [`Validation::and_then`] stop at the first failure.

use std::fmt;

use crate::script::{Deferred, Env, ErrorKind, ScriptError};

/// Non-empty, ordered list of error messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Errors(Vec<String>);

impl Errors {
    /// Single-message error list
    pub fn new(message: impl Into<String>) -> Self {
        Self(vec![message.into()])
    }

    /// Build from a list of messages; `None` when the list is empty
    pub fn from_vec(messages: Vec<String>) -> Option<Self> {
        if messages.is_empty() {
            None
        } else {
            Some(Self(messages))
        }
    }

    pub fn push(&mut self, message: impl Into<String>) {
        self.0.push(message.into());
    }

    /// Append every message of `other`, preserving order
    pub fn extend(&mut self, other: Errors) {
        self.0.extend(other.0);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; present for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn first(&self) -> &str {
        &self.0[0]
    }

    pub fn messages(&self) -> &[String] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn into_vec(self) -> Vec<String> {
        self.0
    }

    /// Prefix every message with `prefix: `
    pub fn context(self, prefix: impl fmt::Display) -> Self {
        Self(
            self.0
                .into_iter()
                .map(|message| format!("{}: {}", prefix, message))
                .collect(),
        )
    }
}

impl fmt::Display for Errors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("\n"))
    }
}

impl std::error::Error for Errors {}

impl IntoIterator for Errors {
    type Item = String;
    type IntoIter = std::vec::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Either a value or a non-empty list of errors, never both
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum Validation<T> {
    Valid(T),
    Invalid(Errors),
}

impl<T> Validation<T> {
    /// Successful result
    pub fn pure(value: T) -> Self {
        Validation::Valid(value)
    }

    /// Failed result with one message
    pub fn invalid(message: impl Into<String>) -> Self {
        Validation::Invalid(Errors::new(message))
    }

    /// Failed result carrying `errors`
    pub fn invalid_all(errors: Errors) -> Self {
        Validation::Invalid(errors)
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Validation::Valid(_))
    }

    pub fn is_invalid(&self) -> bool {
        !self.is_valid()
    }

    pub fn errors(&self) -> Option<&Errors> {
        match self {
            Validation::Valid(_) => None,
            Validation::Invalid(errors) => Some(errors),
        }
    }

    pub fn ok(self) -> Option<T> {
        match self {
            Validation::Valid(value) => Some(value),
            Validation::Invalid(_) => None,
        }
    }

    pub fn as_ref(&self) -> Validation<&T> {
        match self {
            Validation::Valid(value) => Validation::Valid(value),
            Validation::Invalid(errors) => Validation::Invalid(errors.clone()),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Validation<U> {
        match self {
            Validation::Valid(value) => Validation::Valid(f(value)),
            Validation::Invalid(errors) => Validation::Invalid(errors),
        }
    }

    pub fn map_errors(self, f: impl FnOnce(Errors) -> Errors) -> Self {
        match self {
            Validation::Valid(value) => Validation::Valid(value),
            Validation::Invalid(errors) => Validation::Invalid(f(errors)),
        }
    }

    /// Prefix every error message with `prefix: `
    pub fn context(self, prefix: impl fmt::Display) -> Self {
        self.map_errors(|errors| errors.context(prefix))
    }

    /// Sequential composition: `f` only runs on success
    pub fn and_then<U>(self, f: impl FnOnce(T) -> Validation<U>) -> Validation<U> {
        match self {
            Validation::Valid(value) => f(value),
            Validation::Invalid(errors) => Validation::Invalid(errors),
        }
    }

    /// Independent composition; errors from both sides are kept, `self` first
    pub fn zip<U>(self, other: Validation<U>) -> Validation<(T, U)> {
        match (self, other) {
            (Validation::Valid(a), Validation::Valid(b)) => Validation::Valid((a, b)),
            (Validation::Invalid(errors), Validation::Valid(_))
            | (Validation::Valid(_), Validation::Invalid(errors)) => Validation::Invalid(errors),
            (Validation::Invalid(mut left), Validation::Invalid(right)) => {
                left.extend(right);
                Validation::Invalid(left)
            }
        }
    }

    pub fn map2<U, R>(self, other: Validation<U>, f: impl FnOnce(T, U) -> R) -> Validation<R> {
        self.zip(other).map(|(a, b)| f(a, b))
    }

    /// Apply a validated function to this value, accumulating both sides' errors
    pub fn apply<R, F: FnOnce(T) -> R>(self, f: Validation<F>) -> Validation<R> {
        f.zip(self).map(|(f, value)| f(value))
    }

    /// Convert to a `Result`, turning errors into [`crate::Error::Conversion`]
    pub fn into_result(self) -> crate::Result<T> {
        match self {
            Validation::Valid(value) => Ok(value),
            Validation::Invalid(errors) => Err(crate::Error::Conversion(errors)),
        }
    }

    /// Unwrap or raise a `TypeError` listing every error as the pending exception
    pub fn or_throw(self, env: &Env) -> Option<T> {
        match self {
            Validation::Valid(value) => Some(value),
            Validation::Invalid(errors) => {
                env.throw_error(ScriptError::new(ErrorKind::TypeError, errors.to_string()));
                None
            }
        }
    }

    /// Unwrap or reject `deferred` with a `TypeError` listing every error
    pub fn or_reject(self, env: &Env, deferred: &Deferred) -> Option<T> {
        match self {
            Validation::Valid(value) => Some(value),
            Validation::Invalid(errors) => {
                let error = ScriptError::new(ErrorKind::TypeError, errors.to_string());
                deferred.reject(error.to_value(env));
                None
            }
        }
    }
}

impl<T> From<Errors> for Validation<T> {
    fn from(errors: Errors) -> Self {
        Validation::Invalid(errors)
    }
}

impl<T, E: fmt::Display> From<Result<T, E>> for Validation<T> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Validation::Valid(value),
            Err(error) => Validation::invalid(error.to_string()),
        }
    }
}

/// Collect every element; errors from all invalid elements accumulate in order
impl<T> FromIterator<Validation<T>> for Validation<Vec<T>> {
    fn from_iter<I: IntoIterator<Item = Validation<T>>>(iter: I) -> Self {
        let mut values = Vec::new();
        let mut errors: Option<Errors> = None;
        for item in iter {
            match (item, errors.as_mut()) {
                (Validation::Valid(value), None) => values.push(value),
                (Validation::Valid(_), Some(_)) => {}
                (Validation::Invalid(e), Some(acc)) => acc.extend(e),
                (Validation::Invalid(e), None) => errors = Some(e),
            }
        }
        match errors {
            Some(errors) => Validation::Invalid(errors),
            None => Validation::Valid(values),
        }
    }
}

/// Combine independent validations with a function of all their values
///
/// ```
/// use rtcbridge_core::{combine, Validation};
///
/// let sum = combine!(Validation::pure(1), Validation::pure(2) => |a, b| a + b);
/// assert_eq!(sum, Validation::pure(3));
/// ```
#[macro_export]
macro_rules! combine {
    ($first:expr $(, $rest:expr)+ => |$a:pat_param $(, $b:pat_param)+| $body:expr) => {
        $first
            $(.zip($rest))+
            .map(|$crate::combine!(@nest $a $(, $b)+)| $body)
    };
    (@nest $a:pat_param) => { $a };
    (@nest $a:pat_param, $b:pat_param $(, $rest:pat_param)*) => {
        $crate::combine!(@nest_acc ($a, $b) $(, $rest)*)
    };
    (@nest_acc $acc:tt) => { $acc };
    (@nest_acc $acc:tt, $next:pat_param $(, $rest:pat_param)*) => {
        $crate::combine!(@nest_acc ($acc, $next) $(, $rest)*)
    };
}
