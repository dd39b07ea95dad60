//! Bidirectional conversions between native types and script values
//!
//! A conversion rule is a trait impl, so the rule for a (source, target)
//! pair is picked at compile time and there is exactly one of it.
//! Conversions never throw: they return a [`Validation`], and pending
//! exceptions raised by the engine while reading or materializing values
//! are taken and turned into error messages.

mod container;
mod handle;
pub mod object;
mod primitive;

pub use container::BitSeq;
pub use object::{optional, required, with_default, ObjectBuilder};

use crate::script::{exception_message, Env, Value};
use crate::validation::Validation;

/// Script value → native value
pub trait FromScript: Sized {
    fn from_script(env: &Env, value: &Value) -> Validation<Self>;
}

/// Native value → script value
pub trait ToScript {
    fn to_script(&self, env: &Env) -> Validation<Value>;
}

impl<T: ToScript + ?Sized> ToScript for &T {
    fn to_script(&self, env: &Env) -> Validation<Value> {
        (**self).to_script(env)
    }
}

/// Convert a script value to `T`
pub fn from_script<T: FromScript>(env: &Env, value: &Value) -> Validation<T> {
    T::from_script(env, value)
}

/// Convert a native value to a script value
pub fn to_script<T: ToScript + ?Sized>(env: &Env, value: &T) -> Validation<Value> {
    value.to_script(env)
}

/// Type-mismatch error: `Expected {what}, got {type}`
pub fn expected<T>(what: &str, value: &Value) -> Validation<T> {
    Validation::invalid(format!("Expected {}, got {}", what, value.type_name()))
}

/// Take the pending exception, if any, as a conversion error
pub(crate) fn take_pending<T>(env: &Env) -> Option<Validation<T>> {
    env.take_exception()
        .map(|exception| Validation::invalid(exception_message(env, &exception)))
}

/// `value`, unless the engine raised an exception producing it
pub(crate) fn checked(env: &Env, value: Value) -> Validation<Value> {
    match take_pending(env) {
        Some(failed) => failed,
        None => Validation::pure(value),
    }
}

/// Declare conversions between a fieldless enum and string literals
///
/// ```
/// use rtcbridge_core::string_enum;
///
/// #[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// enum Mode { Fast, Safe }
///
/// string_enum!(Mode, "a mode" { Mode::Fast => "fast", Mode::Safe => "safe" });
/// ```
#[macro_export]
macro_rules! string_enum {
    ($ty:ty, $what:literal { $($variant:path => $name:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($variant => $name,)+
                }
            }
        }

        impl $crate::convert::FromScript for $ty {
            fn from_script(
                env: &$crate::script::Env,
                value: &$crate::script::Value,
            ) -> $crate::validation::Validation<Self> {
                let _ = env;
                match value {
                    $crate::script::Value::String(s) => match s.as_str() {
                        $($name => $crate::validation::Validation::pure($variant),)+
                        other => $crate::validation::Validation::invalid(format!(
                            "Expected {} ({}), got '{}'",
                            $what,
                            [$(concat!("'", $name, "'")),+].join(", "),
                            other
                        )),
                    },
                    other => $crate::convert::expected($what, other),
                }
            }
        }

        impl $crate::convert::ToScript for $ty {
            fn to_script(
                &self,
                env: &$crate::script::Env,
            ) -> $crate::validation::Validation<$crate::script::Value> {
                let _ = env;
                $crate::validation::Validation::pure($crate::script::Value::String(
                    self.as_str().to_string(),
                ))
            }
        }
    };
}
