//! Struct-shaped objects
//!
//! Dictionary arguments are decoded field by field with [`required`],
//! [`optional`] and [`with_default`], then combined with
//! [`combine!`](crate::combine) so every bad field is reported at once.
//! [`ObjectBuilder`] goes the other way.

use super::{take_pending, FromScript, ToScript};
use crate::script::{Env, Object, Value};
use crate::validation::{Errors, Validation};

fn read(env: &Env, object: &Object, key: &str) -> Validation<Value> {
    let value = object.get(env, key);
    match take_pending(env) {
        Some(failed) => failed.context(key),
        None => Validation::pure(value),
    }
}

/// Field `key`, which must be present and convert as `T`
pub fn required<T: FromScript>(env: &Env, object: &Object, key: &str) -> Validation<T> {
    read(env, object, key).and_then(|value| {
        if matches!(value, Value::Undefined) {
            Validation::invalid(format!("{}: Required field is missing", key))
        } else {
            T::from_script(env, &value).context(key)
        }
    })
}

/// Field `key`, absent when `undefined` or `null`
pub fn optional<T: FromScript>(env: &Env, object: &Object, key: &str) -> Validation<Option<T>> {
    read(env, object, key).and_then(|value| Option::<T>::from_script(env, &value).context(key))
}

/// Field `key`, or `default` when absent
pub fn with_default<T: FromScript>(env: &Env, object: &Object, key: &str, default: T) -> Validation<T> {
    optional(env, object, key).map(|value| value.unwrap_or(default))
}

/// Builds an object from native fields, accumulating conversion errors
pub struct ObjectBuilder<'e> {
    env: &'e Env,
    object: Object,
    errors: Option<Errors>,
}

impl<'e> ObjectBuilder<'e> {
    pub fn new(env: &'e Env) -> Self {
        Self {
            env,
            object: Object::new(),
            errors: None,
        }
    }

    pub fn with_class(env: &'e Env, class: &'static str) -> Self {
        Self {
            env,
            object: Object::with_class(class),
            errors: None,
        }
    }

    fn fail(&mut self, errors: Errors) {
        match self.errors.as_mut() {
            Some(existing) => existing.extend(errors),
            None => self.errors = Some(errors),
        }
    }

    pub fn field<T: ToScript + ?Sized>(mut self, key: &str, value: &T) -> Self {
        match value.to_script(self.env) {
            Validation::Valid(value) => {
                if !self.object.set(self.env, key, value) {
                    if let Some(Validation::Invalid(errors)) = take_pending::<()>(self.env) {
                        self.fail(errors.context(key));
                    }
                }
            }
            Validation::Invalid(errors) => self.fail(errors.context(key)),
        }
        self
    }

    /// Set `key` only when `value` is present
    pub fn optional_field<T: ToScript>(self, key: &str, value: Option<&T>) -> Self {
        match value {
            Some(value) => self.field(key, value),
            None => self,
        }
    }

    pub fn build(self) -> Validation<Value> {
        match self.errors {
            Some(errors) => Validation::Invalid(errors),
            None => Validation::pure(Value::Object(self.object)),
        }
    }
}
