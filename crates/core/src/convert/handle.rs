//! Script handles, binary payloads and JSON

use bytes::Bytes;

use super::primitive::MAX_SAFE_INTEGER;
use super::{checked, expected, take_pending, FromScript, ToScript};
use crate::script::{Array, ArrayBuffer, Env, Function, Object, Promise, Value};
use crate::validation::Validation;

impl FromScript for Value {
    fn from_script(_env: &Env, value: &Value) -> Validation<Self> {
        Validation::pure(value.clone())
    }
}

impl ToScript for Value {
    fn to_script(&self, _env: &Env) -> Validation<Value> {
        Validation::pure(self.clone())
    }
}

macro_rules! handle_conversions {
    ($($ty:ident => $what:literal),+ $(,)?) => {$(
        impl FromScript for $ty {
            fn from_script(_env: &Env, value: &Value) -> Validation<Self> {
                match value {
                    Value::$ty(handle) => Validation::pure(handle.clone()),
                    other => expected($what, other),
                }
            }
        }

        impl ToScript for $ty {
            fn to_script(&self, _env: &Env) -> Validation<Value> {
                Validation::pure(Value::$ty(self.clone()))
            }
        }
    )+};
}

handle_conversions! {
    Object => "an object",
    Array => "an array",
    Function => "a function",
    ArrayBuffer => "an ArrayBuffer",
    Promise => "a Promise",
}

/// Copies out of an `ArrayBuffer` or a `Uint8Array` view
impl FromScript for Bytes {
    fn from_script(_env: &Env, value: &Value) -> Validation<Self> {
        match value {
            Value::ArrayBuffer(buffer) => Validation::pure(Bytes::from(buffer.to_vec())),
            Value::Uint8Array(view) => Validation::pure(Bytes::from(view.to_vec())),
            other => expected("an ArrayBuffer or Uint8Array", other),
        }
    }
}

impl ToScript for Bytes {
    fn to_script(&self, _env: &Env) -> Validation<Value> {
        Validation::pure(Value::ArrayBuffer(ArrayBuffer::from_slice(self)))
    }
}

// ============================================================================
// JSON
// ============================================================================

impl FromScript for serde_json::Value {
    fn from_script(env: &Env, value: &Value) -> Validation<Self> {
        use serde_json::Value as Json;

        match value {
            Value::Null => Validation::pure(Json::Null),
            Value::Boolean(b) => Validation::pure(Json::Bool(*b)),
            Value::Number(n) if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER as f64 => {
                Validation::pure(Json::from(*n as i64))
            }
            Value::Number(n) => match serde_json::Number::from_f64(*n) {
                Some(number) => Validation::pure(Json::Number(number)),
                None => Validation::invalid(format!("Expected a finite number, got {}", n)),
            },
            Value::BigInt(n) => {
                if let Ok(n) = i64::try_from(*n) {
                    Validation::pure(Json::from(n))
                } else if let Ok(n) = u64::try_from(*n) {
                    Validation::pure(Json::from(n))
                } else {
                    Validation::invalid(format!("Expected a 64-bit integer, got {}", n))
                }
            }
            Value::String(s) => Validation::pure(Json::String(s.clone())),
            Value::Array(_) => Vec::<Json>::from_script(env, value).map(Json::Array),
            Value::Object(object) => object
                .keys()
                .into_iter()
                .map(|key| {
                    let property = object.get(env, &key);
                    let converted = match take_pending(env) {
                        Some(failed) => failed,
                        None => Json::from_script(env, &property),
                    };
                    converted.context(&key).map(|json| (key, json))
                })
                .collect::<Validation<Vec<_>>>()
                .map(|entries| Json::Object(entries.into_iter().collect())),
            other => expected("a JSON-compatible value", other),
        }
    }
}

impl ToScript for serde_json::Value {
    fn to_script(&self, env: &Env) -> Validation<Value> {
        use serde_json::Value as Json;

        match self {
            Json::Null => Validation::pure(Value::Null),
            Json::Bool(b) => b.to_script(env),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    i.to_script(env)
                } else if let Some(u) = n.as_u64() {
                    u.to_script(env)
                } else {
                    Validation::pure(Value::Number(n.as_f64().unwrap_or(f64::NAN)))
                }
            }
            Json::String(s) => s.to_script(env),
            Json::Array(items) => items.to_script(env),
            Json::Object(map) => {
                let object = Object::new();
                let converted: Validation<Vec<()>> = map
                    .iter()
                    .map(|(key, json)| {
                        json.to_script(env)
                            .and_then(|value| {
                                object.set(env, key, value);
                                match take_pending(env) {
                                    Some(failed) => failed,
                                    None => Validation::pure(()),
                                }
                            })
                            .context(key)
                    })
                    .collect();
                converted.and_then(|_| checked(env, Value::Object(object)))
            }
        }
    }
}
