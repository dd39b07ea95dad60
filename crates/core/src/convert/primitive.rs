//! Booleans, numbers and strings

use super::{checked, expected, FromScript, ToScript};
use crate::script::{Env, Value};
use crate::validation::Validation;

/// Largest integer a `Number` holds exactly (2^53 - 1)
pub const MAX_SAFE_INTEGER: i128 = (1 << 53) - 1;

impl FromScript for bool {
    fn from_script(_env: &Env, value: &Value) -> Validation<Self> {
        match value {
            Value::Boolean(b) => Validation::pure(*b),
            other => expected("a boolean", other),
        }
    }
}

impl ToScript for bool {
    fn to_script(&self, _env: &Env) -> Validation<Value> {
        Validation::pure(Value::Boolean(*self))
    }
}

impl FromScript for f64 {
    fn from_script(_env: &Env, value: &Value) -> Validation<Self> {
        match value {
            Value::Number(n) => Validation::pure(*n),
            other => expected("a number", other),
        }
    }
}

impl ToScript for f64 {
    fn to_script(&self, _env: &Env) -> Validation<Value> {
        Validation::pure(Value::Number(*self))
    }
}

impl FromScript for f32 {
    fn from_script(_env: &Env, value: &Value) -> Validation<Self> {
        match value {
            Value::Number(n) if n.is_finite() && n.abs() > f32::MAX as f64 => {
                Validation::invalid(format!("Expected a 32-bit float, got {}", n))
            }
            Value::Number(n) => Validation::pure(*n as f32),
            other => expected("a number", other),
        }
    }
}

impl ToScript for f32 {
    fn to_script(&self, _env: &Env) -> Validation<Value> {
        Validation::pure(Value::Number(*self as f64))
    }
}

/// Integral value of a `Number` or `BigInt`, checked against `[min, max]`
fn integer_in_range(value: &Value, min: i128, max: i128) -> Validation<i128> {
    let wide = match value {
        Value::Number(n) => {
            if !n.is_finite() || n.fract() != 0.0 {
                return Validation::invalid(format!("Expected an integer, got {}", n));
            }
            // Beyond i128 the range check below fails anyway.
            if n.abs() >= 1.0e38 {
                return Validation::invalid(format!(
                    "Expected an integer in [{}, {}], got {}",
                    min, max, n
                ));
            }
            *n as i128
        }
        Value::BigInt(n) => *n,
        other => return expected("a number", other),
    };
    if wide < min || wide > max {
        return Validation::invalid(format!(
            "Expected an integer in [{}, {}], got {}",
            min, max, wide
        ));
    }
    Validation::pure(wide)
}

fn integer_to_value(n: i128) -> Value {
    if (-MAX_SAFE_INTEGER..=MAX_SAFE_INTEGER).contains(&n) {
        Value::Number(n as f64)
    } else {
        Value::BigInt(n)
    }
}

macro_rules! integer_conversions {
    ($($ty:ty),+) => {$(
        impl FromScript for $ty {
            fn from_script(_env: &Env, value: &Value) -> Validation<Self> {
                integer_in_range(value, <$ty>::MIN as i128, <$ty>::MAX as i128)
                    .map(|n| n as $ty)
            }
        }

        impl ToScript for $ty {
            fn to_script(&self, _env: &Env) -> Validation<Value> {
                Validation::pure(integer_to_value(*self as i128))
            }
        }
    )+};
}

integer_conversions!(u8, u16, u32, u64, i8, i16, i32, i64, usize);

impl FromScript for String {
    fn from_script(_env: &Env, value: &Value) -> Validation<Self> {
        match value {
            Value::String(s) => Validation::pure(s.clone()),
            other => expected("a string", other),
        }
    }
}

impl ToScript for str {
    fn to_script(&self, env: &Env) -> Validation<Value> {
        let value = env.create_string(self);
        checked(env, value)
    }
}

impl ToScript for String {
    fn to_script(&self, env: &Env) -> Validation<Value> {
        self.as_str().to_script(env)
    }
}

impl ToScript for () {
    fn to_script(&self, _env: &Env) -> Validation<Value> {
        Validation::pure(Value::Undefined)
    }
}
