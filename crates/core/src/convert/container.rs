//! Optional, sequence and map adapters

use std::collections::BTreeMap;

use super::{checked, expected, take_pending, FromScript, ToScript};
use crate::script::{Env, Object, Value};
use crate::validation::{Errors, Validation};

// ============================================================================
// Optional values
// ============================================================================

/// `undefined` and `null` are absent; anything else must convert as `T`
impl<T: FromScript> FromScript for Option<T> {
    fn from_script(env: &Env, value: &Value) -> Validation<Self> {
        if value.is_nullish() {
            Validation::pure(None)
        } else {
            T::from_script(env, value).map(Some)
        }
    }
}

impl<T: ToScript> ToScript for Option<T> {
    fn to_script(&self, env: &Env) -> Validation<Value> {
        match self {
            Some(value) => value.to_script(env),
            None => Validation::pure(Value::Null),
        }
    }
}

// ============================================================================
// Sequences
// ============================================================================

/// Element by element, stopping at the first element that fails
///
/// The failing element's errors are prefixed with its index; later
/// elements are never read.
impl<T: FromScript> FromScript for Vec<T> {
    fn from_script(env: &Env, value: &Value) -> Validation<Self> {
        let array = match value {
            Value::Array(array) => array,
            other => return expected("an array", other),
        };
        let len = array.len();
        let mut out = Vec::with_capacity(len);
        for index in 0..len {
            let element = array.get(env, index);
            if let Some(failed) = take_pending(env) {
                return failed.context(format_args!("Element {}", index));
            }
            match T::from_script(env, &element) {
                Validation::Valid(item) => out.push(item),
                Validation::Invalid(errors) => {
                    return Validation::Invalid(errors.context(format_args!("Element {}", index)))
                }
            }
        }
        Validation::pure(out)
    }
}

impl<T: ToScript> ToScript for [T] {
    fn to_script(&self, env: &Env) -> Validation<Value> {
        let array = env.create_array(self.len());
        if let Some(failed) = take_pending(env) {
            return failed;
        }
        for (index, item) in self.iter().enumerate() {
            let value = match item.to_script(env) {
                Validation::Valid(value) => value,
                Validation::Invalid(errors) => {
                    return Validation::Invalid(errors.context(format_args!("Element {}", index)))
                }
            };
            if !array.set(env, index, value) {
                if let Some(failed) = take_pending(env) {
                    return failed.context(format_args!("Element {}", index));
                }
            }
        }
        Validation::pure(Value::Array(array))
    }
}

impl<T: ToScript> ToScript for Vec<T> {
    fn to_script(&self, env: &Env) -> Validation<Value> {
        self.as_slice().to_script(env)
    }
}

// ============================================================================
// Packed boolean sequences
// ============================================================================

/// Bit-packed sequence of booleans
///
/// Converts to a script array of booleans. There is no conversion back;
/// read script arrays as `Vec<bool>`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitSeq {
    words: Vec<u64>,
    len: usize,
}

impl BitSeq {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bit: bool) {
        let (word, offset) = (self.len / 64, self.len % 64);
        if word == self.words.len() {
            self.words.push(0);
        }
        if bit {
            self.words[word] |= 1 << offset;
        }
        self.len += 1;
    }

    pub fn get(&self, index: usize) -> Option<bool> {
        (index < self.len).then(|| self.words[index / 64] & (1 << (index % 64)) != 0)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.len).map(move |index| self.words[index / 64] & (1 << (index % 64)) != 0)
    }
}

impl FromIterator<bool> for BitSeq {
    fn from_iter<I: IntoIterator<Item = bool>>(iter: I) -> Self {
        let mut seq = BitSeq::new();
        for bit in iter {
            seq.push(bit);
        }
        seq
    }
}

impl ToScript for BitSeq {
    fn to_script(&self, env: &Env) -> Validation<Value> {
        let array = env.create_array(self.len);
        if let Some(failed) = take_pending(env) {
            return failed;
        }
        for (index, bit) in self.iter().enumerate() {
            if !array.set(env, index, bit) {
                if let Some(failed) = take_pending(env) {
                    return failed.context(format_args!("Element {}", index));
                }
            }
        }
        Validation::pure(Value::Array(array))
    }
}

// ============================================================================
// String-keyed maps
// ============================================================================

/// Every own property converts as `T`; errors from all properties accumulate
impl<T: FromScript> FromScript for BTreeMap<String, T> {
    fn from_script(env: &Env, value: &Value) -> Validation<Self> {
        let object = match value {
            Value::Object(object) => object,
            other => return expected("an object", other),
        };
        object
            .keys()
            .into_iter()
            .map(|key| {
                let value = object.get(env, &key);
                let converted = match take_pending(env) {
                    Some(failed) => failed,
                    None => T::from_script(env, &value),
                };
                converted.context(&key).map(|value| (key, value))
            })
            .collect::<Validation<Vec<_>>>()
            .map(|entries| entries.into_iter().collect())
    }
}

impl<T: ToScript> ToScript for BTreeMap<String, T> {
    fn to_script(&self, env: &Env) -> Validation<Value> {
        let object = Object::new();
        let mut errors: Option<Errors> = None;
        for (key, value) in self {
            match value.to_script(env) {
                Validation::Valid(value) => {
                    if !object.set(env, key, value) {
                        if let Some(Validation::Invalid(e)) = take_pending::<()>(env) {
                            accumulate(&mut errors, e.context(key));
                        }
                    }
                }
                Validation::Invalid(e) => accumulate(&mut errors, e.context(key)),
            }
        }
        match errors {
            Some(errors) => Validation::Invalid(errors),
            None => checked(env, Value::Object(object)),
        }
    }
}

fn accumulate(errors: &mut Option<Errors>, more: Errors) {
    match errors {
        Some(errors) => errors.extend(more),
        None => *errors = Some(more),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::{from_script, to_script};
    use crate::script::{Array, Function, Limits};
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_option_absent_values() {
        let env = Env::default();
        assert_eq!(from_script::<Option<u8>>(&env, &Value::Undefined), Validation::pure(None));
        assert_eq!(from_script::<Option<u8>>(&env, &Value::Null), Validation::pure(None));
        assert_eq!(
            from_script::<Option<u8>>(&env, &Value::Number(3.0)),
            Validation::pure(Some(3))
        );
        assert_eq!(to_script(&env, &None::<u8>).ok(), Some(Value::Null));
        assert!(from_script::<Option<u8>>(&env, &Value::from("x")).is_invalid());
    }

    #[test]
    fn test_sequence_preserves_order() {
        let env = Env::default();
        let native = vec![3u32, 1, 2];
        let value = to_script(&env, &native).ok().unwrap();
        let array = value.as_array().unwrap();
        assert_eq!(array.to_vec(&env), [Value::Number(3.0), Value::Number(1.0), Value::Number(2.0)]);
        assert_eq!(from_script::<Vec<u32>>(&env, &value), Validation::pure(native));

        let empty = to_script(&env, &Vec::<u32>::new()).ok().unwrap();
        assert_eq!(from_script::<Vec<u32>>(&env, &empty), Validation::pure(Vec::new()));
    }

    #[test]
    fn test_sequence_fails_fast_without_reading_later_elements() {
        let env = Env::default();
        let array = Array::from_values(vec![Value::Number(1.0), Value::from("two")]);
        let touched = Rc::new(Cell::new(false));
        let flag = touched.clone();
        array.define_accessor(
            2,
            Some(Function::new("get 2", move |_, _, _| {
                flag.set(true);
                Value::Number(3.0)
            })),
            None,
        );

        let result = from_script::<Vec<u32>>(&env, &Value::Array(array));
        let errors = result.errors().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors.first(), "Element 1: Expected a number, got string");
        assert!(!touched.get());
    }

    #[test]
    fn test_sequence_read_captures_pending_exception() {
        let env = Env::default();
        let array = Array::from_values(vec![Value::Number(1.0)]);
        array.define_accessor(
            1,
            Some(Function::new("get 1", |env, _, _| {
                env.throw_type_error("getter exploded");
                Value::Undefined
            })),
            None,
        );

        let result = from_script::<Vec<u32>>(&env, &Value::Array(array));
        assert_eq!(result.errors().unwrap().first(), "Element 1: getter exploded");
        assert!(!env.is_exception_pending());
    }

    #[test]
    fn test_sequence_write_captures_length_limit() {
        let env = Env::new(Limits {
            max_array_length: 2,
            max_string_length: 64,
        });
        let result = to_script(&env, &vec![1u8, 2, 3]);
        assert_eq!(result.errors().unwrap().first(), "Invalid array length");
        assert!(!env.is_exception_pending());
    }

    #[test]
    fn test_non_array_is_rejected() {
        let env = Env::default();
        let result = from_script::<Vec<u8>>(&env, &Value::Object(Object::new()));
        assert_eq!(result.errors().unwrap().first(), "Expected an array, got object");
    }

    #[test]
    fn test_bit_seq_converts_to_boolean_array() {
        let env = Env::default();
        let bits: BitSeq = (0..70).map(|i| i % 3 == 0).collect();
        assert_eq!(bits.len(), 70);
        assert_eq!(bits.get(69), Some(true));
        assert_eq!(bits.get(70), None);

        let value = to_script(&env, &bits).ok().unwrap();
        let read_back = from_script::<Vec<bool>>(&env, &value).ok().unwrap();
        assert_eq!(read_back, bits.iter().collect::<Vec<_>>());
    }

    #[test]
    fn test_map_accumulates_property_errors() {
        let env = Env::default();
        let object = Object::new();
        object.set(&env, "a", 1.0);
        object.set(&env, "b", "x");
        object.set(&env, "c", true);

        let result = from_script::<BTreeMap<String, u8>>(&env, &Value::Object(object));
        assert_eq!(
            result.errors().unwrap().messages(),
            ["b: Expected a number, got string", "c: Expected a number, got boolean"]
        );
    }

    #[test]
    fn test_map_round_trip() {
        let env = Env::default();
        let mut map = BTreeMap::new();
        map.insert("x".to_string(), 1i32);
        map.insert("y".to_string(), -2i32);
        let value = to_script(&env, &map).ok().unwrap();
        assert_eq!(from_script::<BTreeMap<String, i32>>(&env, &value), Validation::pure(map));
    }
}
