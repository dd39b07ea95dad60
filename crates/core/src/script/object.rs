//! Heap values: objects, arrays, functions and binary buffers

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use super::env::Env;
use super::error::{ErrorKind, ScriptError};
use super::value::Value;

/// Argument `index`, or `undefined` when the caller passed fewer
pub fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or(Value::Undefined)
}

// ============================================================================
// Properties
// ============================================================================

/// An own property: a plain value or a getter/setter pair
#[derive(Clone)]
pub enum Property {
    Data(Value),
    Accessor {
        get: Option<Function>,
        set: Option<Function>,
    },
}

impl Property {
    fn read(&self, env: &Env, this: &Value) -> Value {
        match self {
            Property::Data(value) => value.clone(),
            Property::Accessor { get: Some(get), .. } => get.call(env, this, &[]),
            Property::Accessor { get: None, .. } => Value::Undefined,
        }
    }
}

// ============================================================================
// Object
// ============================================================================

struct ObjectInner {
    class: &'static str,
    properties: RefCell<Vec<(String, Property)>>,
    internal: RefCell<Option<Rc<dyn Any>>>,
    frozen: Cell<bool>,
}

/// Ordered property bag with an optional native internal field
#[derive(Clone)]
pub struct Object(Rc<ObjectInner>);

/// Non-owning reference to an [`Object`]
#[derive(Clone)]
pub struct WeakObject(Weak<ObjectInner>);

impl Object {
    pub fn new() -> Self {
        Self::with_class("Object")
    }

    /// Object reporting `class` in `[object class]`
    pub fn with_class(class: &'static str) -> Self {
        Self(Rc::new(ObjectInner {
            class,
            properties: RefCell::new(Vec::new()),
            internal: RefCell::new(None),
            frozen: Cell::new(false),
        }))
    }

    pub fn class_name(&self) -> &'static str {
        self.0.class
    }

    fn property(&self, key: &str) -> Option<Property> {
        self.0
            .properties
            .borrow()
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, property)| property.clone())
    }

    /// Read `key`, running its getter if it is an accessor
    ///
    /// The property table is not borrowed while a getter runs, so getters
    /// may mutate the object.
    pub fn get(&self, env: &Env, key: &str) -> Value {
        match self.property(key) {
            Some(property) => property.read(env, &Value::Object(self.clone())),
            None => Value::Undefined,
        }
    }

    /// Assign `key`; returns false and leaves a pending exception on failure
    pub fn set(&self, env: &Env, key: &str, value: impl Into<Value>) -> bool {
        let value = value.into();
        if self.0.frozen.get() {
            env.throw_error(ScriptError::new(
                ErrorKind::TypeError,
                format!(
                    "Cannot assign to read only property '{}' of object '[object {}]'",
                    key, self.0.class
                ),
            ));
            return false;
        }
        match self.property(key) {
            Some(Property::Accessor { set: Some(set), .. }) => {
                set.call(env, &Value::Object(self.clone()), &[value]);
                !env.is_exception_pending()
            }
            Some(Property::Accessor { set: None, .. }) => {
                env.throw_error(ScriptError::new(
                    ErrorKind::TypeError,
                    format!(
                        "Cannot set property {} of [object {}] which has only a getter",
                        key, self.0.class
                    ),
                ));
                false
            }
            Some(Property::Data(_)) | None => {
                self.define(key, Property::Data(value));
                true
            }
        }
    }

    /// Define or replace an own property without running setters
    pub fn define(&self, key: &str, property: Property) {
        let mut properties = self.0.properties.borrow_mut();
        match properties.iter_mut().find(|(name, _)| name == key) {
            Some((_, slot)) => *slot = property,
            None => properties.push((key.to_string(), property)),
        }
    }

    pub fn define_accessor(&self, key: &str, get: Option<Function>, set: Option<Function>) {
        self.define(key, Property::Accessor { get, set });
    }

    pub fn define_method(&self, function: Function) {
        let name = function.name().to_string();
        self.define(&name, Property::Data(Value::Function(function)));
    }

    pub fn has(&self, key: &str) -> bool {
        self.0.properties.borrow().iter().any(|(name, _)| name == key)
    }

    /// Own property names in insertion order
    pub fn keys(&self) -> Vec<String> {
        self.0
            .properties
            .borrow()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn freeze(&self) {
        self.0.frozen.set(true);
    }

    pub fn is_frozen(&self) -> bool {
        self.0.frozen.get()
    }

    /// Call the function stored at `name` with this object as receiver
    pub fn call_method(&self, env: &Env, name: &str, args: &[Value]) -> Value {
        match self.get(env, name) {
            Value::Function(function) => function.call(env, &Value::Object(self.clone()), args),
            _ if env.is_exception_pending() => Value::Undefined,
            other => {
                env.throw_error(ScriptError::new(
                    ErrorKind::TypeError,
                    format!("{} is not a function (got {})", name, other.type_name()),
                ));
                Value::Undefined
            }
        }
    }

    /// Attach the native object backing this script object
    pub fn set_internal<T: Any>(&self, native: Rc<T>) {
        *self.0.internal.borrow_mut() = Some(native);
    }

    /// The native object backing this script object, if it is a `T`
    pub fn internal<T: Any>(&self) -> Option<Rc<T>> {
        let internal = self.0.internal.borrow().clone()?;
        internal.downcast::<T>().ok()
    }

    pub fn ptr_eq(&self, other: &Object) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn downgrade(&self) -> WeakObject {
        WeakObject(Rc::downgrade(&self.0))
    }
}

impl Default for Object {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("class", &self.0.class)
            .field("keys", &self.keys())
            .finish()
    }
}

impl WeakObject {
    pub fn upgrade(&self) -> Option<Object> {
        self.0.upgrade().map(Object)
    }
}

// ============================================================================
// Array
// ============================================================================

struct ArrayInner {
    elements: RefCell<Vec<Property>>,
    frozen: Cell<bool>,
}

/// Indexed sequence; elements may be accessors
#[derive(Clone)]
pub struct Array(Rc<ArrayInner>);

impl Array {
    /// Array holding `values`; use [`Env::create_array`] to honour engine limits
    pub fn from_values(values: Vec<Value>) -> Self {
        Self(Rc::new(ArrayInner {
            elements: RefCell::new(values.into_iter().map(Property::Data).collect()),
            frozen: Cell::new(false),
        }))
    }

    pub(crate) fn with_len(len: usize) -> Self {
        Self::from_values(vec![Value::Undefined; len])
    }

    pub fn len(&self) -> usize {
        self.0.elements.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element `index`, running its getter if it is an accessor
    pub fn get(&self, env: &Env, index: usize) -> Value {
        let element = self.0.elements.borrow().get(index).cloned();
        match element {
            Some(property) => property.read(env, &Value::Array(self.clone())),
            None => Value::Undefined,
        }
    }

    /// Assign element `index`, growing the array with holes if needed
    pub fn set(&self, env: &Env, index: usize, value: impl Into<Value>) -> bool {
        let value = value.into();
        if self.0.frozen.get() {
            env.throw_error(ScriptError::new(
                ErrorKind::TypeError,
                format!(
                    "Cannot assign to read only property '{}' of object '[object Array]'",
                    index
                ),
            ));
            return false;
        }
        if index >= env.limits().max_array_length {
            env.throw_error(ScriptError::new(ErrorKind::RangeError, "Invalid array length"));
            return false;
        }
        let existing = self.0.elements.borrow().get(index).cloned();
        match existing {
            Some(Property::Accessor { set: Some(set), .. }) => {
                set.call(env, &Value::Array(self.clone()), &[value]);
                !env.is_exception_pending()
            }
            Some(Property::Accessor { set: None, .. }) => {
                env.throw_error(ScriptError::new(
                    ErrorKind::TypeError,
                    format!("Cannot set property {} of [object Array] which has only a getter", index),
                ));
                false
            }
            _ => {
                let mut elements = self.0.elements.borrow_mut();
                if index >= elements.len() {
                    elements.resize(index + 1, Property::Data(Value::Undefined));
                }
                elements[index] = Property::Data(value);
                true
            }
        }
    }

    pub fn push(&self, env: &Env, value: impl Into<Value>) -> bool {
        let index = self.len();
        self.set(env, index, value)
    }

    /// Install a getter/setter pair at `index`
    pub fn define_accessor(&self, index: usize, get: Option<Function>, set: Option<Function>) {
        let mut elements = self.0.elements.borrow_mut();
        if index >= elements.len() {
            elements.resize(index + 1, Property::Data(Value::Undefined));
        }
        elements[index] = Property::Accessor { get, set };
    }

    pub fn freeze(&self) {
        self.0.frozen.set(true);
    }

    /// Read every element in order
    pub fn to_vec(&self, env: &Env) -> Vec<Value> {
        (0..self.len()).map(|index| self.get(env, index)).collect()
    }

    pub fn ptr_eq(&self, other: &Array) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

// ============================================================================
// Function
// ============================================================================

type NativeFn = dyn Fn(&Env, &Value, &[Value]) -> Value;

struct FunctionInner {
    name: String,
    body: Box<NativeFn>,
}

/// Callable backed by a native closure `(env, this, args) -> Value`
///
/// A function throws by leaving a pending exception on `env`; its return
/// value is then ignored.
#[derive(Clone)]
pub struct Function(Rc<FunctionInner>);

impl Function {
    pub fn new(
        name: impl Into<String>,
        body: impl Fn(&Env, &Value, &[Value]) -> Value + 'static,
    ) -> Self {
        Self(Rc::new(FunctionInner {
            name: name.into(),
            body: Box::new(body),
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn call(&self, env: &Env, this: &Value, args: &[Value]) -> Value {
        let result = (self.0.body)(env, this, args);
        if env.is_exception_pending() {
            Value::Undefined
        } else {
            result
        }
    }

    pub fn ptr_eq(&self, other: &Function) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

// ============================================================================
// Binary data
// ============================================================================

/// Raw byte storage shared by views
#[derive(Clone, Default)]
pub struct ArrayBuffer(Rc<RefCell<Vec<u8>>>);

impl ArrayBuffer {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Rc::new(RefCell::new(bytes)))
    }

    pub fn from_slice(bytes: &[u8]) -> Self {
        Self::new(bytes.to_vec())
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.borrow().clone()
    }

    pub fn ptr_eq(&self, other: &ArrayBuffer) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// `Uint8Array` view over a window of an [`ArrayBuffer`]
#[derive(Clone)]
pub struct TypedArray {
    buffer: ArrayBuffer,
    offset: usize,
    length: usize,
}

impl TypedArray {
    /// View `length` bytes starting at `offset`; `None` if out of bounds
    pub fn new(buffer: ArrayBuffer, offset: usize, length: usize) -> Option<Self> {
        let end = offset.checked_add(length)?;
        if end > buffer.len() {
            return None;
        }
        Some(Self {
            buffer,
            offset,
            length,
        })
    }

    /// View over a fresh buffer holding `bytes`
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            buffer: ArrayBuffer::from_slice(bytes),
            offset: 0,
            length: bytes.len(),
        }
    }

    pub fn buffer(&self) -> &ArrayBuffer {
        &self.buffer
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        let bytes = self.buffer.0.borrow();
        let end = (self.offset + self.length).min(bytes.len());
        bytes[self.offset.min(end)..end].to_vec()
    }
}

impl PartialEq for TypedArray {
    fn eq(&self, other: &Self) -> bool {
        self.buffer.ptr_eq(&other.buffer)
            && self.offset == other.offset
            && self.length == other.length
    }
}
