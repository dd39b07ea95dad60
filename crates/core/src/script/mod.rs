//! Single-threaded scripting runtime model
//!
//! Everything here is `!Send`: values, the environment and the
//! [`ScriptThread`] can only be used from the thread that created them.
//! Native code reaches this side only through [`crate::event::Dispatcher`].

mod env;
mod error;
mod object;
mod promise;
mod thread;
mod value;

pub use env::{Env, Limits};
pub use error::{exception_message, ErrorKind, ScriptError};
pub use object::{arg, Array, ArrayBuffer, Function, Object, Property, TypedArray, WeakObject};
pub use promise::{Deferred, Promise, PromiseState};
pub use thread::{LoopId, ScriptThread};
pub use value::Value;
