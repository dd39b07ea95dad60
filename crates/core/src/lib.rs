//! rtcbridge core
//!
//! Bridges a multi-threaded native engine to a single-threaded scripting
//! runtime. The crate is organised leaves first:
//!
//! - [`validation`]: values or accumulated error messages
//! - [`script`]: the scripting runtime model (values, environment, thread)
//! - [`convert`]: bidirectional conversions between native types and [`script::Value`]
//! - [`event`]: cross-thread event queues and the per-object dispatch loop
//! - [`wrap`]: one wrapper per native handle
//!
//! Native threads only ever touch [`event::Dispatcher`] and
//! [`event::Relay`]; everything else lives on the [`script::ScriptThread`].

pub mod config;
pub mod convert;
pub mod error;
pub mod event;
pub mod logging;
pub mod script;
pub mod validation;
pub mod wrap;

pub use config::BridgeConfig;
pub use convert::{from_script, to_script, FromScript, ToScript};
pub use error::{Error, Result};
pub use event::{event, AsyncObject, AsyncWrap, Dispatcher, Event, EventQueue, Relay, Scope};
pub use script::{Env, ScriptThread, Value};
pub use validation::{Errors, Validation};
pub use wrap::{HandleKey, WrapRegistry};
