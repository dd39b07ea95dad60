//! Cross-thread event marshaling
//!
//! - [`queue`]: the lock-protected MPSC [`EventQueue`]
//! - [`relay`]: buffering for events raised before a wrapper exists
//! - [`dispatch`]: per-object loops drained on the scripting thread

pub mod dispatch;
pub mod queue;
pub mod relay;

pub use dispatch::{AsyncObject, AsyncWrap, Dispatcher, PromiseToken, Scope};
pub use queue::{event, Event, EventQueue};
pub use relay::Relay;
