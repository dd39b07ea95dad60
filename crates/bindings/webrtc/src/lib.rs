//! Data-channel bindings over rtcbridge core
//!
//! [`Bindings`] owns everything process-wide: the scripting thread, the
//! engine factory, and the registry mapping engine channel handles to their
//! one `RTCDataChannel` wrapper. It is created by [`Bindings::init`] and
//! torn down by [`Bindings::teardown`]; wrappers receive it explicitly.
//!
//! ```no_run
//! use std::sync::Arc;
//! use rtcbridge_core::ScriptThread;
//! use rtcbridge_webrtc::{Bindings, BindingsConfig, LoopbackEngine, PeerConnectionFactory};
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = BindingsConfig::from_env();
//! let thread = ScriptThread::new(&config.bridge);
//! let engine = Arc::new(LoopbackEngine::new(&config.loopback)?);
//! let factory = Arc::new(PeerConnectionFactory::new(engine, config.factory));
//! let bindings = Bindings::init(&thread, factory);
//! let exports = bindings.exports();
//! let pc = exports.call_method(thread.env(), "RTCPeerConnection", &[]);
//! # drop(pc);
//! bindings.teardown();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod data_channel;
pub mod engine;
pub mod factory;
pub mod loopback;
pub mod peer_connection;
pub mod stats;

use std::rc::Rc;
use std::sync::Arc;

use rtcbridge_core::script::{Function, Object, Value};
use rtcbridge_core::{HandleKey, ScriptThread, WrapRegistry};
use tracing::debug;

pub use config::{BindingsConfig, FactoryConfig, LoopbackConfig};
pub use data_channel::{BinaryType, RtcDataChannel, Snapshot};
pub use engine::{
    DataBuffer, DataChannelInit, DataChannelInterface, DataChannelObserver, DataState, Engine,
    EngineError, EngineResult, PeerConnectionInterface, PeerConnectionObserver,
    PeerConnectionState,
};
pub use factory::PeerConnectionFactory;
pub use loopback::{LoopbackDataChannel, LoopbackEngine, LoopbackPeerConnection};
pub use peer_connection::{RtcDataChannelInit, RtcPeerConnection};

pub type DataChannelRegistry = WrapRegistry<HandleKey<dyn DataChannelInterface>, Rc<RtcDataChannel>>;

pub struct Bindings {
    thread: ScriptThread,
    factory: Arc<PeerConnectionFactory>,
    data_channels: DataChannelRegistry,
}

impl Bindings {
    pub fn init(thread: &ScriptThread, factory: Arc<PeerConnectionFactory>) -> Rc<Self> {
        debug!(target: "rtcbridge::webrtc", "bindings initialized");
        Rc::new(Self {
            thread: thread.clone(),
            factory,
            data_channels: WrapRegistry::new("RTCDataChannel"),
        })
    }

    pub fn thread(&self) -> &ScriptThread {
        &self.thread
    }

    pub fn factory(&self) -> &Arc<PeerConnectionFactory> {
        &self.factory
    }

    pub fn data_channels(&self) -> &DataChannelRegistry {
        &self.data_channels
    }

    /// The live wrapper bound to `handle`, if any
    pub fn data_channel(&self, handle: &Arc<dyn DataChannelInterface>) -> Option<Rc<RtcDataChannel>> {
        self.data_channels.get(&HandleKey::of(handle))
    }

    pub fn live_data_channels(&self) -> usize {
        self.data_channels.len()
    }

    /// Constructors exposed to scripts
    pub fn exports(self: &Rc<Self>) -> Object {
        let exports = Object::new();
        let bindings = self.clone();
        exports.define_method(Function::new("RTCPeerConnection", move |env, _, _| {
            match RtcPeerConnection::create(&bindings) {
                Ok(connection) => connection.object().map(Value::Object).unwrap_or_default(),
                Err(error) => {
                    peer_connection::throw_engine_error(env, &error);
                    Value::Undefined
                }
            }
        }));
        exports.define_method(Function::new("RTCDataChannel", |env, _, _| {
            env.throw_type_error("Illegal constructor");
            Value::Undefined
        }));
        exports.freeze();
        exports
    }

    /// Stop every dispatch loop and forget every binding
    ///
    /// Running loops hold their wrappers, which hold the bindings; this is
    /// what breaks that cycle.
    pub fn teardown(&self) {
        let loops = self.thread.shutdown();
        let bindings = self.data_channels.clear();
        debug!(target: "rtcbridge::webrtc", loops, bindings, "bindings torn down");
    }
}
