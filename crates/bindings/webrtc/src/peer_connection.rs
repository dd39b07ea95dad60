//! `RTCPeerConnection`, data-channel surface only

use std::rc::{Rc, Weak};
use std::sync::Arc;

use rtcbridge_core::convert::{optional, with_default, ObjectBuilder};
use rtcbridge_core::event::{Dispatcher, PromiseToken, Scope};
use rtcbridge_core::script::{arg, Env, Function, Object, ScriptError, Value, WeakObject};
use rtcbridge_core::{
    combine, convert, event, from_script, to_script, AsyncObject, AsyncWrap, Errors, FromScript,
    ToScript, Validation,
};
use tracing::{debug, trace};

use crate::data_channel::{callback, ChannelObserver, RtcDataChannel};
use crate::engine::{
    DataChannelInit, DataChannelInterface, EngineError, EngineResult, PeerConnectionInterface,
    PeerConnectionObserver, PeerConnectionState,
};
use crate::Bindings;

const CLOSED: &str = "RTCPeerConnection is closed";

/// `RTCDataChannelInit` as passed to `createDataChannel`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcDataChannelInit {
    pub ordered: bool,
    pub max_packet_life_time: Option<u16>,
    pub max_retransmits: Option<u16>,
    pub protocol: String,
    pub negotiated: bool,
    pub id: Option<u16>,
}

impl Default for RtcDataChannelInit {
    fn default() -> Self {
        DataChannelInit::default().into()
    }
}

impl RtcDataChannelInit {
    fn validate(self) -> Validation<Self> {
        let mut errors = Vec::new();
        if self.max_packet_life_time.is_some() && self.max_retransmits.is_some() {
            errors.push("Cannot set both maxPacketLifeTime and maxRetransmits".to_string());
        }
        if self.negotiated && self.id.is_none() {
            errors.push("Negotiated channels require an id".to_string());
        }
        match Errors::from_vec(errors) {
            Some(errors) => Validation::invalid_all(errors),
            None => Validation::pure(self),
        }
    }
}

impl FromScript for RtcDataChannelInit {
    fn from_script(env: &Env, value: &Value) -> Validation<Self> {
        let Value::Object(object) = value else {
            return convert::expected("an RTCDataChannelInit", value);
        };
        combine!(
            with_default(env, object, "ordered", true),
            optional::<u16>(env, object, "maxPacketLifeTime"),
            optional::<u16>(env, object, "maxRetransmits"),
            with_default(env, object, "protocol", String::new()),
            with_default(env, object, "negotiated", false),
            optional::<u16>(env, object, "id")
            => |ordered, max_packet_life_time, max_retransmits, protocol, negotiated, id| {
                RtcDataChannelInit {
                    ordered,
                    max_packet_life_time,
                    max_retransmits,
                    protocol,
                    negotiated,
                    id,
                }
            }
        )
        .and_then(RtcDataChannelInit::validate)
    }
}

impl From<DataChannelInit> for RtcDataChannelInit {
    fn from(init: DataChannelInit) -> Self {
        Self {
            ordered: init.ordered,
            max_packet_life_time: init.max_packet_life_time,
            max_retransmits: init.max_retransmits,
            protocol: init.protocol,
            negotiated: init.negotiated,
            id: init.id,
        }
    }
}

impl From<RtcDataChannelInit> for DataChannelInit {
    fn from(init: RtcDataChannelInit) -> Self {
        Self {
            ordered: init.ordered,
            max_packet_life_time: init.max_packet_life_time,
            max_retransmits: init.max_retransmits,
            protocol: init.protocol,
            negotiated: init.negotiated,
            id: init.id,
        }
    }
}

// ============================================================================
// State and observer
// ============================================================================

pub struct PeerState {
    bindings: Rc<Bindings>,
    /// Engine connection; `None` once closed
    handle: Option<Arc<dyn PeerConnectionInterface>>,
    channels: Vec<Weak<RtcDataChannel>>,
    connection_state: PeerConnectionState,
}

impl PeerState {
    fn track(&mut self, channel: &Rc<RtcDataChannel>) {
        self.channels.retain(|weak| weak.strong_count() > 0);
        self.channels.push(Rc::downgrade(channel));
    }

    fn on_remote_channel(
        &mut self,
        scope: &mut Scope<'_>,
        handle: Arc<dyn DataChannelInterface>,
        observer: Arc<ChannelObserver>,
    ) {
        if self.handle.is_none() {
            handle.unregister_observer();
            return;
        }
        let channel = RtcDataChannel::get_or_create(&self.bindings, handle, &observer);
        self.track(&channel);
        let Some(object) = channel.object() else {
            return;
        };
        let value = ObjectBuilder::new(scope.env())
            .field("channel", &Value::Object(object))
            .build();
        callback(scope, "ondatachannel", value);
    }
}

/// Engine-thread observer of one peer connection
struct PeerObserver {
    dispatcher: Dispatcher<PeerState>,
}

impl PeerConnectionObserver for PeerObserver {
    fn on_data_channel(&self, handle: Arc<dyn DataChannelInterface>) {
        // Registered here so nothing the channel raises before the wrapper exists is lost.
        let observer = ChannelObserver::register(&handle);
        let announced = handle.clone();
        let dispatched = self.dispatcher.dispatch(event(move |peer: &mut PeerState, scope| {
            peer.on_remote_channel(scope, announced, observer);
        }));
        if !dispatched {
            handle.unregister_observer();
        }
    }

    fn on_connection_state_change(&self, state: PeerConnectionState) {
        self.dispatcher.dispatch(event(move |peer: &mut PeerState, scope| {
            if peer.handle.is_none() {
                return;
            }
            peer.connection_state = state;
            let value = to_script(scope.env(), &state);
            callback(scope, "onconnectionstatechange", value);
        }));
    }
}

// ============================================================================
// Wrapper
// ============================================================================

pub struct RtcPeerConnection {
    async_object: AsyncObject<PeerState>,
    object: WeakObject,
}

impl AsyncWrap for RtcPeerConnection {
    type State = PeerState;

    fn async_object(&self) -> &AsyncObject<PeerState> {
        &self.async_object
    }
}

impl RtcPeerConnection {
    /// New connection on the bindings' factory, with its dispatch loop running
    pub fn create(bindings: &Rc<Bindings>) -> EngineResult<Rc<Self>> {
        let thread = bindings.thread();
        let async_object = AsyncObject::new(
            thread,
            "RTCPeerConnection",
            PeerState {
                bindings: bindings.clone(),
                handle: None,
                channels: Vec::new(),
                connection_state: PeerConnectionState::New,
            },
        );
        let observer = Arc::new(PeerObserver {
            dispatcher: async_object.dispatcher(),
        });
        let handle = bindings.factory().create_peer_connection(observer)?;
        async_object.state_mut().handle = Some(handle);

        let object = Object::with_class("RTCPeerConnection");
        let connection = Rc::new(Self {
            async_object,
            object: object.downgrade(),
        });
        install(&object);
        object.set_internal(connection.clone());
        thread.start(connection.clone(), object);
        Ok(connection)
    }

    pub fn object(&self) -> Option<Object> {
        self.object.upgrade()
    }

    pub fn connection_state(&self) -> PeerConnectionState {
        self.async_object.state().connection_state
    }

    pub fn is_closed(&self) -> bool {
        self.async_object.state().handle.is_none()
    }

    /// Wrappers of the channels created on or announced to this connection
    pub fn data_channels(&self) -> Vec<Rc<RtcDataChannel>> {
        self.async_object
            .state()
            .channels
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    fn handle(&self) -> Option<Arc<dyn PeerConnectionInterface>> {
        self.async_object.state().handle.clone()
    }

    fn create_data_channel(&self, env: &Env, args: &[Value]) -> Value {
        let Some(handle) = self.handle() else {
            rtcbridge_core::Error::InvalidState(CLOSED.to_string()).throw(env);
            return Value::Undefined;
        };
        let label = from_script::<String>(env, &arg(args, 0)).context("label");
        let init = from_script::<Option<RtcDataChannelInit>>(env, &arg(args, 1)).context("init");
        let Some((label, init)) = label.zip(init).or_throw(env) else {
            return Value::Undefined;
        };
        let init: DataChannelInit = init.unwrap_or_default().into();

        let channel = match handle.create_data_channel(&label, &init) {
            Ok(channel) => channel,
            Err(error) => {
                env.throw_error(error.to_script_error());
                return Value::Undefined;
            }
        };
        let bindings = self.async_object.state().bindings.clone();
        let channel = RtcDataChannel::from_handle(&bindings, channel);
        self.async_object.state_mut().track(&channel);
        debug!(target: "rtcbridge::webrtc", %label, "created data channel");
        channel.object().map(Value::Object).unwrap_or_default()
    }

    /// Promise settled on this connection's loop from an engine callback
    fn request<T, F>(&self, env: &Env, start: F) -> Value
    where
        T: ToScript + Send + 'static,
        F: FnOnce(&dyn PeerConnectionInterface, Box<dyn FnOnce(EngineResult<T>) + Send>),
    {
        let (token, promise) = self.async_object.create_promise(env);
        match self.handle() {
            Some(handle) => {
                let dispatcher = self.async_object.dispatcher();
                start(
                    handle.as_ref(),
                    Box::new(move |result| {
                        if !dispatcher.dispatch(event(move |_: &mut PeerState, scope| {
                            settle(scope, token, result);
                        })) {
                            trace!(target: "rtcbridge::webrtc", "stats arrived after close");
                        }
                    }),
                );
            }
            None => self
                .async_object
                .reject_now(env, token, ScriptError::invalid_state(CLOSED)),
        }
        Value::Promise(promise)
    }

    fn close(&self) {
        let (bindings, handle, channels) = {
            let mut state = self.async_object.state_mut();
            let Some(handle) = state.handle.take() else {
                return;
            };
            state.connection_state = PeerConnectionState::Closed;
            (state.bindings.clone(), handle, std::mem::take(&mut state.channels))
        };
        handle.close();
        let thread = bindings.thread();
        for channel in channels.iter().filter_map(Weak::upgrade) {
            channel.on_peer_connection_closed(thread);
        }
        self.async_object.stop(thread);
        debug!(target: "rtcbridge::webrtc", channels = channels.len(), "peer connection closed");
    }
}

fn settle<T: ToScript>(scope: &mut Scope<'_>, token: PromiseToken, result: EngineResult<T>) {
    match result {
        Ok(report) => match to_script(scope.env(), &report) {
            Validation::Valid(value) => scope.resolve(token, value),
            Validation::Invalid(errors) => {
                scope.reject_with(token, ScriptError::type_error(errors.to_string()))
            }
        },
        Err(error) => scope.reject_with(token, error.to_script_error()),
    }
}

impl Drop for RtcPeerConnection {
    fn drop(&mut self) {
        if let Some(handle) = self.async_object.get_mut().handle.take() {
            handle.close();
        }
    }
}

// ============================================================================
// Script surface
// ============================================================================

fn unwrap(env: &Env, this: &Value) -> Option<Rc<RtcPeerConnection>> {
    let connection = this
        .as_object()
        .and_then(|object| object.internal::<RtcPeerConnection>());
    if connection.is_none() {
        env.throw_type_error("Illegal invocation");
    }
    connection
}

fn install(object: &Object) {
    object.define_accessor(
        "connectionState",
        Some(Function::new("get connectionState", |env, this, _| {
            let Some(connection) = unwrap(env, this) else {
                return Value::Undefined;
            };
            Value::from(connection.connection_state().as_str())
        })),
        None,
    );
    object.define_method(Function::new("createDataChannel", |env, this, args| {
        match unwrap(env, this) {
            Some(connection) => connection.create_data_channel(env, args),
            None => Value::Undefined,
        }
    }));
    object.define_method(Function::new("getStats", |env, this, _| {
        match unwrap(env, this) {
            Some(connection) => {
                connection.request(env, |handle, callback| handle.get_stats(callback))
            }
            None => Value::Undefined,
        }
    }));
    object.define_method(Function::new("getLegacyStats", |env, this, _| {
        match unwrap(env, this) {
            Some(connection) => {
                connection.request(env, |handle, callback| handle.get_legacy_stats(callback))
            }
            None => Value::Undefined,
        }
    }));
    object.define_method(Function::new("close", |env, this, _| {
        if let Some(connection) = unwrap(env, this) {
            connection.close();
        }
        Value::Undefined
    }));
}

/// Engine errors raised while constructing a connection
pub(crate) fn throw_engine_error(env: &Env, error: &EngineError) {
    env.throw_error(error.to_script_error());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_object(env: &Env, fields: &[(&str, Value)]) -> Value {
        let object = Object::new();
        for (key, value) in fields {
            object.set(env, key, value.clone());
        }
        Value::Object(object)
    }

    #[test]
    fn test_init_defaults() {
        let env = Env::default();
        let init = from_script::<RtcDataChannelInit>(&env, &init_object(&env, &[]));
        assert_eq!(init, Validation::pure(RtcDataChannelInit::default()));
        assert!(RtcDataChannelInit::default().ordered);
    }

    #[test]
    fn test_init_reports_every_problem_at_once() {
        let env = Env::default();
        let value = init_object(
            &env,
            &[
                ("maxPacketLifeTime", Value::Number(100.0)),
                ("maxRetransmits", Value::Number(3.0)),
                ("negotiated", Value::Boolean(true)),
            ],
        );
        let init = from_script::<RtcDataChannelInit>(&env, &value);
        assert_eq!(
            init.errors().unwrap().messages(),
            [
                "Cannot set both maxPacketLifeTime and maxRetransmits",
                "Negotiated channels require an id",
            ]
        );
    }

    #[test]
    fn test_init_field_errors_accumulate_before_cross_checks() {
        let env = Env::default();
        let value = init_object(
            &env,
            &[
                ("ordered", Value::from("yes")),
                ("id", Value::Number(70000.0)),
            ],
        );
        let init = from_script::<RtcDataChannelInit>(&env, &value);
        assert_eq!(
            init.errors().unwrap().messages(),
            [
                "ordered: Expected a boolean, got string",
                "id: Expected an integer in [0, 65535], got 70000",
            ]
        );
    }

    #[test]
    fn test_init_converts_to_engine_parameters() {
        let init = RtcDataChannelInit {
            negotiated: true,
            id: Some(4),
            protocol: "chat".into(),
            ..RtcDataChannelInit::default()
        };
        let engine: DataChannelInit = init.into();
        assert!(engine.negotiated);
        assert_eq!(engine.id, Some(4));
        assert_eq!(engine.protocol, "chat");
    }
}
