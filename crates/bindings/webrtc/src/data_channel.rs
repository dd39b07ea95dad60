//! `RTCDataChannel`
//!
//! A wrapper is bound to one engine channel handle through the bindings'
//! wrap registry. Engine callbacks reach it through a [`ChannelObserver`],
//! registered on the handle before the wrapper exists; its relay buffers
//! until the wrapper attaches and forwards afterwards.
//!
//! While attached the wrapper holds the handle and answers getters from
//! it. On close, or when the owning peer connection closes, it unregisters
//! from the handle, takes a [`Snapshot`] of the attributes, and drops the
//! handle. Getters keep answering from the snapshot.

use std::rc::Rc;
use std::sync::Arc;

use bytes::Bytes;
use rtcbridge_core::event::{Relay, Scope};
use rtcbridge_core::script::{arg, Env, Function, Object, ScriptError, ScriptThread, Value, WeakObject};
use rtcbridge_core::{event, from_script, string_enum, to_script, AsyncObject, AsyncWrap, HandleKey, Validation};
use tracing::{debug, trace};

use crate::engine::{DataBuffer, DataChannelInterface, DataChannelObserver, DataState};
use crate::factory::PeerConnectionFactory;
use crate::Bindings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryType {
    ArrayBuffer,
    Blob,
}

string_enum!(BinaryType, "a binary type" {
    BinaryType::ArrayBuffer => "arraybuffer",
    BinaryType::Blob => "blob",
});

/// Attributes kept after the handle is released
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub id: Option<u16>,
    pub label: String,
    pub max_packet_life_time: Option<u16>,
    pub max_retransmits: Option<u16>,
    pub negotiated: bool,
    pub ordered: bool,
    pub protocol: String,
    pub buffered_amount: u64,
}

impl Snapshot {
    fn capture(handle: &dyn DataChannelInterface) -> Self {
        Self {
            id: handle.id(),
            label: handle.label(),
            max_packet_life_time: handle.max_packet_life_time(),
            max_retransmits: handle.max_retransmits(),
            negotiated: handle.negotiated(),
            ordered: handle.ordered(),
            protocol: handle.protocol(),
            buffered_amount: handle.buffered_amount(),
        }
    }
}

pub enum Attachment {
    Attached(Arc<dyn DataChannelInterface>),
    Detached(Snapshot),
}

pub struct ChannelState {
    attachment: Attachment,
    binary_type: BinaryType,
}

impl ChannelState {
    fn attached(handle: Arc<dyn DataChannelInterface>) -> Self {
        Self {
            attachment: Attachment::Attached(handle),
            binary_type: BinaryType::ArrayBuffer,
        }
    }

    pub fn handle(&self) -> Option<&Arc<dyn DataChannelInterface>> {
        match &self.attachment {
            Attachment::Attached(handle) => Some(handle),
            Attachment::Detached(_) => None,
        }
    }

    pub fn is_detached(&self) -> bool {
        matches!(self.attachment, Attachment::Detached(_))
    }

    /// Unregister from the handle, snapshot it and release it; idempotent
    pub fn detach(&mut self) -> bool {
        let Attachment::Attached(handle) = &self.attachment else {
            return false;
        };
        handle.unregister_observer();
        let snapshot = Snapshot::capture(handle.as_ref());
        debug!(target: "rtcbridge::webrtc", label = %snapshot.label, "data channel detached");
        self.attachment = Attachment::Detached(snapshot);
        true
    }

    /// `live` of the handle while attached, else `cached` of the snapshot
    fn read<T>(
        &self,
        live: impl FnOnce(&dyn DataChannelInterface) -> T,
        cached: impl FnOnce(&Snapshot) -> T,
    ) -> T {
        match &self.attachment {
            Attachment::Attached(handle) => live(handle.as_ref()),
            Attachment::Detached(snapshot) => cached(snapshot),
        }
    }

    pub fn ready_state(&self) -> DataState {
        self.read(|handle| handle.state(), |_| DataState::Closed)
    }

    pub fn snapshot(&self) -> Option<&Snapshot> {
        match &self.attachment {
            Attachment::Attached(_) => None,
            Attachment::Detached(snapshot) => Some(snapshot),
        }
    }
}

// ============================================================================
// Observer
// ============================================================================

/// Engine-thread observer of one channel handle
pub struct ChannelObserver {
    relay: Relay<ChannelState>,
}

impl ChannelObserver {
    /// Observer registered on `handle`, buffering until a wrapper attaches
    pub fn register(handle: &Arc<dyn DataChannelInterface>) -> Arc<Self> {
        let observer = Arc::new(Self {
            relay: Relay::new(),
        });
        handle.register_observer(observer.clone());
        observer
    }
}

impl DataChannelObserver for ChannelObserver {
    fn on_state_change(&self, state: DataState) {
        self.relay.enqueue(event(move |channel: &mut ChannelState, scope| {
            handle_state_change(channel, scope, state);
        }));
    }

    fn on_message(&self, buffer: DataBuffer) {
        self.relay.enqueue(event(move |_: &mut ChannelState, scope| {
            handle_message(scope, buffer);
        }));
    }
}

pub(crate) fn callback(scope: &mut Scope<'_>, name: &str, value: Validation<Value>) {
    match value {
        Validation::Valid(value) => scope.make_callback(name, vec![value]),
        Validation::Invalid(errors) => scope.report(errors.context(name)),
    }
}

fn handle_state_change(channel: &mut ChannelState, scope: &mut Scope<'_>, state: DataState) {
    match state {
        DataState::Open => {
            let value = to_script(scope.env(), &state);
            callback(scope, "onstatechange", value);
        }
        DataState::Closed => {
            channel.detach();
            let value = to_script(scope.env(), &state);
            callback(scope, "onstatechange", value);
            scope.stop();
        }
        DataState::Connecting | DataState::Closing => {
            trace!(target: "rtcbridge::webrtc", state = state.as_str(), "state not surfaced");
        }
    }
}

fn handle_message(scope: &mut Scope<'_>, buffer: DataBuffer) {
    let value = if buffer.binary {
        to_script(scope.env(), &buffer.data)
    } else {
        let text = String::from_utf8_lossy(&buffer.data);
        to_script(scope.env(), &*text)
    };
    callback(scope, "onmessage", value);
}

// ============================================================================
// Wrapper
// ============================================================================

pub struct RtcDataChannel {
    async_object: AsyncObject<ChannelState>,
    key: HandleKey<dyn DataChannelInterface>,
    bindings: Rc<Bindings>,
    factory: Arc<PeerConnectionFactory>,
    object: WeakObject,
}

impl AsyncWrap for RtcDataChannel {
    type State = ChannelState;

    fn async_object(&self) -> &AsyncObject<ChannelState> {
        &self.async_object
    }
}

impl RtcDataChannel {
    /// The wrapper of `handle`, registering an observer on it first
    pub fn from_handle(bindings: &Rc<Bindings>, handle: Arc<dyn DataChannelInterface>) -> Rc<Self> {
        let observer = ChannelObserver::register(&handle);
        Self::get_or_create(bindings, handle, &observer)
    }

    /// The wrapper of `handle`, created on first sight
    ///
    /// `observer` is the handle's registered observer; the wrapper takes
    /// over the events it buffered and everything it receives afterwards.
    pub fn get_or_create(
        bindings: &Rc<Bindings>,
        handle: Arc<dyn DataChannelInterface>,
        observer: &Arc<ChannelObserver>,
    ) -> Rc<Self> {
        let key = HandleKey::of(&handle);
        let channel = bindings
            .data_channels()
            .get_or_create(key.clone(), || Self::create(bindings, handle, key));
        let moved = observer.relay.attach(channel.async_object.dispatcher());
        trace!(target: "rtcbridge::webrtc", moved, "observer attached");
        channel
    }

    fn create(
        bindings: &Rc<Bindings>,
        handle: Arc<dyn DataChannelInterface>,
        key: HandleKey<dyn DataChannelInterface>,
    ) -> Rc<Self> {
        let thread = bindings.thread();
        let object = Object::with_class("RTCDataChannel");
        let label = handle.label();
        let channel = Rc::new(Self {
            async_object: AsyncObject::new(thread, "RTCDataChannel", ChannelState::attached(handle)),
            key,
            bindings: bindings.clone(),
            factory: bindings.factory().clone(),
            object: object.downgrade(),
        });
        install(&object);
        object.set_internal(channel.clone());
        thread.start(channel.clone(), object);
        debug!(target: "rtcbridge::webrtc", %label, "data channel wrapped");
        channel
    }

    /// The script object, while anything keeps it alive
    pub fn object(&self) -> Option<Object> {
        self.object.upgrade()
    }

    pub fn is_detached(&self) -> bool {
        self.async_object.state().is_detached()
    }

    pub fn ready_state(&self) -> DataState {
        self.async_object.state().ready_state()
    }

    /// Detach and stop; called by the owning peer connection on close
    pub fn on_peer_connection_closed(&self, thread: &ScriptThread) {
        let detached = self.async_object.state_mut().detach();
        if detached {
            self.async_object.stop(thread);
        }
    }

    fn send(&self, env: &Env, data: &Value) {
        let handle = {
            let state = self.async_object.state();
            match state.handle() {
                Some(handle) if handle.state() == DataState::Open => handle.clone(),
                _ => {
                    env.throw_error(ScriptError::invalid_state(
                        "RTCDataChannel.readyState is not 'open'",
                    ));
                    return;
                }
            }
        };

        let buffer = match data {
            Value::String(text) => DataBuffer::text(text.as_str()),
            Value::ArrayBuffer(_) | Value::Uint8Array(_) => {
                match from_script::<Bytes>(env, data).or_throw(env) {
                    Some(bytes) => DataBuffer::binary(bytes),
                    None => return,
                }
            }
            _ => {
                env.throw_type_error("Expected a Blob or ArrayBuffer");
                return;
            }
        };

        let limit = self.factory.max_message_size();
        if buffer.len() > limit {
            env.throw_type_error(format!(
                "Message of {} bytes exceeds the maximum message size of {} bytes",
                buffer.len(),
                limit
            ));
            return;
        }
        if !handle.send(&buffer) {
            env.throw_error(ScriptError::operation_error("Failure to send data"));
        }
    }

    fn close(&self) {
        let handle = self.async_object.state().handle().cloned();
        if let Some(handle) = handle {
            handle.close();
        }
    }
}

impl Drop for RtcDataChannel {
    fn drop(&mut self) {
        self.async_object.get_mut().detach();
        let this: *const Self = self;
        self.bindings.data_channels().release(&self.key, this);
    }
}

// ============================================================================
// Script surface
// ============================================================================

fn unwrap(env: &Env, this: &Value) -> Option<Rc<RtcDataChannel>> {
    let channel = this.as_object().and_then(|object| object.internal::<RtcDataChannel>());
    if channel.is_none() {
        env.throw_type_error("Illegal invocation");
    }
    channel
}

/// Read-only accessor converting what `read` returns
fn getter<T, F>(object: &Object, name: &'static str, read: F)
where
    T: rtcbridge_core::ToScript,
    F: Fn(&RtcDataChannel) -> T + 'static,
{
    let get = Function::new(format!("get {}", name), move |env, this, _| {
        let Some(channel) = unwrap(env, this) else {
            return Value::Undefined;
        };
        to_script(env, &read(&channel)).or_throw(env).unwrap_or_default()
    });
    object.define_accessor(name, Some(get), None);
}

fn install(object: &Object) {
    getter(object, "bufferedAmount", |channel| {
        channel
            .async_object
            .state()
            .read(|handle| handle.buffered_amount(), |snapshot| snapshot.buffered_amount)
    });
    getter(object, "id", |channel| {
        channel.async_object.state().read(|handle| handle.id(), |snapshot| snapshot.id)
    });
    getter(object, "label", |channel| {
        channel
            .async_object
            .state()
            .read(|handle| handle.label(), |snapshot| snapshot.label.clone())
    });
    getter(object, "maxPacketLifeTime", |channel| {
        channel.async_object.state().read(
            |handle| handle.max_packet_life_time(),
            |snapshot| snapshot.max_packet_life_time,
        )
    });
    getter(object, "maxRetransmits", |channel| {
        channel
            .async_object
            .state()
            .read(|handle| handle.max_retransmits(), |snapshot| snapshot.max_retransmits)
    });
    getter(object, "negotiated", |channel| {
        channel
            .async_object
            .state()
            .read(|handle| handle.negotiated(), |snapshot| snapshot.negotiated)
    });
    getter(object, "ordered", |channel| {
        channel
            .async_object
            .state()
            .read(|handle| handle.ordered(), |snapshot| snapshot.ordered)
    });
    getter(object, "priority", |_| "high");
    getter(object, "protocol", |channel| {
        channel
            .async_object
            .state()
            .read(|handle| handle.protocol(), |snapshot| snapshot.protocol.clone())
    });
    getter(object, "readyState", |channel| channel.ready_state());

    let get_binary_type = Function::new("get binaryType", |env, this, _| {
        let Some(channel) = unwrap(env, this) else {
            return Value::Undefined;
        };
        let binary_type = channel.async_object.state().binary_type;
        to_script(env, &binary_type).or_throw(env).unwrap_or_default()
    });
    let set_binary_type = Function::new("set binaryType", |env, this, args| {
        let Some(channel) = unwrap(env, this) else {
            return Value::Undefined;
        };
        if let Some(binary_type) = from_script::<BinaryType>(env, &arg(args, 0)).or_throw(env) {
            channel.async_object.state_mut().binary_type = binary_type;
        }
        Value::Undefined
    });
    object.define_accessor("binaryType", Some(get_binary_type), Some(set_binary_type));

    object.define_method(Function::new("send", |env, this, args| {
        if let Some(channel) = unwrap(env, this) {
            channel.send(env, &arg(args, 0));
        }
        Value::Undefined
    }));
    object.define_method(Function::new("close", |env, this, _| {
        if let Some(channel) = unwrap(env, this) {
            channel.close();
        }
        Value::Undefined
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BindingsConfig;
    use crate::loopback::{LoopbackDataChannel, LoopbackEngine};
    use crate::engine::DataChannelInit;
    use rtcbridge_core::script::ErrorKind;

    fn bindings() -> (ScriptThread, Arc<LoopbackEngine>, Rc<Bindings>) {
        let config = BindingsConfig::default();
        let thread = ScriptThread::new(&config.bridge);
        let engine = Arc::new(LoopbackEngine::new(&config.loopback).unwrap());
        let factory = Arc::new(PeerConnectionFactory::new(engine.clone(), config.factory.clone()));
        let bindings = Bindings::init(&thread, factory);
        (thread, engine, bindings)
    }

    fn thrown_kind(env: &Env) -> Option<String> {
        let exception = env.take_exception()?;
        let object = exception.as_object()?.clone();
        object.get(env, "name").as_str().map(str::to_string)
    }

    #[test]
    fn test_detach_is_idempotent_and_keeps_snapshot() {
        let (_thread, engine, _bindings) = bindings();
        let init = DataChannelInit {
            max_retransmits: Some(3),
            protocol: "chat-v1".into(),
            ..DataChannelInit::default()
        };
        let handle = LoopbackDataChannel::standalone(&engine, "chat", init);
        let mut state = ChannelState::attached(handle.clone());

        assert!(state.detach());
        assert!(!state.detach());
        drop(handle);

        let snapshot = state.snapshot().unwrap();
        assert_eq!(snapshot.label, "chat");
        assert_eq!(snapshot.max_retransmits, Some(3));
        assert_eq!(snapshot.protocol, "chat-v1");
        assert!(snapshot.ordered);
        assert_eq!(state.ready_state(), DataState::Closed);
    }

    #[test]
    fn test_wrapper_is_unique_per_handle() {
        let (thread, engine, bindings) = bindings();
        let handle: Arc<dyn DataChannelInterface> =
            LoopbackDataChannel::standalone(&engine, "chat", DataChannelInit::default());
        let first = RtcDataChannel::from_handle(&bindings, handle.clone());
        let second = RtcDataChannel::from_handle(&bindings, handle.clone());
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(bindings.data_channels().len(), 1);
        thread.shutdown();
    }

    #[test]
    fn test_send_before_open_is_invalid_state() {
        let (thread, engine, bindings) = bindings();
        let handle = LoopbackDataChannel::standalone(&engine, "chat", DataChannelInit::default());
        let channel = RtcDataChannel::from_handle(&bindings, handle);
        let object = channel.object().unwrap();

        object.call_method(thread.env(), "send", &[Value::from("hi")]);
        assert_eq!(thrown_kind(thread.env()).as_deref(), Some(ErrorKind::InvalidStateError.name()));
        thread.shutdown();
    }

    #[test]
    fn test_binary_type_rejects_unknown_values() {
        let (thread, engine, bindings) = bindings();
        let handle = LoopbackDataChannel::standalone(&engine, "chat", DataChannelInit::default());
        let channel = RtcDataChannel::from_handle(&bindings, handle);
        let object = channel.object().unwrap();
        let env = thread.env();

        assert_eq!(object.get(env, "binaryType"), Value::from("arraybuffer"));
        assert!(object.set(env, "binaryType", "blob"));
        assert_eq!(object.get(env, "binaryType"), Value::from("blob"));

        assert!(!object.set(env, "binaryType", "string"));
        assert_eq!(thrown_kind(env).as_deref(), Some("TypeError"));
        assert_eq!(object.get(env, "binaryType"), Value::from("blob"));
        thread.shutdown();
    }

    #[test]
    fn test_oversize_and_mistyped_payloads_are_type_errors() {
        let (thread, engine, bindings) = bindings();
        let handle = LoopbackDataChannel::standalone(&engine, "chat", DataChannelInit::default());
        handle.simulate_state(DataState::Open);
        let channel = RtcDataChannel::from_handle(&bindings, handle.clone());
        let object = channel.object().unwrap();
        let env = thread.env();

        object.call_method(env, "send", &[Value::Number(1.0)]);
        let exception = env.take_exception().unwrap();
        assert_eq!(
            rtcbridge_core::script::exception_message(env, &exception),
            "Expected a Blob or ArrayBuffer"
        );

        let big = "x".repeat(bindings.factory().max_message_size() + 1);
        object.call_method(env, "send", &[Value::from(big)]);
        assert_eq!(thrown_kind(env).as_deref(), Some("TypeError"));

        object.call_method(env, "send", &[Value::from("ok")]);
        assert!(!env.is_exception_pending());
        assert_eq!(handle.take_sent(), [DataBuffer::text("ok")]);
        thread.shutdown();
    }
}
