//! RTCDataChannel wrappers driven from engine threads

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rtcbridge_core::script::{exception_message, Function, Object, ScriptThread, TypedArray, Value};
use rtcbridge_core::AsyncWrap;
use rtcbridge_webrtc::{
    Bindings, BindingsConfig, DataBuffer, DataChannelInit, DataState, LoopbackDataChannel,
    LoopbackEngine, PeerConnectionFactory, RtcDataChannel,
};

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    thread: ScriptThread,
    engine: Arc<LoopbackEngine>,
    bindings: Rc<Bindings>,
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.bindings.teardown();
    }
}

fn harness() -> Harness {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let config = BindingsConfig::default();
    let thread = ScriptThread::new(&config.bridge);
    let engine = Arc::new(LoopbackEngine::new(&config.loopback).unwrap());
    let factory = Arc::new(PeerConnectionFactory::new(engine.clone(), config.factory));
    let bindings = Bindings::init(&thread, factory);
    Harness {
        thread,
        engine,
        bindings,
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::ArrayBuffer(buffer) => format!("bytes{:?}", buffer.to_vec()),
        other => format!("{:?}", other),
    }
}

/// Install `onstatechange` / `onmessage` handlers that log what they receive
fn record(env: &rtcbridge_core::Env, object: &Object) -> Rc<RefCell<Vec<String>>> {
    let log = Rc::new(RefCell::new(Vec::new()));
    for (name, event) in [("onstatechange", "statechange"), ("onmessage", "message")] {
        let log = log.clone();
        let handler = Function::new(name, move |_, _, args| {
            let arg = args.first().cloned().unwrap_or_default();
            log.borrow_mut().push(format!("{}:{}", event, describe(&arg)));
            Value::Undefined
        });
        assert!(object.set(env, name, Value::Function(handler)));
    }
    log
}

fn standalone(h: &Harness, init: DataChannelInit) -> (Arc<LoopbackDataChannel>, Rc<RtcDataChannel>, Object) {
    let handle = LoopbackDataChannel::standalone(&h.engine, "chat", init);
    let channel = RtcDataChannel::from_handle(&h.bindings, handle.clone());
    let object = channel.object().unwrap();
    (handle, channel, object)
}

#[test]
fn test_open_message_close_from_engine_thread() {
    let h = harness();
    let (handle, channel, object) = standalone(&h, DataChannelInit::default());
    let log = record(h.thread.env(), &object);

    let producer = {
        let handle = handle.clone();
        thread::spawn(move || {
            handle.simulate_state(DataState::Open);
            handle.simulate_message(DataBuffer::text("hi"));
            handle.simulate_state(DataState::Closed);
        })
    };
    producer.join().unwrap();

    assert!(h.thread.run_until(|| log.borrow().len() == 3, WAIT));
    assert_eq!(*log.borrow(), ["statechange:open", "message:hi", "statechange:closed"]);
    assert!(channel.is_detached());
    assert!(!channel.async_object().is_running());
    assert!(!handle.has_observer());

    handle.simulate_message(DataBuffer::text("late"));
    assert_eq!(h.thread.run_until_idle(), 0);
    assert_eq!(log.borrow().len(), 3);
}

#[test]
fn test_events_before_first_observer_are_delivered_in_order() {
    let h = harness();
    let handle = LoopbackDataChannel::standalone(&h.engine, "early", DataChannelInit::default());
    handle.simulate_state(DataState::Open);
    handle.simulate_message(DataBuffer::text("first"));

    let channel = RtcDataChannel::from_handle(&h.bindings, handle.clone());
    let log = record(h.thread.env(), &channel.object().unwrap());
    handle.simulate_message(DataBuffer::text("second"));

    assert!(h.thread.run_until(|| log.borrow().len() == 3, WAIT));
    assert_eq!(*log.borrow(), ["statechange:open", "message:first", "message:second"]);
}

#[test]
fn test_snapshot_outlives_the_native_handle() {
    let h = harness();
    let init = DataChannelInit {
        ordered: false,
        max_packet_life_time: Some(500),
        protocol: "chat-v1".into(),
        negotiated: true,
        id: Some(7),
        ..DataChannelInit::default()
    };
    let (handle, channel, object) = standalone(&h, init);
    let released = Arc::downgrade(&handle);

    handle.simulate_state(DataState::Closed);
    drop(handle);
    assert!(h.thread.run_until(|| channel.is_detached(), WAIT));
    assert!(released.upgrade().is_none());

    let env = h.thread.env();
    assert_eq!(object.get(env, "label"), Value::from("chat"));
    assert_eq!(object.get(env, "id"), Value::Number(7.0));
    assert_eq!(object.get(env, "maxPacketLifeTime"), Value::Number(500.0));
    assert_eq!(object.get(env, "maxRetransmits"), Value::Null);
    assert_eq!(object.get(env, "negotiated"), Value::Boolean(true));
    assert_eq!(object.get(env, "ordered"), Value::Boolean(false));
    assert_eq!(object.get(env, "protocol"), Value::from("chat-v1"));
    assert_eq!(object.get(env, "bufferedAmount"), Value::Number(0.0));
    assert_eq!(object.get(env, "readyState"), Value::from("closed"));
    assert_eq!(object.get(env, "priority"), Value::from("high"));
}

#[test]
fn test_send_after_close_is_invalid_state() {
    let h = harness();
    let (handle, channel, object) = standalone(&h, DataChannelInit::default());
    let env = h.thread.env();

    handle.simulate_state(DataState::Open);
    object.call_method(env, "send", &[Value::from("a")]);
    assert!(!env.is_exception_pending());
    assert_eq!(handle.take_sent(), [DataBuffer::text("a")]);

    handle.simulate_state(DataState::Closed);
    assert!(h.thread.run_until(|| channel.is_detached(), WAIT));

    object.call_method(env, "send", &[Value::from("b")]);
    let exception = env.take_exception().unwrap();
    let error = exception.as_object().unwrap();
    assert_eq!(error.get(env, "name"), Value::from("InvalidStateError"));
    assert_eq!(
        exception_message(env, &exception),
        "RTCDataChannel.readyState is not 'open'"
    );
    assert!(handle.take_sent().is_empty());
}

#[test]
fn test_binary_payloads_both_ways() {
    let h = harness();
    let (handle, _channel, object) = standalone(&h, DataChannelInit::default());
    let env = h.thread.env();
    let log = record(env, &object);

    handle.simulate_state(DataState::Open);
    object.call_method(env, "send", &[Value::Uint8Array(TypedArray::from_bytes(&[1, 2, 3]))]);
    assert!(!env.is_exception_pending());
    assert_eq!(handle.take_sent(), [DataBuffer::binary(vec![1u8, 2, 3])]);

    handle.simulate_message(DataBuffer::binary(vec![9u8, 8]));
    assert!(h.thread.run_until(|| log.borrow().len() == 2, WAIT));
    assert_eq!(log.borrow()[1], "message:bytes[9, 8]");
}

#[test]
fn test_invalid_binary_type_is_a_type_error() {
    let h = harness();
    let (_handle, _channel, object) = standalone(&h, DataChannelInit::default());
    let env = h.thread.env();

    assert!(!object.set(env, "binaryType", "text"));
    let exception = env.take_exception().unwrap();
    assert_eq!(
        exception.as_object().unwrap().get(env, "name"),
        Value::from("TypeError")
    );
    assert_eq!(
        exception_message(env, &exception),
        "Expected a binary type ('arraybuffer', 'blob'), got 'text'"
    );
    assert_eq!(object.get(env, "binaryType"), Value::from("arraybuffer"));
}

#[test]
fn test_stopped_wrapper_is_released_from_the_registry() {
    let h = harness();
    let (handle, channel, object) = standalone(&h, DataChannelInit::default());
    assert_eq!(h.bindings.live_data_channels(), 1);

    handle.simulate_state(DataState::Closed);
    assert!(h.thread.run_until(|| channel.is_detached(), WAIT));
    assert_eq!(h.thread.active_loops(), 0);

    drop(object);
    drop(channel);
    assert_eq!(h.bindings.live_data_channels(), 0);

    let rebound = RtcDataChannel::from_handle(&h.bindings, handle.clone());
    assert_eq!(rebound.ready_state(), DataState::Closed);
    assert_eq!(h.bindings.live_data_channels(), 1);
}

#[test]
fn test_data_channel_cannot_be_constructed_by_scripts() {
    let h = harness();
    let env = h.thread.env();
    let exports = h.bindings.exports();

    exports.call_method(env, "RTCDataChannel", &[]);
    let exception = env.take_exception().unwrap();
    assert_eq!(exception_message(env, &exception), "Illegal constructor");
}
