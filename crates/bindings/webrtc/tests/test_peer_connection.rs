//! RTCPeerConnection data-channel surface over the loopback engine

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use rtcbridge_core::script::{
    arg, exception_message, Function, Object, PromiseState, ScriptThread, Value,
};
use rtcbridge_core::{AsyncWrap, Env};
use rtcbridge_webrtc::{
    Bindings, BindingsConfig, LoopbackEngine, PeerConnectionFactory, RtcDataChannel,
    RtcPeerConnection,
};

const WAIT: Duration = Duration::from_secs(5);

type Log = Rc<RefCell<Vec<String>>>;

struct Harness {
    thread: ScriptThread,
    engine: Arc<LoopbackEngine>,
    bindings: Rc<Bindings>,
    exports: Object,
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.bindings.teardown();
    }
}

impl Harness {
    fn new() -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let config = BindingsConfig::default();
        let thread = ScriptThread::new(&config.bridge);
        let engine = Arc::new(LoopbackEngine::new(&config.loopback).unwrap());
        let factory = Arc::new(PeerConnectionFactory::new(engine.clone(), config.factory));
        let bindings = Bindings::init(&thread, factory);
        let exports = bindings.exports();
        Self {
            thread,
            engine,
            bindings,
            exports,
        }
    }

    fn env(&self) -> &Env {
        self.thread.env()
    }

    fn peer_connection(&self) -> Object {
        let value = self.exports.call_method(self.env(), "RTCPeerConnection", &[]);
        value.as_object().cloned().unwrap()
    }

    /// Two connections, paired once `connect` is called
    fn pair(&self) -> (Object, Object) {
        (self.peer_connection(), self.peer_connection())
    }

    fn connect(&self) {
        let connections = self.engine.peer_connections();
        self.engine.connect(&connections[0], &connections[1]);
    }

    fn settle(&self, promise: &Value) -> PromiseState {
        let promise = promise.as_promise().unwrap().clone();
        assert!(self.thread.run_until(|| !promise.is_pending(), WAIT));
        promise.state()
    }
}

fn init(env: &Env, fields: &[(&str, Value)]) -> Value {
    let object = Object::new();
    for (key, value) in fields {
        object.set(env, key, value.clone());
    }
    Value::Object(object)
}

fn on(env: &Env, object: &Object, name: &str, log: &Log) {
    let log = log.clone();
    let event = name.trim_start_matches("on").to_string();
    let handler = Function::new(name, move |env, _, args| {
        let arg = arg(args, 0);
        let detail = match &arg {
            Value::String(text) => text.clone(),
            other => exception_message(env, other),
        };
        log.borrow_mut().push(format!("{}:{}", event, detail));
        Value::Undefined
    });
    assert!(object.set(env, name, Value::Function(handler)));
}

fn record_channel(env: &Env, channel: &Object) -> Log {
    let log = Log::default();
    on(env, channel, "onstatechange", &log);
    on(env, channel, "onmessage", &log);
    log
}

fn contains(log: &Log, entry: &str) -> bool {
    log.borrow().iter().any(|seen| seen == entry)
}

#[test]
fn test_announced_channel_exchanges_messages() {
    let h = Harness::new();
    let env = h.env();
    let (a, b) = h.pair();

    let states = Log::default();
    on(env, &a, "onconnectionstatechange", &states);

    let remote: Rc<RefCell<Option<(Object, Log)>>> = Rc::default();
    {
        let remote = remote.clone();
        let handler = Function::new("ondatachannel", move |env, _, args| {
            let event = arg(args, 0);
            let channel = event.as_object().unwrap().get(env, "channel");
            let channel = channel.as_object().unwrap().clone();
            // Installed before the channel's own loop runs: its queued open must still arrive.
            let log = record_channel(env, &channel);
            *remote.borrow_mut() = Some((channel, log));
            Value::Undefined
        });
        assert!(b.set(env, "ondatachannel", Value::Function(handler)));
    }

    let local = a.call_method(env, "createDataChannel", &[
        Value::from("chat"),
        init(env, &[("protocol", Value::from("chat-v1"))]),
    ]);
    let local = local.as_object().unwrap().clone();
    let local_log = record_channel(env, &local);
    h.connect();

    let remote_open = || {
        remote
            .borrow()
            .as_ref()
            .map(|(_, log)| contains(log, "statechange:open"))
            .unwrap_or(false)
    };
    assert!(h.thread.run_until(|| remote_open() && contains(&local_log, "statechange:open"), WAIT));
    assert_eq!(*states.borrow(), ["connectionstatechange:connecting", "connectionstatechange:connected"]);
    assert_eq!(a.get(env, "connectionState"), Value::from("connected"));

    let (remote_channel, remote_log) = remote.borrow().clone().unwrap();
    assert_eq!(remote_channel.get(env, "label"), Value::from("chat"));
    assert_eq!(remote_channel.get(env, "protocol"), Value::from("chat-v1"));
    assert_eq!(remote_channel.get(env, "id"), local.get(env, "id"));
    assert_eq!(local.get(env, "id"), Value::Number(0.0));

    local.call_method(env, "send", &[Value::from("hi")]);
    assert!(h.thread.run_until(|| contains(&remote_log, "message:hi"), WAIT));
    remote_channel.call_method(env, "send", &[Value::from("echo")]);
    assert!(h.thread.run_until(|| contains(&local_log, "message:echo"), WAIT));

    local.call_method(env, "close", &[]);
    assert!(h.thread.run_until(
        || contains(&local_log, "statechange:closed") && contains(&remote_log, "statechange:closed"),
        WAIT
    ));
    assert_eq!(remote_channel.get(env, "readyState"), Value::from("closed"));
    assert!(remote_channel.internal::<RtcDataChannel>().unwrap().is_detached());
}

#[test]
fn test_negotiated_channels_pair_without_announcement() {
    let h = Harness::new();
    let env = h.env();
    let (a, b) = h.pair();

    let announced = Log::default();
    on(env, &b, "ondatachannel", &announced);

    let negotiated = || {
        init(env, &[("negotiated", Value::Boolean(true)), ("id", Value::Number(3.0))])
    };
    let left = a.call_method(env, "createDataChannel", &[Value::from("sync"), negotiated()]);
    let right = b.call_method(env, "createDataChannel", &[Value::from("sync"), negotiated()]);
    let left = left.as_object().unwrap().clone();
    let right = right.as_object().unwrap().clone();
    let left_log = record_channel(env, &left);
    let right_log = record_channel(env, &right);
    h.connect();

    assert!(h.thread.run_until(
        || contains(&left_log, "statechange:open") && contains(&right_log, "statechange:open"),
        WAIT
    ));
    assert!(announced.borrow().is_empty());
    assert_eq!(right.get(env, "id"), Value::Number(3.0));

    right.call_method(env, "send", &[Value::from("ping")]);
    assert!(h.thread.run_until(|| contains(&left_log, "message:ping"), WAIT));
}

#[test]
fn test_create_data_channel_reports_every_init_error() {
    let h = Harness::new();
    let env = h.env();
    let pc = h.peer_connection();

    let bad = init(
        env,
        &[
            ("maxPacketLifeTime", Value::Number(10.0)),
            ("maxRetransmits", Value::Number(1.0)),
            ("negotiated", Value::Boolean(true)),
        ],
    );
    let result = pc.call_method(env, "createDataChannel", &[Value::from("x"), bad]);
    assert_eq!(result, Value::Undefined);
    let exception = env.take_exception().unwrap();
    assert_eq!(exception.as_object().unwrap().get(env, "name"), Value::from("TypeError"));
    assert_eq!(
        exception_message(env, &exception),
        "init: Cannot set both maxPacketLifeTime and maxRetransmits\n\
         init: Negotiated channels require an id"
    );

    pc.call_method(env, "createDataChannel", &[Value::Number(5.0), Value::from("ordered")]);
    let exception = env.take_exception().unwrap();
    assert_eq!(
        exception_message(env, &exception),
        "label: Expected a string, got number\n\
         init: Expected an RTCDataChannelInit, got string"
    );
    assert_eq!(h.bindings.live_data_channels(), 0);
}

#[test]
fn test_stats_promises_resolve_on_the_script_thread() {
    let h = Harness::new();
    let env = h.env();
    let (a, _b) = h.pair();
    let channel = a.call_method(env, "createDataChannel", &[Value::from("chat")]);
    let log = record_channel(env, channel.as_object().unwrap());
    h.connect();
    assert!(h.thread.run_until(|| contains(&log, "statechange:open"), WAIT));

    let report = match h.settle(&a.call_method(env, "getStats", &[])) {
        PromiseState::Fulfilled(report) => report,
        other => panic!("getStats did not resolve: {:?}", other),
    };
    let report = report.as_object().unwrap();
    assert_eq!(report.keys(), ["P", "D0"]);
    let connection = report.get(env, "P");
    let connection = connection.as_object().unwrap();
    assert_eq!(connection.get(env, "type"), Value::from("peer-connection"));
    assert_eq!(connection.get(env, "dataChannelsOpened"), Value::Number(1.0));
    let data = report.get(env, "D0");
    let data = data.as_object().unwrap();
    assert_eq!(data.get(env, "label"), Value::from("chat"));
    assert_eq!(data.get(env, "state"), Value::from("open"));
    assert_eq!(data.get(env, "dataChannelIdentifier"), Value::Number(0.0));

    let reports = match h.settle(&a.call_method(env, "getLegacyStats", &[])) {
        PromiseState::Fulfilled(reports) => reports,
        other => panic!("getLegacyStats did not resolve: {:?}", other),
    };
    let reports = reports.as_array().unwrap().to_vec(env);
    assert_eq!(reports.len(), 1);
    let legacy = reports[0].as_object().unwrap();
    assert_eq!(legacy.get(env, "type"), Value::from("datachannel"));
    assert_eq!(legacy.call_method(env, "stat", &[Value::from("label")]), Value::from("chat"));
    assert_eq!(legacy.call_method(env, "stat", &[Value::from("datachannelid")]), Value::from("0"));
}

#[test]
fn test_close_detaches_every_channel_and_stops() {
    let h = Harness::new();
    let env = h.env();
    let pc = h.peer_connection();
    let channel = pc.call_method(env, "createDataChannel", &[Value::from("chat")]);
    let channel = channel.as_object().unwrap().clone();
    let connection = pc.internal::<RtcPeerConnection>().unwrap();
    assert_eq!(connection.data_channels().len(), 1);
    assert_eq!(h.thread.active_loops(), 2);

    pc.call_method(env, "close", &[]);
    assert!(!env.is_exception_pending());
    assert_eq!(channel.get(env, "readyState"), Value::from("closed"));
    assert_eq!(pc.get(env, "connectionState"), Value::from("closed"));
    assert!(connection.is_closed());
    assert!(!connection.async_object().is_running());
    assert!(connection.data_channels().is_empty());
    assert_eq!(h.thread.active_loops(), 0);

    pc.call_method(env, "close", &[]);
    assert!(!env.is_exception_pending());

    pc.call_method(env, "createDataChannel", &[Value::from("again")]);
    let exception = env.take_exception().unwrap();
    assert_eq!(exception.as_object().unwrap().get(env, "name"), Value::from("InvalidStateError"));

    let stats = pc.call_method(env, "getStats", &[]);
    match stats.as_promise().unwrap().state() {
        PromiseState::Rejected(reason) => {
            let reason = reason.as_object().unwrap().clone();
            assert_eq!(reason.get(env, "name"), Value::from("InvalidStateError"));
        }
        other => panic!("getStats on a closed connection: {:?}", other),
    }
}
