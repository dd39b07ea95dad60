//! Two loopback peer connections echoing messages through the bindings
//!
//! ```sh
//! RUST_LOG=rtcbridge=debug cargo run -p rtcbridge-webrtc --example loopback_echo
//! ```

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use rtcbridge_core::logging::init_tracing;
use rtcbridge_core::script::{arg, Function, Object, ScriptThread, Value};
use rtcbridge_webrtc::{Bindings, BindingsConfig, LoopbackEngine, PeerConnectionFactory};

const ROUNDS: usize = 3;

fn as_object(value: &Value, what: &str) -> Result<Object> {
    value
        .as_object()
        .cloned()
        .ok_or_else(|| anyhow!("{} is not an object", what))
}

fn main() -> Result<()> {
    let config = BindingsConfig::load(Some("rtcbridge.toml")).context("loading configuration")?;
    init_tracing(&config.bridge.logging)?;

    let thread = ScriptThread::new(&config.bridge);
    let engine = Arc::new(LoopbackEngine::new(&config.loopback)?);
    let factory = Arc::new(PeerConnectionFactory::new(engine.clone(), config.factory.clone()));
    let bindings = Bindings::init(&thread, factory);
    let exports = bindings.exports();
    let env = thread.env();

    let caller = as_object(&exports.call_method(env, "RTCPeerConnection", &[]), "caller")?;
    let answerer = as_object(&exports.call_method(env, "RTCPeerConnection", &[]), "answerer")?;

    // The answerer echoes every message back on the announced channel.
    answerer.set(
        env,
        "ondatachannel",
        Function::new("ondatachannel", |env, _, args| {
            let event = arg(args, 0);
            let Some(channel) = event.as_object().map(|event| event.get(env, "channel")) else {
                return Value::Undefined;
            };
            if let Some(object) = channel.as_object() {
                let echo = object.downgrade();
                object.set(
                    env,
                    "onmessage",
                    Function::new("onmessage", move |env, _, args| {
                        if let Some(echo) = echo.upgrade() {
                            echo.call_method(env, "send", &[arg(args, 0)]);
                        }
                        Value::Undefined
                    }),
                );
            }
            Value::Undefined
        }),
    );

    let channel = as_object(
        &caller.call_method(env, "createDataChannel", &[Value::from("echo")]),
        "channel",
    )?;
    let received = Rc::new(RefCell::new(Vec::<String>::new()));
    {
        let received = received.clone();
        channel.set(
            env,
            "onmessage",
            Function::new("onmessage", move |_, _, args| {
                if let Some(text) = arg(args, 0).as_str() {
                    received.borrow_mut().push(text.to_string());
                }
                Value::Undefined
            }),
        );
    }
    let open = Rc::new(RefCell::new(false));
    {
        let open = open.clone();
        channel.set(
            env,
            "onstatechange",
            Function::new("onstatechange", move |_, _, args| {
                if arg(args, 0).as_str() == Some("open") {
                    *open.borrow_mut() = true;
                }
                Value::Undefined
            }),
        );
    }

    let connections = engine.peer_connections();
    engine.connect(&connections[0], &connections[1]);
    if !thread.run_until(|| *open.borrow(), Duration::from_secs(5)) {
        return Err(anyhow!("channel did not open"));
    }

    for round in 0..ROUNDS {
        channel.call_method(env, "send", &[Value::from(format!("ping {}", round))]);
        if let Some(exception) = env.take_exception() {
            return Err(anyhow!(
                "send failed: {}",
                rtcbridge_core::script::exception_message(env, &exception)
            ));
        }
        let expected = round + 1;
        if !thread.run_until(|| received.borrow().len() == expected, Duration::from_secs(5)) {
            return Err(anyhow!("no echo for round {}", round));
        }
        println!("echoed: {}", received.borrow()[round]);
    }

    caller.call_method(env, "close", &[]);
    answerer.call_method(env, "close", &[]);
    thread.run_until_idle();
    for uncaught in thread.take_uncaught() {
        eprintln!("uncaught: {}", rtcbridge_core::script::exception_message(env, &uncaught));
    }
    bindings.teardown();
    Ok(())
}
