//! Stats reports as script values
//!
//! A standard report becomes a plain object keyed by stat id. Legacy
//! reports become `RTCLegacyStatsReport` objects with `names()` and
//! `stat(name)`, matching the callback-style API they come from.

use std::rc::Rc;

use rtcbridge_core::convert::ObjectBuilder;
use rtcbridge_core::script::{arg, Env, Function, Object, Value};
use rtcbridge_core::{to_script, ToScript, Validation};

use crate::engine::{LegacyStats, RtcStats, StatsReport};

impl ToScript for RtcStats {
    fn to_script(&self, env: &Env) -> Validation<Value> {
        let builder = ObjectBuilder::new(env)
            .field("id", self.id.as_str())
            .field("type", self.kind.as_str())
            .field("timestamp", &self.timestamp);
        self.members
            .iter()
            .fold(builder, |builder, (name, value)| builder.field(name, value))
            .build()
    }
}

impl ToScript for StatsReport {
    fn to_script(&self, env: &Env) -> Validation<Value> {
        self.stats
            .iter()
            .fold(ObjectBuilder::new(env), |builder, stats| builder.field(&stats.id, stats))
            .build()
    }
}

struct LegacyStatsReport {
    stats: LegacyStats,
}

fn unwrap(env: &Env, this: &Value) -> Option<Rc<LegacyStatsReport>> {
    let report = this.as_object().and_then(|object| object.internal::<LegacyStatsReport>());
    if report.is_none() {
        env.throw_type_error("Illegal invocation");
    }
    report
}

impl ToScript for LegacyStats {
    fn to_script(&self, env: &Env) -> Validation<Value> {
        let object = Object::with_class("RTCLegacyStatsReport");
        object.set_internal(Rc::new(LegacyStatsReport {
            stats: self.clone(),
        }));

        // Assignments are accepted and ignored.
        let ignore = |_: &Env, _: &Value, _: &[Value]| Value::Undefined;
        object.define_accessor(
            "timestamp",
            Some(Function::new("get timestamp", |env, this, _| {
                unwrap(env, this)
                    .map(|report| Value::Number(report.stats.timestamp))
                    .unwrap_or_default()
            })),
            Some(Function::new("set timestamp", ignore)),
        );
        object.define_accessor(
            "type",
            Some(Function::new("get type", |env, this, _| {
                unwrap(env, this)
                    .map(|report| Value::from(report.stats.kind.as_str()))
                    .unwrap_or_default()
            })),
            Some(Function::new("set type", ignore)),
        );
        object.define_method(Function::new("names", |env, this, _| {
            let Some(report) = unwrap(env, this) else {
                return Value::Undefined;
            };
            let names: Vec<&str> = report.stats.values.keys().map(String::as_str).collect();
            to_script(env, &names).or_throw(env).unwrap_or_default()
        }));
        object.define_method(Function::new("stat", |env, this, args| {
            let Some(report) = unwrap(env, this) else {
                return Value::Undefined;
            };
            let name = arg(args, 0);
            match name.as_str().and_then(|name| report.stats.values.get(name)) {
                Some(value) => Value::from(value.as_str()),
                None => Value::Undefined,
            }
        }));

        Validation::pure(Value::Object(object))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn sample_report() -> StatsReport {
        let mut members = BTreeMap::new();
        members.insert("label".to_string(), serde_json::json!("chat"));
        members.insert("messagesSent".to_string(), serde_json::json!(3));
        StatsReport {
            stats: vec![RtcStats {
                id: "D0".into(),
                kind: "data-channel".into(),
                timestamp: 1_700_000_000_000.0,
                members,
            }],
        }
    }

    #[test]
    fn test_report_is_keyed_by_stat_id() {
        let env = Env::default();
        let value = to_script(&env, &sample_report()).ok().unwrap();
        let report = value.as_object().unwrap();
        assert_eq!(report.keys(), ["D0"]);

        let entry = report.get(&env, "D0");
        let entry = entry.as_object().unwrap();
        assert_eq!(entry.get(&env, "type"), Value::from("data-channel"));
        assert_eq!(entry.get(&env, "label"), Value::from("chat"));
        assert_eq!(entry.get(&env, "messagesSent"), Value::Number(3.0));
        assert_eq!(entry.get(&env, "timestamp"), Value::Number(1_700_000_000_000.0));
    }

    #[test]
    fn test_legacy_report_exposes_names_and_stat() {
        let env = Env::default();
        let mut values = BTreeMap::new();
        values.insert("label".to_string(), "chat".to_string());
        values.insert("state".to_string(), "open".to_string());
        let stats = LegacyStats {
            id: "datachannel_0".into(),
            kind: "datachannel".into(),
            timestamp: 12.5,
            values,
        };

        let value = to_script(&env, &stats).ok().unwrap();
        let report = value.as_object().unwrap();
        assert_eq!(report.class_name(), "RTCLegacyStatsReport");
        assert_eq!(report.get(&env, "type"), Value::from("datachannel"));

        assert!(report.set(&env, "timestamp", 99.0));
        assert_eq!(report.get(&env, "timestamp"), Value::Number(12.5));

        let names = report.call_method(&env, "names", &[]);
        assert_eq!(
            names.as_array().unwrap().to_vec(&env),
            [Value::from("label"), Value::from("state")]
        );
        assert_eq!(report.call_method(&env, "stat", &[Value::from("state")]), Value::from("open"));
        assert_eq!(report.call_method(&env, "stat", &[Value::from("missing")]), Value::Undefined);
    }
}
