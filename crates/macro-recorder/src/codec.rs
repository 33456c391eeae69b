//! JSON codec for macro documents
//!
//! ```json
//! {
//!   "name": "login",
//!   "created": "2025-01-31T09:15:02.113Z",
//!   "actions": [
//!     {"type": "wait", "duration": 0, "description": "Wait 0ms"},
//!     {"type": "click", "x": 100, "y": 200, "button": "left"},
//!     {"type": "wait", "duration": 500},
//!     {"type": "key_press", "key": "a"}
//!   ],
//!   "total_duration": 500
//! }
//! ```
//!
//! Documents in the offset form (a `timestamp` in ms since recording start on
//! every click/key press, no `wait` entries) are converted to explicit waits
//! on parse. Unknown `type` values are kept as [`Action::Unknown`] unless
//! [`ParseOptions::reject_unknown`] is set.

use crate::events::*;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use macro_core::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};
use tracing::warn;

/// Fallback file stem when a name sanitizes to nothing
pub const DEFAULT_NAME: &str = "macro";

#[derive(Debug, Clone, Copy, Default)]
pub struct ParseOptions {
    /// Fail on `type` values other than wait/click/key_press
    pub reject_unknown: bool,
}

impl ParseOptions {
    pub fn strict() -> Self {
        Self {
            reject_unknown: true,
        }
    }
}

// ============================================================================
// Serialize
// ============================================================================

pub fn serialize(m: &Macro) -> Value {
    json!({
        "name": m.name(),
        "created": m.created().to_rfc3339_opts(SecondsFormat::AutoSi, true),
        "actions": m.actions().iter().map(action_to_value).collect::<Vec<_>>(),
        "total_duration": m.total_duration_ms(),
    })
}

pub fn to_string_pretty(m: &Macro) -> Result<String> {
    Ok(serde_json::to_string_pretty(&serialize(m))?)
}

pub fn action_to_value(action: &Action) -> Value {
    let (mut obj, description) = match action {
        Action::Wait(w) => (
            json!({"type": "wait", "duration": w.duration}),
            w.description.as_ref(),
        ),
        Action::Click(c) => (
            json!({"type": "click", "x": c.x, "y": c.y, "button": c.button.as_str()}),
            c.description.as_ref(),
        ),
        Action::KeyPress(k) => (
            json!({"type": "key_press", "key": k.key}),
            k.description.as_ref(),
        ),
        Action::Unknown(u) => {
            let mut map = u.fields.clone();
            map.insert("type".into(), Value::String(u.kind.clone()));
            return Value::Object(map);
        }
    };
    if let (Some(d), Value::Object(map)) = (description, &mut obj) {
        map.insert("description".into(), Value::String(d.clone()));
    }
    obj
}

// ============================================================================
// Parse
// ============================================================================

pub fn parse(doc: &Value) -> Result<Macro> {
    parse_with(doc, ParseOptions::default())
}

pub fn parse_str(text: &str) -> Result<Macro> {
    parse_str_with(text, ParseOptions::default())
}

pub fn parse_str_with(text: &str, opts: ParseOptions) -> Result<Macro> {
    let doc: Value = serde_json::from_str(text)?;
    parse_with(&doc, opts)
}

pub fn parse_with(doc: &Value, opts: ParseOptions) -> Result<Macro> {
    let obj = doc
        .as_object()
        .ok_or_else(|| Error::validation("Macro document must be a JSON object"))?;

    let raw_actions = match obj.get("actions") {
        None => return Err(Error::validation("Missing 'actions' field")),
        Some(Value::Array(a)) => a,
        Some(_) => return Err(Error::validation("'actions' must be a list")),
    };

    let name = match obj.get("name") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
        Some(Value::String(_)) | None => return Err(Error::validation("Missing 'name' field")),
        Some(_) => return Err(Error::validation("'name' must be a string")),
    };

    let created = match obj.get("created") {
        Some(Value::String(s)) => parse_created(s)?,
        Some(_) => return Err(Error::validation("'created' must be a string")),
        None => return Err(Error::validation("Missing 'created' field")),
    };

    let mut parsed = Vec::with_capacity(raw_actions.len());
    for (i, raw) in raw_actions.iter().enumerate() {
        parsed.push(parse_action(i, raw, opts)?);
    }
    let actions = normalize_timing(parsed)?;
    actions
        .iter()
        .try_fold(0u64, |sum, a| sum.checked_add(a.duration_ms()))
        .ok_or_else(|| Error::validation("Wait durations add up to more than u64::MAX ms"))?;

    let m = Macro::with_created(name, created, actions)?;

    if let Some(stored) = obj.get("total_duration").and_then(Value::as_f64) {
        let derived = m.total_duration_ms();
        if (stored - derived as f64).abs() >= 1.0 {
            warn!(
                "Macro '{}' stores total_duration {} but its waits sum to {}ms",
                m.name(),
                stored,
                derived
            );
        }
    }

    Ok(m)
}

/// Parse one entry; the second value is its offset-form `timestamp`, if any
pub fn parse_action(index: usize, raw: &Value, opts: ParseOptions) -> Result<(Action, Option<u64>)> {
    let obj = raw
        .as_object()
        .ok_or_else(|| Error::validation(format!("Action {} is not an object", index)))?;

    let kind = match obj.get("type") {
        Some(Value::String(s)) => s.as_str(),
        Some(_) => {
            return Err(Error::validation(format!(
                "Action {} has a non-string 'type' field",
                index
            )))
        }
        None => {
            return Err(Error::validation(format!(
                "Action {} missing 'type' field",
                index
            )))
        }
    };

    let action = match kind {
        "wait" => {
            require(obj, index, "Wait", "duration")?;
            Action::Wait(decode(raw, index, kind)?)
        }
        "click" => {
            for field in ["x", "y", "button"] {
                require(obj, index, "Click", field)?;
            }
            Action::Click(decode(raw, index, kind)?)
        }
        "key_press" => {
            require(obj, index, "Key press", "key")?;
            Action::KeyPress(decode(raw, index, kind)?)
        }
        // written by early versions of the recorder
        "key_sequence" => {
            require(obj, index, "Key sequence", "keys")?;
            let key = obj["keys"].as_str().ok_or_else(|| {
                Error::validation(format!("Action {} (key_sequence): 'keys' must be a string", index))
            })?;
            Action::KeyPress(KeyPress {
                key: key.to_string(),
                description: obj
                    .get("description")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            })
        }
        other if opts.reject_unknown => {
            return Err(Error::validation(format!(
                "Action {} has unknown type '{}'",
                index, other
            )))
        }
        other => {
            let mut fields: Map<String, Value> = obj.clone();
            fields.remove("type");
            return Ok((
                Action::Unknown(UnknownAction {
                    kind: other.to_string(),
                    fields,
                }),
                None,
            ));
        }
    };

    let timestamp = match obj.get("timestamp") {
        None | Some(Value::Null) => None,
        Some(v) => Some(parse_timestamp(index, v)?),
    };

    Ok((action, timestamp))
}

fn require(obj: &Map<String, Value>, index: usize, label: &str, field: &str) -> Result<()> {
    if obj.contains_key(field) {
        Ok(())
    } else {
        Err(Error::validation(format!(
            "{} action {} missing '{}' field",
            label, index, field
        )))
    }
}

fn decode<T: serde::de::DeserializeOwned>(raw: &Value, index: usize, kind: &str) -> Result<T> {
    T::deserialize(raw)
        .map_err(|e| Error::validation(format!("Action {} ({}): {}", index, kind, e)))
}

fn parse_timestamp(index: usize, v: &Value) -> Result<u64> {
    if let Some(ms) = v.as_u64() {
        return Ok(ms);
    }
    match v.as_f64() {
        Some(f) if f >= 0.0 && f.is_finite() => Ok(f.round() as u64),
        _ => Err(Error::validation(format!(
            "Action {} has an invalid 'timestamp'",
            index
        ))),
    }
}

fn parse_created(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    // naive ISO-8601 without offset, taken as UTC
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|n| n.and_utc())
        .map_err(|_| Error::validation(format!("'created' is not an ISO-8601 timestamp: {}", s)))
}

/// Convert offset-form entries to explicit waits
fn normalize_timing(parsed: Vec<(Action, Option<u64>)>) -> Result<Vec<Action>> {
    if parsed.iter().all(|(_, ts)| ts.is_none()) {
        return Ok(parsed.into_iter().map(|(a, _)| a).collect());
    }
    if parsed.iter().any(|(a, _)| matches!(a, Action::Wait(_))) {
        return Err(Error::validation(
            "Mixed timing schemes: both 'wait' actions and per-action timestamps",
        ));
    }

    let mut out = Vec::with_capacity(parsed.len() * 2);
    let mut prev = 0u64;
    for (i, (action, ts)) in parsed.into_iter().enumerate() {
        match ts {
            Some(t) => {
                if t < prev {
                    return Err(Error::validation(format!(
                        "Action {} timestamp {} is earlier than the previous one ({})",
                        i, t, prev
                    )));
                }
                out.push(Action::wait(t - prev));
                prev = t;
            }
            None if action.is_input() => {
                return Err(Error::validation(format!(
                    "Action {} missing 'timestamp' field",
                    i
                )));
            }
            None => {}
        }
        out.push(action);
    }
    Ok(out)
}

// ============================================================================
// File names
// ============================================================================

/// Keep alphanumerics, spaces, `-` and `_`, trimmed; never empty
pub fn sanitize_name(name: &str) -> String {
    let kept: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == ' ' || *c == '-' || *c == '_')
        .collect();
    let trimmed = kept.trim();
    if trimmed.is_empty() {
        DEFAULT_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn file_name(name: &str) -> String {
    format!("{}.json", sanitize_name(name))
}

// ============================================================================
// serde glue
// ============================================================================

impl Serialize for Action {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        action_to_value(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Action {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let v = Value::deserialize(deserializer)?;
        parse_action(0, &v, ParseOptions::default())
            .map(|(a, _)| a)
            .map_err(serde::de::Error::custom)
    }
}

impl Serialize for Macro {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serialize(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Macro {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let v = Value::deserialize(deserializer)?;
        parse(&v).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use macro_core::ErrorCode;

    fn sample() -> Macro {
        Macro::new(
            "Login flow",
            vec![
                Action::wait(0),
                Action::click(100, 200, MouseButton::Left),
                Action::wait(500),
                Action::key_press("a"),
                Action::wait(25),
                Action::Click(Click {
                    x: -4,
                    y: 9,
                    button: MouseButton::Right,
                    description: None,
                }),
            ],
        )
        .unwrap()
    }

    fn reason(doc: Value) -> String {
        let err = parse(&doc).unwrap_err();
        assert!(err.is(ErrorCode::Validation), "{:?}", err);
        err.message
    }

    #[test]
    fn round_trip() {
        let m = sample();
        let back = parse(&serialize(&m)).unwrap();
        assert_eq!(back, m);

        let text = to_string_pretty(&m).unwrap();
        assert_eq!(parse_str(&text).unwrap(), m);
    }

    #[test]
    fn serialized_shape() {
        let v = serialize(&sample());
        assert_eq!(v["name"], "Login flow");
        assert_eq!(v["total_duration"], 525);
        assert_eq!(v["actions"][1]["type"], "click");
        assert_eq!(v["actions"][1]["button"], "left");
        assert_eq!(v["actions"][3]["key"], "a");
        assert!(v["actions"][5].get("description").is_none());
        assert!(v["created"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn missing_actions_rejected() {
        let msg = reason(json!({"name": "m", "created": "2024-01-01T00:00:00Z"}));
        assert_eq!(msg, "Missing 'actions' field");
    }

    #[test]
    fn actions_not_a_list_rejected() {
        let msg = reason(json!({"name": "m", "created": "2024-01-01T00:00:00Z", "actions": {}}));
        assert_eq!(msg, "'actions' must be a list");
    }

    #[test]
    fn click_missing_x_rejected() {
        let msg = reason(json!({
            "name": "m",
            "created": "2024-01-01T00:00:00Z",
            "actions": [{"type": "wait", "duration": 1}, {"type": "click", "y": 2, "button": "left"}]
        }));
        assert_eq!(msg, "Click action 1 missing 'x' field");
    }

    #[test]
    fn click_missing_button_rejected() {
        let msg = reason(json!({
            "name": "m",
            "created": "2024-01-01T00:00:00Z",
            "actions": [{"type": "click", "x": 1, "y": 2}]
        }));
        assert_eq!(msg, "Click action 0 missing 'button' field");
    }

    #[test]
    fn wait_missing_duration_rejected() {
        let msg = reason(json!({
            "name": "m",
            "created": "2024-01-01T00:00:00Z",
            "actions": [{"type": "wait", "description": "Wait ?"}]
        }));
        assert_eq!(msg, "Wait action 0 missing 'duration' field");
    }

    #[test]
    fn key_press_missing_key_rejected() {
        let msg = reason(json!({
            "name": "m",
            "created": "2024-01-01T00:00:00Z",
            "actions": [{"type": "key_press"}]
        }));
        assert_eq!(msg, "Key press action 0 missing 'key' field");
    }

    #[test]
    fn action_without_type_rejected() {
        let msg = reason(json!({
            "name": "m",
            "created": "2024-01-01T00:00:00Z",
            "actions": [{"duration": 5}]
        }));
        assert_eq!(msg, "Action 0 missing 'type' field");
    }

    #[test]
    fn wrong_field_type_rejected() {
        let msg = reason(json!({
            "name": "m",
            "created": "2024-01-01T00:00:00Z",
            "actions": [{"type": "click", "x": "ten", "y": 2, "button": "left"}]
        }));
        assert!(msg.starts_with("Action 0 (click):"), "{}", msg);
    }

    #[test]
    fn unknown_type_tolerated_and_preserved() {
        let doc = json!({
            "name": "m",
            "created": "2024-01-01T00:00:00Z",
            "actions": [
                {"type": "scroll", "dx": 0, "dy": -3},
                {"type": "wait", "duration": 10}
            ]
        });
        let m = parse(&doc).unwrap();
        match &m.actions()[0] {
            Action::Unknown(u) => {
                assert_eq!(u.kind, "scroll");
                assert_eq!(u.fields["dy"], -3);
            }
            other => panic!("expected unknown action, got {:?}", other),
        }
        let again = serialize(&m);
        assert_eq!(again["actions"][0], doc["actions"][0]);
    }

    #[test]
    fn unknown_type_rejected_when_strict() {
        let doc = json!({
            "name": "m",
            "created": "2024-01-01T00:00:00Z",
            "actions": [{"type": "scroll", "dy": -3}]
        });
        let err = parse_with(&doc, ParseOptions::strict()).unwrap_err();
        assert_eq!(err.message, "Action 0 has unknown type 'scroll'");
    }

    #[test]
    fn offset_form_converted_to_waits() {
        let doc = json!({
            "name": "m",
            "created": "2024-01-01T00:00:00Z",
            "actions": [
                {"type": "click", "x": 1, "y": 1, "button": "left", "timestamp": 40},
                {"type": "key_press", "key": "b", "timestamp": 140}
            ],
            "total_duration": 140
        });
        let m = parse(&doc).unwrap();
        let kinds: Vec<_> = m.actions().iter().map(|a| a.kind().to_string()).collect();
        assert_eq!(kinds, ["wait", "click", "wait", "key_press"]);
        assert_eq!(m.actions()[0].duration_ms(), 40);
        assert_eq!(m.actions()[2].duration_ms(), 100);
        assert_eq!(m.total_duration_ms(), 140);
    }

    #[test]
    fn mixed_timing_rejected() {
        let msg = reason(json!({
            "name": "m",
            "created": "2024-01-01T00:00:00Z",
            "actions": [
                {"type": "wait", "duration": 10},
                {"type": "key_press", "key": "b", "timestamp": 140}
            ]
        }));
        assert!(msg.starts_with("Mixed timing schemes"));
    }

    #[test]
    fn decreasing_timestamps_rejected() {
        let msg = reason(json!({
            "name": "m",
            "created": "2024-01-01T00:00:00Z",
            "actions": [
                {"type": "key_press", "key": "a", "timestamp": 300},
                {"type": "key_press", "key": "b", "timestamp": 200}
            ]
        }));
        assert!(msg.contains("earlier than the previous"));
    }

    #[test]
    fn legacy_key_sequence_read_as_key_press() {
        let m = parse(&json!({
            "name": "old",
            "created": "2024-01-01T10:00:00.250000",
            "actions": [
                {"type": "wait", "duration": 3, "description": "Wait 3ms"},
                {"type": "key_sequence", "keys": "x", "description": "Key: x"}
            ]
        }))
        .unwrap();
        assert_eq!(m.actions()[1], Action::key_press("x"));
        assert_eq!(m.created().timestamp_millis() % 1000, 250);
    }

    #[test]
    fn missing_name_and_bad_created_rejected() {
        assert_eq!(
            reason(json!({"created": "2024-01-01T00:00:00Z", "actions": []})),
            "Missing 'name' field"
        );
        assert!(reason(json!({"name": "m", "created": "yesterday", "actions": []}))
            .starts_with("'created' is not an ISO-8601"));
    }

    #[test]
    fn overflowing_waits_rejected() {
        let doc = json!({
            "name": "m",
            "created": "2024-01-01T00:00:00Z",
            "actions": [
                {"type": "wait", "duration": u64::MAX},
                {"type": "wait", "duration": 1}
            ],
            "total_duration": 0
        });
        let err = parse(&doc).unwrap_err();
        assert!(err.is(ErrorCode::Validation));
        assert!(err.message.contains("u64::MAX"));
    }

    #[test]
    fn button_aliases_accepted() {
        let doc = json!({
            "name": "m",
            "created": "2024-01-01T00:00:00Z",
            "actions": [{"type": "click", "x": 1, "y": 2, "button": "Center"}]
        });
        let m = parse(&doc).unwrap();
        assert_eq!(m.actions()[0], Action::click(1, 2, MouseButton::Middle));
        assert_eq!(serialize(&m)["actions"][0]["button"], "middle");
    }

    #[test]
    fn invalid_json_text_is_validation_error() {
        let err = parse_str("{\"name\": ").unwrap_err();
        assert!(err.is(ErrorCode::Validation));
    }

    #[test]
    fn sanitize() {
        assert_eq!(sanitize_name("My Macro!@#"), "My Macro");
        assert_eq!(sanitize_name("  a-b_c 1 "), "a-b_c 1");
        assert_eq!(sanitize_name("../../etc/passwd"), "etcpasswd");
        assert_eq!(sanitize_name("!!!"), DEFAULT_NAME);
        assert_eq!(file_name("My Macro!@#"), "My Macro.json");
    }

    #[test]
    fn serde_impls_match_codec() {
        let m = sample();
        let text = serde_json::to_string(&m).unwrap();
        let back: Macro = serde_json::from_str(&text).unwrap();
        assert_eq!(back, m);

        let a: Action = serde_json::from_str(r#"{"type":"wait","duration":7}"#).unwrap();
        assert_eq!(a.duration_ms(), 7);
    }
}
