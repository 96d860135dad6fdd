//! The closed value type carried by action records, bindings and state.
//!
//! Authoring graphs are JSON, but the engine only ever deals in four shapes:
//! strings, numbers, booleans and null (the absent optional). Arrays and
//! objects are rejected at the boundary so unification has a single,
//! well-defined notion of equality.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize, Serializer};

use crate::error::{EngineError, Result};

/// Field name → value, ordered so records and traces serialize deterministically.
pub type ValueMap = BTreeMap<String, Value>;

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

impl Value {
    pub fn str(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Short type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
        }
    }

    /// Convert a JSON value, rejecting arrays and objects.
    pub fn from_json(json: &serde_json::Value) -> Result<Self> {
        match json {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_f64()
                .map(Value::Number)
                .ok_or_else(|| EngineError::InvalidValue(format!("number out of range: {n}"))),
            serde_json::Value::String(s) => Ok(Value::String(s.clone())),
            other => Err(EngineError::InvalidValue(format!(
                "only strings, numbers, booleans and null are supported, got {other}"
            ))),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => {
                if is_integral(*n) {
                    serde_json::Value::from(*n as i64)
                } else {
                    serde_json::Number::from_f64(*n)
                        .map(serde_json::Value::Number)
                        .unwrap_or(serde_json::Value::Null)
                }
            }
            Value::String(s) => serde_json::Value::String(s.clone()),
        }
    }
}

/// Integral numbers serialize as integers, matching `Display` and `to_json`.
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) if is_integral(*n) => serializer.serialize_i64(*n as i64),
            Value::Number(n) => serializer.serialize_f64(*n),
            Value::String(s) => serializer.serialize_str(s),
        }
    }
}

fn is_integral(n: f64) -> bool {
    n.fract() == 0.0 && n.abs() < 9.0e15
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) if is_integral(*n) => write!(f, "{}", *n as i64),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// Convert a JSON object into a [`ValueMap`]. `null` and a missing object both
/// yield an empty map.
pub fn map_from_json(json: &serde_json::Value) -> Result<ValueMap> {
    match json {
        serde_json::Value::Null => Ok(ValueMap::new()),
        serde_json::Value::Object(obj) => obj
            .iter()
            .map(|(k, v)| Ok((k.clone(), Value::from_json(v)?)))
            .collect(),
        other => Err(EngineError::InvalidValue(format!(
            "expected an object of field values, got {other}"
        ))),
    }
}

pub fn map_to_json(map: &ValueMap) -> serde_json::Value {
    serde_json::Value::Object(
        map.iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect(),
    )
}

/// Render a map the way traces print inputs: `{kind: "inc", by: "user"}`.
pub fn format_map(map: &ValueMap) -> String {
    let fields: Vec<String> = map
        .iter()
        .map(|(k, v)| match v {
            Value::String(s) => format!("{k}: {s:?}"),
            other => format!("{k}: {other}"),
        })
        .collect();
    format!("{{{}}}", fields.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_primitives() {
        assert_eq!(Value::from_json(&json!(null)).unwrap(), Value::Null);
        assert_eq!(Value::from_json(&json!(true)).unwrap(), Value::Bool(true));
        assert_eq!(Value::from_json(&json!(3)).unwrap(), Value::Number(3.0));
        assert_eq!(Value::from_json(&json!("x")).unwrap(), Value::str("x"));
    }

    #[test]
    fn test_from_json_rejects_compound() {
        assert!(Value::from_json(&json!([1, 2])).is_err());
        assert!(Value::from_json(&json!({"a": 1})).is_err());
    }

    #[test]
    fn test_integral_display() {
        assert_eq!(Value::Number(3.0).to_string(), "3");
        assert_eq!(Value::Number(1.5).to_string(), "1.5");
        assert_eq!(Value::Null.to_string(), "null");
    }

    #[test]
    fn test_serialize_matches_to_json() {
        for v in [
            Value::Number(3.0),
            Value::Number(-2.5),
            Value::Bool(true),
            Value::Null,
            Value::str("x"),
        ] {
            assert_eq!(serde_json::to_value(&v).unwrap(), v.to_json());
        }
        let mut map = ValueMap::new();
        map.insert("count".into(), Value::Number(3.0));
        assert_eq!(serde_json::to_string(&map).unwrap(), r#"{"count":3}"#);
        let back: ValueMap = serde_json::from_str(r#"{"count":3}"#).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn test_equality_is_by_type_and_value() {
        assert_eq!(Value::Number(1.0), Value::from(1i64));
        assert_ne!(Value::str("1"), Value::Number(1.0));
        assert_ne!(Value::Bool(false), Value::Null);
    }

    #[test]
    fn test_format_map_quotes_strings() {
        let mut m = ValueMap::new();
        m.insert("kind".into(), Value::str("inc"));
        m.insert("n".into(), Value::Number(2.0));
        assert_eq!(format_map(&m), "{kind: \"inc\", n: 2}");
    }

    #[test]
    fn test_json_roundtrip_keeps_integers() {
        let v = Value::Number(3.0);
        assert_eq!(v.to_json(), json!(3));
        assert_eq!(Value::Number(0.25).to_json(), json!(0.25));
    }

    #[test]
    fn test_serde_untagged() {
        let v: Value = serde_json::from_str("\"hi\"").unwrap();
        assert_eq!(v, Value::str("hi"));
        let v: Value = serde_json::from_str("null").unwrap();
        assert_eq!(v, Value::Null);
        let v: Value = serde_json::from_str("2.5").unwrap();
        assert_eq!(v, Value::Number(2.5));
    }
}
