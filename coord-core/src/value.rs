//! A recursive tagged-value tree used to represent the dynamic JSON payloads
//! (controller/API-server objects, and the `prevStateDiff`/`curStateDiff`
//! fragments declared in a test plan) that the diff engine walks.
//!
//! Objects never have a fixed schema in this system — they arrive as JSON
//! text over the RPC surface and are decoded into this tree rather than into
//! typed Kubernetes resources, per the design note in the specification.

use std::collections::BTreeMap;
use std::fmt;

/// A dynamically-typed JSON value.
///
/// `Map` uses a `BTreeMap` rather than a hash map so that two structurally
/// equal objects always compare and iterate identically, which keeps the
/// diff engine's output independent of hashing order.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    /// JSON numbers are kept as `f64`; this system never does arithmetic on
    /// them; it only ever compares for equality.
    Number(f64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Looks up `key` on a `Map` value, treating any non-`Map` value (and a
    /// missing key) as absent. Absence and an explicit JSON `null` are not
    /// distinguished by this engine: both are represented as `Value::Null`.
    pub fn get(&self, key: &str) -> Value {
        match self {
            Value::Map(map) => map.get(key).cloned().unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Parses a JSON string into a `Value`, defaulting to `{}` on empty
    /// input (the object-state cache's initial value per spec.md §4.2).
    pub fn from_json_str(s: &str) -> Result<Value, serde_json::Error> {
        if s.trim().is_empty() {
            return Ok(Value::Map(BTreeMap::new()));
        }
        let json: serde_json::Value = serde_json::from_str(s)?;
        Ok(Value::from(json))
    }

    pub fn to_json_string(&self) -> String {
        serde_json::Value::from(self.clone()).to_string()
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => Value::List(items.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Number(n) => serde_json::Number::from_f64(n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::String(s),
            Value::List(items) => serde_json::Value::Array(items.into_iter().map(Into::into).collect()),
            Value::Map(map) => {
                serde_json::Value::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_parses_to_empty_object() {
        assert_eq!(Value::from_json_str("").unwrap(), Value::Map(BTreeMap::new()));
        assert_eq!(Value::from_json_str("{}").unwrap(), Value::Map(BTreeMap::new()));
    }

    #[test]
    fn missing_key_is_null() {
        let v = Value::from_json_str(r#"{"spec":{"replicas":3}}"#).unwrap();
        assert_eq!(v.get("spec").get("replicas"), Value::Number(3.0));
        assert_eq!(v.get("status"), Value::Null);
    }

    #[test]
    fn roundtrips_through_json() {
        let raw = r#"{"a":1,"b":[true,null,"x"],"c":{"d":2.5}}"#;
        let v = Value::from_json_str(raw).unwrap();
        let back: serde_json::Value = v.clone().into();
        let reparsed = Value::from(back);
        assert_eq!(v, reparsed);
    }
}
