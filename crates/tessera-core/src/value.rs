//! # Generic Values
//!
//! The type-erased record representation shared by the binder, the list
//! planner and the database layer.
//!
//! ## Value Shapes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Value (tagged union)                           │
//! │                                                                         │
//! │   Null │ Bool │ Integer(i64) │ Float(f64) │ String │ List │ Object      │
//! │                                                      │        │         │
//! │                                               Vec<Value>  GenericRecord │
//! │                                                                         │
//! │  GenericRecord = ordered map  field name ──► Value                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Values serialize to and from plain JSON (`#[serde(untagged)]`), so a
//! `GenericRecord` is exactly a JSON object on the wire.

use std::collections::btree_map::{self, BTreeMap};
use std::fmt;

use serde::{Deserialize, Serialize};

// =============================================================================
// Value
// =============================================================================

/// An untyped value as it arrives in a request or leaves a row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Object(GenericRecord),
}

impl Value {
    /// Short name of the variant, used in coercion error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Object(_) => "object",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the string slice if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer if this value holds one exactly.
    ///
    /// Integral floats (`3.0`) are accepted, as JSON clients commonly send
    /// them for integer columns.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Some(*f as i64),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "{:?}", s),
            Value::List(_) | Value::Object(_) => {
                let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
                write!(f, "{}", json)
            }
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
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

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

// =============================================================================
// Generic Record
// =============================================================================

/// Ordered mapping from field name to value.
///
/// The unit the binder produces and the repository consumes. Never persisted
/// as-is; lives for one request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenericRecord(BTreeMap<String, Value>);

impl GenericRecord {
    pub fn new() -> Self {
        GenericRecord(BTreeMap::new())
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    /// Inserts a value, returning the previous one for that field.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(field.into(), value.into())
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Value> {
        self.0.iter()
    }

    /// Builder-style insert, handy in tests and seeds.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(field, value);
        self
    }
}

impl FromIterator<(String, Value)> for GenericRecord {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        GenericRecord(iter.into_iter().collect())
    }
}

impl IntoIterator for GenericRecord {
    type Item = (String, Value);
    type IntoIter = btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a GenericRecord {
    type Item = (&'a String, &'a Value);
    type IntoIter = btree_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_keeps_integers_exact() {
        let value = Value::from(json!({"a": 1, "b": 1.5, "c": [true, null], "d": "x"}));
        let Value::Object(record) = value else {
            panic!("expected object");
        };
        assert_eq!(record.get("a"), Some(&Value::Integer(1)));
        assert_eq!(record.get("b"), Some(&Value::Float(1.5)));
        assert_eq!(
            record.get("c"),
            Some(&Value::List(vec![Value::Bool(true), Value::Null]))
        );
        assert_eq!(record.get("d"), Some(&Value::from("x")));
    }

    #[test]
    fn test_record_serializes_as_plain_object() {
        let record = GenericRecord::new()
            .with("name", "a")
            .with("price", 1.0)
            .with("id", 7i64);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json, json!({"id": 7, "name": "a", "price": 1.0}));
    }

    #[test]
    fn test_as_i64_accepts_integral_floats() {
        assert_eq!(Value::Float(3.0).as_i64(), Some(3));
        assert_eq!(Value::Float(3.5).as_i64(), None);
        assert_eq!(Value::from("3").as_i64(), None);
    }
}
