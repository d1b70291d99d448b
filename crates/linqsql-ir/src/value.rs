//! Runtime values carried by constants, parameters and materialized rows

use chrono::{DateTime, FixedOffset, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::types::{DataType, ScalarType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    DateTime(NaiveDateTime),
    DateTimeOffset(DateTime<FixedOffset>),
    Guid(Uuid),
    List(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Best-effort static type of this value, used when a caller builds a
    /// constant without naming its type.
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Null => DataType::Object("null".to_string()),
            Value::Bool(_) => DataType::scalar(ScalarType::Bool),
            Value::Int(_) => DataType::scalar(ScalarType::Int64),
            Value::Float(_) => DataType::scalar(ScalarType::Float64),
            Value::String(_) => DataType::scalar(ScalarType::String),
            Value::Bytes(_) => DataType::scalar(ScalarType::Bytes),
            Value::DateTime(_) => DataType::scalar(ScalarType::DateTime),
            Value::DateTimeOffset(_) => DataType::scalar(ScalarType::DateTimeOffset),
            Value::Guid(_) => DataType::scalar(ScalarType::Guid),
            Value::List(items) => DataType::sequence_of(
                items
                    .iter()
                    .find(|v| !v.is_null())
                    .map(Value::data_type)
                    .unwrap_or_else(|| DataType::Object("object".to_string())),
            ),
            Value::Object(_) => DataType::Anonymous,
        }
    }

    /// Equality with in-process semantics: `null == null` holds, and integers
    /// compare equal to floats of the same magnitude.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Null, _) | (_, Value::Null) => false,
            _ => compare(self, other) == Some(Ordering::Equal),
        }
    }

    pub fn into_json(self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Int(i) => serde_json::Value::from(i),
            Value::Float(f) => serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s),
            Value::Bytes(bytes) => {
                serde_json::Value::Array(bytes.into_iter().map(serde_json::Value::from).collect())
            }
            Value::DateTime(dt) => {
                serde_json::Value::String(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
            }
            Value::DateTimeOffset(dt) => serde_json::Value::String(dt.to_rfc3339()),
            Value::Guid(id) => serde_json::Value::String(id.to_string()),
            Value::List(items) => {
                serde_json::Value::Array(items.into_iter().map(Value::into_json).collect())
            }
            Value::Object(fields) => serde_json::Value::Object(
                fields.into_iter().map(|(k, v)| (k, v.into_json())).collect(),
            ),
        }
    }
}

/// Orders two values. Nulls sort before everything else; values of
/// incomparable kinds yield `None`.
pub fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Null, _) => Some(Ordering::Less),
        (_, Value::Null) => Some(Ordering::Greater),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
        (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
        (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
        (Value::DateTimeOffset(a), Value::DateTimeOffset(b)) => Some(a.cmp(b)),
        (Value::Guid(a), Value::Guid(b)) => Some(a.cmp(b)),
        // Guids read back from the store arrive as text.
        (Value::Guid(a), Value::String(b)) => Some(a.to_string().cmp(b)),
        (Value::String(a), Value::Guid(b)) => Some(a.cmp(&b.to_string())),
        (Value::List(a), Value::List(b)) => {
            for (x, y) in a.iter().zip(b.iter()) {
                match compare(x, y)? {
                    Ordering::Equal => continue,
                    other => return Some(other),
                }
            }
            Some(a.len().cmp(&b.len()))
        }
        (Value::Object(a), Value::Object(b)) => {
            if a == b {
                Some(Ordering::Equal)
            } else {
                None
            }
        }
        _ => None,
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
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

impl From<Uuid> for Value {
    fn from(id: Uuid) -> Self {
        Value::Guid(id)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(dt: NaiveDateTime) -> Self {
        Value::DateTime(dt)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Value::Null)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nulls_sort_first() {
        assert_eq!(compare(&Value::Null, &Value::Int(1)), Some(Ordering::Less));
        assert_eq!(compare(&Value::Int(1), &Value::Null), Some(Ordering::Greater));
    }

    #[test]
    fn test_mixed_numeric_compare() {
        assert_eq!(compare(&Value::Int(2), &Value::Float(2.0)), Some(Ordering::Equal));
        assert!(Value::Int(3).loose_eq(&Value::Float(3.0)));
        assert!(!Value::Null.loose_eq(&Value::Int(0)));
        assert!(Value::Null.loose_eq(&Value::Null));
    }

    #[test]
    fn test_into_json_shapes() {
        let mut fields = BTreeMap::new();
        fields.insert("City".to_string(), Value::from("London"));
        fields.insert("Orders".to_string(), Value::from(vec![1, 2]));

        let json = Value::Object(fields).into_json();
        assert_eq!(json, serde_json::json!({ "City": "London", "Orders": [1, 2] }));
    }

    #[test]
    fn test_list_data_type_uses_first_non_null() {
        let list = Value::List(vec![Value::Null, Value::from("a")]);
        assert_eq!(
            list.data_type(),
            DataType::sequence_of(DataType::scalar(ScalarType::String))
        );
    }
}
