//! Record values
//!
//! A `Record` is an immutable, ordered tuple of `Value`s laid out by a
//! `Schema`. Values convert to and from JSON for line-oriented shard files;
//! bytes travel as base64 strings there.

use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use super::types::{Field, FieldType};
use crate::storage::{StoreError, StoreResult};

/// A single field value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absent optional value
    Null,
    /// UTF-8 string
    String(String),
    /// Opaque bytes
    Bytes(Vec<u8>),
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit float
    Float(f64),
    /// Homogeneous list
    Sequence(Vec<Value>),
    /// Nested record
    Record(Record),
}

impl Value {
    /// Returns the type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Sequence(_) => "sequence",
            Value::Record(_) => "record",
        }
    }

    /// String content, if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Integer content, if this is an int
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Converts a JSON value into a `Value` of the given type
    pub fn from_json(json: &serde_json::Value, field_type: &FieldType) -> StoreResult<Self> {
        use serde_json::Value as Json;

        let mismatch = || {
            StoreError::invalid_record(format!(
                "Expected {} in JSON, got {}",
                field_type.type_name(),
                json
            ))
        };

        match (field_type, json) {
            (FieldType::Optional { .. }, Json::Null) => Ok(Value::Null),
            (FieldType::Optional { inner }, other) => Value::from_json(other, inner),
            (FieldType::String, Json::String(s)) => Ok(Value::String(s.clone())),
            (FieldType::Bytes, Json::String(s)) => BASE64
                .decode(s)
                .map(Value::Bytes)
                .map_err(|e| StoreError::invalid_record(format!("Invalid base64 bytes: {}", e))),
            (FieldType::Int, Json::Number(n)) => n.as_i64().map(Value::Int).ok_or_else(mismatch),
            (FieldType::Float, Json::Number(n)) => {
                n.as_f64().map(Value::Float).ok_or_else(mismatch)
            }
            (FieldType::Sequence { element_type }, Json::Array(items)) => items
                .iter()
                .map(|item| Value::from_json(item, element_type))
                .collect::<StoreResult<Vec<_>>>()
                .map(Value::Sequence),
            (FieldType::Record { fields }, Json::Array(items)) => {
                Record::from_json_fields(items, fields).map(Value::Record)
            }
            _ => Err(mismatch()),
        }
    }

    /// Converts to JSON (bytes as base64, records as arrays)
    ///
    /// Non-finite floats have no JSON form and become null.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;

        match self {
            Value::Null => Json::Null,
            Value::String(s) => Json::String(s.clone()),
            Value::Bytes(b) => Json::String(BASE64.encode(b)),
            Value::Int(v) => Json::from(*v),
            Value::Float(v) => serde_json::Number::from_f64(*v)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::Sequence(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Record(record) => record.to_json(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Sequence(items) => write!(f, "[{} items]", items.len()),
            Value::Record(r) => write!(f, "({} fields)", r.len()),
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

/// An immutable ordered tuple of values
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    values: Vec<Value>,
}

impl Record {
    /// Create a record from its values
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    /// Value at position `index`
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// All values, in schema order
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Number of values
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the record has no values
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Consumes the record, returning its values
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Copy of this record with the value at `index` replaced
    pub fn with_value(&self, index: usize, value: Value) -> Self {
        let mut values = self.values.clone();
        if let Some(slot) = values.get_mut(index) {
            *slot = value;
        }
        Self { values }
    }

    /// Parses a JSON array laid out by `fields`
    pub fn from_json(json: &serde_json::Value, fields: &[Field]) -> StoreResult<Self> {
        match json {
            serde_json::Value::Array(items) => Self::from_json_fields(items, fields),
            other => Err(StoreError::invalid_record(format!(
                "Expected a JSON array record, got {}",
                other
            ))),
        }
    }

    fn from_json_fields(items: &[serde_json::Value], fields: &[Field]) -> StoreResult<Self> {
        if items.len() != fields.len() {
            return Err(StoreError::invalid_record(format!(
                "JSON record has {} values, schema defines {} fields",
                items.len(),
                fields.len()
            )));
        }
        fields
            .iter()
            .zip(items)
            .map(|(field, item)| Value::from_json(item, &field.field_type))
            .collect::<StoreResult<Vec<_>>>()
            .map(Record::new)
    }

    /// Serializes to a JSON array
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Array(self.values.iter().map(Value::to_json).collect())
    }
}

impl From<Vec<Value>> for Record {
    fn from(values: Vec<Value>) -> Self {
        Self::new(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields() -> Vec<Field> {
        vec![
            Field::string("doc_id"),
            Field::bytes("raw"),
            Field::new("score", FieldType::optional(FieldType::Float)),
            Field::new("tags", FieldType::sequence(FieldType::String)),
        ]
    }

    #[test]
    fn test_json_roundtrip() {
        let record = Record::new(vec![
            Value::from("d1"),
            Value::Bytes(vec![0, 159, 146, 150]),
            Value::Float(0.5),
            Value::Sequence(vec![Value::from("a"), Value::from("b")]),
        ]);
        let json = record.to_json();
        assert_eq!(json[1], json!("AJ+Slg=="));
        let parsed = Record::from_json(&json, &fields()).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_json_null_optional() {
        let json = json!(["d1", "", null, []]);
        let record = Record::from_json(&json, &fields()).unwrap();
        assert_eq!(record.get(2), Some(&Value::Null));
        assert_eq!(record.get(1), Some(&Value::Bytes(vec![])));
    }

    #[test]
    fn test_json_type_mismatch() {
        let json = json!([1, "", null, []]);
        let err = Record::from_json(&json, &fields()).unwrap_err();
        assert!(err.message().contains("string"));

        let short = json!(["d1"]);
        assert!(Record::from_json(&short, &fields()).is_err());

        let not_array = json!({"doc_id": "d1"});
        assert!(Record::from_json(&not_array, &fields()).is_err());
    }

    #[test]
    fn test_with_value() {
        let record = Record::new(vec![Value::from("a"), Value::from("b")]);
        let replaced = record.with_value(0, Value::from("p/a"));
        assert_eq!(replaced.get(0).and_then(Value::as_str), Some("p/a"));
        assert_eq!(record.get(0).and_then(Value::as_str), Some("a"));
    }
}
