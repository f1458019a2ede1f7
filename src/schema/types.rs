//! Schema type definitions
//!
//! Supported field types:
//! - string: UTF-8 string
//! - bytes: opaque byte string
//! - int: 64-bit signed integer
//! - float: 64-bit floating point
//! - optional: a value of the inner type or null
//! - sequence: homogeneous list with element type
//! - record: nested record with its own ordered fields

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::value::{Record, Value};
use crate::storage::{StoreError, StoreResult};

/// Field types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FieldType {
    /// UTF-8 string
    String,
    /// Opaque bytes
    Bytes,
    /// 64-bit signed integer
    Int,
    /// 64-bit floating point
    Float,
    /// Inner type or null
    Optional {
        /// Type of the value when present
        inner: Box<FieldType>,
    },
    /// Homogeneous list
    Sequence {
        /// Element type (boxed to allow recursive types)
        element_type: Box<FieldType>,
    },
    /// Nested record
    Record {
        /// Nested fields, in order
        fields: Vec<Field>,
    },
}

impl FieldType {
    /// Optional wrapper around `inner`
    pub fn optional(inner: FieldType) -> Self {
        FieldType::Optional {
            inner: Box::new(inner),
        }
    }

    /// Sequence of `element_type`
    pub fn sequence(element_type: FieldType) -> Self {
        FieldType::Sequence {
            element_type: Box::new(element_type),
        }
    }

    /// Nested record with the given fields
    pub fn record(fields: Vec<Field>) -> Self {
        FieldType::Record { fields }
    }

    /// Returns the type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Bytes => "bytes",
            FieldType::Int => "int",
            FieldType::Float => "float",
            FieldType::Optional { .. } => "optional",
            FieldType::Sequence { .. } => "sequence",
            FieldType::Record { .. } => "record",
        }
    }

    /// Scalar types can be used as index keys
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            FieldType::String | FieldType::Bytes | FieldType::Int | FieldType::Float
        )
    }

    fn describe(&self, out: &mut String) {
        match self {
            FieldType::Optional { inner } => {
                out.push_str("optional<");
                inner.describe(out);
                out.push('>');
            }
            FieldType::Sequence { element_type } => {
                out.push_str("sequence<");
                element_type.describe(out);
                out.push('>');
            }
            FieldType::Record { fields } => {
                out.push_str("record{");
                describe_fields(fields, out);
                out.push('}');
            }
            other => out.push_str(other.type_name()),
        }
    }

    /// Checks that `value` conforms to this type
    pub fn check(&self, value: &Value, path: &str) -> StoreResult<()> {
        let ok = match (self, value) {
            (FieldType::String, Value::String(_))
            | (FieldType::Bytes, Value::Bytes(_))
            | (FieldType::Int, Value::Int(_))
            | (FieldType::Float, Value::Float(_)) => true,
            (FieldType::Optional { .. }, Value::Null) => true,
            (FieldType::Optional { inner }, v) => return inner.check(v, path),
            (FieldType::Sequence { element_type }, Value::Sequence(items)) => {
                for (i, item) in items.iter().enumerate() {
                    element_type.check(item, &format!("{}[{}]", path, i))?;
                }
                true
            }
            (FieldType::Record { fields }, Value::Record(record)) => {
                check_fields(fields, record, path)?;
                true
            }
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(StoreError::invalid_record(format!(
                "Field '{}' expected {}, got {}",
                path,
                self.type_name(),
                value.type_name()
            )))
        }
    }
}

fn describe_fields(fields: &[Field], out: &mut String) {
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&field.name);
        out.push(':');
        field.field_type.describe(out);
    }
}

fn check_fields(fields: &[Field], record: &Record, path: &str) -> StoreResult<()> {
    if record.len() != fields.len() {
        return Err(StoreError::invalid_record(format!(
            "Record '{}' has {} values, schema defines {} fields",
            path,
            record.len(),
            fields.len()
        )));
    }
    for (field, value) in fields.iter().zip(record.values()) {
        let child = if path.is_empty() {
            field.name.clone()
        } else {
            format!("{}.{}", path, field.name)
        };
        field.field_type.check(value, &child)?;
    }
    Ok(())
}

/// A named field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    /// Field name
    pub name: String,
    /// Field data type
    #[serde(flatten)]
    pub field_type: FieldType,
}

impl Field {
    /// Create a field
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }

    /// Create a string field
    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::String)
    }

    /// Create a bytes field
    pub fn bytes(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Bytes)
    }

    /// Create an int field
    pub fn int(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Int)
    }

    /// Create a float field
    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Float)
    }
}

/// Ordered record layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    /// Record type name (e.g. `GenericDoc`)
    pub name: String,
    /// Fields in record order
    pub fields: Vec<Field>,
}

impl Schema {
    /// Create a new schema
    pub fn new(name: impl Into<String>, fields: Vec<Field>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// Position of a field by name
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Field definition by name
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Number of top-level fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the schema has no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Validates the schema itself (not a record)
    pub fn validate_structure(&self) -> StoreResult<()> {
        if self.fields.is_empty() {
            return Err(StoreError::invalid_schema(format!(
                "Schema '{}' defines no fields",
                self.name
            )));
        }
        for (i, field) in self.fields.iter().enumerate() {
            if self.fields[..i].iter().any(|f| f.name == field.name) {
                return Err(StoreError::invalid_schema(format!(
                    "Schema '{}' defines field '{}' twice",
                    self.name, field.name
                )));
            }
        }
        Ok(())
    }

    /// Checks that a record conforms to this schema
    pub fn validate(&self, record: &Record) -> StoreResult<()> {
        check_fields(&self.fields, record, "")
    }

    /// Canonical textual layout: `name(field:type,...)`
    pub fn layout(&self) -> String {
        let mut out = String::with_capacity(64);
        out.push_str(&self.name);
        out.push('(');
        describe_fields(&self.fields, &mut out);
        out.push(')');
        out
    }

    /// SHA-256 over the canonical layout, hex encoded
    ///
    /// Any change to field names, order or types changes the fingerprint.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.layout().as_bytes());
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_schema() -> Schema {
        Schema::new(
            "GenericDoc",
            vec![Field::string("doc_id"), Field::string("text")],
        )
    }

    #[test]
    fn test_validate_structure() {
        assert!(doc_schema().validate_structure().is_ok());
        assert!(Schema::new("Empty", vec![]).validate_structure().is_err());

        let dup = Schema::new("Dup", vec![Field::string("a"), Field::int("a")]);
        let err = dup.validate_structure().unwrap_err();
        assert!(err.message().contains("twice"));
    }

    #[test]
    fn test_field_index() {
        let schema = doc_schema();
        assert_eq!(schema.field_index("doc_id"), Some(0));
        assert_eq!(schema.field_index("text"), Some(1));
        assert_eq!(schema.field_index("title"), None);
    }

    #[test]
    fn test_fingerprint_tracks_layout() {
        let a = doc_schema();
        let b = doc_schema();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);

        let renamed = Schema::new("GenericDoc", vec![Field::string("doc_id"), Field::string("body")]);
        assert_ne!(a.fingerprint(), renamed.fingerprint());

        let retyped = Schema::new("GenericDoc", vec![Field::string("doc_id"), Field::bytes("text")]);
        assert_ne!(a.fingerprint(), retyped.fingerprint());

        let reordered = Schema::new("GenericDoc", vec![Field::string("text"), Field::string("doc_id")]);
        assert_ne!(a.fingerprint(), reordered.fingerprint());
    }

    #[test]
    fn test_layout_nested() {
        let schema = Schema::new(
            "Doc",
            vec![
                Field::string("id"),
                Field::new("tags", FieldType::sequence(FieldType::String)),
                Field::new(
                    "meta",
                    FieldType::record(vec![Field::int("len"), Field::new("lang", FieldType::optional(FieldType::String))]),
                ),
            ],
        );
        assert_eq!(
            schema.layout(),
            "Doc(id:string,tags:sequence<string>,meta:record{len:int,lang:optional<string>})"
        );
    }

    #[test]
    fn test_validate_record() {
        let schema = doc_schema();
        assert!(schema.validate(&Record::from(vec![Value::from("1"), Value::from("x")])).is_ok());

        let wrong_type = Record::from(vec![Value::from("1"), Value::Int(3)]);
        let err = schema.validate(&wrong_type).unwrap_err();
        assert!(err.message().contains("text"));

        let short = Record::from(vec![Value::from("1")]);
        assert!(schema.validate(&short).is_err());
    }

    #[test]
    fn test_optional_and_sequence_check() {
        let t = FieldType::optional(FieldType::sequence(FieldType::Int));
        assert!(t.check(&Value::Null, "f").is_ok());
        assert!(t.check(&Value::Sequence(vec![Value::Int(1), Value::Int(2)]), "f").is_ok());
        let err = t
            .check(&Value::Sequence(vec![Value::Int(1), Value::from("2")]), "f")
            .unwrap_err();
        assert!(err.message().contains("f[1]"));
        assert!(FieldType::Int.check(&Value::Null, "f").is_err());
    }

    #[test]
    fn test_scalar_types() {
        assert!(FieldType::String.is_scalar());
        assert!(FieldType::Int.is_scalar());
        assert!(!FieldType::optional(FieldType::String).is_scalar());
        assert!(!FieldType::sequence(FieldType::String).is_scalar());
    }

    #[test]
    fn test_schema_serde_roundtrip() {
        let schema = Schema::new(
            "Doc",
            vec![Field::string("id"), Field::new("tags", FieldType::sequence(FieldType::String))],
        );
        let json = serde_json::to_string(&schema).unwrap();
        let parsed: Schema = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, schema);
    }
}
