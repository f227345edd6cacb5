//! Decoded event records
//!
//! A [`Record`] is the ordered field set one decoder produces for one event.
//! Records are built once, routed, and dropped.

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use thiserror::Error;

/// Scalar or compound field value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// JSON `null` from the input; has no MQTT rendering and holds its
    /// position inside arrays
    Null,
    String(String),
    Integer(i64),
    Double(f64),
    Array(Vec<Value>),
    Record(Record),
}

impl Value {
    /// Short kind name used in diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::String(_) => "string",
            Value::Integer(_) => "integer",
            Value::Double(_) => "double",
            Value::Array(_) => "array",
            Value::Record(_) => "record",
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
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(values: Vec<Value>) -> Self {
        Value::Array(values)
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        Value::Record(record)
    }
}

/// One keyed value of a record
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub key: String,
    pub value: Value,
    /// Rendering hint from the decoder (e.g. `"%.1f C"`); not used for MQTT output
    pub format: Option<String>,
}

impl Field {
    pub fn new<K: Into<String>, V: Into<Value>>(key: K, value: V) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            format: None,
        }
    }

    pub fn with_format<S: Into<String>>(mut self, format: S) -> Self {
        self.format = Some(format.into());
        self
    }
}

/// Ordered field set with unique keys at the top level
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<Field>,
}

/// Errors while ingesting a record from JSON
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("Malformed JSON record: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Record must be a JSON object, got {0}")]
    NotAnObject(&'static str),
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, see [`Record::push`]
    pub fn with<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        self.push(Field::new(key, value));
        self
    }

    /// Append a field; a field with an existing key replaces it in place
    pub fn push(&mut self, field: Field) {
        match self.fields.iter_mut().find(|f| f.key == field.key) {
            Some(existing) => *existing = field,
            None => self.fields.push(field),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.iter().find(|f| f.key == key).map(|f| &f.value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Parse one JSON object (one line of decoder output) into a record.
    ///
    /// Booleans become integers 0/1. `null` is kept as [`Value::Null`] and
    /// skipped when the record is flattened into device topics.
    pub fn from_json_str(input: &str) -> Result<Self, RecordError> {
        let value: serde_json::Value = serde_json::from_str(input)?;
        match value {
            serde_json::Value::Object(map) => Ok(Self::from_json_map(map)),
            other => Err(RecordError::NotAnObject(json_kind(&other))),
        }
    }

    fn from_json_map(map: serde_json::Map<String, serde_json::Value>) -> Self {
        let mut record = Record::new();
        for (key, value) in map {
            record.push(Field {
                key,
                value: convert_json(value),
                format: None,
            });
        }
        record
    }

    /// Compact JSON document of the whole record
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

fn convert_json(value: serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Integer(b.into()),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => n.as_f64().map_or(Value::Null, Value::Double),
        },
        serde_json::Value::String(s) => Value::String(s),
        serde_json::Value::Array(items) => {
            Value::Array(items.into_iter().map(convert_json).collect())
        }
        serde_json::Value::Object(map) => Value::Record(Record::from_json_map(map)),
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for field in &self.fields {
            map.serialize_entry(&field.key, &field.value)?;
        }
        map.end()
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::String(s) => serializer.serialize_str(s),
            Value::Integer(i) => serializer.serialize_i64(*i),
            Value::Double(d) => serializer.serialize_f64(*d),
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Record(record) => record.serialize(serializer),
        }
    }
}
