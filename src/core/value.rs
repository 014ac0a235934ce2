// Typed field values: ordering and hashing for index keys, JSON conversion for rows.
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::core::error::{Error, ErrorKind};
use crate::core::schema::FieldKind;

/// Row identifiers are positive and assigned by the engine, starting at 1.
pub type RowId = u64;

/// Field name to value mapping used for create attributes, find criteria and rows.
pub type Attributes = BTreeMap<String, Value>;

/// A single stored value.
///
/// Values of different variants compare by variant order (`Int < Text < Timestamp`),
/// which only matters when an index is fed mixed kinds; create rejects that.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Value {
    Int(i64),
    Text(String),
    Timestamp(#[serde(with = "time::serde::rfc3339")] OffsetDateTime),
}

impl Value {
    /// Current UTC time truncated to whole seconds.
    pub fn now() -> Self {
        let now = OffsetDateTime::now_utc();
        Value::Timestamp(now.replace_nanosecond(0).unwrap_or(now))
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "integer",
            Value::Text(_) => "text",
            Value::Timestamp(_) => "timestamp",
        }
    }

    /// Whether this value may be stored in a field of `kind`.
    pub fn fits(&self, kind: &FieldKind) -> bool {
        matches!(
            (self, kind),
            (Value::Int(_), FieldKind::Identifier)
                | (Value::Int(_), FieldKind::Integer)
                | (Value::Text(_), FieldKind::Text { .. })
                | (Value::Timestamp(_), FieldKind::Timestamp)
        )
    }

    pub fn to_json(&self) -> Result<JsonValue, Error> {
        match self {
            Value::Int(value) => Ok(JsonValue::from(*value)),
            Value::Text(value) => Ok(JsonValue::from(value.as_str())),
            Value::Timestamp(value) => value.format(&Rfc3339).map(JsonValue::from).map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message("failed to format timestamp")
                    .with_source(err)
            }),
        }
    }

    /// Reads a JSON scalar as a value of `kind`; `null` reads as absent.
    pub fn from_json(kind: &FieldKind, json: &JsonValue) -> Result<Option<Self>, Error> {
        let value = match (kind, json) {
            (_, JsonValue::Null) => return Ok(None),
            (FieldKind::Identifier | FieldKind::Integer, JsonValue::Number(number)) => number
                .as_i64()
                .map(Value::Int)
                .ok_or_else(|| kind_mismatch(kind, json))?,
            (FieldKind::Text { .. }, JsonValue::String(text)) => Value::Text(text.clone()),
            (FieldKind::Timestamp, JsonValue::String(text)) => {
                let parsed = OffsetDateTime::parse(text, &Rfc3339).map_err(|err| {
                    Error::new(ErrorKind::Schema)
                        .with_message(format!("invalid RFC 3339 timestamp {text:?}"))
                        .with_source(err)
                })?;
                Value::Timestamp(parsed)
            }
            _ => return Err(kind_mismatch(kind, json)),
        };
        Ok(Some(value))
    }
}

/// A stored row: its identifier plus every non-null field value, the identifier included.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Row {
    id: RowId,
    values: Attributes,
}

impl Row {
    pub fn new(id: RowId, values: Attributes) -> Self {
        Self { id, values }
    }

    pub fn id(&self) -> RowId {
        self.id
    }

    pub fn values(&self) -> &Attributes {
        &self.values
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    pub fn to_json(&self) -> Result<JsonValue, Error> {
        let mut map = serde_json::Map::new();
        for (name, value) in &self.values {
            map.insert(name.clone(), value.to_json()?);
        }
        Ok(JsonValue::Object(map))
    }
}

fn kind_mismatch(kind: &FieldKind, json: &JsonValue) -> Error {
    Error::new(ErrorKind::Schema).with_message(format!("expected {} value, got {json}", kind.name()))
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(value) => write!(f, "{value}"),
            Value::Text(value) => write!(f, "{value:?}"),
            Value::Timestamp(value) => match value.format(&Rfc3339) {
                Ok(text) => f.write_str(&text),
                Err(_) => write!(f, "{value}"),
            },
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<OffsetDateTime> for Value {
    fn from(value: OffsetDateTime) -> Self {
        Value::Timestamp(value)
    }
}
