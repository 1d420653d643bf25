use std::collections::BTreeMap;
use std::fmt;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ValueRef};
use serde::Serialize;
use thiserror::Error;

pub const NANOS_PER_SECOND: i64 = 1_000_000_000;
pub const NANOS_PER_MILLI: i64 = 1_000_000;

/// Resolution of the TIMESTAMP column in a source table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Seconds,
    Milliseconds,
}

impl TimeUnit {
    /// Normalize a raw source timestamp to nanoseconds since the epoch.
    pub fn to_nanos(self, raw: i64) -> i64 {
        match self {
            TimeUnit::Seconds => raw.saturating_mul(NANOS_PER_SECOND),
            TimeUnit::Milliseconds => raw.saturating_mul(NANOS_PER_MILLI),
        }
    }

    /// Express an epoch-seconds bound in this unit, for use in a WHERE clause.
    pub fn express_seconds(self, secs: i64) -> i64 {
        match self {
            TimeUnit::Seconds => secs,
            TimeUnit::Milliseconds => secs.saturating_mul(1_000),
        }
    }
}

/// Tag values are either text (device names, sample types) or opaque
/// numeric codes passed through from the source row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum TagValue {
    Text(String),
    Integer(i64),
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Text(text) => f.write_str(text),
            TagValue::Integer(value) => write!(f, "{value}"),
        }
    }
}

impl From<&str> for TagValue {
    fn from(value: &str) -> Self {
        TagValue::Text(value.to_string())
    }
}

impl From<String> for TagValue {
    fn from(value: String) -> Self {
        TagValue::Text(value)
    }
}

impl From<i64> for TagValue {
    fn from(value: i64) -> Self {
        TagValue::Integer(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Integer(i64),
    Float(f64),
}

impl FieldValue {
    /// Source tables store -1 when a value was not recorded.
    pub fn is_not_recorded(&self) -> bool {
        match *self {
            FieldValue::Integer(value) => value == -1,
            FieldValue::Float(value) => value == -1.0,
        }
    }

    pub fn exceeds(&self, limit: i64) -> bool {
        match *self {
            FieldValue::Integer(value) => value > limit,
            FieldValue::Float(value) => value > limit as f64,
        }
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl FromSql for FieldValue {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Integer(value) => Ok(FieldValue::Integer(value)),
            ValueRef::Real(value) => Ok(FieldValue::Float(value)),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("record at {timestamp} has no device tag")]
    MissingDevice { timestamp: i64 },

    #[error("record at {timestamp} has no fields")]
    NoFields { timestamp: i64 },

    #[error("record at {timestamp} has an empty tag or field key")]
    EmptyKey { timestamp: i64 },
}

/// A sample normalized to nanosecond resolution, ready to become one point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub timestamp: i64,
    pub tags: BTreeMap<String, TagValue>,
    pub fields: BTreeMap<String, FieldValue>,
}

impl Record {
    pub fn new(timestamp: i64) -> Self {
        Self {
            timestamp,
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
        }
    }

    pub fn tag(mut self, key: &str, value: impl Into<TagValue>) -> Self {
        self.tags.insert(key.to_string(), value.into());
        self
    }

    pub fn field(mut self, key: &str, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// Insert a field read from a nullable column. NULL leaves the field out.
    pub fn set_field(&mut self, key: &str, value: Option<FieldValue>) {
        if let Some(value) = value {
            self.fields.insert(key.to_string(), value);
        }
    }

    pub fn set_tag(&mut self, key: &str, value: impl Into<TagValue>) {
        self.tags.insert(key.to_string(), value.into());
    }

    /// Tag counterpart of [`Record::set_field`]: NULL leaves the tag out.
    pub fn set_optional_tag(&mut self, key: &str, value: Option<impl Into<TagValue>>) {
        if let Some(value) = value {
            self.set_tag(key, value);
        }
    }

    pub fn device(&self) -> Option<&TagValue> {
        self.tags.get("device")
    }

    /// Check the shape every record must have before it reaches the sink.
    pub fn validate(&self) -> Result<(), RecordError> {
        let timestamp = self.timestamp;
        match self.device() {
            Some(TagValue::Text(name)) if !name.is_empty() => {}
            _ => return Err(RecordError::MissingDevice { timestamp }),
        }
        if self.fields.is_empty() {
            return Err(RecordError::NoFields { timestamp });
        }
        if self.tags.keys().chain(self.fields.keys()).any(|key| key.is_empty()) {
            return Err(RecordError::EmptyKey { timestamp });
        }
        Ok(())
    }
}
