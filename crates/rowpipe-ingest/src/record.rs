//! Decoded records
//!
//! A [`Record`] is an ordered field-name -> value mapping. Records decoded from the
//! same file share one header allocation, so a full batch costs one copy of the
//! field names rather than one per row.

use chrono::NaiveDate;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::sync::Arc;

/// Scalar value of a single field
///
/// Serialized untagged: text as a JSON string, integers as numbers, dates as
/// `YYYY-MM-DD` strings. Deserialization tries integer, then date, then text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Integer(i64),
    Date(NaiveDate),
    Text(String),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Integer(i) => write!(f, "{i}"),
            FieldValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            FieldValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<NaiveDate> for FieldValue {
    fn from(value: NaiveDate) -> Self {
        FieldValue::Date(value)
    }
}

/// Field names shared by every record decoded from one source
pub type Header = Arc<[String]>;

/// One immutable decoded row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    header: Header,
    values: Vec<FieldValue>,
}

impl Record {
    /// Pair `values` positionally with `header`
    ///
    /// Returns `None` when the lengths differ.
    pub fn new(header: Header, values: Vec<FieldValue>) -> Option<Self> {
        (header.len() == values.len()).then_some(Self { header, values })
    }

    /// Build a record with its own header, mainly for tests and in-memory sources
    pub fn from_pairs<K: Into<String>>(pairs: Vec<(K, FieldValue)>) -> Self {
        let (names, values): (Vec<String>, Vec<FieldValue>) =
            pairs.into_iter().map(|(k, v)| (k.into(), v)).unzip();
        Self {
            header: names.into(),
            values,
        }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.header
            .iter()
            .position(|name| name == field)
            .map(|idx| &self.values[idx])
    }

    /// Value at header position `idx`
    pub fn value_at(&self, idx: usize) -> Option<&FieldValue> {
        self.values.get(idx)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.header
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (name, value) in self.fields() {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}
