//! Destination schemas and per-batch coercion
//!
//! Every resource declares the typed columns its table expects. Sinks coerce a whole
//! batch against the schema before touching storage, so a single bad row rejects the
//! batch without a transaction ever being opened.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::batch::Batch;
use crate::record::{FieldValue, Header, Record};

/// Accepted date layout for `date` columns
pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Text,
    Integer,
    Date,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Text => f.write_str("text"),
            ColumnType::Integer => f.write_str("integer"),
            ColumnType::Date => f.write_str("date"),
        }
    }
}

/// One destination column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ColumnType,
    /// Empty cells bind NULL instead of failing coercion (integer and date columns)
    #[serde(default)]
    pub nullable: bool,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, kind: ColumnType) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    fn coerce(&self, value: &FieldValue, row: usize) -> Result<Option<FieldValue>, SchemaViolation> {
        let invalid = || SchemaViolation::InvalidValue {
            row,
            column: self.name.clone(),
            expected: self.kind,
            value: value.to_string(),
        };

        match (self.kind, value) {
            (ColumnType::Text, FieldValue::Text(_)) => Ok(Some(value.clone())),
            (ColumnType::Text, other) => Ok(Some(FieldValue::Text(other.to_string()))),
            (ColumnType::Integer, FieldValue::Integer(_)) | (ColumnType::Date, FieldValue::Date(_)) => {
                Ok(Some(value.clone()))
            }
            (_, FieldValue::Text(raw)) if raw.trim().is_empty() => {
                if self.nullable {
                    Ok(None)
                } else {
                    Err(invalid())
                }
            }
            (ColumnType::Integer, FieldValue::Text(raw)) => raw
                .trim()
                .parse::<i64>()
                .map(|i| Some(FieldValue::Integer(i)))
                .map_err(|_| invalid()),
            (ColumnType::Date, FieldValue::Text(raw)) => NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT)
                .map(|d| Some(FieldValue::Date(d)))
                .map_err(|_| invalid()),
            _ => Err(invalid()),
        }
    }
}

/// A record does not fit the destination schema
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaViolation {
    #[error("row {row}: field '{field}' has no matching column")]
    UnknownField { row: usize, field: String },

    #[error("row {row}: missing column '{column}'")]
    MissingField { row: usize, column: String },

    #[error("row {row}: column '{column}' expects {expected}, got '{value}'")]
    InvalidValue {
        row: usize,
        column: String,
        expected: ColumnType,
        value: String,
    },
}

/// Coerced values for one row, in column order; `None` binds NULL
pub type Row = Vec<Option<FieldValue>>;

/// Destination table plus its typed columns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSchema {
    pub table: String,
    pub columns: Vec<ColumnSpec>,
}

impl ResourceSchema {
    pub fn new(table: impl Into<String>, columns: Vec<ColumnSpec>) -> Self {
        Self {
            table: table.into(),
            columns,
        }
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Coerce every record of `batch`, failing on the first violation
    ///
    /// Row numbers in violations are 1-based positions within the batch.
    pub fn coerce_batch(&self, batch: &Batch) -> Result<Vec<Row>, SchemaViolation> {
        let mut layout: Option<(Header, Vec<usize>)> = None;
        let mut rows = Vec::with_capacity(batch.len());

        for (idx, record) in batch.records().iter().enumerate() {
            let row = idx + 1;
            let same_header =
                matches!(&layout, Some((header, _)) if Arc::ptr_eq(header, record.header()));
            if !same_header {
                layout = Some((record.header().clone(), self.positions(record, row)?));
            }
            let positions = layout.as_ref().map(|(_, p)| p.as_slice()).unwrap_or_default();
            rows.push(self.coerce_with(record, positions, row)?);
        }

        Ok(rows)
    }

    /// Coerce a single record
    pub fn coerce(&self, record: &Record) -> Result<Row, SchemaViolation> {
        let positions = self.positions(record, 1)?;
        self.coerce_with(record, &positions, 1)
    }

    /// Header index of each column, validating the field set
    fn positions(&self, record: &Record, row: usize) -> Result<Vec<usize>, SchemaViolation> {
        if let Some((field, _)) = record
            .fields()
            .find(|(field, _)| !self.columns.iter().any(|c| c.name == *field))
        {
            return Err(SchemaViolation::UnknownField {
                row,
                field: field.to_string(),
            });
        }

        self.columns
            .iter()
            .map(|column| {
                record
                    .header()
                    .iter()
                    .position(|name| *name == column.name)
                    .ok_or_else(|| SchemaViolation::MissingField {
                        row,
                        column: column.name.clone(),
                    })
            })
            .collect()
    }

    fn coerce_with(&self, record: &Record, positions: &[usize], row: usize) -> Result<Row, SchemaViolation> {
        self.columns
            .iter()
            .zip(positions)
            .map(|(column, &idx)| match record.value_at(idx) {
                Some(value) => column.coerce(value, row),
                None => Err(SchemaViolation::MissingField {
                    row,
                    column: column.name.clone(),
                }),
            })
            .collect()
    }
}

/// A logical destination: its name (failure domain) and its schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub name: String,
    pub schema: ResourceSchema,
}

impl Resource {
    pub fn new(name: impl Into<String>, schema: ResourceSchema) -> Self {
        Self {
            name: name.into(),
            schema,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::Batcher;
    use std::num::NonZeroUsize;

    fn customers() -> ResourceSchema {
        ResourceSchema::new(
            "customers",
            vec![
                ColumnSpec::new("id", ColumnType::Integer),
                ColumnSpec::new("name", ColumnType::Text),
                ColumnSpec::new("signed_up", ColumnType::Date).nullable(),
            ],
        )
    }

    fn row(id: &str, name: &str, signed_up: &str) -> Record {
        Record::from_pairs(vec![
            ("id", FieldValue::from(id)),
            ("name", FieldValue::from(name)),
            ("signed_up", FieldValue::from(signed_up)),
        ])
    }

    fn batch_of(records: Vec<Record>) -> Batch {
        let mut batcher = Batcher::new(NonZeroUsize::new(records.len()).unwrap());
        let mut out = None;
        for record in records {
            out = batcher.push(record);
        }
        out.unwrap()
    }

    #[test]
    fn test_coerces_text_into_column_types() {
        let coerced = customers().coerce(&row(" 42 ", "Acme", "2021-03-04")).unwrap();
        assert_eq!(
            coerced,
            vec![
                Some(FieldValue::Integer(42)),
                Some(FieldValue::Text("Acme".into())),
                Some(FieldValue::Date(NaiveDate::from_ymd_opt(2021, 3, 4).unwrap())),
            ]
        );
    }

    #[test]
    fn test_empty_nullable_binds_null() {
        let coerced = customers().coerce(&row("1", "", "")).unwrap();
        assert_eq!(coerced[1], Some(FieldValue::Text(String::new())));
        assert_eq!(coerced[2], None);
    }

    #[test]
    fn test_empty_non_nullable_integer_is_rejected() {
        let err = customers().coerce(&row("", "Acme", "")).unwrap_err();
        assert!(matches!(err, SchemaViolation::InvalidValue { ref column, .. } if column == "id"));
    }

    #[test]
    fn test_bad_date_is_rejected() {
        let err = customers().coerce(&row("1", "Acme", "04/03/2021")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "row 1: column 'signed_up' expects date, got '04/03/2021'"
        );
    }

    #[test]
    fn test_extra_field_is_rejected() {
        let record = Record::from_pairs(vec![
            ("id", FieldValue::from("1")),
            ("name", FieldValue::from("Acme")),
            ("signed_up", FieldValue::from("")),
            ("fax", FieldValue::from("555")),
        ]);
        let err = customers().coerce(&record).unwrap_err();
        assert_eq!(
            err,
            SchemaViolation::UnknownField {
                row: 1,
                field: "fax".into()
            }
        );
    }

    #[test]
    fn test_missing_field_is_rejected() {
        let record = Record::from_pairs(vec![("id", FieldValue::from("1")), ("name", FieldValue::from("Acme"))]);
        let err = customers().coerce(&record).unwrap_err();
        assert_eq!(
            err,
            SchemaViolation::MissingField {
                row: 1,
                column: "signed_up".into()
            }
        );
    }

    #[test]
    fn test_batch_reports_offending_row() {
        let batch = batch_of(vec![
            row("1", "a", ""),
            row("2", "b", ""),
            row("three", "c", ""),
        ]);
        let err = customers().coerce_batch(&batch).unwrap_err();
        assert!(matches!(err, SchemaViolation::InvalidValue { row: 3, .. }));
    }

    #[test]
    fn test_batch_with_reordered_header() {
        let batch = batch_of(vec![
            Record::from_pairs(vec![
                ("signed_up", FieldValue::from("2020-01-01")),
                ("name", FieldValue::from("z")),
                ("id", FieldValue::Integer(9)),
            ]),
            row("10", "y", ""),
        ]);
        let rows = customers().coerce_batch(&batch).unwrap();
        assert_eq!(rows[0][0], Some(FieldValue::Integer(9)));
        assert_eq!(rows[1][0], Some(FieldValue::Integer(10)));
        assert_eq!(rows[1][2], None);
    }
}
