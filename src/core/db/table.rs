/// Tabular Conversion Module
///
/// Converts a set of uniform records into columns and rows ready for a bulk
/// transfer. Columns follow the records' field names in first-seen order and
/// are typed by the field's underlying (non-null) value type.

use crate::core::db::query;
use rusqlite::types::Value;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use thiserror::Error;

/// Underlying type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
    Boolean,
    /// Nested sequences and maps, stored as JSON text
    Json,
    /// Every value seen so far was null
    Unknown,
}

impl ColumnType {
    fn of(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => ColumnType::Unknown,
            JsonValue::Bool(_) => ColumnType::Boolean,
            JsonValue::Number(n) if n.as_i64().is_some() => ColumnType::Integer,
            JsonValue::Number(_) => ColumnType::Real,
            JsonValue::String(_) => ColumnType::Text,
            JsonValue::Array(_) | JsonValue::Object(_) => ColumnType::Json,
        }
    }

    /// Combines the current column type with a newly seen value type
    fn merge(self, other: ColumnType) -> Option<ColumnType> {
        match (self, other) {
            (current, ColumnType::Unknown) => Some(current),
            (ColumnType::Unknown, seen) => Some(seen),
            (ColumnType::Integer, ColumnType::Real) | (ColumnType::Real, ColumnType::Integer) => {
                Some(ColumnType::Real)
            }
            (current, seen) if current == seen => Some(current),
            _ => None,
        }
    }
}

/// Name and type of one column
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
}

/// Errors raised while converting records into a table
#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("record {index} could not be serialized: {source}")]
    Serialize {
        index: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("record {index} is not a struct or map")]
    NotARecord { index: usize },

    #[error("column '{column}' holds {expected:?} values but record {index} has {found:?}")]
    TypeMismatch {
        column: String,
        expected: ColumnType,
        found: ColumnType,
        index: usize,
    },
}

/// Records converted into typed columns and rows of storage values
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TabularData {
    pub columns: Vec<ColumnDef>,
    pub rows: Vec<Vec<Value>>,
}

impl TabularData {
    /// Builds a table from uniform records
    ///
    /// A field missing from some records, or null in them, becomes NULL.
    pub fn from_records<I>(records: I) -> Result<Self, ConversionError>
    where
        I: IntoIterator,
        I::Item: Serialize,
    {
        let mut table = TabularData::default();
        let mut positions: HashMap<String, usize> = HashMap::new();

        for (index, record) in records.into_iter().enumerate() {
            let fields = match serde_json::to_value(&record)
                .map_err(|source| ConversionError::Serialize { index, source })?
            {
                JsonValue::Object(fields) => fields,
                _ => return Err(ConversionError::NotARecord { index }),
            };

            let mut row = vec![Value::Null; table.columns.len()];
            for (name, value) in fields {
                let position = match positions.get(&name) {
                    Some(position) => *position,
                    None => {
                        positions.insert(name.clone(), table.columns.len());
                        table.columns.push(ColumnDef {
                            name: name.clone(),
                            column_type: ColumnType::Unknown,
                        });
                        row.push(Value::Null);
                        table.columns.len() - 1
                    }
                };

                let expected = table.columns[position].column_type;
                let found = ColumnType::of(&value);
                table.columns[position].column_type =
                    expected.merge(found).ok_or_else(|| ConversionError::TypeMismatch {
                        column: name.clone(),
                        expected,
                        found,
                        index,
                    })?;
                row[position] = query::to_sql_value(&value);
            }
            table.rows.push(row);
        }

        let width = table.columns.len();
        for row in &mut table.rows {
            row.resize(width, Value::Null);
        }
        Ok(table)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}
