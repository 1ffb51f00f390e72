/// Schema Introspection Module
///
/// Validates table names supplied by callers and reads the column layout of
/// destination tables before data is written into them.

use crate::core::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::{Connection, Row};
use std::fmt;

static TABLE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:([A-Za-z_][A-Za-z0-9_]*)\.)?([A-Za-z_][A-Za-z0-9_]*)$").unwrap());

/// A plain or schema-qualified table name, e.g. `events` or `main.events`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName {
    pub schema: Option<String>,
    pub name: String,
}

impl TableName {
    /// Parses a table name, returning `None` if it is not a valid identifier
    pub fn parse(raw: &str) -> Option<Self> {
        let captures = TABLE_NAME.captures(raw.trim())?;
        Some(TableName {
            schema: captures.get(1).map(|m| m.as_str().to_string()),
            name: captures.get(2)?.as_str().to_string(),
        })
    }

    /// The name quoted for use in SQL text
    pub fn quoted(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", quote_identifier(schema), quote_identifier(&self.name)),
            None => quote_identifier(&self.name),
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Quotes an identifier, doubling embedded quotes
pub fn quote_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// Represents a database column with its metadata
#[derive(Debug, Clone)]
pub struct Column {
    /// Column name
    pub name: String,
    /// Declared type name (e.g., "INTEGER", "TEXT", "REAL", "BLOB")
    pub type_name: String,
    /// Whether the column rejects NULL values
    pub notnull: bool,
    /// Whether this column is part of the primary key
    pub pk: bool,
}

impl Column {
    /// Creates a Column from a PRAGMA table_info result row
    fn from_pragma_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Column {
            name: row.get(1)?,
            type_name: row.get(2)?,
            notnull: row.get(3)?,
            pk: row.get::<_, i64>(5)? > 0,
        })
    }
}

/// Retrieves the columns of `table`; an empty list means the table does not exist
pub fn table_columns(conn: &Connection, table: &TableName) -> Result<Vec<Column>> {
    let pragma = match &table.schema {
        Some(schema) => format!(
            "PRAGMA {}.table_info({})",
            quote_identifier(schema),
            quote_identifier(&table.name)
        ),
        None => format!("PRAGMA table_info({})", quote_identifier(&table.name)),
    };

    let mut stmt = conn.prepare(&pragma)?;
    let column_iter = stmt.query_map([], |row| Column::from_pragma_row(row))?;

    let mut columns = Vec::new();
    for column_result in column_iter {
        columns.push(column_result?);
    }
    Ok(columns)
}
