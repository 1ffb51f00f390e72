/// Query Execution Module
///
/// This module is the row mapper: it binds serializable parameters to SQL
/// statements, runs them, and maps result rows onto deserializable records.
/// Command text may hold several statements; they run in order.

use crate::core::{DaliteError, Result};
use rusqlite::types::{Value, ValueRef};
use rusqlite::{Batch, Connection, Row, Statement};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Number, Value as JsonValue};
use std::fmt;

/// Parameters bound to every statement of a command.
///
/// Records and maps bind by name (`@name`, `:name`, `$name`), sequences bind
/// by position, and `()` binds nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Parameters {
    #[default]
    None,
    Named(Map<String, JsonValue>),
    Positional(Vec<JsonValue>),
}

impl Parameters {
    /// Converts any serializable value into bindable parameters
    pub fn from_serialize<P: Serialize + ?Sized>(params: &P) -> Result<Self> {
        Ok(match serde_json::to_value(params)? {
            JsonValue::Null => Parameters::None,
            JsonValue::Object(map) => Parameters::Named(map),
            JsonValue::Array(values) => Parameters::Positional(values),
            scalar => Parameters::Positional(vec![scalar]),
        })
    }

    fn lookup(&self, index: usize, name: Option<&str>) -> rusqlite::Result<&JsonValue> {
        let named = name.filter(|name| !name.starts_with('?'));
        match (self, named) {
            (Parameters::Named(map), Some(name)) => map
                .get(&name[1..])
                .ok_or_else(|| rusqlite::Error::InvalidParameterName(name.to_string())),
            (Parameters::Named(map), None) => map
                .values()
                .nth(index - 1)
                .ok_or(rusqlite::Error::InvalidParameterCount(map.len(), index)),
            (Parameters::Positional(values), _) => values
                .get(index - 1)
                .ok_or(rusqlite::Error::InvalidParameterCount(values.len(), index)),
            (Parameters::None, Some(name)) => {
                Err(rusqlite::Error::InvalidParameterName(name.to_string()))
            }
            (Parameters::None, None) => Err(rusqlite::Error::InvalidParameterCount(0, index)),
        }
    }
}

/// Binds `params` to every parameter slot of `stmt`
fn bind(stmt: &mut Statement<'_>, params: &Parameters) -> Result<()> {
    for index in 1..=stmt.parameter_count() {
        let name = stmt.parameter_name(index).map(str::to_owned);
        let value = to_sql_value(params.lookup(index, name.as_deref())?);
        stmt.raw_bind_parameter(index, value)?;
    }
    Ok(())
}

/// Converts a serialized parameter into a storage value
pub(crate) fn to_sql_value(value: &JsonValue) -> Value {
    match value {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(b) => Value::Integer(i64::from(*b)),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => n.as_f64().map(Value::Real).unwrap_or(Value::Null),
        },
        JsonValue::String(s) => Value::Text(s.clone()),
        nested => Value::Text(nested.to_string()),
    }
}

/// Converts a stored value into its serialized form
pub(crate) fn value_to_json(value: ValueRef<'_>) -> JsonValue {
    match value {
        ValueRef::Null => JsonValue::Null,
        ValueRef::Integer(i) => JsonValue::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map(JsonValue::Number).unwrap_or(JsonValue::Null),
        ValueRef::Text(t) => JsonValue::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => JsonValue::Array(b.iter().map(|byte| JsonValue::from(*byte)).collect()),
    }
}

fn row_to_object(row: &Row<'_>, columns: &[String]) -> Result<Map<String, JsonValue>> {
    let mut object = Map::with_capacity(columns.len());
    for (i, column) in columns.iter().enumerate() {
        object.insert(column.clone(), value_to_json(row.get_ref(i)?));
    }
    Ok(object)
}

/// Maps one row onto `T`: as a record keyed by column name, or, for a
/// single-column row, as the bare value.
fn map_row<T: DeserializeOwned>(object: Map<String, JsonValue>) -> Result<T> {
    let single = if object.len() == 1 {
        object.values().next().cloned()
    } else {
        None
    };

    match serde_json::from_value(JsonValue::Object(object)) {
        Ok(record) => Ok(record),
        Err(e) => match single {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Err(e.into()),
        },
    }
}

fn read_rows<T: DeserializeOwned>(stmt: &mut Statement<'_>, params: &Parameters) -> Result<Vec<T>> {
    bind(stmt, params)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    let mut rows = stmt.raw_query();
    let mut records = Vec::new();
    while let Some(row) = rows.next()? {
        records.push(map_row(row_to_object(row, &columns)?)?);
    }
    Ok(records)
}

fn read_first_value(stmt: &mut Statement<'_>, params: &Parameters) -> Result<JsonValue> {
    bind(stmt, params)?;
    let mut rows = stmt.raw_query();
    Ok(match rows.next()? {
        Some(row) => value_to_json(row.get_ref(0)?),
        None => JsonValue::Null,
    })
}

/// Runs a statement to completion and returns the number of changed rows
///
/// Writes that also return rows (`RETURNING`) count their changes once the
/// rows are drained.
fn run_statement(conn: &Connection, stmt: &mut Statement<'_>, params: &Parameters) -> Result<usize> {
    bind(stmt, params)?;
    if stmt.column_count() == 0 {
        return Ok(stmt.raw_execute()?);
    }
    {
        let mut rows = stmt.raw_query();
        while rows.next()?.is_some() {}
    }
    if stmt.readonly() {
        return Ok(0);
    }
    Ok(conn.changes() as usize)
}

/// Streaming reader over the result sets of a multi-statement command.
///
/// The reader borrows its connection, so it can never outlive it.
/// Statements that return no rows run as the reader passes them.
pub struct GridReader<'a> {
    conn: &'a Connection,
    batch: Batch<'a, 'a>,
    params: Parameters,
    consumed: bool,
}

impl fmt::Debug for GridReader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GridReader")
            .field("params", &self.params)
            .field("consumed", &self.consumed)
            .finish_non_exhaustive()
    }
}

impl<'a> GridReader<'a> {
    pub fn new(conn: &'a Connection, sql: &'a str, params: Parameters) -> Self {
        GridReader {
            conn,
            batch: Batch::new(conn, sql),
            params,
            consumed: false,
        }
    }

    /// Advances to the next statement that returns rows
    fn next_result_statement(&mut self) -> Result<Option<Statement<'a>>> {
        if self.consumed {
            return Ok(None);
        }
        while let Some(mut stmt) = self.batch.next()? {
            if stmt.column_count() > 0 {
                return Ok(Some(stmt));
            }
            run_statement(self.conn, &mut stmt, &self.params)?;
        }
        self.consumed = true;
        Ok(None)
    }

    fn read_next<T: DeserializeOwned>(&mut self) -> Result<Option<Vec<T>>> {
        match self.next_result_statement()? {
            Some(mut stmt) => Ok(Some(read_rows(&mut stmt, &self.params)?)),
            None => Ok(None),
        }
    }

    /// Reads the next result set
    ///
    /// # Errors
    ///
    /// `QueryReturnedNoRows` when every result set has been read.
    pub fn read<T: DeserializeOwned>(&mut self) -> Result<Vec<T>> {
        self.read_next()?
            .ok_or(DaliteError::Database(rusqlite::Error::QueryReturnedNoRows))
    }

    /// Reads the next result set and keeps its first row
    pub fn read_first<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        Ok(self.read::<T>()?.into_iter().next())
    }

    /// Whether every statement of the command has run
    pub fn is_consumed(&self) -> bool {
        self.consumed
    }

    /// Runs whatever statements are left, discarding their rows
    pub fn finish(mut self) -> Result<()> {
        while let Some(mut stmt) = self.next_result_statement()? {
            run_statement(self.conn, &mut stmt, &self.params)?;
        }
        Ok(())
    }
}

/// Returns the rows of the first result set; remaining statements still run
pub fn query<T: DeserializeOwned>(conn: &Connection, sql: &str, params: &Parameters) -> Result<Vec<T>> {
    let mut grid = GridReader::new(conn, sql, params.clone());
    let records = grid.read_next()?.unwrap_or_default();
    grid.finish()?;
    Ok(records)
}

/// Opens a reader over every result set of `sql`
pub fn query_multiple<'a>(conn: &'a Connection, sql: &'a str, params: &Parameters) -> GridReader<'a> {
    GridReader::new(conn, sql, params.clone())
}

/// First column of the first row, or `None` for no row or a NULL value
pub fn query_scalar_nullable<T: DeserializeOwned>(
    conn: &Connection,
    sql: &str,
    params: &Parameters,
) -> Result<Option<T>> {
    let mut grid = GridReader::new(conn, sql, params.clone());
    let value = match grid.next_result_statement()? {
        Some(mut stmt) => read_first_value(&mut stmt, params)?,
        None => JsonValue::Null,
    };
    grid.finish()?;

    match value {
        JsonValue::Null => Ok(None),
        value => Ok(Some(serde_json::from_value(value)?)),
    }
}

/// First column of the first row; no row or NULL yields `T::default()`
pub fn query_scalar<T: DeserializeOwned + Default>(
    conn: &Connection,
    sql: &str,
    params: &Parameters,
) -> Result<T> {
    Ok(query_scalar_nullable(conn, sql, params)?.unwrap_or_default())
}

/// Runs every statement of the command and returns the total changed rows
pub fn execute(conn: &Connection, sql: &str, params: &Parameters) -> Result<usize> {
    let mut batch = Batch::new(conn, sql);
    let mut changed = 0;
    while let Some(mut stmt) = batch.next()? {
        changed += run_statement(conn, &mut stmt, params)?;
    }
    Ok(changed)
}
