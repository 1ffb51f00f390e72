/// Dalite Error Module
///
/// This module defines the error taxonomy for the data-access layer.
/// Operation-specific failures (connection, raw execution, transaction,
/// bulk load) get their own variants; errors raised while mapping rows
/// propagate unchanged through `Database` and `Json`.
use std::fmt;
use thiserror::Error;

/// Error type for every fallible operation in dalite.
///
/// Only one error ever reaches the caller of a failing operation: the original
/// cause. Failures that happen while cleaning up after it are logged and dropped.
#[derive(Error, Debug)]
pub enum DaliteError {
    /// Opening or initialising a connection failed, or no connection is open
    #[error("Connection error: {0}")]
    Connection(String),

    /// A raw command failed on the synchronous path
    #[error("Execution error: {0}")]
    Execution(String),

    /// A raw command failed on the asynchronous path
    #[error("Async execution error: {0}")]
    ExecutionAsync(String),

    /// Begin/commit failures and transaction state violations
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Bulk transfer into a destination table failed
    #[error("Bulk load into '{table}' failed: {message}")]
    BulkLoad { table: String, message: String },

    /// Storage errors raised while querying or mapping rows
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Parameter serialization or record deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration loading and validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File system and I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A blocking task running storage work panicked or was cancelled
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Reason attached to errors raised by the raw SQL paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlErrorReason {
    Connection,
    ExecutionSql,
    ExecutionSqlAsync,
}

impl fmt::Display for SqlErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SqlErrorReason::Connection => "Connection",
            SqlErrorReason::ExecutionSql => "ExecutionSQL",
            SqlErrorReason::ExecutionSqlAsync => "ExecutionSQLAsync",
        };
        f.write_str(name)
    }
}

impl DaliteError {
    /// Returns the SQL error reason for connection and raw execution failures.
    pub fn reason(&self) -> Option<SqlErrorReason> {
        match self {
            DaliteError::Connection(_) => Some(SqlErrorReason::Connection),
            DaliteError::Execution(_) => Some(SqlErrorReason::ExecutionSql),
            DaliteError::ExecutionAsync(_) => Some(SqlErrorReason::ExecutionSqlAsync),
            _ => None,
        }
    }

    pub(crate) fn bulk_load(table: &str, message: impl fmt::Display) -> Self {
        DaliteError::BulkLoad {
            table: table.to_string(),
            message: message.to_string(),
        }
    }

    pub(crate) fn not_connected() -> Self {
        DaliteError::Connection("no open connection".to_string())
    }
}

/// Type alias for Result to use DaliteError as the error type.
pub type Result<T> = std::result::Result<T, DaliteError>;
