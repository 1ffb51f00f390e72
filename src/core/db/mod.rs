/// Database Module
///
/// This module provides the storage-facing half of dalite, organized into
/// focused submodules that the `Session` and `DataSource` facades compose.
///
/// ## Architecture
///
/// - **Connection Management** (`connection.rs`): opens, initialises and releases connections, counts open handles
/// - **Transaction Control** (`transaction.rs`): begin/commit/rollback, transaction state and command binding
/// - **Query Execution** (`query.rs`): parameter binding, row mapping, scalars and multi-result reading
/// - **Schema Introspection** (`schema.rs`): table name validation and column layout
/// - **Tabular Conversion** (`table.rs`): records to typed columns and rows
/// - **Bulk Loading** (`bulk.rs`): self-contained and participating bulk transfers
///
/// ## Error Handling
///
/// All database operations use the crate-wide `DaliteError` type. Errors from
/// the row mapper propagate unchanged; bulk transfers report `BulkLoad`.
pub mod bulk;
pub mod connection;
pub mod query;
pub mod schema;
pub mod table;
pub mod transaction;

pub use connection::{ConnectionManager, ManagedConnection};
pub use query::{GridReader, Parameters};
pub use schema::{Column, TableName};
pub use table::{ColumnDef, ColumnType, ConversionError, TabularData};
pub use transaction::{Command, Transaction, TransactionState};
