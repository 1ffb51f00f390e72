/// Bulk Load Module
///
/// Streams converted record sets into an existing table through a single
/// prepared INSERT statement. Two modes are offered: a self-contained load
/// that owns its connection and transaction, and a participating load that
/// runs inside whatever transaction the caller already holds.
///
/// Every failure surfaces as `DaliteError::BulkLoad`, after the rows written
/// so far have been undone.

use crate::core::db::connection::{ConnectionManager, ManagedConnection};
use crate::core::db::schema::{self, quote_identifier, TableName};
use crate::core::db::table::TabularData;
use crate::core::db::transaction;
use crate::core::{Cleanup, DaliteError, Result};
use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, error, warn};

const SAVEPOINT: &str = "dalite_bulk_load";

/// Converts records for a transfer into `table`
pub fn to_table<T: Serialize>(table: &str, records: &[T]) -> Result<TabularData> {
    TabularData::from_records(records).map_err(|e| DaliteError::bulk_load(table, e))
}

/// Loads `data` on a dedicated connection inside its own transaction
///
/// The connection is opened with the configured bulk timeout. Either every
/// row is committed or none is.
pub fn insert_self_contained(manager: &ConnectionManager, table: &str, data: &TabularData) -> Result<usize> {
    if data.is_empty() {
        debug!(table, "bulk load skipped, no records");
        return Ok(0);
    }
    let target = parse_table(table)?;

    let mut conn = manager
        .open_with_timeout(manager.config().bulk_timeout)
        .map_err(|e| as_bulk_error(table, e))?;
    let result = load_in_transaction(&conn, &target, data);

    let mut cleanup = Cleanup::new("bulk load");
    cleanup.attempt("close connection", || conn.close());
    cleanup.finish();

    result.map_err(|e| {
        error!(table, error = %e, "bulk load failed");
        as_bulk_error(table, e)
    })
}

fn load_in_transaction(conn: &ManagedConnection, table: &TableName, data: &TabularData) -> Result<usize> {
    let handle = conn.handle()?;
    let mut tx = transaction::begin(handle)?;

    match transfer(handle, table, data) {
        Ok(rows) => {
            // a rejected commit has already been rolled back
            transaction::commit(handle, &mut tx)?;
            Ok(rows)
        }
        Err(e) => {
            transaction::rollback(handle, &mut tx);
            Err(e)
        }
    }
}

/// Loads `data` on a connection the caller owns, without ending its transaction
///
/// The rows are written under a savepoint: a failed transfer leaves none of
/// them behind, while the enclosing transaction stays open for the caller to
/// commit or roll back.
pub fn insert_participating(conn: &Connection, table: &str, data: &TabularData) -> Result<usize> {
    if data.is_empty() {
        debug!(table, "bulk load skipped, no records");
        return Ok(0);
    }
    let target = parse_table(table)?;

    if conn.is_autocommit() {
        warn!(table, "bulk load outside an explicit transaction commits on its own");
    }

    conn.execute_batch(&format!("SAVEPOINT {}", SAVEPOINT))
        .map_err(|e| DaliteError::bulk_load(table, e))?;

    let result = transfer(conn, &target, data).and_then(|rows| {
        conn.execute_batch(&format!("RELEASE SAVEPOINT {}", SAVEPOINT))?;
        Ok(rows)
    });

    result.map_err(|e| {
        error!(table, error = %e, "bulk load failed");
        let mut cleanup = Cleanup::new("bulk load savepoint");
        cleanup
            .attempt("rollback to savepoint", || {
                conn.execute_batch(&format!("ROLLBACK TO SAVEPOINT {}", SAVEPOINT))
            })
            .attempt("release savepoint", || {
                conn.execute_batch(&format!("RELEASE SAVEPOINT {}", SAVEPOINT))
            });
        cleanup.finish();
        as_bulk_error(table, e)
    })
}

fn parse_table(table: &str) -> Result<TableName> {
    TableName::parse(table)
        .ok_or_else(|| DaliteError::bulk_load(table, "invalid destination table name"))
}

fn as_bulk_error(table: &str, err: DaliteError) -> DaliteError {
    match err {
        DaliteError::BulkLoad { .. } => err,
        other => DaliteError::bulk_load(table, other),
    }
}

/// Checks the destination layout, then inserts every row
fn transfer(conn: &Connection, table: &TableName, data: &TabularData) -> Result<usize> {
    let existing = schema::table_columns(conn, table)?;
    if existing.is_empty() {
        return Err(DaliteError::bulk_load(&table.to_string(), "table does not exist"));
    }
    if data.columns.is_empty() {
        return Err(DaliteError::bulk_load(&table.to_string(), "records have no fields"));
    }

    let unknown: Vec<&str> = data
        .column_names()
        .filter(|name| !existing.iter().any(|c| c.name.eq_ignore_ascii_case(name)))
        .collect();
    if !unknown.is_empty() {
        return Err(DaliteError::bulk_load(
            &table.to_string(),
            format!("unknown columns: {}", unknown.join(", ")),
        ));
    }

    let columns: Vec<String> = data.column_names().map(quote_identifier).collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table.quoted(),
        columns.join(", "),
        placeholders.join(", ")
    );

    let mut stmt = conn.prepare(&sql)?;
    for row in &data.rows {
        for (i, value) in row.iter().enumerate() {
            stmt.raw_bind_parameter(i + 1, value)?;
        }
        stmt.raw_execute()?;
    }

    debug!(table = %table, rows = data.rows.len(), "bulk transfer complete");
    Ok(data.rows.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    const SCHEMA: &str = "
        CREATE TABLE events (
            id INTEGER PRIMARY KEY,
            kind TEXT NOT NULL,
            weight REAL CHECK (weight IS NULL OR weight >= 0)
        );
    ";

    fn temp_manager() -> (TempDir, ConnectionManager) {
        let dir = TempDir::new().unwrap();
        let manager = ConnectionManager::new(dir.path().join("bulk.db").as_path());
        manager.open().unwrap().handle().unwrap().execute_batch(SCHEMA).unwrap();
        (dir, manager)
    }

    fn count(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0)).unwrap()
    }

    fn records(n: i64) -> Vec<serde_json::Value> {
        (1..=n)
            .map(|id| json!({"id": id, "kind": format!("kind-{}", id), "weight": id}))
            .collect()
    }

    #[test]
    fn test_self_contained_load() {
        let (_dir, manager) = temp_manager();
        let data = to_table("events", &records(50)).unwrap();

        let rows = insert_self_contained(&manager, "events", &data).unwrap();
        assert_eq!(rows, 50);
        assert_eq!(manager.open_handles(), 0);

        let conn = manager.open().unwrap();
        assert_eq!(count(conn.handle().unwrap()), 50);
        let weight: f64 = conn
            .handle()
            .unwrap()
            .query_row("SELECT weight FROM events WHERE id = 7", [], |row| row.get(0))
            .unwrap();
        assert_eq!(weight, 7.0);
    }

    #[test]
    fn test_self_contained_is_all_or_nothing() {
        let (_dir, manager) = temp_manager();
        let mut batch = records(10);
        batch[6] = json!({"id": 7, "kind": "bad", "weight": -1.5});
        let data = to_table("events", &batch).unwrap();

        match insert_self_contained(&manager, "events", &data) {
            Err(DaliteError::BulkLoad { table, message }) => {
                assert_eq!(table, "events");
                assert!(message.contains("CHECK"));
            }
            other => panic!("Expected BulkLoad error, got {:?}", other),
        }
        assert_eq!(manager.open_handles(), 0);

        let conn = manager.open().unwrap();
        assert_eq!(count(conn.handle().unwrap()), 0);
    }

    #[test]
    fn test_validation_failures() {
        let (_dir, manager) = temp_manager();
        let data = to_table("events", &records(2)).unwrap();

        for (table, expected) in [
            ("events; DROP TABLE events", "invalid destination table name"),
            ("missing", "table does not exist"),
        ] {
            match insert_self_contained(&manager, table, &data) {
                Err(DaliteError::BulkLoad { message, .. }) => assert!(message.contains(expected)),
                other => panic!("Expected BulkLoad error, got {:?}", other),
            }
        }

        let extra = to_table("events", &[json!({"id": 1, "kind": "a", "colour": "red"})]).unwrap();
        match insert_self_contained(&manager, "events", &extra) {
            Err(DaliteError::BulkLoad { message, .. }) => assert!(message.contains("colour")),
            other => panic!("Expected BulkLoad error, got {:?}", other),
        }

        let mismatch = to_table("events", &[json!({"id": 1}), json!({"id": "one"})]);
        assert!(matches!(mismatch, Err(DaliteError::BulkLoad { .. })));

        assert_eq!(manager.open_handles(), 0);
    }

    #[test]
    fn test_empty_record_set_is_noop() {
        let manager = ConnectionManager::new("/nonexistent/path/bulk.db");
        let data = to_table::<serde_json::Value>("events", &[]).unwrap();
        assert_eq!(insert_self_contained(&manager, "events", &data).unwrap(), 0);

        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(insert_participating(&conn, "events", &data).unwrap(), 0);
    }

    #[test]
    fn test_participating_load_follows_outer_transaction() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();

        let mut tx = transaction::begin(&conn).unwrap();
        let data = to_table("events", &records(5)).unwrap();
        assert_eq!(insert_participating(&conn, "events", &data).unwrap(), 5);
        assert!(!conn.is_autocommit());
        assert_eq!(count(&conn), 5);

        transaction::rollback(&conn, &mut tx);
        assert_eq!(count(&conn), 0);
    }

    #[test]
    fn test_participating_failure_keeps_earlier_work() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();

        let mut tx = transaction::begin(&conn).unwrap();
        conn.execute("INSERT INTO events (id, kind) VALUES (100, 'before')", []).unwrap();

        let mut batch = records(4);
        batch[2] = json!({"id": 3, "kind": null, "weight": 1});
        let data = to_table("events", &batch).unwrap();
        assert!(matches!(
            insert_participating(&conn, "events", &data),
            Err(DaliteError::BulkLoad { .. })
        ));

        assert!(tx.is_active());
        assert!(!conn.is_autocommit());
        assert_eq!(count(&conn), 1);

        transaction::commit(&conn, &mut tx).unwrap();
        assert_eq!(count(&conn), 1);
    }

    #[test]
    fn test_participating_without_transaction() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();

        let data = to_table("main.events", &records(3)).unwrap();
        assert_eq!(insert_participating(&conn, "main.events", &data).unwrap(), 3);
        assert!(conn.is_autocommit());
        assert_eq!(count(&conn), 3);
    }
}
