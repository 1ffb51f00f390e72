/// # Test Utilities Module
///
/// Shared testing infrastructure for dalite.
///
/// This module provides:
/// - `DatabaseFixture`: an isolated, file-backed database seeded with
///   customers, accounts and events, plus an `orders` table whose foreign key
///   is only checked at commit
/// - Error assertion helpers and macros for `DaliteError`
/// - Inspection helpers that read the database on a connection of their own

use crate::config::ConnectionConfig;
use crate::core::Result;
use crate::datasource::DataSource;
use crate::session::Session;
use rusqlite::Connection;
use std::path::PathBuf;
use tempfile::TempDir;

/// Isolated database test fixture
///
/// The database file lives in a temporary directory that is removed when the
/// fixture is dropped.
pub struct DatabaseFixture {
    _dir: TempDir,
    pub path: PathBuf,
}

impl DatabaseFixture {
    /// Create a new test database with the standard schema and sample data
    pub fn new() -> Result<Self> {
        let dir = TempDir::new()?;
        let path = dir.path().join("fixture.db");
        let fixture = DatabaseFixture { _dir: dir, path };

        let conn = fixture.inspect()?;
        setup_standard_schema(&conn)?;
        populate_sample_data(&conn)?;
        Ok(fixture)
    }

    pub fn config(&self) -> ConnectionConfig {
        ConnectionConfig::from(self.path.as_path())
    }

    pub fn data_source(&self) -> DataSource {
        DataSource::new(self.config())
    }

    pub fn session(&self) -> Session {
        Session::new(self.config())
    }

    /// Opens a plain connection outside of any data source or session
    pub fn inspect(&self) -> Result<Connection> {
        Ok(Connection::open(&self.path)?)
    }

    /// Number of rows in `table`
    pub fn count(&self, table: &str) -> i64 {
        self.inspect()
            .and_then(|conn| {
                Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?)
            })
            .unwrap_or_else(|e| panic!("Failed to count rows of {}: {}", table, e))
    }

    /// Balance of account `id`
    pub fn balance(&self, id: i64) -> i64 {
        self.inspect()
            .and_then(|conn| {
                Ok(conn.query_row("SELECT balance FROM accounts WHERE id = ?1", [id], |row| row.get(0))?)
            })
            .unwrap_or_else(|e| panic!("Failed to read balance of account {}: {}", id, e))
    }
}

/// Set up standard test schema
fn setup_standard_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE customers (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT
        );

        CREATE TABLE accounts (
            id INTEGER PRIMARY KEY,
            customer_id INTEGER NOT NULL,
            balance INTEGER NOT NULL CHECK (balance >= 0),
            FOREIGN KEY (customer_id) REFERENCES customers (id)
        );

        CREATE TABLE events (
            id INTEGER PRIMARY KEY,
            kind TEXT NOT NULL,
            weight REAL,
            payload TEXT
        );

        CREATE TABLE orders (
            id INTEGER PRIMARY KEY,
            customer_id INTEGER NOT NULL
                REFERENCES customers (id) DEFERRABLE INITIALLY DEFERRED
        );

        CREATE INDEX idx_accounts_customer_id ON accounts (customer_id);
    ",
    )?;
    Ok(())
}

/// Populate with sample data
fn populate_sample_data(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        INSERT INTO customers (id, name, email) VALUES (1, 'Alice', 'alice@example.com');
        INSERT INTO customers (id, name, email) VALUES (2, 'Bob', NULL);
        INSERT INTO customers (id, name, email) VALUES (5, 'Acme', 'sales@acme.example');

        INSERT INTO accounts (id, customer_id, balance) VALUES (1, 1, 5);
        INSERT INTO accounts (id, customer_id, balance) VALUES (2, 2, 100);
    ",
    )?;
    Ok(())
}

/// Error testing utilities specific to DaliteError patterns
pub mod error_testing {
    use crate::core::DaliteError;

    /// Test that an error message carries the expected fragment
    pub fn assert_error_message<T>(result: &std::result::Result<T, DaliteError>, fragment: &str, context: &str)
    where
        T: std::fmt::Debug,
    {
        match result {
            Ok(value) => panic!("Expected error but got Ok({:?}) in {}", value, context),
            Err(e) => {
                let error_str = e.to_string();
                assert!(
                    error_str.to_lowercase().contains(&fragment.to_lowercase()),
                    "Expected '{}' in error message '{}' context: {}",
                    fragment,
                    error_str,
                    context
                );
            }
        }
    }
}

#[macro_export]
macro_rules! assert_dalite_error {
    ($result:expr, $expected:pat, $context:expr) => {
        match $result {
            Err($expected) => {}
            Ok(_) => panic!("Expected {} error but got Ok in {}", stringify!($expected), $context),
            Err(other) => panic!("Expected {} but got {:?} in {}", stringify!($expected), other, $context),
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DaliteError;

    #[test]
    fn test_database_fixture_creation() {
        let fixture = DatabaseFixture::new().unwrap();
        assert!(fixture.path.exists());
        assert_eq!(fixture.count("customers"), 3);
        assert_eq!(fixture.count("accounts"), 2);
        assert_eq!(fixture.count("events"), 0);
        assert_eq!(fixture.count("orders"), 0);
        assert_eq!(fixture.balance(1), 5);
    }

    #[test]
    fn test_fixtures_are_isolated() {
        let first = DatabaseFixture::new().unwrap();
        let second = DatabaseFixture::new().unwrap();
        assert_ne!(first.path, second.path);

        first.inspect().unwrap().execute("DELETE FROM accounts", []).unwrap();
        assert_eq!(first.count("accounts"), 0);
        assert_eq!(second.count("accounts"), 2);
    }

    #[test]
    fn test_error_assertion_helpers() {
        let result: Result<i32> = Err(DaliteError::Transaction("Transaction already in progress".to_string()));
        error_testing::assert_error_message(&result, "already in progress", "helper test");
        assert_dalite_error!(result, DaliteError::Transaction(_), "macro test");
    }
}
