/// Connection Management Module
///
/// This module opens and releases database connections and keeps count of
/// the handles that are still alive, so callers can verify that nothing leaks.

use crate::config::ConnectionConfig;
use crate::core::{DaliteError, Result};
use rusqlite::Connection;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Opens connections for one configuration and tracks how many are open.
///
/// Clones share the configuration and the open-handle counter.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    config: Arc<ConnectionConfig>,
    open_handles: Arc<AtomicUsize>,
}

impl ConnectionManager {
    /// Creates a new connection manager
    pub fn new(config: impl Into<ConnectionConfig>) -> Self {
        ConnectionManager {
            config: Arc::new(config.into()),
            open_handles: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// The configuration every connection is opened with
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Opens a connection with the configured default timeout
    ///
    /// # Returns
    ///
    /// A live `ManagedConnection`, or `DaliteError::Connection` when the
    /// driver cannot open or initialise the database.
    pub fn open(&self) -> Result<ManagedConnection> {
        self.open_with_timeout(self.config.default_timeout)
    }

    /// Opens a connection whose busy timeout defaults to `timeout`
    ///
    /// A handle that opened but failed to initialise is closed before the
    /// error is returned, and is never counted as open.
    pub fn open_with_timeout(&self, timeout: Duration) -> Result<ManagedConnection> {
        let target = &self.config.target;
        let conn = Connection::open(target)
            .map_err(|e| DaliteError::Connection(format!("failed to open '{}': {}", target, e)))?;

        if let Err(e) = initialize(&conn, &self.config, timeout) {
            if let Err((_, close_err)) = conn.close() {
                warn!(target = %target, error = %close_err, "failed to close partially opened connection");
            }
            return Err(DaliteError::Connection(format!(
                "failed to initialise '{}': {}",
                target, e
            )));
        }

        let open = self.open_handles.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(target = %target, open, "connection opened");

        Ok(ManagedConnection {
            inner: Some(conn),
            open_handles: Arc::clone(&self.open_handles),
            default_timeout: timeout,
        })
    }

    /// Number of connections opened through this manager that are still open
    pub fn open_handles(&self) -> usize {
        self.open_handles.load(Ordering::SeqCst)
    }
}

/// Applies the busy timeout and pragmas, then touches the schema so that a
/// file which is not a database is rejected at open time.
fn initialize(conn: &Connection, config: &ConnectionConfig, timeout: Duration) -> rusqlite::Result<()> {
    conn.busy_timeout(timeout)?;
    conn.execute_batch(&config.init_sql())?;
    conn.query_row("PRAGMA schema_version", [], |_| Ok(()))
}

/// An owned connection handle.
///
/// Closing is idempotent, and dropping an open handle closes it.
#[derive(Debug)]
pub struct ManagedConnection {
    inner: Option<Connection>,
    open_handles: Arc<AtomicUsize>,
    default_timeout: Duration,
}

impl ManagedConnection {
    /// Checks if the native handle is still open
    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    /// Borrows the native connection
    ///
    /// # Errors
    ///
    /// Returns `DaliteError::Connection` once the handle has been closed.
    pub fn handle(&self) -> Result<&Connection> {
        self.inner.as_ref().ok_or_else(DaliteError::not_connected)
    }

    /// Sets the busy timeout for the next operation; `None` restores the default
    pub fn apply_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.handle()?
            .busy_timeout(timeout.unwrap_or(self.default_timeout))?;
        Ok(())
    }

    /// Evicts cached prepared statements held by this handle.
    pub fn clear_pool(&self) {
        if let Some(conn) = &self.inner {
            conn.flush_prepared_statement_cache();
        }
    }

    /// Closes the connection; a no-op when already closed
    ///
    /// The native handle is released even when the driver reports an error
    /// while closing; that error is still returned.
    pub fn close(&mut self) -> Result<()> {
        let Some(conn) = self.inner.take() else {
            return Ok(());
        };
        let open = self.open_handles.fetch_sub(1, Ordering::SeqCst) - 1;

        match conn.close() {
            Ok(()) => {
                debug!(open, "connection closed");
                Ok(())
            }
            Err((conn, e)) => {
                drop(conn);
                Err(DaliteError::Connection(format!("failed to close connection: {}", e)))
            }
        }
    }
}

impl Drop for ManagedConnection {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "connection released with errors");
        }
    }
}
