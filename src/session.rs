//! Stateful facade: one long-lived connection and an optional explicit
//! transaction spanning several calls.
//!
//! A session starts disconnected. `create_connection` opens its connection,
//! `begin_transaction` starts a transaction that every later call runs in,
//! and `commit_transaction` / `rollback_transaction` resolve it and end the
//! session. Dropping a session releases whatever it still holds.
use crate::config::ConnectionConfig;
use crate::core::db::connection::{ConnectionManager, ManagedConnection};
use crate::core::db::query::{self, GridReader, Parameters};
use crate::core::db::transaction::{self, Command, Transaction, TransactionState};
use crate::core::db::bulk;
use crate::core::{Cleanup, DaliteError, Result};
use crate::queryable::{AsyncQueryable, Queryable};
use async_trait::async_trait;
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error};

/// Stateful database session.
///
/// All operations take `&mut self`; a session is `Send` but is never shared.
#[derive(Debug)]
pub struct Session {
    manager: ConnectionManager,
    connection: Option<ManagedConnection>,
    command: Command,
    transaction: Option<Transaction>,
    // set while an async operation holds the connection; stays set if it never comes back
    connection_lost: bool,
}

impl Session {
    /// Creates a disconnected session for the given database
    pub fn new(config: impl Into<ConnectionConfig>) -> Self {
        Session::with_manager(ConnectionManager::new(config))
    }

    pub(crate) fn with_manager(manager: ConnectionManager) -> Self {
        Session {
            manager,
            connection: None,
            command: Command::new(),
            transaction: None,
            connection_lost: false,
        }
    }

    /// Opens the session's connection
    ///
    /// A connection that is already open is closed first, rolling back any
    /// transaction still active on it.
    pub fn create_connection(&mut self) -> Result<()> {
        if self.connection.is_some() {
            self.teardown("session reconnect");
        }
        self.transaction = None;
        self.command = Command::new();
        self.connection_lost = false;

        let conn = self.manager.open().map_err(|e| {
            error!(error = %e, "session could not connect");
            e
        })?;
        self.connection = Some(conn);
        debug!("session connected");
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connection.as_ref().map_or(false, ManagedConnection::is_open)
    }

    /// State of the session's most recent transaction
    ///
    /// A transaction whose connection was lost counts as rolled back.
    pub fn transaction_state(&self) -> TransactionState {
        match self.transaction.as_ref() {
            Some(tx) if tx.is_active() && self.connection_lost => TransactionState::RolledBack,
            Some(tx) => tx.state(),
            None => TransactionState::NoTransaction,
        }
    }

    /// Whether an async operation lost the session's connection, either by
    /// panicking or by being dropped before it finished
    pub fn is_connection_lost(&self) -> bool {
        self.connection_lost
    }

    /// Number of connections opened by this session that are still open
    pub fn open_handles(&self) -> usize {
        self.manager.open_handles()
    }

    /// Starts an explicit transaction and binds the session's command to it
    pub fn begin_transaction(&mut self) -> Result<()> {
        let conn = live_handle(&self.connection)?;
        let tx = transaction::begin(conn)?;
        self.command.bind(Some(&tx));
        self.transaction = Some(tx);
        Ok(())
    }

    /// Commits the active transaction, if any, then ends the session
    ///
    /// The connection is closed whether or not the commit succeeded; a failed
    /// commit has been rolled back by the time its error is returned.
    ///
    /// # Errors
    ///
    /// `Transaction` when a transaction was begun but does not end up
    /// committed: the storage layer rejected the commit, the transaction was
    /// already rolled back, or its connection was lost.
    pub fn commit_transaction(&mut self) -> Result<()> {
        if self.connection_lost {
            if let Some(tx) = self.transaction.as_mut() {
                tx.mark_rolled_back();
            }
        }

        let result = match (self.connection.as_ref(), self.transaction.as_mut()) {
            (Some(conn), Some(tx)) if tx.is_active() => {
                conn.handle().and_then(|handle| transaction::commit(handle, tx))
            }
            (_, Some(tx)) if tx.state() != TransactionState::Committed => {
                let cause = if self.connection_lost {
                    "its connection was lost"
                } else {
                    "it was already rolled back"
                };
                error!(transaction = %tx.id(), cause, "commit refused");
                Err(DaliteError::Transaction(format!(
                    "transaction {} cannot be committed: {}",
                    tx.id(),
                    cause
                )))
            }
            _ => Ok(()),
        };
        self.teardown("session commit");
        result
    }

    /// Rolls back the active transaction, if any, then ends the session.
    ///
    /// Never fails and may be called any number of times.
    pub fn rollback_transaction(&mut self) {
        self.teardown("session rollback");
    }

    /// Ends the session, rolling back any transaction that is still active
    pub fn close(&mut self) {
        self.teardown("session close");
    }

    /// Drops the command, rolls back, evicts cached statements and closes,
    /// isolating each step's failure.
    fn teardown(&mut self, context: &'static str) {
        let mut cleanup = Cleanup::new(context);
        cleanup.attempt("drop command", || {
            self.command = Command::new();
            Ok::<(), DaliteError>(())
        });

        if let Some(tx) = self.transaction.as_mut().filter(|tx| tx.is_active()) {
            match self.connection.as_ref() {
                Some(conn) => {
                    cleanup.attempt("rollback", || transaction::try_rollback(conn.handle()?, tx));
                }
                None => tx.mark_rolled_back(),
            }
        }

        if let Some(mut conn) = self.connection.take() {
            conn.clear_pool();
            cleanup.attempt("close connection", || conn.close());
        }
        cleanup.finish();
    }

    /// Borrows the connection with the call's busy timeout applied
    fn prepare(&self, timeout: Option<Duration>) -> Result<&Connection> {
        let conn = self.connection.as_ref().ok_or_else(DaliteError::not_connected)?;
        conn.apply_timeout(timeout)?;
        conn.handle()
    }

    /// Runs `sql` and maps the rows of its first result set onto `T`
    pub fn query<T, P>(&mut self, sql: &str, params: &P, timeout: Option<Duration>) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
        P: Serialize + ?Sized,
    {
        let params = Parameters::from_serialize(params)?;
        query::query(self.prepare(timeout)?, sql, &params)
    }

    /// First column of the first row; no row or NULL yields `T::default()`
    pub fn query_scalar<T, P>(&mut self, sql: &str, params: &P, timeout: Option<Duration>) -> Result<T>
    where
        T: DeserializeOwned + Default,
        P: Serialize + ?Sized,
    {
        let params = Parameters::from_serialize(params)?;
        query::query_scalar(self.prepare(timeout)?, sql, &params)
    }

    /// First column of the first row, or `None` for no row or NULL
    pub fn query_scalar_nullable<T, P>(
        &mut self,
        sql: &str,
        params: &P,
        timeout: Option<Duration>,
    ) -> Result<Option<T>>
    where
        T: DeserializeOwned,
        P: Serialize + ?Sized,
    {
        let params = Parameters::from_serialize(params)?;
        query::query_scalar_nullable(self.prepare(timeout)?, sql, &params)
    }

    /// Opens a reader over every result set of `sql`
    ///
    /// The reader borrows the session, so the connection cannot be closed
    /// while it is alive.
    pub fn query_multiple<'a, P>(
        &'a mut self,
        sql: &'a str,
        params: &P,
        timeout: Option<Duration>,
    ) -> Result<GridReader<'a>>
    where
        P: Serialize + ?Sized,
    {
        let params = Parameters::from_serialize(params)?;
        Ok(query::query_multiple(self.prepare(timeout)?, sql, &params))
    }

    /// Runs every statement of `sql` and returns the number of changed rows
    pub fn execute<P>(&mut self, sql: &str, params: &P, timeout: Option<Duration>) -> Result<usize>
    where
        P: Serialize + ?Sized,
    {
        let params = Parameters::from_serialize(params)?;
        query::execute(self.prepare(timeout)?, sql, &params)
    }

    /// Runs unparameterised SQL through the session's command
    ///
    /// # Errors
    ///
    /// `Connection` without an open connection, `Transaction` when the
    /// command's binding is stale, `Execution` when the SQL fails.
    pub fn execute_raw(&mut self, sql: &str) -> Result<usize> {
        let conn = live_handle(&self.connection)?;
        self.command.set_text(sql);
        self.command.ensure_bound(self.transaction.as_ref())?;

        query::execute(conn, self.command.text(), &Parameters::None).map_err(|e| {
            error!(error = %e, "raw command failed");
            DaliteError::Execution(e.to_string())
        })
    }

    /// Bulk loads `records` into `table` inside the session's transaction
    ///
    /// The enclosing transaction is neither committed nor rolled back here;
    /// a failed transfer leaves none of its rows behind.
    pub fn bulk_insert_transaction<T: Serialize>(&mut self, table: &str, records: &[T]) -> Result<usize> {
        let data = bulk::to_table(table, records)?;
        let bulk_timeout = self.manager.config().bulk_timeout;
        bulk::insert_participating(self.prepare(Some(bulk_timeout))?, table, &data)
    }

    /// Moves the connection into a blocking task for `op` and takes it back.
    ///
    /// If the task panics, or this future is dropped before the task ends,
    /// the connection is lost: the task releases it, and the transaction it
    /// carried counts as rolled back.
    async fn run_blocking<R, F>(&mut self, timeout: Option<Duration>, op: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self.connection.take().ok_or_else(DaliteError::not_connected)?;
        self.connection_lost = true;
        let task = tokio::task::spawn_blocking(move || {
            let result = conn.apply_timeout(timeout).and_then(|()| op(conn.handle()?));
            (conn, result)
        });

        match task.await {
            Ok((conn, result)) => {
                self.connection = Some(conn);
                self.connection_lost = false;
                result
            }
            Err(e) => {
                error!(error = %e, "blocking task failed, session connection lost");
                if let Some(tx) = self.transaction.as_mut() {
                    tx.mark_rolled_back();
                }
                self.command = Command::new();
                Err(DaliteError::Task(e))
            }
        }
    }

    pub async fn query_async<T, P>(&mut self, sql: &str, params: &P, timeout: Option<Duration>) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Send + 'static,
        P: Serialize + ?Sized,
    {
        let params = Parameters::from_serialize(params)?;
        let sql = sql.to_string();
        self.run_blocking(timeout, move |conn| query::query(conn, &sql, &params))
            .await
    }

    pub async fn query_scalar_async<T, P>(&mut self, sql: &str, params: &P, timeout: Option<Duration>) -> Result<T>
    where
        T: DeserializeOwned + Default + Send + 'static,
        P: Serialize + ?Sized,
    {
        let params = Parameters::from_serialize(params)?;
        let sql = sql.to_string();
        self.run_blocking(timeout, move |conn| query::query_scalar(conn, &sql, &params))
            .await
    }

    pub async fn query_scalar_nullable_async<T, P>(
        &mut self,
        sql: &str,
        params: &P,
        timeout: Option<Duration>,
    ) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send + 'static,
        P: Serialize + ?Sized,
    {
        let params = Parameters::from_serialize(params)?;
        let sql = sql.to_string();
        self.run_blocking(timeout, move |conn| query::query_scalar_nullable(conn, &sql, &params))
            .await
    }

    /// Reads the result sets of `sql` with `read` on the blocking pool
    ///
    /// The reader cannot leave the task that owns the connection, so the
    /// caller hands over the reading instead. Statements `read` leaves
    /// unread still run before the call returns.
    pub async fn query_multiple_async<R, P, F>(
        &mut self,
        sql: &str,
        params: &P,
        timeout: Option<Duration>,
        read: F,
    ) -> Result<R>
    where
        R: Send + 'static,
        P: Serialize + ?Sized,
        F: FnOnce(&mut GridReader<'_>) -> Result<R> + Send + 'static,
    {
        let params = Parameters::from_serialize(params)?;
        let sql = sql.to_string();
        self.run_blocking(timeout, move |conn| read_all(conn, &sql, &params, read))
            .await
    }

    pub async fn execute_async<P>(&mut self, sql: &str, params: &P, timeout: Option<Duration>) -> Result<usize>
    where
        P: Serialize + ?Sized,
    {
        let params = Parameters::from_serialize(params)?;
        let sql = sql.to_string();
        self.run_blocking(timeout, move |conn| query::execute(conn, &sql, &params))
            .await
    }

    /// Async form of [`Session::execute_raw`]; SQL failures are `ExecutionAsync`
    pub async fn execute_raw_async(&mut self, sql: &str) -> Result<usize> {
        live_handle(&self.connection)?;
        self.command.set_text(sql);
        self.command.ensure_bound(self.transaction.as_ref())?;

        let text = self.command.text().to_string();
        self.run_blocking(None, move |conn| {
            query::execute(conn, &text, &Parameters::None).map_err(|e| {
                error!(error = %e, "raw command failed");
                DaliteError::ExecutionAsync(e.to_string())
            })
        })
        .await
    }

    pub async fn bulk_insert_transaction_async<T: Serialize>(&mut self, table: &str, records: &[T]) -> Result<usize> {
        let data = bulk::to_table(table, records)?;
        let bulk_timeout = self.manager.config().bulk_timeout;
        let table = table.to_string();
        self.run_blocking(Some(bulk_timeout), move |conn| {
            bulk::insert_participating(conn, &table, &data)
        })
        .await
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.connection.is_some() {
            self.teardown("session drop");
        }
    }
}

fn live_handle(connection: &Option<ManagedConnection>) -> Result<&Connection> {
    connection.as_ref().ok_or_else(DaliteError::not_connected)?.handle()
}

/// Hands a reader over `sql` to `read`, then runs whatever it left unread
pub(crate) fn read_all<R, F>(conn: &Connection, sql: &str, params: &Parameters, read: F) -> Result<R>
where
    F: FnOnce(&mut GridReader<'_>) -> Result<R>,
{
    let mut grid = query::query_multiple(conn, sql, params);
    let value = read(&mut grid)?;
    grid.finish()?;
    Ok(value)
}

impl Queryable for Session {
    fn query<T, P>(&mut self, sql: &str, params: &P, timeout: Option<Duration>) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
        P: Serialize + ?Sized,
    {
        Session::query(self, sql, params, timeout)
    }

    fn query_scalar<T, P>(&mut self, sql: &str, params: &P, timeout: Option<Duration>) -> Result<T>
    where
        T: DeserializeOwned + Default,
        P: Serialize + ?Sized,
    {
        Session::query_scalar(self, sql, params, timeout)
    }

    fn execute<P>(&mut self, sql: &str, params: &P, timeout: Option<Duration>) -> Result<usize>
    where
        P: Serialize + ?Sized,
    {
        Session::execute(self, sql, params, timeout)
    }
}

#[async_trait]
impl AsyncQueryable for Session {
    async fn query_async<T, P>(&mut self, sql: &str, params: &P, timeout: Option<Duration>) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Send + 'static,
        P: Serialize + ?Sized + Sync,
    {
        Session::query_async(self, sql, params, timeout).await
    }

    async fn query_scalar_async<T, P>(&mut self, sql: &str, params: &P, timeout: Option<Duration>) -> Result<T>
    where
        T: DeserializeOwned + Default + Send + 'static,
        P: Serialize + ?Sized + Sync,
    {
        Session::query_scalar_async(self, sql, params, timeout).await
    }

    async fn execute_async<P>(&mut self, sql: &str, params: &P, timeout: Option<Duration>) -> Result<usize>
    where
        P: Serialize + ?Sized + Sync,
    {
        Session::execute_async(self, sql, params, timeout).await
    }
}
