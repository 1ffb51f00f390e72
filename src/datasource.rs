//! Stateless facade: every call opens its own connection, runs, and releases
//! it before returning.
//!
//! `transactional_*` calls also wrap their work in an implicit transaction
//! that is committed on success and rolled back on failure.
use crate::config::ConnectionConfig;
use crate::core::db::bulk;
use crate::core::db::connection::{ConnectionManager, ManagedConnection};
use crate::core::db::query::{self, GridReader, Parameters};
use crate::core::db::transaction;
use crate::core::{Cleanup, Result};
use crate::queryable::{AsyncQueryable, Queryable};
use crate::session::{self, Session};
use async_trait::async_trait;
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::error;

/// Stateless data source.
///
/// Cheap to clone; clones share the configuration and the open-handle
/// counter, nothing else.
#[derive(Debug, Clone)]
pub struct DataSource {
    manager: ConnectionManager,
}

impl DataSource {
    pub fn new(config: impl Into<ConnectionConfig>) -> Self {
        DataSource {
            manager: ConnectionManager::new(config),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        self.manager.config()
    }

    /// Number of connections opened through this data source (or its
    /// sessions) that are still open
    pub fn open_handles(&self) -> usize {
        self.manager.open_handles()
    }

    /// A disconnected session over the same database and handle counter
    pub fn session(&self) -> Session {
        Session::with_manager(self.manager.clone())
    }

    /// Opens a connection, runs `op` on it, and releases it on every path
    fn with_connection<R, F>(&self, timeout: Option<Duration>, op: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R>,
    {
        let mut conn = self.manager.open()?;
        let result = run_on(&conn, timeout, op);

        let mut cleanup = Cleanup::new("release connection");
        cleanup.attempt("close connection", || conn.close());
        cleanup.finish();
        result
    }

    /// Runs `op` inside an implicit transaction on a fresh connection
    ///
    /// A failed `op` is rolled back and its error returned unchanged.
    fn with_transaction<R, F>(&self, timeout: Option<Duration>, op: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R>,
    {
        self.with_connection(timeout, |conn| {
            let mut tx = transaction::begin(conn)?;
            match op(conn) {
                Ok(value) => {
                    transaction::commit(conn, &mut tx)?;
                    Ok(value)
                }
                Err(e) => {
                    error!(transaction = %tx.id(), error = %e, "transactional call failed");
                    transaction::rollback(conn, &mut tx);
                    Err(e)
                }
            }
        })
    }

    /// Runs `op` against a clone of this data source on the blocking pool
    async fn run_blocking<R, F>(&self, op: F) -> Result<R>
    where
        F: FnOnce(&DataSource) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let source = self.clone();
        tokio::task::spawn_blocking(move || op(&source)).await?
    }

    /// Runs `sql` and maps the rows of its first result set onto `T`
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use dalite::DataSource;
    /// use serde::Deserialize;
    ///
    /// #[derive(Deserialize)]
    /// struct Customer {
    ///     id: i64,
    ///     name: String,
    /// }
    ///
    /// let source = DataSource::new("app.db");
    /// let customers: Vec<Customer> = source
    ///     .select("SELECT id, name FROM customers WHERE id = @id", &serde_json::json!({"id": 5}), None)
    ///     .unwrap();
    /// ```
    pub fn select<T, P>(&self, sql: &str, params: &P, timeout: Option<Duration>) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
        P: Serialize + ?Sized,
    {
        let params = Parameters::from_serialize(params)?;
        self.with_connection(timeout, |conn| query::query(conn, sql, &params))
    }

    /// First column of the first row; no row or NULL yields `T::default()`
    pub fn select_scalar<T, P>(&self, sql: &str, params: &P, timeout: Option<Duration>) -> Result<T>
    where
        T: DeserializeOwned + Default,
        P: Serialize + ?Sized,
    {
        let params = Parameters::from_serialize(params)?;
        self.with_connection(timeout, |conn| query::query_scalar(conn, sql, &params))
    }

    /// Reads several result sets with `read` while the connection is open
    ///
    /// Statements `read` leaves unread still run before the connection is
    /// released.
    pub fn select_multiple<R, P, F>(&self, sql: &str, params: &P, timeout: Option<Duration>, read: F) -> Result<R>
    where
        P: Serialize + ?Sized,
        F: FnOnce(&mut GridReader<'_>) -> Result<R>,
    {
        let params = Parameters::from_serialize(params)?;
        self.with_connection(timeout, |conn| session::read_all(conn, sql, &params, read))
    }

    /// Runs every statement of `sql` and returns the number of changed rows
    pub fn execute<P>(&self, sql: &str, params: &P, timeout: Option<Duration>) -> Result<usize>
    where
        P: Serialize + ?Sized,
    {
        let params = Parameters::from_serialize(params)?;
        self.with_connection(timeout, |conn| query::execute(conn, sql, &params))
    }

    pub fn transactional_query<T, P>(&self, sql: &str, params: &P, timeout: Option<Duration>) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
        P: Serialize + ?Sized,
    {
        let params = Parameters::from_serialize(params)?;
        self.with_transaction(timeout, |conn| query::query(conn, sql, &params))
    }

    pub fn transactional_query_scalar<T, P>(&self, sql: &str, params: &P, timeout: Option<Duration>) -> Result<T>
    where
        T: DeserializeOwned + Default,
        P: Serialize + ?Sized,
    {
        let params = Parameters::from_serialize(params)?;
        self.with_transaction(timeout, |conn| query::query_scalar(conn, sql, &params))
    }

    pub fn transactional_multiple<R, P, F>(
        &self,
        sql: &str,
        params: &P,
        timeout: Option<Duration>,
        read: F,
    ) -> Result<R>
    where
        P: Serialize + ?Sized,
        F: FnOnce(&mut GridReader<'_>) -> Result<R>,
    {
        let params = Parameters::from_serialize(params)?;
        self.with_transaction(timeout, |conn| session::read_all(conn, sql, &params, read))
    }

    /// Runs every statement of `sql` atomically
    ///
    /// # Errors
    ///
    /// The storage error of the failing statement, after the whole call has
    /// been rolled back.
    pub fn transactional_execute<P>(&self, sql: &str, params: &P, timeout: Option<Duration>) -> Result<usize>
    where
        P: Serialize + ?Sized,
    {
        let params = Parameters::from_serialize(params)?;
        self.with_transaction(timeout, |conn| query::execute(conn, sql, &params))
    }

    /// Loads `records` into `table` on a dedicated connection, all or nothing
    ///
    /// Every failure is reported as `BulkLoad` after the transfer has been
    /// rolled back.
    pub fn bulk_insert<T: Serialize>(&self, table: &str, records: &[T]) -> Result<usize> {
        let data = bulk::to_table(table, records)?;
        bulk::insert_self_contained(&self.manager, table, &data)
    }

    pub async fn select_async<T, P>(&self, sql: &str, params: &P, timeout: Option<Duration>) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Send + 'static,
        P: Serialize + ?Sized,
    {
        let params = Parameters::from_serialize(params)?;
        let sql = sql.to_string();
        self.run_blocking(move |source| {
            source.with_connection(timeout, |conn| query::query(conn, &sql, &params))
        })
        .await
    }

    pub async fn select_scalar_async<T, P>(&self, sql: &str, params: &P, timeout: Option<Duration>) -> Result<T>
    where
        T: DeserializeOwned + Default + Send + 'static,
        P: Serialize + ?Sized,
    {
        let params = Parameters::from_serialize(params)?;
        let sql = sql.to_string();
        self.run_blocking(move |source| {
            source.with_connection(timeout, |conn| query::query_scalar(conn, &sql, &params))
        })
        .await
    }

    pub async fn select_multiple_async<R, P, F>(
        &self,
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
        self.run_blocking(move |source| {
            source.with_connection(timeout, |conn| session::read_all(conn, &sql, &params, read))
        })
        .await
    }

    pub async fn execute_async<P>(&self, sql: &str, params: &P, timeout: Option<Duration>) -> Result<usize>
    where
        P: Serialize + ?Sized,
    {
        let params = Parameters::from_serialize(params)?;
        let sql = sql.to_string();
        self.run_blocking(move |source| {
            source.with_connection(timeout, |conn| query::execute(conn, &sql, &params))
        })
        .await
    }

    pub async fn transactional_query_async<T, P>(
        &self,
        sql: &str,
        params: &P,
        timeout: Option<Duration>,
    ) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Send + 'static,
        P: Serialize + ?Sized,
    {
        let params = Parameters::from_serialize(params)?;
        let sql = sql.to_string();
        self.run_blocking(move |source| {
            source.with_transaction(timeout, |conn| query::query(conn, &sql, &params))
        })
        .await
    }

    pub async fn transactional_query_scalar_async<T, P>(
        &self,
        sql: &str,
        params: &P,
        timeout: Option<Duration>,
    ) -> Result<T>
    where
        T: DeserializeOwned + Default + Send + 'static,
        P: Serialize + ?Sized,
    {
        let params = Parameters::from_serialize(params)?;
        let sql = sql.to_string();
        self.run_blocking(move |source| {
            source.with_transaction(timeout, |conn| query::query_scalar(conn, &sql, &params))
        })
        .await
    }

    pub async fn transactional_multiple_async<R, P, F>(
        &self,
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
        self.run_blocking(move |source| {
            source.with_transaction(timeout, |conn| session::read_all(conn, &sql, &params, read))
        })
        .await
    }

    pub async fn transactional_execute_async<P>(
        &self,
        sql: &str,
        params: &P,
        timeout: Option<Duration>,
    ) -> Result<usize>
    where
        P: Serialize + ?Sized,
    {
        let params = Parameters::from_serialize(params)?;
        let sql = sql.to_string();
        self.run_blocking(move |source| {
            source.with_transaction(timeout, |conn| query::execute(conn, &sql, &params))
        })
        .await
    }

    pub async fn bulk_insert_async<T: Serialize>(&self, table: &str, records: &[T]) -> Result<usize> {
        let data = bulk::to_table(table, records)?;
        let table = table.to_string();
        self.run_blocking(move |source| bulk::insert_self_contained(&source.manager, &table, &data))
            .await
    }
}

fn run_on<R, F>(conn: &ManagedConnection, timeout: Option<Duration>, op: F) -> Result<R>
where
    F: FnOnce(&Connection) -> Result<R>,
{
    conn.apply_timeout(timeout)?;
    op(conn.handle()?)
}

impl Queryable for DataSource {
    fn query<T, P>(&mut self, sql: &str, params: &P, timeout: Option<Duration>) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
        P: Serialize + ?Sized,
    {
        self.select(sql, params, timeout)
    }

    fn query_scalar<T, P>(&mut self, sql: &str, params: &P, timeout: Option<Duration>) -> Result<T>
    where
        T: DeserializeOwned + Default,
        P: Serialize + ?Sized,
    {
        self.select_scalar(sql, params, timeout)
    }

    fn execute<P>(&mut self, sql: &str, params: &P, timeout: Option<Duration>) -> Result<usize>
    where
        P: Serialize + ?Sized,
    {
        DataSource::execute(self, sql, params, timeout)
    }
}

#[async_trait]
impl AsyncQueryable for DataSource {
    async fn query_async<T, P>(&mut self, sql: &str, params: &P, timeout: Option<Duration>) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Send + 'static,
        P: Serialize + ?Sized + Sync,
    {
        self.select_async(sql, params, timeout).await
    }

    async fn query_scalar_async<T, P>(&mut self, sql: &str, params: &P, timeout: Option<Duration>) -> Result<T>
    where
        T: DeserializeOwned + Default + Send + 'static,
        P: Serialize + ?Sized + Sync,
    {
        self.select_scalar_async(sql, params, timeout).await
    }

    async fn execute_async<P>(&mut self, sql: &str, params: &P, timeout: Option<Duration>) -> Result<usize>
    where
        P: Serialize + ?Sized + Sync,
    {
        DataSource::execute_async(self, sql, params, timeout).await
    }
}
