//! Query/execute interface shared by `Session` and `DataSource`.
//!
//! Code that only needs to read and write rows can take either facade
//! through these traits.
use crate::core::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// Synchronous query and execute operations.
pub trait Queryable {
    /// Runs `sql` and maps the rows of its first result set onto `T`.
    fn query<T, P>(&mut self, sql: &str, params: &P, timeout: Option<Duration>) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
        P: Serialize + ?Sized;

    /// First column of the first row; no row or NULL yields `T::default()`.
    fn query_scalar<T, P>(&mut self, sql: &str, params: &P, timeout: Option<Duration>) -> Result<T>
    where
        T: DeserializeOwned + Default,
        P: Serialize + ?Sized;

    /// Runs every statement of `sql` and returns the number of changed rows.
    fn execute<P>(&mut self, sql: &str, params: &P, timeout: Option<Duration>) -> Result<usize>
    where
        P: Serialize + ?Sized;
}

/// Asynchronous counterparts of [`Queryable`]; storage work runs on the blocking pool.
#[async_trait]
pub trait AsyncQueryable: Send {
    async fn query_async<T, P>(&mut self, sql: &str, params: &P, timeout: Option<Duration>) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Send + 'static,
        P: Serialize + ?Sized + Sync;

    async fn query_scalar_async<T, P>(&mut self, sql: &str, params: &P, timeout: Option<Duration>) -> Result<T>
    where
        T: DeserializeOwned + Default + Send + 'static,
        P: Serialize + ?Sized + Sync;

    async fn execute_async<P>(&mut self, sql: &str, params: &P, timeout: Option<Duration>) -> Result<usize>
    where
        P: Serialize + ?Sized + Sync;
}
