// Core infrastructure modules
pub mod config;
pub mod core;
pub mod logging;

// Facades
pub mod datasource;
pub mod queryable;
pub mod session;

pub use crate::config::{Config, ConnectionConfig, JournalMode};
pub use crate::core::db::{GridReader, TabularData, TransactionState};
pub use crate::core::{DaliteError, Result, SqlErrorReason};
pub use crate::datasource::DataSource;
pub use crate::queryable::{AsyncQueryable, Queryable};
pub use crate::session::Session;

#[cfg(test)]
mod test_utils;
