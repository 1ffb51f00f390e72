/// Core Module for dalite
///
/// This module contains the building blocks shared by both facades: the
/// storage layer, the error taxonomy and the ordered cleanup runner used on
/// every teardown path.

pub mod cleanup;
pub mod db;
pub mod error;

// Re-export commonly used types for convenience
pub use cleanup::Cleanup;
pub use error::{DaliteError, Result, SqlErrorReason};
