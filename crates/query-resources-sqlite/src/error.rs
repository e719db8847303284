//! Error types for the SQLite backend

use query_resources::{DriverError, QueryError};
use thiserror::Error;

/// SQLite backend error type
#[derive(Error, Debug)]
pub enum SqliteError {
    /// Opening or configuring the database failed
    #[error("Connection error: {0}")]
    Connection(String),

    /// Transaction bookkeeping error
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// A parameter could not be converted to an SQLite value
    #[error("Binding error: {0}")]
    Binding(String),

    /// Underlying rusqlite error
    #[error("SQLite error: {0}")]
    Rusqlite(#[from] rusqlite::Error),
}

/// Result type for SQLite operations
pub type SqliteResult<T> = Result<T, SqliteError>;

impl From<SqliteError> for DriverError {
    fn from(err: SqliteError) -> Self {
        DriverError::wrap(err)
    }
}

impl From<SqliteError> for QueryError {
    fn from(err: SqliteError) -> Self {
        QueryError::runtime(err.to_string(), err)
    }
}
