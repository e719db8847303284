//! SQLite backend for query-resources
//!
//! Implements the [`Connection`](query_resources::Connection) seam over
//! `rusqlite`, so SQLite databases can be registered as executors.
//!
//! ## Features
//!
//! - **Named parameters**: `:name` placeholders, array parameters expanded
//!   into one placeholder per element
//! - **Nested transactions**: savepoints below the outermost `BEGIN`
//! - **WAL Mode**: enabled for file databases by default
//!
//! ## Usage
//!
//! ```rust,ignore
//! use query_resources::QueryResourcesLoader;
//! use query_resources_sqlite::{sqlite_executor, SqliteConfig};
//!
//! let loader = QueryResourcesLoader::builder()
//!     .executor("default", sqlite_executor("default", &SqliteConfig::new("./app.db"))?)
//!     .build();
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod values;

// Re-exports
pub use config::SqliteConfig;
pub use connection::SqliteConnection;
pub use error::{SqliteError, SqliteResult};

use query_resources::ConnectionExecutor;

/// Open a connection and wrap it in an executor labelled `name`
pub fn sqlite_executor<S: Into<String>>(
    name: S,
    config: &SqliteConfig,
) -> SqliteResult<ConnectionExecutor<SqliteConnection>> {
    Ok(ConnectionExecutor::new(name, SqliteConnection::open(config)?))
}
