//! Executors
//!
//! An [`Executor`] runs queries against one connection and owns that
//! connection's transaction bookkeeping. Executors are registered by name in
//! an [`ExecutorRegistry`] and reached through the middleware chain in
//! [`pipeline`].

mod connection;
mod connection_executor;
pub mod pipeline;
mod registry;

pub use connection::Connection;
pub use connection_executor::ConnectionExecutor;
pub use pipeline::{middleware_fn, FnMiddleware, Middleware, Next, QueryExecutor};
pub use registry::{ExecutorRegistry, ExecutorRegistryBuilder};

use crate::error::QueryResult;
use crate::model::{Options, Parameters};
use crate::result::ExecutionResult;

/// Executes queries and manages transactions for one connection
///
/// Shared across the facade, so every method takes `&self`; implementations
/// serialize access to their connection internally.
pub trait Executor: Send + Sync {
    /// Run a query
    ///
    /// When `options` requests an isolation level other than the current one,
    /// the statement runs in its own transaction at that level.
    fn execute(
        &self,
        query: &str,
        params: &Parameters,
        options: &Options,
    ) -> QueryResult<ExecutionResult>;

    /// Open a transaction (or a nested level), switching isolation if requested
    fn begin_transaction(&self, options: &Options) -> QueryResult<()>;

    /// Commit the innermost transaction level
    fn commit(&self) -> QueryResult<()>;

    /// Roll back the innermost transaction level
    fn rollback(&self) -> QueryResult<()>;
}
