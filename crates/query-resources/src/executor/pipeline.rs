//! Middleware chain
//!
//! A query travels through the registered middlewares in registration order
//! before reaching the terminal step, which resolves the target executor from
//! [`Options::executor_name`] and runs the query on it.
//!
//! ```text
//! execute(query) ─▶ loader ─▶ cache ─▶ … ─▶ registry.get(executor).execute
//! ```
//!
//! Each middleware receives a [`Next`] continuation and decides whether to
//! call it (a cache hit, for instance, does not).

use super::ExecutorRegistry;
use crate::error::{QueryError, QueryResult};
use crate::model::{Options, Parameters};
use crate::result::ExecutionResult;
use std::sync::Arc;
use tracing::debug;

/// One step of the query pipeline
pub trait Middleware: Send + Sync {
    fn invoke(
        &self,
        query: &str,
        params: &Parameters,
        options: &Options,
        next: Next<'_>,
    ) -> QueryResult<ExecutionResult>;
}

/// Continuation handed to a middleware
///
/// Consumed on use, so a middleware can call the rest of the chain at most
/// once per invocation.
pub struct Next<'a> {
    middlewares: &'a [Arc<dyn Middleware>],
    registry: &'a ExecutorRegistry,
}

impl<'a> Next<'a> {
    fn new(middlewares: &'a [Arc<dyn Middleware>], registry: &'a ExecutorRegistry) -> Self {
        Self {
            middlewares,
            registry,
        }
    }

    /// Run the remaining middlewares and the terminal dispatch
    pub fn run(
        self,
        query: &str,
        params: &Parameters,
        options: &Options,
    ) -> QueryResult<ExecutionResult> {
        match self.middlewares.split_first() {
            Some((middleware, rest)) => {
                middleware.invoke(query, params, options, Next::new(rest, self.registry))
            }
            None => {
                let name = self.registry.resolve_name(options.executor_name())?;
                debug!(executor = name, "Dispatching query to executor");
                self.registry.get(Some(name))?.execute(query, params, options)
            }
        }
    }
}

/// Middleware built from a closure, see [`middleware_fn`]
pub struct FnMiddleware<F> {
    f: F,
}

/// Turn a closure into a [`Middleware`]
///
/// ```rust
/// use query_resources::executor::middleware_fn;
///
/// let audit = middleware_fn(|query, params, options, next| {
///     tracing::info!(query, "Running query");
///     next.run(query, params, options)
/// });
/// # let _ = audit;
/// ```
pub fn middleware_fn<F>(f: F) -> FnMiddleware<F>
where
    F: Fn(&str, &Parameters, &Options, Next<'_>) -> QueryResult<ExecutionResult> + Send + Sync,
{
    FnMiddleware { f }
}

impl<F> Middleware for FnMiddleware<F>
where
    F: Fn(&str, &Parameters, &Options, Next<'_>) -> QueryResult<ExecutionResult> + Send + Sync,
{
    fn invoke(
        &self,
        query: &str,
        params: &Parameters,
        options: &Options,
        next: Next<'_>,
    ) -> QueryResult<ExecutionResult> {
        (self.f)(query, params, options, next)
    }
}

/// The composed chain plus the registry it dispatches to
#[derive(Clone)]
pub struct QueryExecutor {
    registry: ExecutorRegistry,
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl QueryExecutor {
    /// Compose a chain; the first middleware runs first
    pub fn new(registry: ExecutorRegistry, middlewares: Vec<Arc<dyn Middleware>>) -> Self {
        Self {
            registry,
            middlewares,
        }
    }

    pub fn registry(&self) -> &ExecutorRegistry {
        &self.registry
    }

    /// Run a query through the chain
    ///
    /// Recognized [`QueryError`] kinds come back unchanged; anything else is
    /// wrapped once into [`QueryError::Runtime`].
    pub fn execute(
        &self,
        query: &str,
        params: &Parameters,
        options: &Options,
    ) -> QueryResult<ExecutionResult> {
        Next::new(&self.middlewares, &self.registry)
            .run(query, params, options)
            .map_err(|err| match err {
                QueryError::Other(source) => QueryError::runtime(
                    format!("Unable to execute query \"{}\".", query),
                    source,
                ),
                recognized => recognized,
            })
    }
}

impl std::fmt::Debug for QueryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryExecutor")
            .field("registry", &self.registry)
            .field("middlewares", &self.middlewares.len())
            .finish()
    }
}
