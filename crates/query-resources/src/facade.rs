//! Entry point
//!
//! [`QueryResourcesLoader`] runs queries through the middleware chain and
//! coordinates transactions spanning one or more executors.
//!
//! ```rust,ignore
//! let loader = QueryResourcesLoader::builder()
//!     .executor("default", sqlite_executor("default", &SqliteConfig::memory())?)
//!     .build();
//!
//! let total = loader
//!     .execute("SELECT COUNT(*) FROM users", None, None)?
//!     .single_scalar()?;
//!
//! loader.transactional(
//!     |loader| {
//!         loader.execute("DELETE FROM sessions", None, None)?;
//!         Ok(())
//!     },
//!     &[],
//! )?;
//! ```

use crate::cache::{CacheMiddleware, CacheStore};
use crate::config::QueryResourcesConfig;
use crate::error::{QueryError, QueryResult};
use crate::executor::{
    Executor, ExecutorRegistry, ExecutorRegistryBuilder, Middleware, QueryExecutor,
};
use crate::iterate::{BatchIterator, IterateOptions};
use crate::loader::LoaderMiddleware;
use crate::model::{Options, Parameters};
use crate::result::ExecutionResult;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Executors taking part in one `transactional` call
struct Participant<'a> {
    name: &'a str,
    executor: &'a Arc<dyn Executor>,
    options: &'a Options,
}

/// How far a transaction got before it stopped
#[derive(Default)]
struct Progress {
    begun: usize,
    committed: usize,
}

/// Query facade
pub struct QueryResourcesLoader {
    executor: QueryExecutor,
    loader: Option<Arc<LoaderMiddleware>>,
    cache: Option<Arc<CacheMiddleware>>,
}

impl QueryResourcesLoader {
    pub fn builder() -> QueryResourcesLoaderBuilder {
        QueryResourcesLoaderBuilder::default()
    }

    /// Facade over an already composed chain
    pub fn new(executor: QueryExecutor) -> Self {
        Self {
            executor,
            loader: None,
            cache: None,
        }
    }

    pub fn registry(&self) -> &ExecutorRegistry {
        self.executor.registry()
    }

    /// Store behind the cache middleware, when caching is enabled
    pub fn cache_store(&self) -> Option<&Arc<dyn CacheStore>> {
        self.cache.as_ref().map(|cache| cache.store())
    }

    /// Run a query; missing parameters or options default to empty ones
    pub fn execute(
        &self,
        query: &str,
        params: Option<&Parameters>,
        options: Option<&Options>,
    ) -> QueryResult<ExecutionResult> {
        let default_params;
        let params = match params {
            Some(params) => params,
            None => {
                default_params = Parameters::new();
                &default_params
            }
        };
        let default_options;
        let options = match options {
            Some(options) => options,
            None => {
                default_options = Options::new();
                &default_options
            }
        };

        self.executor.execute(query, params, options)
    }

    /// Run `callable` inside a transaction on every executor the options name
    ///
    /// Transactions begin in the order of `options` (an empty slice means the
    /// default executor) and commit in the same order once `callable`
    /// returns `Ok`. When beginning, the callable or a commit fails, every
    /// executor whose transaction is still open is rolled back in order and
    /// the original error is returned.
    ///
    /// Commits are not atomic across executors: if a later commit fails,
    /// earlier ones stay committed.
    pub fn transactional<T, F>(&self, callable: F, options: &[Options]) -> QueryResult<T>
    where
        F: FnOnce(&Self) -> QueryResult<T>,
    {
        let defaults = [Options::new()];
        let options = if options.is_empty() {
            &defaults[..]
        } else {
            options
        };

        let participants = self.participants(options)?;
        let mut progress = Progress::default();

        match self.run_transaction(&participants, callable, &mut progress) {
            Ok(value) => Ok(value),
            Err(err) => {
                self.unwind(&participants, &progress, &err);
                Err(err)
            }
        }
    }

    /// Page through a query in batches
    ///
    /// The query name is resolved through the loader middleware (if any) but
    /// batches bypass the rest of the chain, including the cache.
    pub fn iterate(
        &self,
        query: &str,
        params: Parameters,
        options: &Options,
        settings: IterateOptions,
    ) -> QueryResult<BatchIterator> {
        let sql = match &self.loader {
            Some(loader) => loader.load(query, &params, options)?,
            None => query.to_string(),
        };
        let executor = Arc::clone(self.registry().get(options.executor_name())?);

        BatchIterator::new(executor, &sql, params, options.without_cache(), settings)
    }

    fn participants<'a>(&'a self, options: &'a [Options]) -> QueryResult<Vec<Participant<'a>>> {
        let registry = self.registry();
        let mut participants: Vec<Participant<'a>> = Vec::with_capacity(options.len());

        for option in options {
            let name = registry.resolve_name(option.executor_name())?;
            if participants.iter().any(|participant| participant.name == name) {
                return Err(QueryError::logic(
                    "You cannot use same executor multiple time within same transaction scope.",
                ));
            }
            participants.push(Participant {
                name,
                executor: registry.get(Some(name))?,
                options: option,
            });
        }

        Ok(participants)
    }

    fn run_transaction<T, F>(
        &self,
        participants: &[Participant<'_>],
        callable: F,
        progress: &mut Progress,
    ) -> QueryResult<T>
    where
        F: FnOnce(&Self) -> QueryResult<T>,
    {
        for participant in participants {
            debug!(executor = participant.name, "Beginning transaction");
            participant.executor.begin_transaction(participant.options)?;
            progress.begun += 1;
        }

        let value = callable(self)?;

        for participant in participants {
            debug!(executor = participant.name, "Committing transaction");
            participant.executor.commit()?;
            progress.committed += 1;
        }

        Ok(value)
    }

    fn unwind(&self, participants: &[Participant<'_>], progress: &Progress, cause: &QueryError) {
        let pending = &participants[progress.committed..progress.begun];
        if pending.is_empty() {
            return;
        }

        info!(error = %cause, pending = pending.len(), "Rolling back transaction scope");
        for participant in pending {
            if let Err(err) = participant.executor.rollback() {
                error!(
                    executor = participant.name,
                    error = %err,
                    "Rollback failed while unwinding transaction scope"
                );
            }
        }
    }
}

impl std::fmt::Debug for QueryResourcesLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryResourcesLoader")
            .field("executor", &self.executor)
            .field("loader", &self.loader.is_some())
            .field("cache", &self.cache.is_some())
            .finish()
    }
}

/// Assembles executors and middlewares into a [`QueryResourcesLoader`]
///
/// The chain always runs the loader middleware first, then the cache
/// middleware, then custom middlewares in registration order. By default the
/// loader treats names as raw SQL and results are cached in memory.
pub struct QueryResourcesLoaderBuilder {
    registry: ExecutorRegistryBuilder,
    loader: Option<LoaderMiddleware>,
    cache: Option<CacheMiddleware>,
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl Default for QueryResourcesLoaderBuilder {
    fn default() -> Self {
        Self {
            registry: ExecutorRegistry::builder(),
            loader: Some(LoaderMiddleware::default()),
            cache: Some(CacheMiddleware::default()),
            middlewares: Vec::new(),
        }
    }
}

impl QueryResourcesLoaderBuilder {
    /// Register an executor; the first one registered is the default
    pub fn executor<S, E>(mut self, name: S, executor: E) -> Self
    where
        S: Into<String>,
        E: Executor + 'static,
    {
        self.registry = self.registry.register(name, executor);
        self
    }

    pub fn shared_executor<S: Into<String>>(mut self, name: S, executor: Arc<dyn Executor>) -> Self {
        self.registry = self.registry.register_shared(name, executor);
        self
    }

    pub fn loader(mut self, loader: LoaderMiddleware) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Pass query names to executors untouched
    pub fn without_loader(mut self) -> Self {
        self.loader = None;
        self
    }

    pub fn cache(mut self, cache: CacheMiddleware) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn cache_store(self, store: Arc<dyn CacheStore>) -> Self {
        self.cache(CacheMiddleware::new(store))
    }

    pub fn without_cache(mut self) -> Self {
        self.cache = None;
        self
    }

    /// Append a custom middleware after the loader and cache steps
    pub fn middleware<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Configure loaders and caching from configuration
    pub fn with_config(mut self, config: &QueryResourcesConfig) -> QueryResult<Self> {
        let (default, named) = config.loader.build_loaders()?;
        self.loader = Some(LoaderMiddleware::new(default, named));
        self.cache = config
            .cache
            .enabled
            .then(|| CacheMiddleware::default().with_default_ttl(config.cache.default_ttl()));
        Ok(self)
    }

    pub fn build(self) -> QueryResourcesLoader {
        let loader = self.loader.map(Arc::new);
        let cache = self.cache.map(Arc::new);

        let mut chain: Vec<Arc<dyn Middleware>> = Vec::new();
        if let Some(loader) = &loader {
            chain.push(Arc::clone(loader) as Arc<dyn Middleware>);
        }
        if let Some(cache) = &cache {
            chain.push(Arc::clone(cache) as Arc<dyn Middleware>);
        }
        chain.extend(self.middlewares);

        QueryResourcesLoader {
            executor: QueryExecutor::new(self.registry.build(), chain),
            loader,
            cache,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheIdentity;
    use crate::executor::{middleware_fn, ConnectionExecutor};
    use crate::result::MaterializedResult;
    use crate::test_support::{entries, Journal, MockConnection};
    use crate::IsolationLevel;
    use serde_json::json;

    fn facade(journal: &Journal) -> QueryResourcesLoader {
        QueryResourcesLoader::builder()
            .executor(
                "a",
                ConnectionExecutor::new(
                    "a",
                    MockConnection::with_journal("a", journal).with_result(
                        "SELECT 1",
                        MaterializedResult::new(vec!["n".into()], vec![vec![json!(1)]]),
                    ),
                ),
            )
            .executor(
                "b",
                ConnectionExecutor::new("b", MockConnection::with_journal("b", journal)),
            )
            .build()
    }

    #[test]
    fn test_execute_defaults() {
        let journal = Journal::default();
        let loader = facade(&journal);

        let value = loader
            .execute("SELECT 1", None, None)
            .unwrap()
            .single_scalar()
            .unwrap();

        assert_eq!(value, json!(1));
        assert_eq!(entries(&journal), ["a.query SELECT 1"]);
    }

    #[test]
    fn test_failing_callable_rolls_back_and_returns_original_error() {
        let journal = Journal::default();
        let loader = facade(&journal);

        let err = loader
            .transactional(
                |loader| -> QueryResult<()> {
                    loader.execute("SELECT 1", None, None)?;
                    Err(QueryError::logic("callable failed"))
                },
                &[],
            )
            .unwrap_err();

        assert!(matches!(err, QueryError::Logic(ref msg) if msg == "callable failed"));
        assert_eq!(
            entries(&journal),
            ["a.begin", "a.query SELECT 1", "a.rollback"]
        );
    }

    #[test]
    fn test_unrecognized_callable_error_is_not_wrapped() {
        let loader = facade(&Journal::default());

        let err = loader
            .transactional(
                |_| -> QueryResult<()> { Err(anyhow::anyhow!("domain failure").into()) },
                &[],
            )
            .unwrap_err();

        assert!(matches!(err, QueryError::Other(_)));
        assert_eq!(err.to_string(), "domain failure");
    }

    #[test]
    fn test_multi_executor_commit_order() {
        let journal = Journal::default();
        let loader = facade(&journal);

        let value = loader
            .transactional(
                |loader| {
                    loader.execute("SELECT 2", None, Some(&Options::executor("b")))?;
                    Ok(42)
                },
                &[Options::executor("a"), Options::executor("b")],
            )
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(
            entries(&journal),
            ["a.begin", "b.begin", "b.query SELECT 2", "a.commit", "b.commit"]
        );
    }

    #[test]
    fn test_multi_executor_rollback_order() {
        let journal = Journal::default();
        let loader = facade(&journal);

        loader
            .transactional(
                |_| -> QueryResult<()> { Err(QueryError::logic("nope")) },
                &[Options::executor("a"), Options::executor("b")],
            )
            .unwrap_err();

        assert_eq!(
            entries(&journal),
            ["a.begin", "b.begin", "a.rollback", "b.rollback"]
        );
    }

    #[test]
    fn test_failed_rollback_keeps_original_error() {
        let journal = Journal::default();
        let loader = QueryResourcesLoader::builder()
            .executor(
                "a",
                ConnectionExecutor::new(
                    "a",
                    MockConnection::with_journal("a", &journal).failing_rollback(),
                ),
            )
            .executor(
                "b",
                ConnectionExecutor::new("b", MockConnection::with_journal("b", &journal)),
            )
            .build();

        let err = loader
            .transactional(
                |_| -> QueryResult<()> { Err(QueryError::logic("callable failed")) },
                &[Options::executor("a"), Options::executor("b")],
            )
            .unwrap_err();

        assert!(matches!(err, QueryError::Logic(ref msg) if msg == "callable failed"));
        assert_eq!(
            entries(&journal),
            ["a.begin", "b.begin", "a.rollback", "b.rollback"]
        );
    }

    #[test]
    fn test_failed_begin_rolls_back_only_begun() {
        let journal = Journal::default();
        let loader = QueryResourcesLoader::builder()
            .executor(
                "a",
                ConnectionExecutor::new("a", MockConnection::with_journal("a", &journal)),
            )
            .executor(
                "b",
                ConnectionExecutor::new(
                    "b",
                    MockConnection::with_journal("b", &journal).failing_begin(),
                ),
            )
            .build();

        let err = loader
            .transactional(
                |_| Ok(()),
                &[Options::executor("a"), Options::executor("b")],
            )
            .unwrap_err();

        assert!(matches!(err, QueryError::Transaction { .. }));
        assert_eq!(entries(&journal), ["a.begin", "b.begin", "a.rollback"]);
    }

    #[test]
    fn test_failed_second_commit_keeps_first() {
        let journal = Journal::default();
        let loader = QueryResourcesLoader::builder()
            .executor(
                "a",
                ConnectionExecutor::new("a", MockConnection::with_journal("a", &journal)),
            )
            .executor(
                "b",
                ConnectionExecutor::new(
                    "b",
                    MockConnection::with_journal("b", &journal).failing_commit(),
                ),
            )
            .build();

        let err = loader
            .transactional(
                |_| Ok(()),
                &[Options::executor("a"), Options::executor("b")],
            )
            .unwrap_err();

        assert!(matches!(err, QueryError::Transaction { .. }));
        assert_eq!(
            entries(&journal),
            ["a.begin", "b.begin", "a.commit", "b.commit", "b.rollback"]
        );
    }

    #[test]
    fn test_same_executor_twice_is_rejected() {
        let journal = Journal::default();
        let loader = facade(&journal);

        let err = loader
            .transactional(|_| Ok(()), &[Options::new(), Options::executor("a")])
            .unwrap_err();

        assert!(matches!(err, QueryError::Logic(_)));
        assert!(entries(&journal).is_empty());
    }

    #[test]
    fn test_unknown_executor_in_scope() {
        let journal = Journal::default();
        let loader = facade(&journal);

        let err = loader
            .transactional(|_| Ok(()), &[Options::executor("missing")])
            .unwrap_err();

        assert!(matches!(err, QueryError::ExecutorNotFound(_)));
        assert!(entries(&journal).is_empty());
    }

    #[test]
    fn test_transaction_isolation_is_restored() {
        let journal = Journal::default();
        let loader = QueryResourcesLoader::builder()
            .executor(
                "a",
                ConnectionExecutor::new(
                    "a",
                    MockConnection::with_journal("a", &journal)
                        .with_isolation(IsolationLevel::ReadCommitted),
                ),
            )
            .build();

        loader
            .transactional(|_| Ok(()), &[Options::serializable()])
            .unwrap();

        assert_eq!(
            entries(&journal),
            [
                "a.isolation SERIALIZABLE",
                "a.begin",
                "a.commit",
                "a.isolation READ COMMITTED"
            ]
        );
    }

    #[test]
    fn test_cached_queries_hit_executor_once() {
        let journal = Journal::default();
        let loader = facade(&journal);
        let options = Options::cached(CacheIdentity::new("one"));

        for _ in 0..3 {
            let value = loader
                .execute("SELECT 1", None, Some(&options))
                .unwrap()
                .single_scalar()
                .unwrap();
            assert_eq!(value, json!(1));
        }

        assert_eq!(entries(&journal), ["a.query SELECT 1"]);
        assert_eq!(
            loader
                .cache_store()
                .unwrap()
                .invalidate_tags(&["unused".to_string()]),
            0
        );
    }

    #[test]
    fn test_custom_middleware_runs_after_builtins() {
        let journal = Journal::default();
        let loader = QueryResourcesLoader::builder()
            .executor(
                "a",
                ConnectionExecutor::new("a", MockConnection::with_journal("a", &journal)),
            )
            .middleware(middleware_fn(|query, params, options, next| {
                next.run(&format!("/* audited */ {}", query), params, options)
            }))
            .build();

        loader.execute("SELECT 1", None, None).unwrap();
        assert_eq!(entries(&journal), ["a.query /* audited */ SELECT 1"]);
    }

    #[test]
    fn test_without_cache_executes_every_time() {
        let journal = Journal::default();
        let loader = QueryResourcesLoader::builder()
            .executor(
                "a",
                ConnectionExecutor::new("a", MockConnection::with_journal("a", &journal)),
            )
            .without_cache()
            .build();
        let options = Options::cached(CacheIdentity::new("one"));

        loader.execute("SELECT 1", None, Some(&options)).unwrap();
        loader.execute("SELECT 1", None, Some(&options)).unwrap();

        assert!(loader.cache_store().is_none());
        assert_eq!(entries(&journal).len(), 2);
    }
}
