//! Query resources
//!
//! Loads SQL by name, runs it through a middleware pipeline and executes it
//! against one of several named database executors.
//!
//! ## Features
//!
//! - **Loaders**: raw SQL, files on disk with `@namespace/` prefixes, or a
//!   chain of both
//! - **Result cache**: results keyed by a [`CacheIdentity`] with tags and ttl,
//!   single-flight per key
//! - **Transactions**: one callable run inside transactions on several
//!   executors, rolled back together on failure
//! - **Per-query isolation**: a single statement wrapped in its own
//!   transaction at a requested isolation level
//! - **Batched iteration**: large results paged with `LIMIT`/`OFFSET`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use query_resources::{CacheIdentity, Options, Parameters, QueryResourcesLoader};
//!
//! let loader = QueryResourcesLoader::builder()
//!     .executor("default", my_executor)
//!     .build();
//!
//! let params = Parameters::new().string("status", "active");
//! let options = Options::cached(CacheIdentity::new("users.active"));
//! let count = loader
//!     .execute("SELECT COUNT(*) FROM users WHERE status = :status", Some(&params), Some(&options))?
//!     .single_scalar()?;
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod executor;
pub mod facade;
pub mod iterate;
pub mod loader;
pub mod model;
pub mod result;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;

// Re-exports
pub use cache::{CacheIdentity, CacheIdentityProvider, CacheMiddleware, CacheStore, InMemoryCache};
pub use config::{CacheConfig, LoaderConfig, LoaderKind, QueryResourcesConfig};
pub use error::{BoxError, DriverError, DriverResult, QueryError, QueryResult};
pub use executor::{
    middleware_fn, Connection, ConnectionExecutor, Executor, ExecutorRegistry, Middleware, Next,
    QueryExecutor,
};
pub use facade::{QueryResourcesLoader, QueryResourcesLoaderBuilder};
pub use iterate::{BatchIterator, IterateMode, IterateOptions};
pub use loader::{ChainedLoader, FilesystemLoader, Loader, LoaderMiddleware, RawLoader};
pub use model::{IsolationLevel, Options, ParameterType, Parameters};
pub use result::{ExecutionResult, MaterializedResult, Row, RowCursor};
