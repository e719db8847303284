//! Query source loaders
//!
//! A loader turns a query name into SQL text. Rendering templates is left to
//! the loader implementation; the pipeline only hands it the query
//! parameters as arguments.

mod chained;
mod filesystem;
mod middleware;
mod raw;

pub use chained::ChainedLoader;
pub use filesystem::{FilesystemLoader, DEFAULT_NAMESPACE};
pub use middleware::{LoaderMiddleware, CHAINED_LOADER};
pub use raw::RawLoader;

use crate::error::QueryResult;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Resolves query names into SQL
pub trait Loader: Send + Sync {
    /// Whether this loader can provide `name`
    fn exists(&self, name: &str) -> bool;

    /// SQL for `name`
    ///
    /// Fails with [`QueryError::SourceNotFound`](crate::QueryError::SourceNotFound)
    /// when the name is unknown and [`QueryError::Syntax`](crate::QueryError::Syntax)
    /// when the source cannot be rendered.
    fn get(&self, name: &str, args: &BTreeMap<String, Value>) -> QueryResult<String>;
}

impl<L: Loader + ?Sized> Loader for Arc<L> {
    fn exists(&self, name: &str) -> bool {
        (**self).exists(name)
    }

    fn get(&self, name: &str, args: &BTreeMap<String, Value>) -> QueryResult<String> {
        (**self).get(name, args)
    }
}
