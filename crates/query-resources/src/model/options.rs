//! Execution options
//!
//! Options travel with every query through the pipeline. The core understands
//! four reserved fields; everything else is an extension value that is kept
//! and handed to executors and middlewares untouched.

use crate::cache::{CacheIdentity, CacheIdentityProvider};
use crate::error::{QueryError, QueryResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Names the core reserves in [`Options::from_map`]
pub const RESERVED_OPTIONS: [&str; 4] = ["executor", "cache", "loader", "isolation"];

/// Transaction isolation level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// SQL name of the level, e.g. `READ COMMITTED`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IsolationLevel {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().replace(['_', '-'], " ").to_ascii_uppercase();
        match normalized.as_str() {
            "READ UNCOMMITTED" => Ok(Self::ReadUncommitted),
            "READ COMMITTED" => Ok(Self::ReadCommitted),
            "REPEATABLE READ" => Ok(Self::RepeatableRead),
            "SERIALIZABLE" => Ok(Self::Serializable),
            _ => Err(QueryError::invalid_argument(format!(
                "Unknown transaction isolation level \"{}\".",
                s
            ))),
        }
    }
}

/// Per-call execution options
///
/// Every `with_*` method returns a new instance; the receiver is left as is.
#[derive(Debug, Clone, Default)]
pub struct Options {
    executor: Option<String>,
    cache: Option<Arc<dyn CacheIdentityProvider>>,
    loader: Option<String>,
    isolation: Option<IsolationLevel>,
    extensions: BTreeMap<String, Value>,
}

impl Options {
    /// Options targeting the default executor with no caching
    pub fn new() -> Self {
        Self::default()
    }

    /// Options targeting a named executor
    pub fn executor<S: Into<String>>(name: S) -> Self {
        Self::new().with_executor(name)
    }

    /// Options caching the result under the given identity
    pub fn cached<C: CacheIdentityProvider + 'static>(cache: C) -> Self {
        Self::new().with_cache(cache)
    }

    pub fn read_uncommitted() -> Self {
        Self::new().with_isolation(IsolationLevel::ReadUncommitted)
    }

    pub fn read_committed() -> Self {
        Self::new().with_isolation(IsolationLevel::ReadCommitted)
    }

    pub fn repeatable_read() -> Self {
        Self::new().with_isolation(IsolationLevel::RepeatableRead)
    }

    pub fn serializable() -> Self {
        Self::new().with_isolation(IsolationLevel::Serializable)
    }

    /// Build options from a loosely typed map
    ///
    /// Reserved keys are validated and moved into their typed fields; a
    /// `cache` entry may be a plain string key or an object with `key`,
    /// `tags` and `ttl` (seconds). Unknown keys become extensions.
    pub fn from_map(map: BTreeMap<String, Value>) -> QueryResult<Self> {
        let mut options = Self::new();

        for (name, value) in map {
            if !RESERVED_OPTIONS.contains(&name.as_str()) {
                options.extensions.insert(name, value);
                continue;
            }

            match (name.as_str(), value) {
                (_, Value::Null) => {}
                ("executor", Value::String(executor)) => options.executor = Some(executor),
                ("loader", Value::String(loader)) => options.loader = Some(loader),
                ("isolation", Value::String(level)) => {
                    options.isolation = Some(level.parse()?);
                }
                ("cache", value) => {
                    let identity = CacheIdentity::from_value(&value)?;
                    options.cache = Some(Arc::new(identity));
                }
                (reserved, value) => {
                    return Err(QueryError::invalid_argument(format!(
                        "Option \"{}\" has unsupported value {}.",
                        reserved, value
                    )));
                }
            }
        }

        Ok(options)
    }

    /// Target executor name, `None` for the default executor
    pub fn executor_name(&self) -> Option<&str> {
        self.executor.as_deref()
    }

    /// Cache identity source, if the result should be cached
    pub fn cache(&self) -> Option<&Arc<dyn CacheIdentityProvider>> {
        self.cache.as_ref()
    }

    /// Named loader override
    pub fn loader(&self) -> Option<&str> {
        self.loader.as_deref()
    }

    /// Requested isolation level
    pub fn isolation(&self) -> Option<IsolationLevel> {
        self.isolation
    }

    /// Extension value by name
    pub fn extension(&self, name: &str) -> Option<&Value> {
        self.extensions.get(name)
    }

    pub fn extensions(&self) -> &BTreeMap<String, Value> {
        &self.extensions
    }

    pub fn with_executor<S: Into<String>>(&self, name: S) -> Self {
        Self {
            executor: Some(name.into()),
            ..self.clone()
        }
    }

    /// Clear the executor so the default one is used
    pub fn with_default_executor(&self) -> Self {
        Self {
            executor: None,
            ..self.clone()
        }
    }

    pub fn with_cache<C: CacheIdentityProvider + 'static>(&self, cache: C) -> Self {
        self.with_shared_cache(Arc::new(cache))
    }

    /// Use an already shared identity provider
    pub fn with_shared_cache(&self, cache: Arc<dyn CacheIdentityProvider>) -> Self {
        Self {
            cache: Some(cache),
            ..self.clone()
        }
    }

    pub fn without_cache(&self) -> Self {
        Self {
            cache: None,
            ..self.clone()
        }
    }

    pub fn with_loader<S: Into<String>>(&self, loader: S) -> Self {
        Self {
            loader: Some(loader.into()),
            ..self.clone()
        }
    }

    pub fn with_isolation(&self, level: IsolationLevel) -> Self {
        Self {
            isolation: Some(level),
            ..self.clone()
        }
    }

    pub fn without_isolation(&self) -> Self {
        Self {
            isolation: None,
            ..self.clone()
        }
    }

    /// Add or replace an extension value
    pub fn with_extension<K: Into<String>, V: Into<Value>>(&self, name: K, value: V) -> Self {
        let mut options = self.clone();
        options.extensions.insert(name.into(), value.into());
        options
    }
}
