use super::{CacheEntry, CacheStore, InMemoryCache};
use crate::error::QueryResult;
use crate::executor::{Middleware, Next};
use crate::model::{Options, Parameters};
use crate::result::ExecutionResult;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Serves results from a [`CacheStore`] when the options carry a cache identity
///
/// Queries without one go straight through. On a miss the rest of the chain
/// runs once, the result is materialized and stored under the identity's key
/// with its tags and ttl (falling back to the default ttl).
pub struct CacheMiddleware {
    store: Arc<dyn CacheStore>,
    default_ttl: Option<Duration>,
}

impl CacheMiddleware {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            default_ttl: None,
        }
    }

    /// Ttl applied to identities that do not set one
    pub fn with_default_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl
    }
}

impl Default for CacheMiddleware {
    fn default() -> Self {
        Self::new(Arc::new(InMemoryCache::new()))
    }
}

impl Middleware for CacheMiddleware {
    fn invoke(
        &self,
        query: &str,
        params: &Parameters,
        options: &Options,
        next: Next<'_>,
    ) -> QueryResult<ExecutionResult> {
        let Some(provider) = options.cache() else {
            return next.run(query, params, options);
        };

        let mut identity = provider.cache_identity();
        if identity.ttl().is_none() {
            identity = identity.with_ttl(self.default_ttl);
        }
        debug!(key = identity.key(), "Resolving cached query result");

        let key = identity.key().to_string();
        let result = self.store.get_or_compute(
            &key,
            Box::new(move || -> QueryResult<CacheEntry> {
                let result = next.run(query, params, options)?.materialize()?;
                let identity = provider.with_execution_result(identity, &result);
                Ok(CacheEntry::new(result, identity.tags().to_vec(), identity.ttl()))
            }),
        )?;

        Ok(ExecutionResult::from(result))
    }
}
