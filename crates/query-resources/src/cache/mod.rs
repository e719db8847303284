//! Result caching
//!
//! - [`CacheIdentity`]: where a result is stored, how it is tagged, how long it lives
//! - [`CacheStore`]: the storage seam, with [`InMemoryCache`] and [`NullCache`]
//! - [`CacheMiddleware`]: the pipeline step that consults the store

mod identity;
mod middleware;
mod store;

pub use identity::{CacheIdentity, CacheIdentityProvider, KEY_SEPARATOR};
pub use middleware::CacheMiddleware;
pub use store::{CacheEntry, CacheStore, ComputeFn, InMemoryCache, NullCache};
