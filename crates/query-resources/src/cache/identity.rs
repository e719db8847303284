//! Cache identity
//!
//! A cache identity addresses a cached execution result: the key it is stored
//! under, the tags used for bulk invalidation and how long it lives.

use crate::error::{QueryError, QueryResult};
use crate::result::MaterializedResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Separator used when a key is built from several parts
pub const KEY_SEPARATOR: &str = "|";

/// Immutable `(key, tags, ttl)` triple
///
/// Tags are deduplicated and keep their insertion order. A `None` ttl means
/// the cached item never expires unless a default ttl is applied by the cache
/// middleware.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheIdentity {
    key: String,
    tags: Vec<String>,
    ttl: Option<Duration>,
}

impl CacheIdentity {
    /// Identity with a key only
    pub fn new<K: Into<String>>(key: K) -> Self {
        Self {
            key: key.into(),
            tags: Vec::new(),
            ttl: None,
        }
    }

    /// Identity with key, tags and ttl
    pub fn create<K, I, T>(key: K, tags: I, ttl: Option<Duration>) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            key: key.into(),
            tags: dedup(tags.into_iter().map(Into::into)),
            ttl,
        }
    }

    /// Identity whose key is the parts joined with `|`
    pub fn from_parts<P, I, T>(parts: &[P], tags: I, ttl: Option<Duration>) -> Self
    where
        P: AsRef<str>,
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let key = parts
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join(KEY_SEPARATOR);
        Self::create(key, tags, ttl)
    }

    /// Parse an identity from a JSON value
    ///
    /// Accepts a plain string key, an array of key parts, or an object with
    /// `key` (string or array), optional `tags` and optional `ttl` in seconds.
    pub fn from_value(value: &Value) -> QueryResult<Self> {
        match value {
            Value::String(key) => Ok(Self::new(key.clone())),
            Value::Array(_) => Ok(Self::new(key_from_value(value)?)),
            Value::Object(map) => {
                let key = map
                    .get("key")
                    .ok_or_else(|| QueryError::invalid_argument("Cache identity requires a key."))
                    .and_then(key_from_value)?;

                let tags = match map.get("tags") {
                    None | Some(Value::Null) => Vec::new(),
                    Some(Value::Array(tags)) => tags
                        .iter()
                        .map(|tag| {
                            tag.as_str().map(str::to_string).ok_or_else(|| {
                                QueryError::invalid_argument(format!(
                                    "Cache tag must be a string, got {}.",
                                    tag
                                ))
                            })
                        })
                        .collect::<QueryResult<Vec<_>>>()?,
                    Some(other) => {
                        return Err(QueryError::invalid_argument(format!(
                            "Cache tags must be an array, got {}.",
                            other
                        )))
                    }
                };

                let ttl = match map.get("ttl") {
                    None | Some(Value::Null) => None,
                    Some(ttl) => Some(Duration::from_secs(ttl.as_u64().ok_or_else(|| {
                        QueryError::invalid_argument(format!(
                            "Cache ttl must be a non-negative number of seconds, got {}.",
                            ttl
                        ))
                    })?)),
                };

                Ok(Self::create(key, tags, ttl))
            }
            other => Err(QueryError::invalid_argument(format!(
                "Unsupported cache identity {}.",
                other
            ))),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// New identity with extra tags appended (duplicates dropped)
    pub fn tag<I, T>(&self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            key: self.key.clone(),
            tags: dedup(self.tags.iter().cloned().chain(tags.into_iter().map(Into::into))),
            ttl: self.ttl,
        }
    }

    pub fn with_key<K: Into<String>>(&self, key: K) -> Self {
        Self {
            key: key.into(),
            ..self.clone()
        }
    }

    /// New identity with the tags replaced
    pub fn with_tags<I, T>(&self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            tags: dedup(tags.into_iter().map(Into::into)),
            ..self.clone()
        }
    }

    pub fn with_ttl(&self, ttl: Option<Duration>) -> Self {
        Self {
            ttl,
            ..self.clone()
        }
    }

    /// New identity expiring at an absolute point in time
    ///
    /// Instants in the past yield a zero ttl.
    pub fn expires_at(&self, at: DateTime<Utc>) -> Self {
        let ttl = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        self.with_ttl(Some(ttl))
    }
}

impl fmt::Display for CacheIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)?;
        if !self.tags.is_empty() {
            write!(f, " [{}]", self.tags.join(", "))?;
        }
        if let Some(ttl) = self.ttl {
            write!(f, " ttl={}s", ttl.as_secs())?;
        }
        Ok(())
    }
}

/// Anything that can describe how its query result should be cached
///
/// Domain value objects implement this so callers can pass them straight into
/// [`Options::with_cache`](crate::Options::with_cache) instead of building a
/// [`CacheIdentity`] by hand.
pub trait CacheIdentityProvider: fmt::Debug + Send + Sync {
    /// Identity used to look up and store the result
    fn cache_identity(&self) -> CacheIdentity;

    /// Adjust the identity once the result is known
    ///
    /// Called on a cache miss, after the query ran and before the result is
    /// stored. Useful for tagging by content (e.g. by the ids in the rows).
    fn with_execution_result(
        &self,
        identity: CacheIdentity,
        _result: &MaterializedResult,
    ) -> CacheIdentity {
        identity
    }
}

impl CacheIdentityProvider for CacheIdentity {
    fn cache_identity(&self) -> CacheIdentity {
        self.clone()
    }
}

fn dedup<I: Iterator<Item = String>>(tags: I) -> Vec<String> {
    let mut unique: Vec<String> = Vec::new();
    for tag in tags {
        if !unique.contains(&tag) {
            unique.push(tag);
        }
    }
    unique
}

fn key_from_value(value: &Value) -> QueryResult<String> {
    match value {
        Value::String(key) => Ok(key.clone()),
        Value::Array(parts) => parts
            .iter()
            .map(|part| match part {
                Value::String(part) => Ok(part.clone()),
                Value::Number(part) => Ok(part.to_string()),
                other => Err(QueryError::invalid_argument(format!(
                    "Cache key part must be a string or number, got {}.",
                    other
                ))),
            })
            .collect::<QueryResult<Vec<_>>>()
            .map(|parts| parts.join(KEY_SEPARATOR)),
        other => Err(QueryError::invalid_argument(format!(
            "Cache key must be a string or array, got {}.",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tag_appends_and_keeps_original() {
        let identity = CacheIdentity::create("foo", ["t1"], Some(Duration::from_secs(60)));
        let tagged = identity.tag(["t2"]);

        assert_eq!(tagged.tags(), ["t1".to_string(), "t2".to_string()]);
        assert_eq!(identity.tags(), ["t1".to_string()]);
    }

    #[test]
    fn test_with_key_is_a_copy() {
        let identity = CacheIdentity::create("foo", ["t1"], Some(Duration::from_secs(60)));
        let renamed = identity.with_key("bar");

        assert_eq!(renamed.key(), "bar");
        assert_eq!(identity.key(), "foo");
        assert_eq!(renamed.ttl(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_tags_are_deduplicated() {
        let identity = CacheIdentity::create("foo", ["a", "b", "a"], None).tag(["b", "c"]);
        assert_eq!(
            identity.tags(),
            ["a".to_string(), "b".to_string(), "c".to_string()]
        );
    }

    #[test]
    fn test_from_parts_joins_with_pipe() {
        let identity = CacheIdentity::from_parts(&["users", "42", "profile"], ["users"], None);
        assert_eq!(identity.key(), "users|42|profile");
    }

    #[test]
    fn test_expires_at_past_is_zero() {
        let identity = CacheIdentity::new("foo").expires_at(Utc::now() - chrono::Duration::hours(1));
        assert_eq!(identity.ttl(), Some(Duration::ZERO));
    }

    #[test]
    fn test_expires_at_future() {
        let identity =
            CacheIdentity::new("foo").expires_at(Utc::now() + chrono::Duration::seconds(120));
        let ttl = identity.ttl().unwrap();
        assert!(ttl <= Duration::from_secs(120));
        assert!(ttl > Duration::from_secs(110));
    }

    #[test]
    fn test_from_value_variants() {
        assert_eq!(
            CacheIdentity::from_value(&json!("plain")).unwrap(),
            CacheIdentity::new("plain")
        );
        assert_eq!(
            CacheIdentity::from_value(&json!(["a", 1])).unwrap().key(),
            "a|1"
        );

        let full = CacheIdentity::from_value(&json!({
            "key": ["report", "2024"],
            "tags": ["reports", "reports"],
            "ttl": 3600
        }))
        .unwrap();
        assert_eq!(full.key(), "report|2024");
        assert_eq!(full.tags(), ["reports".to_string()]);
        assert_eq!(full.ttl(), Some(Duration::from_secs(3600)));

        assert!(CacheIdentity::from_value(&json!({ "tags": [] })).is_err());
        assert!(CacheIdentity::from_value(&json!({ "key": "k", "ttl": -1 })).is_err());
        assert!(CacheIdentity::from_value(&json!(true)).is_err());
    }

    #[test]
    fn test_display() {
        let identity = CacheIdentity::create("foo", ["a"], Some(Duration::from_secs(5)));
        assert_eq!(identity.to_string(), "foo [a] ttl=5s");
    }
}
