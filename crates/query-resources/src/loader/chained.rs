use super::Loader;
use crate::error::{QueryError, QueryResult};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Asks loaders in order; the first one that knows the name serves it
///
/// Which loader serves which name is remembered, including misses.
pub struct ChainedLoader {
    loaders: Vec<Arc<dyn Loader>>,
    found: RwLock<HashMap<String, Option<usize>>>,
}

impl ChainedLoader {
    pub fn new(loaders: Vec<Arc<dyn Loader>>) -> Self {
        Self {
            loaders,
            found: RwLock::new(HashMap::new()),
        }
    }

    fn locate(&self, name: &str) -> Option<usize> {
        if let Some(found) = self.found.read().get(name) {
            return *found;
        }

        let found = self.loaders.iter().position(|loader| loader.exists(name));
        self.found.write().insert(name.to_string(), found);
        found
    }
}

impl Loader for ChainedLoader {
    fn exists(&self, name: &str) -> bool {
        self.locate(name).is_some()
    }

    fn get(&self, name: &str, args: &BTreeMap<String, Value>) -> QueryResult<String> {
        match self.locate(name) {
            Some(position) => self.loaders[position].get(name, args),
            None => Err(QueryError::source_not_found(format!(
                "Could not find query source \"{}\" in any of chained loaders.",
                name
            ))),
        }
    }
}

impl std::fmt::Debug for ChainedLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainedLoader")
            .field("loaders", &self.loaders.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Knows a fixed set of names and counts lookups
    struct Fixed {
        names: Vec<&'static str>,
        prefix: &'static str,
        lookups: AtomicUsize,
    }

    impl Fixed {
        fn new(prefix: &'static str, names: &[&'static str]) -> Arc<Self> {
            Arc::new(Self {
                names: names.to_vec(),
                prefix,
                lookups: AtomicUsize::new(0),
            })
        }
    }

    impl Loader for Fixed {
        fn exists(&self, name: &str) -> bool {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.names.contains(&name)
        }

        fn get(&self, name: &str, _args: &BTreeMap<String, Value>) -> QueryResult<String> {
            Ok(format!("{}:{}", self.prefix, name))
        }
    }

    #[test]
    fn test_first_match_wins() {
        let first = Fixed::new("first", &["users"]);
        let second = Fixed::new("second", &["users", "orders"]);
        let chained = ChainedLoader::new(vec![first as Arc<dyn Loader>, second as Arc<dyn Loader>]);

        assert_eq!(chained.get("users", &BTreeMap::new()).unwrap(), "first:users");
        assert_eq!(chained.get("orders", &BTreeMap::new()).unwrap(), "second:orders");
    }

    #[test]
    fn test_lookups_are_memoized() {
        let first = Fixed::new("first", &["users"]);
        let chained = ChainedLoader::new(vec![first.clone() as Arc<dyn Loader>]);

        for _ in 0..3 {
            assert!(chained.exists("users"));
            assert!(!chained.exists("missing"));
        }
        assert_eq!(first.lookups.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unknown_name() {
        let chained = ChainedLoader::new(vec![Fixed::new("first", &[]) as Arc<dyn Loader>]);
        let err = chained.get("missing", &BTreeMap::new()).unwrap_err();

        assert!(matches!(err, QueryError::SourceNotFound(_)));
    }
}
