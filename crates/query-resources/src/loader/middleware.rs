use super::{ChainedLoader, Loader, RawLoader};
use crate::error::{QueryError, QueryResult};
use crate::executor::{Middleware, Next};
use crate::model::{Options, Parameters};
use crate::result::ExecutionResult;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Name under which a chain over all named loaders is registered
pub const CHAINED_LOADER: &str = "chained";

/// Replaces the query name with the SQL a loader produces for it
///
/// [`Options::loader`] picks a named loader; otherwise the default one is
/// used. Query parameters are passed to the loader as template arguments.
pub struct LoaderMiddleware {
    default: Arc<dyn Loader>,
    loaders: HashMap<String, Arc<dyn Loader>>,
}

impl LoaderMiddleware {
    /// Build from a default loader and named loaders
    ///
    /// Named loaders are chained in the given order under [`CHAINED_LOADER`],
    /// unless one of them already uses that name.
    pub fn new<S: Into<String>>(default: Arc<dyn Loader>, loaders: Vec<(S, Arc<dyn Loader>)>) -> Self {
        let loaders: Vec<(String, Arc<dyn Loader>)> = loaders
            .into_iter()
            .map(|(name, loader)| (name.into(), loader))
            .collect();

        let chained = ChainedLoader::new(loaders.iter().map(|(_, loader)| Arc::clone(loader)).collect());
        let mut named: HashMap<String, Arc<dyn Loader>> = HashMap::new();
        named.insert(CHAINED_LOADER.to_string(), Arc::new(chained));
        named.extend(loaders);

        Self {
            default,
            loaders: named,
        }
    }

    /// Loader picked for the given options
    pub fn resolve(&self, options: &Options) -> QueryResult<&Arc<dyn Loader>> {
        match options.loader() {
            None => Ok(&self.default),
            Some(name) => self.loaders.get(name).ok_or_else(|| {
                QueryError::invalid_argument(format!("Requested loader \"{}\" not found.", name))
            }),
        }
    }

    /// Render the SQL for a query name
    pub fn load(&self, query: &str, params: &Parameters, options: &Options) -> QueryResult<String> {
        self.resolve(options)?.get(query, params.values())
    }
}

impl Default for LoaderMiddleware {
    fn default() -> Self {
        Self::new::<String>(Arc::new(RawLoader), Vec::new())
    }
}

impl Middleware for LoaderMiddleware {
    fn invoke(
        &self,
        query: &str,
        params: &Parameters,
        options: &Options,
        next: Next<'_>,
    ) -> QueryResult<ExecutionResult> {
        let sql = self.load(query, params, options)?;
        debug!(query, loader = options.loader().unwrap_or("default"), "Loaded query source");
        next.run(&sql, params, options)
    }
}
