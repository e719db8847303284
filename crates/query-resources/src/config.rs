//! Pipeline configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! default_ttl_seconds = 300
//!
//! [loader]
//! default = "chained"
//!
//! [loader.paths]
//! __default__ = ["queries"]
//! reports = ["queries/reports"]
//! ```

use crate::error::{QueryError, QueryResult};
use crate::loader::{ChainedLoader, FilesystemLoader, Loader, RawLoader};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryResourcesConfig {
    pub cache: CacheConfig,
    pub loader: LoaderConfig,
}

/// Result cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Register the cache middleware
    ///
    /// Default: true
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,

    /// Ttl for identities that do not set one; unset means never expire
    #[serde(default)]
    pub default_ttl_seconds: Option<u64>,
}

fn default_cache_enabled() -> bool {
    true
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            default_ttl_seconds: None,
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl_seconds.map(Duration::from_secs)
    }
}

/// Which loader turns query names into SQL
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoaderKind {
    /// Query names are SQL
    #[default]
    Raw,
    /// Query names are files under [`LoaderConfig::paths`]
    Filesystem,
    /// Files first, then raw SQL
    Chained,
}

impl LoaderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Filesystem => "filesystem",
            Self::Chained => "chained",
        }
    }
}

/// Loader settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub default: LoaderKind,

    /// Namespace to directories; `__default__` holds un-namespaced sources
    pub paths: BTreeMap<String, Vec<PathBuf>>,
}

impl LoaderConfig {
    /// Filesystem loader over the configured directories, if any are set
    pub fn filesystem_loader(&self) -> QueryResult<Option<FilesystemLoader>> {
        if self.paths.is_empty() {
            return Ok(None);
        }

        let mut loader = FilesystemLoader::new();
        for (namespace, paths) in &self.paths {
            loader
                .set_paths(paths, namespace)
                .map_err(|err| QueryError::configuration(err.to_string()))?;
        }
        Ok(Some(loader))
    }

    /// Default loader plus the named loaders to register
    ///
    /// `raw` is always registered; `filesystem` when directories are set.
    pub fn build_loaders(&self) -> QueryResult<(Arc<dyn Loader>, Vec<(String, Arc<dyn Loader>)>)> {
        let raw: Arc<dyn Loader> = Arc::new(RawLoader);
        let filesystem: Option<Arc<dyn Loader>> = self
            .filesystem_loader()?
            .map(|loader| Arc::new(loader) as Arc<dyn Loader>);

        let mut named = Vec::new();
        if let Some(filesystem) = &filesystem {
            named.push(("filesystem".to_string(), Arc::clone(filesystem)));
        }
        named.push(("raw".to_string(), Arc::clone(&raw)));

        let default = match (self.default, filesystem) {
            (LoaderKind::Raw, _) => raw,
            (LoaderKind::Filesystem, Some(filesystem)) => filesystem,
            (LoaderKind::Chained, Some(filesystem)) => {
                Arc::new(ChainedLoader::new(vec![filesystem, raw])) as Arc<dyn Loader>
            }
            (kind, None) => {
                return Err(QueryError::configuration(format!(
                    "Loader \"{}\" requires at least one entry in loader.paths.",
                    kind.as_str()
                )))
            }
        };

        Ok((default, named))
    }
}

impl QueryResourcesConfig {
    #[cfg(feature = "toml")]
    pub fn from_toml_str(content: &str) -> QueryResult<Self> {
        toml::from_str(content)
            .map_err(|err| QueryError::configuration(format!("Invalid TOML configuration: {}", err)))
    }

    #[cfg(feature = "yaml")]
    pub fn from_yaml_str(content: &str) -> QueryResult<Self> {
        serde_yaml::from_str(content)
            .map_err(|err| QueryError::configuration(format!("Invalid YAML configuration: {}", err)))
    }

    /// Load from a `.toml`, `.yaml` or `.yml` file
    pub fn from_file<P: AsRef<Path>>(path: P) -> QueryResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|err| {
            QueryError::configuration(format!(
                "Unable to read configuration file \"{}\": {}",
                path.display(),
                err
            ))
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            #[cfg(feature = "toml")]
            Some("toml") => Self::from_toml_str(&content),
            #[cfg(feature = "yaml")]
            Some("yaml" | "yml") => Self::from_yaml_str(&content),
            _ => Err(QueryError::configuration(format!(
                "Unsupported configuration format for \"{}\".",
                path.display()
            ))),
        }
    }
}
