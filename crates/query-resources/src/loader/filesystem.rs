//! SQL files on the local filesystem
//!
//! Directories are registered per namespace. A name without a namespace is
//! looked up in [`DEFAULT_NAMESPACE`]; `@reports/monthly.sql` looks in the
//! `reports` namespace. Within a namespace directories are searched in order.

use super::Loader;
use crate::error::{QueryError, QueryResult};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, trace};

/// Namespace used for names without an `@namespace/` prefix
pub const DEFAULT_NAMESPACE: &str = "__default__";

static REPEATED_SLASHES: Lazy<Regex> = Lazy::new(|| Regex::new(r"/{2,}").unwrap());

/// Loads SQL from files under registered directories
#[derive(Debug, Default)]
pub struct FilesystemLoader {
    paths: HashMap<String, Vec<PathBuf>>,
    resolved: RwLock<HashMap<String, PathBuf>>,
}

impl FilesystemLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loader over directories of the default namespace
    pub fn with_paths<I, P>(paths: I) -> QueryResult<Self>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut loader = Self::new();
        loader.set_paths(paths, DEFAULT_NAMESPACE)?;
        Ok(loader)
    }

    /// Replace the directories of a namespace
    pub fn set_paths<I, P>(&mut self, paths: I, namespace: &str) -> QueryResult<()>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        self.paths.insert(namespace.to_string(), Vec::new());
        for path in paths {
            self.add_path(path, namespace)?;
        }
        Ok(())
    }

    /// Append a directory to a namespace
    pub fn add_path<P: AsRef<Path>>(&mut self, path: P, namespace: &str) -> QueryResult<()> {
        let path = checked_dir(path.as_ref())?;
        self.resolved.get_mut().clear();
        self.paths
            .entry(namespace.to_string())
            .or_default()
            .push(path);
        Ok(())
    }

    /// Put a directory in front of a namespace's search order
    pub fn prepend_path<P: AsRef<Path>>(&mut self, path: P, namespace: &str) -> QueryResult<()> {
        let path = checked_dir(path.as_ref())?;
        self.resolved.get_mut().clear();
        self.paths
            .entry(namespace.to_string())
            .or_default()
            .insert(0, path);
        Ok(())
    }

    /// Registered namespaces
    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.paths.keys().map(String::as_str)
    }

    /// Directories of a namespace in search order
    pub fn paths(&self, namespace: &str) -> &[PathBuf] {
        self.paths.get(namespace).map(Vec::as_slice).unwrap_or_default()
    }

    fn find_source(&self, name: &str) -> QueryResult<PathBuf> {
        let name = normalize_name(name);

        if let Some(path) = self.resolved.read().get(&name) {
            return Ok(path.clone());
        }

        if name.contains('\0') {
            return Err(QueryError::invalid_argument(
                "SQL source name cannot contain NUL bytes.",
            ));
        }
        let (namespace, short_name) = parse_name(&name)?;
        validate_short_name(&name, short_name)?;

        let directories = self.paths.get(namespace).ok_or_else(|| {
            QueryError::source_not_found(format!(
                "There are no registered paths for namespace \"{}\".",
                namespace
            ))
        })?;

        for directory in directories {
            let candidate = directory.join(short_name);
            if candidate.is_file() {
                let path = candidate.canonicalize().unwrap_or(candidate);
                trace!(name = %name, path = %path.display(), "Resolved query source");
                self.resolved.write().insert(name.clone(), path.clone());
                return Ok(path);
            }
        }

        Err(QueryError::source_not_found(format!(
            "Unable to find source \"{}\" (looked into: {}).",
            name,
            directories
                .iter()
                .map(|directory| directory.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )))
    }
}

impl Loader for FilesystemLoader {
    fn exists(&self, name: &str) -> bool {
        self.find_source(name).is_ok()
    }

    fn get(&self, name: &str, _args: &BTreeMap<String, Value>) -> QueryResult<String> {
        let path = self.find_source(name)?;
        debug!(name, path = %path.display(), "Loading query source");
        fs::read_to_string(&path).map_err(|err| {
            QueryError::source_not_found(format!(
                "Unable to read source \"{}\" from \"{}\": {}.",
                name,
                path.display(),
                err
            ))
        })
    }
}

fn checked_dir(path: &Path) -> QueryResult<PathBuf> {
    if !path.is_dir() {
        return Err(QueryError::invalid_argument(format!(
            "The directory \"{}\" does not exist.",
            path.display()
        )));
    }
    Ok(path.to_path_buf())
}

/// Backslashes become slashes and runs of slashes collapse
fn normalize_name(name: &str) -> String {
    REPEATED_SLASHES
        .replace_all(&name.replace('\\', "/"), "/")
        .into_owned()
}

/// Relative path that never climbs above the directory it is joined to
fn validate_short_name(name: &str, short_name: &str) -> QueryResult<()> {
    let outside = || {
        QueryError::invalid_argument(format!(
            "Looks like you try to load a SQL source outside configured directories ({}).",
            name
        ))
    };

    let mut level: usize = 0;
    for component in Path::new(short_name).components() {
        match component {
            Component::Normal(_) => level += 1,
            Component::CurDir => {}
            Component::ParentDir => level = level.checked_sub(1).ok_or_else(outside)?,
            Component::RootDir | Component::Prefix(_) => return Err(outside()),
        }
    }

    Ok(())
}

fn parse_name(name: &str) -> QueryResult<(&str, &str)> {
    let Some(namespaced) = name.strip_prefix('@') else {
        return Ok((DEFAULT_NAMESPACE, name));
    };

    namespaced.split_once('/').ok_or_else(|| {
        QueryError::invalid_argument(format!(
            "Malformed namespaced SQL source name \"{}\" (expecting \"@namespace/sql_source_name\").",
            name
        ))
    })
}
