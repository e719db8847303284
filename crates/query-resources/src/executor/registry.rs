//! Named executor lookup
//!
//! Registries are built once with [`ExecutorRegistryBuilder`] and read-only
//! afterwards. The first registered executor is the default one.

use super::Executor;
use crate::error::{QueryError, QueryResult};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Immutable `name -> executor` map preserving registration order
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: Vec<(String, Arc<dyn Executor>)>,
    index: HashMap<String, usize>,
}

impl ExecutorRegistry {
    pub fn builder() -> ExecutorRegistryBuilder {
        ExecutorRegistryBuilder::default()
    }

    /// Executor by name, or the default one when `name` is `None`
    pub fn get(&self, name: Option<&str>) -> QueryResult<&Arc<dyn Executor>> {
        let name = self.resolve_name(name)?;
        let position = self.index[name];
        Ok(&self.executors[position].1)
    }

    /// Registered name an optional executor name refers to
    pub fn resolve_name<'a>(&'a self, name: Option<&'a str>) -> QueryResult<&'a str> {
        match name {
            Some(name) if self.index.contains_key(name) => Ok(name),
            Some(name) => Err(QueryError::ExecutorNotFound(name.to_string())),
            None => self
                .executors
                .first()
                .map(|(name, _)| name.as_str())
                .ok_or_else(|| QueryError::logic("No executors are registered.")),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Names in registration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.executors.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("executors", &self.names().collect::<Vec<_>>())
            .finish()
    }
}

/// Accumulates executors, then [`build`](Self::build) freezes them
#[derive(Default)]
pub struct ExecutorRegistryBuilder {
    executors: Vec<(String, Arc<dyn Executor>)>,
}

impl ExecutorRegistryBuilder {
    /// Register an executor; registering a name again replaces the executor
    /// but keeps its original position
    pub fn register<S, E>(self, name: S, executor: E) -> Self
    where
        S: Into<String>,
        E: Executor + 'static,
    {
        self.register_shared(name, Arc::new(executor))
    }

    pub fn register_shared<S: Into<String>>(mut self, name: S, executor: Arc<dyn Executor>) -> Self {
        let name = name.into();
        match self.executors.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = executor,
            None => self.executors.push((name, executor)),
        }
        self
    }

    pub fn build(self) -> ExecutorRegistry {
        let index = self
            .executors
            .iter()
            .enumerate()
            .map(|(position, (name, _))| (name.clone(), position))
            .collect();

        info!(
            executors = ?self.executors.iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>(),
            "Executor registry built"
        );

        ExecutorRegistry {
            executors: self.executors,
            index,
        }
    }
}
