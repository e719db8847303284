//! SQLite connection configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Path used for in-memory databases
pub const MEMORY_PATH: &str = ":memory:";

/// Settings applied when a connection is opened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    /// Database file, or `:memory:`
    pub path: PathBuf,

    /// How long a statement waits on a locked database
    ///
    /// Default: 5000
    pub busy_timeout_ms: u64,

    /// Enforce foreign key constraints
    ///
    /// Default: true
    pub foreign_keys: bool,

    /// Use write-ahead logging (ignored for in-memory databases)
    ///
    /// Default: true
    pub wal_mode: bool,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(MEMORY_PATH),
            busy_timeout_ms: 5000,
            foreign_keys: true,
            wal_mode: true,
        }
    }
}

impl SqliteConfig {
    /// Configuration for a database file
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Configuration for a private in-memory database
    pub fn memory() -> Self {
        Self {
            wal_mode: false,
            ..Self::default()
        }
    }

    pub fn is_memory(&self) -> bool {
        self.path.to_str() == Some(MEMORY_PATH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_config() {
        let config = SqliteConfig::memory();
        assert!(config.is_memory());
        assert!(!config.wal_mode);
        assert!(config.foreign_keys);
    }

    #[test]
    fn test_file_config() {
        let config = SqliteConfig::new("/tmp/queries.db");
        assert!(!config.is_memory());
        assert!(config.wal_mode);
        assert_eq!(config.busy_timeout_ms, 5000);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: SqliteConfig =
            serde_json::from_str(r#"{ "path": "app.db", "foreign_keys": false }"#).unwrap();
        assert_eq!(config.path, PathBuf::from("app.db"));
        assert!(!config.foreign_keys);
        assert!(config.wal_mode);
    }
}
