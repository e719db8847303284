//! rusqlite-backed [`Connection`]

use crate::config::SqliteConfig;
use crate::error::{SqliteError, SqliteResult};
use crate::values::{from_sql, to_sql};
use query_resources::result::BufferedCursor;
use query_resources::{
    Connection, DriverResult, IsolationLevel, MaterializedResult, Parameters, RowCursor,
};
use regex::Regex;
use rusqlite::types::Value as SqlValue;
use serde_json::Value;
use tracing::{debug, info};

/// Single SQLite connection
///
/// Transactions nest: the outermost level is a `BEGIN`, inner levels are
/// savepoints. SQLite has no per-transaction isolation; `READ UNCOMMITTED`
/// maps to `PRAGMA read_uncommitted = 1` and every other level to `0`, so the
/// level last requested is tracked here and reported back as is.
pub struct SqliteConnection {
    conn: rusqlite::Connection,
    depth: usize,
    isolation: IsolationLevel,
}

impl SqliteConnection {
    /// Open a connection and apply the configured pragmas
    pub fn open(config: &SqliteConfig) -> SqliteResult<Self> {
        info!(path = ?config.path, "Opening SQLite connection");

        let conn = if config.is_memory() {
            rusqlite::Connection::open_in_memory()?
        } else {
            if let Some(parent) = config.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| {
                    SqliteError::Connection(format!("Failed to create directory: {}", e))
                })?;
            }
            rusqlite::Connection::open(&config.path)?
        };

        configure_pragmas(&conn, config)?;

        Ok(Self {
            conn,
            depth: 0,
            isolation: IsolationLevel::Serializable,
        })
    }

    /// Open a private in-memory database
    pub fn memory() -> SqliteResult<Self> {
        Self::open(&SqliteConfig::memory())
    }

    /// The underlying rusqlite connection
    pub fn inner(&self) -> &rusqlite::Connection {
        &self.conn
    }

    fn run(&mut self, sql: &str, params: &Parameters) -> SqliteResult<MaterializedResult> {
        let (sql, bindings) = expand_parameters(sql, params)?;
        debug!(sql = %sql, bound = bindings.len(), "Running SQLite statement");

        let mut stmt = self.conn.prepare(&sql)?;
        for (placeholder, value) in bindings {
            // Parameters the statement does not mention are skipped
            if let Some(index) = stmt.parameter_index(&placeholder)? {
                stmt.raw_bind_parameter(index, value)?;
            }
        }

        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let width = columns.len();

        let mut rows = Vec::new();
        let mut cursor = stmt.raw_query();
        while let Some(row) = cursor.next()? {
            let mut values = Vec::with_capacity(width);
            for index in 0..width {
                values.push(from_sql(row.get_ref(index)?));
            }
            rows.push(values);
        }

        Ok(MaterializedResult::new(columns, rows))
    }

    fn savepoint(level: usize) -> String {
        format!("query_resources_{}", level)
    }

    fn begin(&mut self) -> SqliteResult<()> {
        if self.depth == 0 {
            self.conn.execute_batch("BEGIN")?;
        } else {
            self.conn
                .execute_batch(&format!("SAVEPOINT {}", Self::savepoint(self.depth)))?;
        }
        self.depth += 1;
        Ok(())
    }

    fn end(&mut self, commit: bool) -> SqliteResult<()> {
        let sql = match (self.depth, commit) {
            (0, _) => {
                return Err(SqliteError::Transaction(
                    "There is no active transaction.".to_string(),
                ))
            }
            (1, true) => "COMMIT".to_string(),
            (1, false) => "ROLLBACK".to_string(),
            (depth, true) => format!("RELEASE SAVEPOINT {}", Self::savepoint(depth - 1)),
            (depth, false) => {
                let name = Self::savepoint(depth - 1);
                format!("ROLLBACK TO SAVEPOINT {0}; RELEASE SAVEPOINT {0}", name)
            }
        };

        self.conn.execute_batch(&sql)?;
        self.depth -= 1;
        Ok(())
    }
}

impl std::fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("path", &self.conn.path())
            .field("depth", &self.depth)
            .field("isolation", &self.isolation)
            .finish()
    }
}

impl Connection for SqliteConnection {
    fn execute_query(&mut self, sql: &str, params: &Parameters) -> DriverResult<Box<dyn RowCursor>> {
        let result = self.run(sql, params)?;
        Ok(Box::new(BufferedCursor::new(result)))
    }

    fn begin_transaction(&mut self) -> DriverResult<()> {
        Ok(self.begin()?)
    }

    fn commit(&mut self) -> DriverResult<()> {
        Ok(self.end(true)?)
    }

    fn rollback(&mut self) -> DriverResult<()> {
        Ok(self.end(false)?)
    }

    fn transaction_nesting_level(&self) -> usize {
        self.depth
    }

    fn isolation_level(&mut self) -> DriverResult<IsolationLevel> {
        Ok(self.isolation)
    }

    fn set_isolation_level(&mut self, level: IsolationLevel) -> DriverResult<()> {
        let flag = u8::from(level == IsolationLevel::ReadUncommitted);
        self.conn
            .execute_batch(&format!("PRAGMA read_uncommitted = {};", flag))
            .map_err(SqliteError::from)?;
        self.isolation = level;
        Ok(())
    }
}

fn configure_pragmas(conn: &rusqlite::Connection, config: &SqliteConfig) -> SqliteResult<()> {
    debug!("Configuring SQLite pragmas");

    if config.wal_mode && !config.is_memory() {
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
    }

    if config.foreign_keys {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    }

    conn.execute_batch(&format!("PRAGMA busy_timeout = {};", config.busy_timeout_ms))?;

    Ok(())
}

/// Rewrite array placeholders and pair every placeholder with its value
///
/// An array-typed parameter `ids = [1, 2]` turns `:ids` into `:ids_0, :ids_1`.
/// Arrays bound as null are left as a single placeholder.
fn expand_parameters(sql: &str, params: &Parameters) -> SqliteResult<(String, Vec<(String, SqlValue)>)> {
    let mut sql = sql.to_string();
    let mut bindings = Vec::with_capacity(params.len());

    for (name, value, ty) in params.iter() {
        match (ty, value) {
            (Some(ty), Value::Array(items)) if ty.is_array() => {
                let pattern = Regex::new(&format!(r":{}\b", regex::escape(name)))
                    .map_err(|err| SqliteError::Binding(err.to_string()))?;
                let placeholders: Vec<String> =
                    (0..items.len()).map(|i| format!(":{}_{}", name, i)).collect();
                sql = pattern
                    .replace_all(&sql, placeholders.join(", ").as_str())
                    .into_owned();

                for (placeholder, item) in placeholders.into_iter().zip(items) {
                    bindings.push((placeholder, to_sql(item, None)?));
                }
            }
            _ => bindings.push((format!(":{}", name), to_sql(value, ty)?)),
        }
    }

    Ok((sql, bindings))
}
