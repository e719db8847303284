//! Test doubles for pipeline code
//!
//! Available to this crate's tests and, with the `test-utils` feature, to
//! downstream crates.
//!
//! - [`MockConnection`]: scripted [`Connection`] that records every call in a
//!   shared [`Journal`]
//! - [`StreamingCursor`]: cursor that cannot report its row count
//! - [`RecordingCacheStore`]: in-memory store that remembers what was stored

use crate::cache::{CacheEntry, CacheStore, ComputeFn, InMemoryCache};
use crate::error::{DriverError, DriverResult, QueryResult};
use crate::executor::Connection;
use crate::model::{IsolationLevel, Parameters};
use crate::result::{BufferedCursor, MaterializedResult, RowCursor};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// Call log shared between connections and the test that inspects them
pub type Journal = Arc<Mutex<Vec<String>>>;

/// Snapshot of a journal
pub fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().clone()
}

/// Scripted connection
///
/// Entries are written as `"{name}.{call}"`, e.g. `db.begin` or
/// `db.query SELECT 1`. Calls are recorded before a scripted failure is
/// returned.
#[derive(Debug)]
pub struct MockConnection {
    name: String,
    journal: Journal,
    results: HashMap<String, MaterializedResult>,
    failing_queries: Vec<String>,
    fail_begin: bool,
    fail_commit: bool,
    fail_rollback: bool,
    isolation: IsolationLevel,
    depth: usize,
}

impl MockConnection {
    /// Connection with its own journal
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self::with_journal(name, &Journal::default())
    }

    /// Connection writing into a shared journal
    pub fn with_journal<S: Into<String>>(name: S, journal: &Journal) -> Self {
        Self {
            name: name.into(),
            journal: Arc::clone(journal),
            results: HashMap::new(),
            failing_queries: Vec::new(),
            fail_begin: false,
            fail_commit: false,
            fail_rollback: false,
            isolation: IsolationLevel::ReadCommitted,
            depth: 0,
        }
    }

    pub fn journal(&self) -> Journal {
        Arc::clone(&self.journal)
    }

    /// Rows returned for an exact SQL string; other statements return nothing
    pub fn with_result<S: Into<String>>(mut self, sql: S, result: MaterializedResult) -> Self {
        self.results.insert(sql.into(), result);
        self
    }

    /// Fail every statement containing `fragment`
    pub fn failing_on<S: Into<String>>(mut self, fragment: S) -> Self {
        self.failing_queries.push(fragment.into());
        self
    }

    pub fn failing_begin(mut self) -> Self {
        self.fail_begin = true;
        self
    }

    pub fn failing_commit(mut self) -> Self {
        self.fail_commit = true;
        self
    }

    pub fn failing_rollback(mut self) -> Self {
        self.fail_rollback = true;
        self
    }

    pub fn with_isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation = level;
        self
    }

    /// Current isolation level without going through the trait
    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    fn record(&self, call: impl std::fmt::Display) {
        self.journal.lock().push(format!("{}.{}", self.name, call));
    }
}

impl Connection for MockConnection {
    fn execute_query(&mut self, sql: &str, _params: &Parameters) -> DriverResult<Box<dyn RowCursor>> {
        self.record(format_args!("query {}", sql));

        if self
            .failing_queries
            .iter()
            .any(|fragment| sql.contains(fragment.as_str()))
        {
            return Err(DriverError::new(format!("scripted failure for \"{}\"", sql)));
        }

        let result = self.results.get(sql).cloned().unwrap_or_default();
        Ok(Box::new(BufferedCursor::new(result)))
    }

    fn begin_transaction(&mut self) -> DriverResult<()> {
        self.record("begin");
        if self.fail_begin {
            return Err(DriverError::new("scripted begin failure"));
        }
        self.depth += 1;
        Ok(())
    }

    fn commit(&mut self) -> DriverResult<()> {
        self.record("commit");
        if self.fail_commit {
            return Err(DriverError::new("scripted commit failure"));
        }
        self.depth = self.depth.saturating_sub(1);
        Ok(())
    }

    fn rollback(&mut self) -> DriverResult<()> {
        self.record("rollback");
        if self.fail_rollback {
            return Err(DriverError::new("scripted rollback failure"));
        }
        self.depth = self.depth.saturating_sub(1);
        Ok(())
    }

    fn transaction_nesting_level(&self) -> usize {
        self.depth
    }

    fn isolation_level(&mut self) -> DriverResult<IsolationLevel> {
        Ok(self.isolation)
    }

    fn set_isolation_level(&mut self, level: IsolationLevel) -> DriverResult<()> {
        self.record(format_args!("isolation {}", level));
        self.isolation = level;
        Ok(())
    }
}

/// Cursor that hands out rows one at a time and never knows how many are left
#[derive(Debug)]
pub struct StreamingCursor {
    columns: Vec<String>,
    rows: VecDeque<Vec<Value>>,
    failure: Option<String>,
}

impl StreamingCursor {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns,
            rows: rows.into(),
            failure: None,
        }
    }

    /// Cursor that fails once its rows are used up
    pub fn failing_after<S: Into<String>>(columns: Vec<String>, rows: Vec<Vec<Value>>, message: S) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::new(columns, rows)
        }
    }
}

impl RowCursor for StreamingCursor {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn fetch_numeric(&mut self) -> DriverResult<Option<Vec<Value>>> {
        match self.rows.pop_front() {
            Some(row) => Ok(Some(row)),
            None => match &self.failure {
                Some(message) => Err(DriverError::new(message.clone())),
                None => Ok(None),
            },
        }
    }
}

/// What a [`RecordingCacheStore`] was asked to store
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub key: String,
    pub tags: Vec<String>,
    pub ttl: Option<Duration>,
}

/// [`InMemoryCache`] that keeps a log of stored entries
#[derive(Debug, Default)]
pub struct RecordingCacheStore {
    inner: InMemoryCache,
    stored: Mutex<Vec<StoredRecord>>,
}

impl RecordingCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stored(&self) -> Vec<StoredRecord> {
        self.stored.lock().clone()
    }
}

impl CacheStore for RecordingCacheStore {
    fn get_or_compute(&self, key: &str, compute: ComputeFn<'_>) -> QueryResult<MaterializedResult> {
        self.inner.get_or_compute(
            key,
            Box::new(|| -> QueryResult<CacheEntry> {
                let entry = compute()?;
                self.stored.lock().push(StoredRecord {
                    key: key.to_string(),
                    tags: entry.tags.clone(),
                    ttl: entry.ttl,
                });
                Ok(entry)
            }),
        )
    }

    fn invalidate_tags(&self, tags: &[String]) -> usize {
        self.inner.invalidate_tags(tags)
    }

    fn delete(&self, key: &str) -> bool {
        self.inner.delete(key)
    }

    fn clear(&self) {
        self.inner.clear()
    }
}
