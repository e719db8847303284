//! Batched iteration
//!
//! Pages through a query by appending `LIMIT batch_size + 1 OFFSET n` to its
//! SQL. The extra row tells whether another batch follows and is exposed to
//! the next batch's query as the reserved [`LAST_BATCH_ROW`] parameter, which
//! allows keyset-style continuation in the SQL itself.
//!
//! Batches go straight to the executor; the middleware chain (and therefore
//! the result cache) is not involved.

use crate::error::{QueryError, QueryResult};
use crate::executor::Executor;
use crate::model::{Options, Parameters};
use serde::Deserialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Parameter holding the overflow row of the previous batch
pub const LAST_BATCH_ROW: &str = "last_batch_row";

pub const DEFAULT_BATCH_SIZE: usize = 100;

/// What each iteration step yields
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IterateMode {
    /// Whole rows as JSON objects
    #[default]
    Row,
    /// The first column of each row
    Column,
}

impl IterateMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Row => "iterate_row",
            Self::Column => "iterate_column",
        }
    }
}

/// Unvalidated iteration settings, e.g. straight from a config map
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IterateRequest {
    pub iterate: Option<String>,
    pub batch_size: Option<i64>,
}

/// Callback invoked once a batch has been consumed
pub type BatchEndFn = Arc<dyn Fn() + Send + Sync>;

/// Validated iteration settings
#[derive(Clone)]
pub struct IterateOptions {
    pub mode: IterateMode,
    pub batch_size: usize,
    pub on_batch_end: Option<BatchEndFn>,
}

impl Default for IterateOptions {
    fn default() -> Self {
        Self {
            mode: IterateMode::Row,
            batch_size: DEFAULT_BATCH_SIZE,
            on_batch_end: None,
        }
    }
}

impl IterateOptions {
    pub fn on_batch_end<F: Fn() + Send + Sync + 'static>(mut self, callback: F) -> Self {
        self.on_batch_end = Some(Arc::new(callback));
        self
    }
}

impl fmt::Debug for IterateOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IterateOptions")
            .field("mode", &self.mode)
            .field("batch_size", &self.batch_size)
            .field("on_batch_end", &self.on_batch_end.is_some())
            .finish()
    }
}

/// Validate iteration settings, filling in defaults
pub fn resolve_iterate_options(request: &IterateRequest) -> QueryResult<IterateOptions> {
    let mode = match request.iterate.as_deref() {
        None | Some("iterate_row") => IterateMode::Row,
        Some("iterate_column") => IterateMode::Column,
        Some(other) => {
            return Err(QueryError::invalid_argument(format!(
                "Unknown iterate mode \"{}\", expected \"iterate_row\" or \"iterate_column\".",
                other
            )))
        }
    };

    let batch_size = match request.batch_size {
        None => DEFAULT_BATCH_SIZE,
        Some(size) if size > 0 => usize::try_from(size).map_err(|_| {
            QueryError::invalid_argument(format!("Batch size {} is too large.", size))
        })?,
        Some(size) => {
            return Err(QueryError::invalid_argument(format!(
                "Batch size must be a positive integer, got {}.",
                size
            )))
        }
    };

    Ok(IterateOptions {
        mode,
        batch_size,
        on_batch_end: None,
    })
}

/// Lazily fetches batches and yields their rows
pub struct BatchIterator {
    executor: Arc<dyn Executor>,
    sql: String,
    params: Parameters,
    options: Options,
    settings: IterateOptions,
    buffer: VecDeque<Value>,
    batch: usize,
    last_batch_row: Value,
    has_more: bool,
    batch_pending: bool,
    done: bool,
}

impl BatchIterator {
    /// Iterate `sql` on `executor`
    ///
    /// Fails with [`QueryError::Logic`] if `params` already uses
    /// [`LAST_BATCH_ROW`].
    pub fn new(
        executor: Arc<dyn Executor>,
        sql: &str,
        params: Parameters,
        options: Options,
        settings: IterateOptions,
    ) -> QueryResult<Self> {
        if params.has(LAST_BATCH_ROW) {
            return Err(QueryError::logic(format!(
                "Parameter \"{}\" is reserved and may not be used.",
                LAST_BATCH_ROW
            )));
        }

        Ok(Self {
            executor,
            sql: sql.trim().trim_end_matches(';').to_string(),
            params,
            options,
            settings,
            buffer: VecDeque::new(),
            batch: 0,
            last_batch_row: Value::Null,
            has_more: true,
            batch_pending: false,
            done: false,
        })
    }

    fn fetch_batch(&mut self) -> QueryResult<()> {
        let size = self.settings.batch_size;
        let sql = format!("{} LIMIT {} OFFSET {}", self.sql, size + 1, self.batch * size);
        let params = self
            .params
            .clone()
            .set(LAST_BATCH_ROW, self.last_batch_row.clone(), None);

        debug!(batch = self.batch, size, "Fetching batch");
        let mut result = self.executor.execute(&sql, &params, &self.options)?;

        self.has_more = false;
        let mut count = 0;
        while let Some(row) = result.fetch_row()? {
            count += 1;
            if count > size {
                self.last_batch_row = Value::Object(row);
                self.has_more = true;
                self.batch += 1;
                break;
            }

            let item = match self.settings.mode {
                IterateMode::Row => Value::Object(row),
                IterateMode::Column => row.into_iter().next().map_or(Value::Null, |(_, value)| value),
            };
            self.buffer.push_back(item);
        }

        self.batch_pending = !self.buffer.is_empty();
        Ok(())
    }

    fn finish_batch(&mut self) {
        if std::mem::take(&mut self.batch_pending) {
            if let Some(callback) = &self.settings.on_batch_end {
                callback();
            }
        }
    }
}

impl Iterator for BatchIterator {
    type Item = QueryResult<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }

            if let Some(item) = self.buffer.pop_front() {
                return Some(Ok(item));
            }

            self.finish_batch();

            if !self.has_more {
                self.done = true;
                return None;
            }

            if let Err(err) = self.fetch_batch() {
                self.done = true;
                return Some(Err(err));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ConnectionExecutor;
    use crate::result::MaterializedResult;
    use crate::test_support::{entries, MockConnection};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use test_case::test_case;

    fn page(ids: &[i64]) -> MaterializedResult {
        MaterializedResult::new(
            vec!["id".into(), "name".into()],
            ids.iter().map(|id| vec![json!(id), json!(format!("n{}", id))]).collect(),
        )
    }

    #[test_case(None, None => (IterateMode::Row, 100) ; "defaults")]
    #[test_case(Some("iterate_column"), Some(5) => (IterateMode::Column, 5) ; "column")]
    #[test_case(Some("iterate_row"), Some(1) => (IterateMode::Row, 1) ; "row")]
    fn test_resolve_options(iterate: Option<&str>, batch_size: Option<i64>) -> (IterateMode, usize) {
        let options = resolve_iterate_options(&IterateRequest {
            iterate: iterate.map(str::to_string),
            batch_size,
        })
        .unwrap();
        (options.mode, options.batch_size)
    }

    #[test_case(Some("iterate_everything"), None ; "unknown mode")]
    #[test_case(None, Some(0) ; "zero batch")]
    #[test_case(None, Some(-3) ; "negative batch")]
    fn test_resolve_options_rejects(iterate: Option<&str>, batch_size: Option<i64>) {
        let err = resolve_iterate_options(&IterateRequest {
            iterate: iterate.map(str::to_string),
            batch_size,
        })
        .unwrap_err();
        assert!(matches!(err, QueryError::InvalidArgument(_)));
    }

    #[test]
    fn test_batches_until_exhausted() {
        let connection = MockConnection::new("db")
            .with_result("SELECT id, name FROM users LIMIT 3 OFFSET 0", page(&[1, 2, 3]))
            .with_result("SELECT id, name FROM users LIMIT 3 OFFSET 2", page(&[3, 4, 5]))
            .with_result("SELECT id, name FROM users LIMIT 3 OFFSET 4", page(&[5]));
        let journal = connection.journal();
        let executor: Arc<dyn Executor> = Arc::new(ConnectionExecutor::new("default", connection));

        let batches = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&batches);
        let settings = IterateOptions {
            mode: IterateMode::Column,
            batch_size: 2,
            on_batch_end: None,
        }
        .on_batch_end(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let ids = BatchIterator::new(
            executor,
            "SELECT id, name FROM users;",
            Parameters::new(),
            Options::new(),
            settings,
        )
        .unwrap()
        .collect::<QueryResult<Vec<_>>>()
        .unwrap();

        assert_eq!(ids, vec![json!(1), json!(2), json!(3), json!(4), json!(5)]);
        assert_eq!(batches.load(Ordering::SeqCst), 3);
        assert_eq!(entries(&journal).len(), 3);
    }

    #[test]
    fn test_exact_multiple_still_reports_last_batch() {
        let connection = MockConnection::new("db")
            .with_result("SELECT id, name FROM users LIMIT 3 OFFSET 0", page(&[1, 2, 3]))
            .with_result("SELECT id, name FROM users LIMIT 3 OFFSET 2", page(&[3, 4]));
        let executor: Arc<dyn Executor> = Arc::new(ConnectionExecutor::new("default", connection));

        let batches = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&batches);
        let settings = IterateOptions {
            batch_size: 2,
            ..IterateOptions::default()
        }
        .on_batch_end(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let rows = BatchIterator::new(
            executor,
            "SELECT id, name FROM users",
            Parameters::new(),
            Options::new(),
            settings,
        )
        .unwrap()
        .collect::<QueryResult<Vec<_>>>()
        .unwrap();

        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0], json!({ "id": 1, "name": "n1" }));
        assert_eq!(batches.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_reserved_parameter() {
        let executor: Arc<dyn Executor> =
            Arc::new(ConnectionExecutor::new("default", MockConnection::new("db")));
        let result = BatchIterator::new(
            executor,
            "SELECT 1",
            Parameters::new().set(LAST_BATCH_ROW, 1, None),
            Options::new(),
            IterateOptions::default(),
        );

        assert!(matches!(result, Err(QueryError::Logic(_))));
    }

    #[test]
    fn test_error_ends_iteration() {
        let executor: Arc<dyn Executor> = Arc::new(ConnectionExecutor::new(
            "default",
            MockConnection::new("db").failing_on("SELECT broken LIMIT 101 OFFSET 0"),
        ));
        let mut iterator = BatchIterator::new(
            executor,
            "SELECT broken",
            Parameters::new(),
            Options::new(),
            IterateOptions::default(),
        )
        .unwrap();

        assert!(matches!(iterator.next(), Some(Err(QueryError::Execution { .. }))));
        assert!(iterator.next().is_none());
    }
}
