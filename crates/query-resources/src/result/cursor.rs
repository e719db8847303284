use crate::error::DriverResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;

/// Driver-side row source
///
/// Implementations hand out rows as positional values in column order and
/// return `Ok(None)` once drained.
pub trait RowCursor: Send {
    /// Column names in select order
    fn columns(&self) -> &[String];

    /// Next row as positional values
    fn fetch_numeric(&mut self) -> DriverResult<Option<Vec<Value>>>;

    /// Number of rows, when the driver knows it without reading them
    fn row_count(&self) -> Option<usize> {
        None
    }
}

/// A fully read result that can be replayed any number of times
///
/// This is what the cache stores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaterializedResult {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl MaterializedResult {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Values of one column across all rows
    pub fn column_values(&self, column: &str) -> Vec<&Value> {
        match self.columns.iter().position(|name| name == column) {
            Some(index) => self.rows.iter().filter_map(|row| row.get(index)).collect(),
            None => Vec::new(),
        }
    }
}

/// In-memory cursor over a [`MaterializedResult`]
#[derive(Debug)]
pub struct BufferedCursor {
    columns: Vec<String>,
    rows: VecDeque<Vec<Value>>,
    total: usize,
}

impl BufferedCursor {
    pub fn new(result: MaterializedResult) -> Self {
        let total = result.rows.len();
        Self {
            columns: result.columns,
            rows: result.rows.into(),
            total,
        }
    }
}

impl RowCursor for BufferedCursor {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn fetch_numeric(&mut self) -> DriverResult<Option<Vec<Value>>> {
        Ok(self.rows.pop_front())
    }

    fn row_count(&self) -> Option<usize> {
        Some(self.total)
    }
}
