//! Execution results
//!
//! An [`ExecutionResult`] is a forward-only cursor over rows. Drivers plug in
//! through [`RowCursor`]; everything else (single-row and scalar accessors,
//! counting, materialization for caching) is built on top of two primitives:
//! fetching the next row and fetching the next scalar.
//!
//! End of data is always `None`. A fetched `0`, `""`, `false` or `null` is a
//! value like any other and never terminates iteration.

mod cursor;

pub use cursor::{BufferedCursor, MaterializedResult, RowCursor};

use crate::error::{DriverError, QueryError, QueryResult};
use serde_json::{Map, Value};
use tracing::debug;

/// A row keyed by column name, in column order
pub type Row = Map<String, Value>;

/// Uniform result of an executed query
pub struct ExecutionResult {
    cursor: Box<dyn RowCursor>,
}

impl std::fmt::Debug for ExecutionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionResult")
            .field("columns", &self.cursor.columns())
            .field("row_count", &self.cursor.row_count())
            .finish()
    }
}

impl ExecutionResult {
    /// Wrap a driver cursor
    pub fn new<C: RowCursor + 'static>(cursor: C) -> Self {
        Self {
            cursor: Box::new(cursor),
        }
    }

    /// Wrap a cursor already boxed by a [`Connection`](crate::executor::Connection)
    pub fn from_boxed(cursor: Box<dyn RowCursor>) -> Self {
        Self { cursor }
    }

    /// Result with no columns and no rows
    pub fn empty() -> Self {
        Self::from(MaterializedResult::default())
    }

    /// Column names in select order
    pub fn columns(&self) -> &[String] {
        self.cursor.columns()
    }

    /// Fetch the next row, `None` once the cursor is drained
    pub fn fetch_row(&mut self) -> QueryResult<Option<Row>> {
        let values = self.fetch_values()?;
        Ok(values.map(|values| {
            self.cursor
                .columns()
                .iter()
                .cloned()
                .zip(values)
                .collect::<Row>()
        }))
    }

    /// Fetch the first column of the next row, `None` once the cursor is drained
    pub fn fetch_scalar(&mut self) -> QueryResult<Option<Value>> {
        let values = self.fetch_values()?;
        Ok(values.map(|values| values.into_iter().next().unwrap_or(Value::Null)))
    }

    /// Exactly one scalar
    ///
    /// Fails with [`QueryError::NoResult`] when there is none and with
    /// [`QueryError::NonUniqueResult`] when a second one can be fetched.
    pub fn single_scalar(&mut self) -> QueryResult<Value> {
        let scalar = self
            .fetch_scalar()?
            .ok_or_else(|| QueryError::no_result("Expected one result for given query."))?;

        if self.fetch_scalar()?.is_some() {
            return Err(QueryError::non_unique_result(
                "Expected only one result for given query.",
            ));
        }

        Ok(scalar)
    }

    /// Exactly one scalar, or `default` when there is none
    pub fn single_scalar_or_default(&mut self, default: Value) -> QueryResult<Value> {
        match self.single_scalar() {
            Err(QueryError::NoResult(_)) => Ok(default),
            other => other,
        }
    }

    /// Exactly one scalar, or `None` when there is none
    pub fn single_scalar_or_null(&mut self) -> QueryResult<Option<Value>> {
        match self.single_scalar() {
            Ok(scalar) => Ok(Some(scalar)),
            Err(QueryError::NoResult(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// First column of every remaining row
    pub fn scalar_list(&mut self) -> QueryResult<Vec<Value>> {
        let mut scalars = Vec::new();
        while let Some(scalar) = self.fetch_scalar()? {
            scalars.push(scalar);
        }
        Ok(scalars)
    }

    /// First column of every remaining row, or `default` when there are none
    pub fn scalar_list_or_default(&mut self, default: Vec<Value>) -> QueryResult<Vec<Value>> {
        let scalars = self.scalar_list()?;
        Ok(if scalars.is_empty() { default } else { scalars })
    }

    /// Exactly one row
    pub fn single_row(&mut self) -> QueryResult<Row> {
        let row = self
            .fetch_row()?
            .ok_or_else(|| QueryError::no_result("Expected one result for given query."))?;

        if self.fetch_row()?.is_some() {
            return Err(QueryError::non_unique_result(
                "Expected only one result for given query.",
            ));
        }

        Ok(row)
    }

    /// Exactly one row, or `default` when there is none
    pub fn single_row_or_default(&mut self, default: Row) -> QueryResult<Row> {
        match self.single_row() {
            Err(QueryError::NoResult(_)) => Ok(default),
            other => other,
        }
    }

    /// Exactly one row, or `None` when there is none
    pub fn single_row_or_null(&mut self) -> QueryResult<Option<Row>> {
        match self.single_row() {
            Ok(row) => Ok(Some(row)),
            Err(QueryError::NoResult(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// All remaining rows
    pub fn rows(&mut self) -> QueryResult<Vec<Row>> {
        self.iter().collect()
    }

    /// Number of rows
    ///
    /// Cursors that cannot report a count are drained into a buffered result,
    /// which then replaces the cursor so the rows can still be read.
    pub fn count(&mut self) -> QueryResult<usize> {
        if let Some(count) = self.cursor.row_count() {
            return Ok(count);
        }

        debug!("Cursor cannot report row count, buffering remaining rows");
        let buffered = self.drain()?;
        let count = buffered.len();
        self.cursor = Box::new(BufferedCursor::new(buffered));
        Ok(count)
    }

    /// Drain the remaining rows into a replayable result
    pub fn materialize(mut self) -> QueryResult<MaterializedResult> {
        self.drain()
    }

    /// Borrowing iterator over the remaining rows
    pub fn iter(&mut self) -> Rows<'_> {
        Rows { result: self }
    }

    fn fetch_values(&mut self) -> QueryResult<Option<Vec<Value>>> {
        self.cursor.fetch_numeric().map_err(read_error)
    }

    fn drain(&mut self) -> QueryResult<MaterializedResult> {
        let columns = self.cursor.columns().to_vec();
        let mut rows = Vec::new();
        while let Some(values) = self.fetch_values()? {
            rows.push(values);
        }
        Ok(MaterializedResult::new(columns, rows))
    }
}

impl From<MaterializedResult> for ExecutionResult {
    fn from(result: MaterializedResult) -> Self {
        Self::new(BufferedCursor::new(result))
    }
}

fn read_error(err: DriverError) -> QueryError {
    QueryError::driver(
        format!("An error occurred while reading query result: {}", err.message()),
        err,
    )
}

/// Borrowing row iterator
pub struct Rows<'a> {
    result: &'a mut ExecutionResult,
}

impl Iterator for Rows<'_> {
    type Item = QueryResult<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        self.result.fetch_row().transpose()
    }
}

/// Owning row iterator
pub struct IntoRows {
    result: ExecutionResult,
}

impl Iterator for IntoRows {
    type Item = QueryResult<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        self.result.fetch_row().transpose()
    }
}

impl IntoIterator for ExecutionResult {
    type Item = QueryResult<Row>;
    type IntoIter = IntoRows;

    fn into_iter(self) -> Self::IntoIter {
        IntoRows { result: self }
    }
}

impl<'a> IntoIterator for &'a mut ExecutionResult {
    type Item = QueryResult<Row>;
    type IntoIter = Rows<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
