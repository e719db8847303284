use crate::error::DriverResult;
use crate::model::{IsolationLevel, Parameters};
use crate::result::RowCursor;

/// Low-level database connection
///
/// This is the seam drivers implement. Failures are reported as
/// [`DriverError`](crate::DriverError); the executor wrapping the connection
/// turns them into pipeline errors with query and connection context.
///
/// Transactions nest: the connection keeps its own depth counter (typically
/// emulating inner levels with savepoints).
pub trait Connection: Send {
    /// Run a statement with named parameters
    fn execute_query(&mut self, sql: &str, params: &Parameters) -> DriverResult<Box<dyn RowCursor>>;

    fn begin_transaction(&mut self) -> DriverResult<()>;

    fn commit(&mut self) -> DriverResult<()>;

    fn rollback(&mut self) -> DriverResult<()>;

    /// Current transaction depth, `0` outside any transaction
    fn transaction_nesting_level(&self) -> usize;

    /// Isolation level new transactions start with
    fn isolation_level(&mut self) -> DriverResult<IsolationLevel>;

    fn set_isolation_level(&mut self, level: IsolationLevel) -> DriverResult<()>;
}
